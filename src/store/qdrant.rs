use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::{Chunk, Document, SearchResult, StoreStats, VectorStore};
use crate::cancel::CancelToken;
use crate::error::{GrepaiError, Result};

const STORE_TIMEOUT_SECS: u64 = 10;
const MAX_POINTS_PER_REQUEST: usize = 100;
const SCROLL_PAGE_SIZE: usize = 1000;

/// Remote vector-database backend speaking the Qdrant REST API.
///
/// Chunks and document metadata share one collection, told apart by a
/// `kind` payload marker; documents carry a sentinel vector and are
/// filtered out of similarity queries. Point ids are UUIDs derived
/// deterministically from chunk ids so upserts stay idempotent.
pub struct QdrantStore {
    agent: ureq::Agent,
    base_url: String,
    collection: String,
    api_key: Option<String>,
    dimensions: usize,
    closed: AtomicBool,
}

#[derive(Serialize)]
struct PointStruct {
    id: String,
    vector: Vec<f32>,
    payload: Value,
}

#[derive(Deserialize)]
struct ScoredPoint {
    score: f32,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Deserialize)]
struct RetrievedPoint {
    #[serde(default)]
    payload: Option<Value>,
}

impl QdrantStore {
    pub fn connect(
        endpoint: &str,
        port: u16,
        tls: bool,
        collection: String,
        api_key: &str,
        dimensions: usize,
    ) -> Result<Self> {
        let scheme = if tls { "https" } else { "http" };
        let store = Self {
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(STORE_TIMEOUT_SECS))
                .build(),
            base_url: format!("{}://{}:{}", scheme, endpoint, port),
            collection,
            api_key: if api_key.is_empty() {
                None
            } else {
                Some(api_key.to_string())
            },
            dimensions,
            closed: AtomicBool::new(false),
        };
        store.ensure_collection()?;
        Ok(store)
    }

    fn guard(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GrepaiError::store("store is closed"));
        }
        Ok(())
    }

    fn url(&self, suffix: &str) -> String {
        format!(
            "{}/collections/{}{}",
            self.base_url, self.collection, suffix
        )
    }

    fn request(&self, method: &str, url: &str) -> ureq::Request {
        let mut request = self.agent.request(method, url);
        if let Some(key) = &self.api_key {
            request = request.set("api-key", key);
        }
        request
    }

    fn send(&self, method: &str, suffix: &str, body: &Value) -> Result<Value> {
        let url = self.url(suffix);
        let response = self
            .request(method, &url)
            .send_json(body)
            .map_err(|e| map_qdrant_error("request", e))?;
        response
            .into_json()
            .map_err(|e| GrepaiError::store(format!("qdrant response parse error: {}", e)))
    }

    fn ensure_collection(&self) -> Result<()> {
        let url = self.url("");
        match self.request("GET", &url).call() {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(404, _)) => {
                let body = json!({
                    "vectors": { "size": self.dimensions, "distance": "Cosine" }
                });
                self.request("PUT", &url)
                    .send_json(&body)
                    .map_err(|e| map_qdrant_error("create collection", e))?;
                Ok(())
            }
            Err(e) => Err(map_qdrant_error("check collection", e)),
        }
    }

    fn upsert_points(&self, points: Vec<PointStruct>) -> Result<()> {
        let body = json!({ "points": points });
        self.send("PUT", "/points?wait=true", &body)?;
        Ok(())
    }

    fn delete_chunks_of_file(&self, file_path: &str) -> Result<()> {
        let body = json!({
            "filter": {
                "must": [
                    { "key": "kind", "match": { "value": "chunk" } },
                    { "key": "file_path", "match": { "value": file_path } }
                ]
            }
        });
        self.send("POST", "/points/delete?wait=true", &body)?;
        Ok(())
    }

    /// Sentinel for document points; never surfaces in chunk searches
    /// because of the `kind` filter.
    fn document_vector(&self) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimensions];
        if let Some(first) = vector.first_mut() {
            *first = 1.0;
        }
        vector
    }

    fn scroll_documents(&self, token: &CancelToken) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        let mut offset: Option<Value> = None;

        loop {
            token.checkpoint()?;
            let mut body = json!({
                "filter": kind_filter("document"),
                "limit": SCROLL_PAGE_SIZE,
                "with_payload": true,
                "with_vector": false,
            });
            if let Some(next) = &offset {
                body["offset"] = next.clone();
            }

            let response = self.send("POST", "/points/scroll", &body)?;
            let result = &response["result"];
            if let Some(points) = result["points"].as_array() {
                for point in points {
                    if let Some(doc) = payload_to_document(point.get("payload")) {
                        documents.push(doc);
                    }
                }
            }

            match result.get("next_page_offset") {
                Some(next) if !next.is_null() => offset = Some(next.clone()),
                _ => break,
            }
        }

        Ok(documents)
    }
}

impl VectorStore for QdrantStore {
    fn save_chunks(&self, token: &CancelToken, chunks: &[Chunk]) -> Result<()> {
        token.checkpoint()?;
        self.guard()?;

        for chunk in chunks {
            if chunk.vector.len() != self.dimensions {
                return Err(GrepaiError::store(format!(
                    "chunk {} has {} dimensions, store expects {}",
                    chunk.id,
                    chunk.vector.len(),
                    self.dimensions
                )));
            }
        }

        // Stale chunks of the touched files go first; point ids are
        // content-derived, so a changed file would otherwise leave orphans.
        let touched: std::collections::HashSet<&str> =
            chunks.iter().map(|c| c.file_path.as_str()).collect();
        for path in touched {
            token.checkpoint()?;
            self.delete_chunks_of_file(path)?;
        }

        for batch in chunks.chunks(MAX_POINTS_PER_REQUEST) {
            token.checkpoint()?;
            let points: Vec<PointStruct> = batch
                .iter()
                .map(|chunk| PointStruct {
                    id: chunk_point_id(&chunk.id),
                    vector: chunk.vector.clone(),
                    payload: json!({
                        "kind": "chunk",
                        "chunk_id": chunk.id,
                        "file_path": chunk.file_path,
                        "start_line": chunk.start_line,
                        "end_line": chunk.end_line,
                        "content": chunk.content,
                        "hash": chunk.hash,
                        "updated_at": chunk.updated_at.to_rfc3339(),
                    }),
                })
                .collect();
            self.upsert_points(points)?;
        }
        Ok(())
    }

    fn delete_by_file(&self, token: &CancelToken, file_path: &str) -> Result<()> {
        token.checkpoint()?;
        self.guard()?;
        self.delete_chunks_of_file(file_path)
    }

    fn search(
        &self,
        token: &CancelToken,
        query: &[f32],
        limit: usize,
        path_prefix: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        token.checkpoint()?;
        self.guard()?;

        let body = json!({
            "vector": query,
            "limit": limit,
            "with_payload": true,
            "filter": kind_filter("chunk"),
        });
        let response = self.send("POST", "/points/search", &body)?;

        let points: Vec<ScoredPoint> =
            serde_json::from_value(response["result"].clone()).unwrap_or_default();

        let mut results = Vec::new();
        for point in points {
            let Some(chunk) = payload_to_chunk(point.payload.as_ref()) else {
                continue;
            };
            // Prefix filtering for this backend happens client-side.
            if let Some(prefix) = path_prefix {
                if !chunk.file_path.starts_with(prefix) {
                    continue;
                }
            }
            results.push(SearchResult {
                score: point.score.clamp(-1.0, 1.0),
                chunk,
            });
        }
        Ok(results)
    }

    fn get_document(&self, token: &CancelToken, path: &str) -> Result<Option<Document>> {
        token.checkpoint()?;
        self.guard()?;

        let body = json!({
            "ids": [document_point_id(path)],
            "with_payload": true,
            "with_vector": false,
        });
        let response = self.send("POST", "/points", &body)?;
        let points: Vec<RetrievedPoint> =
            serde_json::from_value(response["result"].clone()).unwrap_or_default();

        Ok(points
            .into_iter()
            .next()
            .and_then(|p| payload_to_document(p.payload.as_ref())))
    }

    fn save_document(&self, token: &CancelToken, doc: Document) -> Result<()> {
        token.checkpoint()?;
        self.guard()?;

        let point = PointStruct {
            id: document_point_id(&doc.path),
            vector: self.document_vector(),
            payload: json!({
                "kind": "document",
                "path": doc.path,
                "hash": doc.hash,
                "mod_time": doc.mod_time.to_rfc3339(),
                "chunk_ids": doc.chunk_ids,
            }),
        };
        self.upsert_points(vec![point])
    }

    fn delete_document(&self, token: &CancelToken, path: &str) -> Result<()> {
        token.checkpoint()?;
        self.guard()?;

        let body = json!({ "points": [document_point_id(path)] });
        self.send("POST", "/points/delete?wait=true", &body)?;
        Ok(())
    }

    fn list_documents(&self, token: &CancelToken) -> Result<Vec<String>> {
        token.checkpoint()?;
        self.guard()?;

        let mut paths: Vec<String> = self
            .scroll_documents(token)?
            .into_iter()
            .map(|doc| doc.path)
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn load(&self, token: &CancelToken) -> Result<()> {
        token.checkpoint()?;
        self.guard()
        // Collection existence is verified at connect time.
    }

    fn persist(&self, token: &CancelToken) -> Result<()> {
        token.checkpoint()?;
        self.guard()
        // Upserts are sent with wait=true; the server is authoritative.
    }

    fn stats(&self, token: &CancelToken) -> Result<StoreStats> {
        token.checkpoint()?;
        self.guard()?;

        let url = self.url("");
        let response: Value = self
            .request("GET", &url)
            .call()
            .map_err(|e| map_qdrant_error("collection info", e))?
            .into_json()
            .map_err(|e| GrepaiError::store(format!("qdrant response parse error: {}", e)))?;

        let points_count = response["result"]["points_count"].as_u64().unwrap_or(0) as usize;
        let total_files = self.scroll_documents(token)?.len();

        Ok(StoreStats {
            total_files,
            total_chunks: points_count.saturating_sub(total_files),
            index_size_bytes: 0,
            last_updated: None,
        })
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn kind_filter(kind: &str) -> Value {
    json!({ "must": [ { "key": "kind", "match": { "value": kind } } ] })
}

/// Deterministic UUID for a chunk id, so re-upserts overwrite in place.
fn chunk_point_id(chunk_id: &str) -> String {
    derive_uuid(chunk_id.as_bytes())
}

fn document_point_id(path: &str) -> String {
    derive_uuid(format!("document:{}", path).as_bytes())
}

fn derive_uuid(seed: &[u8]) -> String {
    let digest = blake3::hash(seed);
    let bytes: [u8; 16] = digest.as_bytes()[..16].try_into().unwrap();
    Uuid::from_bytes(bytes).to_string()
}

fn map_qdrant_error(action: &str, err: ureq::Error) -> GrepaiError {
    match err {
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            GrepaiError::store(format!(
                "qdrant {} failed with status {}: {}",
                action, status, body
            ))
        }
        ureq::Error::Transport(transport) => {
            GrepaiError::store(format!("qdrant {} failed: {}", action, transport))
        }
    }
}

fn payload_to_chunk(payload: Option<&Value>) -> Option<Chunk> {
    let payload = payload?;
    Some(Chunk {
        id: payload["chunk_id"].as_str()?.to_string(),
        file_path: payload["file_path"].as_str()?.to_string(),
        start_line: payload["start_line"].as_u64()? as usize,
        end_line: payload["end_line"].as_u64()? as usize,
        content: payload["content"].as_str().unwrap_or_default().to_string(),
        vector: Vec::new(),
        hash: payload["hash"].as_str().unwrap_or_default().to_string(),
        updated_at: parse_timestamp(payload["updated_at"].as_str()),
    })
}

fn payload_to_document(payload: Option<&Value>) -> Option<Document> {
    let payload = payload?;
    if payload["kind"].as_str() != Some("document") {
        return None;
    }
    let chunk_ids = payload["chunk_ids"]
        .as_array()
        .map(|ids| {
            ids.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    Some(Document {
        path: payload["path"].as_str()?.to_string(),
        hash: payload["hash"].as_str().unwrap_or_default().to_string(),
        mod_time: parse_timestamp(payload["mod_time"].as_str()),
        chunk_ids,
    })
}

fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_ids_are_deterministic_uuids() {
        let a = chunk_point_id("chunk-1");
        let b = chunk_point_id("chunk-1");
        let c = chunk_point_id("chunk-2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn document_ids_do_not_collide_with_chunk_ids() {
        assert_ne!(chunk_point_id("src/a.rs"), document_point_id("src/a.rs"));
    }

    #[test]
    fn chunk_payload_roundtrip() {
        let payload = json!({
            "kind": "chunk",
            "chunk_id": "abc",
            "file_path": "src/auth.rs",
            "start_line": 10,
            "end_line": 42,
            "content": "File: src/auth.rs\n\nfn login() {}",
            "hash": "deadbeef",
            "updated_at": "2025-06-01T12:00:00+00:00",
        });
        let chunk = payload_to_chunk(Some(&payload)).unwrap();
        assert_eq!(chunk.id, "abc");
        assert_eq!(chunk.file_path, "src/auth.rs");
        assert_eq!(chunk.start_line, 10);
        assert_eq!(chunk.end_line, 42);
        assert_eq!(chunk.hash, "deadbeef");
    }

    #[test]
    fn malformed_chunk_payload_is_dropped() {
        assert!(payload_to_chunk(None).is_none());
        assert!(payload_to_chunk(Some(&json!({ "kind": "chunk" }))).is_none());
    }

    #[test]
    fn document_payload_requires_document_kind() {
        let payload = json!({
            "kind": "chunk",
            "path": "a.rs",
        });
        assert!(payload_to_document(Some(&payload)).is_none());

        let payload = json!({
            "kind": "document",
            "path": "a.rs",
            "hash": "h1",
            "mod_time": "2025-06-01T12:00:00+00:00",
            "chunk_ids": ["c1", "c2"],
        });
        let doc = payload_to_document(Some(&payload)).unwrap();
        assert_eq!(doc.path, "a.rs");
        assert_eq!(doc.chunk_ids, vec!["c1", "c2"]);
    }

    #[test]
    fn kind_filter_shape_matches_qdrant_api() {
        let filter = kind_filter("chunk");
        assert_eq!(filter["must"][0]["key"], "kind");
        assert_eq!(filter["must"][0]["match"]["value"], "chunk");
    }
}
