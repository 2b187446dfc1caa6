mod binary;
mod qdrant;
mod sqlite;

pub use binary::BinaryStore;
pub use qdrant::QdrantStore;
pub use sqlite::SqliteStore;

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::config::{self, StoreBackend, StoreConfig};
use crate::error::Result;

/// A contiguous slice of a source file with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub vector: Vec<f32>,
    pub hash: String,
    pub updated_at: DateTime<Utc>,
}

/// Metadata for one indexed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub path: String,
    pub hash: String,
    pub mod_time: DateTime<Utc>,
    pub chunk_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_files: usize,
    pub total_chunks: usize,
    pub index_size_bytes: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Persistence backend owning every chunk and document.
///
/// Every operation checks the cancellation token at its I/O boundaries,
/// and every call after `close` fails.
pub trait VectorStore: Send + Sync {
    /// Replace all stored chunks for every `file_path` appearing in the
    /// batch. The swap is atomic with respect to concurrent `search`
    /// calls: a search observes the old set or the new set, never a mix.
    fn save_chunks(&self, token: &CancelToken, chunks: &[Chunk]) -> Result<()>;

    fn delete_by_file(&self, token: &CancelToken, file_path: &str) -> Result<()>;

    /// Top-`limit` chunks by cosine similarity, ordered by descending score
    /// with `(file_path, start_line)` as the tie-break. Backends push
    /// `path_prefix` down when they can; the searcher re-applies it either
    /// way.
    fn search(
        &self,
        token: &CancelToken,
        query: &[f32],
        limit: usize,
        path_prefix: Option<&str>,
    ) -> Result<Vec<SearchResult>>;

    fn get_document(&self, token: &CancelToken, path: &str) -> Result<Option<Document>>;

    fn save_document(&self, token: &CancelToken, doc: Document) -> Result<()>;

    fn delete_document(&self, token: &CancelToken, path: &str) -> Result<()>;

    /// All known document paths, sorted.
    fn list_documents(&self, token: &CancelToken) -> Result<Vec<String>>;

    /// Hydrate from durable storage. A missing index is not an error.
    fn load(&self, token: &CancelToken) -> Result<()>;

    /// Flush to durable storage.
    fn persist(&self, token: &CancelToken) -> Result<()>;

    fn stats(&self, token: &CancelToken) -> Result<StoreStats>;

    fn close(&self) -> Result<()>;
}

/// Cosine similarity with zero vectors scored 0.0, never NaN.
pub fn cosine_similarity(lhs: &[f32], rhs: &[f32]) -> f32 {
    if lhs.len() != rhs.len() || lhs.is_empty() {
        return 0.0;
    }

    let dot: f32 = lhs.iter().zip(rhs).map(|(a, b)| a * b).sum();
    let norm_l: f32 = lhs.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_r: f32 = rhs.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_l == 0.0 || norm_r == 0.0 {
        return 0.0;
    }
    (dot / (norm_l * norm_r)).clamp(-1.0, 1.0)
}

/// Collection and table names tolerate only `[A-Za-z0-9_]`.
pub fn sanitize_collection_name(raw: &str) -> String {
    let mut name: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

/// Construct the configured backend. `ident` names the project (or
/// workspace) for collection/table naming; `base_dir` anchors relative
/// file-backed defaults (normally `<root>/.grepai`).
pub fn open_store(
    cfg: &StoreConfig,
    ident: &str,
    base_dir: &Path,
    dimensions: usize,
) -> Result<Box<dyn VectorStore>> {
    let store: Box<dyn VectorStore> = match cfg.backend {
        StoreBackend::Binary => {
            let path = cfg
                .binary
                .path
                .clone()
                .unwrap_or_else(|| base_dir.join("index.bin"));
            Box::new(BinaryStore::new(path, dimensions))
        }
        StoreBackend::Sqlite => {
            let path = cfg
                .sqlite
                .path
                .clone()
                .unwrap_or_else(|| base_dir.join("index.db"));
            Box::new(SqliteStore::open(&path, ident, dimensions)?)
        }
        StoreBackend::Qdrant => {
            let collection = if cfg.qdrant.collection.is_empty() {
                sanitize_collection_name(ident)
            } else {
                sanitize_collection_name(&cfg.qdrant.collection)
            };
            Box::new(QdrantStore::connect(
                &cfg.qdrant.endpoint,
                cfg.qdrant.port,
                cfg.qdrant.tls,
                collection,
                &cfg.qdrant.api_key,
                dimensions,
            )?)
        }
    };
    Ok(store)
}

/// Backend factory for a single project rooted at `project_root`.
pub fn open_project_store(
    project_root: &Path,
    cfg: &StoreConfig,
    dimensions: usize,
) -> Result<Box<dyn VectorStore>> {
    let ident = project_root.to_string_lossy();
    open_store(cfg, &ident, &config::grepai_dir(project_root), dimensions)
}

pub(crate) fn compare_results(a: &SearchResult, b: &SearchResult) -> std::cmp::Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| a.chunk.file_path.cmp(&b.chunk.file_path))
        .then_with(|| a.chunk.start_line.cmp(&b.chunk.start_line))
}

#[cfg(test)]
pub(crate) fn make_test_chunk(id: &str, file_path: &str, start_line: usize) -> Chunk {
    Chunk {
        id: id.to_string(),
        file_path: file_path.to_string(),
        start_line,
        end_line: start_line + 9,
        content: format!("File: {}\n\nfn body_{}() {{}}", file_path, start_line),
        vector: vec![1.0, 0.0, 0.0],
        hash: format!("hash_{}", id),
        updated_at: Utc::now(),
    }
}
