use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    compare_results, cosine_similarity, sanitize_collection_name, Chunk, Document, SearchResult,
    StoreStats, VectorStore,
};
use crate::cancel::CancelToken;
use crate::error::{GrepaiError, Result};

/// Relational backend on SQLite. Each project (or workspace) gets its own
/// sanitized table prefix, embeddings are little-endian f32 BLOBs, and the
/// path-prefix filter is pushed down as a `LIKE` clause; similarity
/// ordering happens in Rust over the candidate rows.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: PathBuf,
    prefix: String,
    dimensions: usize,
    closed: AtomicBool,
}

impl SqliteStore {
    pub fn open(path: &Path, ident: &str, dimensions: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;

        let store = Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
            prefix: sanitize_collection_name(ident),
            dimensions,
            closed: AtomicBool::new(false),
        };
        store.init_schema()?;
        store.check_dimensions()?;
        Ok(store)
    }

    fn guard(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GrepaiError::store("store is closed"));
        }
        Ok(())
    }

    fn table(&self, suffix: &str) -> String {
        format!("{}_{}", self.prefix, suffix)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(&format!(
            "
            CREATE TABLE IF NOT EXISTS {chunks} (
                id TEXT PRIMARY KEY,
                file_path TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                hash TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS {chunks}_file_path ON {chunks}(file_path);

            CREATE TABLE IF NOT EXISTS {documents} (
                path TEXT PRIMARY KEY,
                hash TEXT NOT NULL,
                mod_time TEXT NOT NULL,
                chunk_ids TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS {meta} (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
            chunks = self.table("chunks"),
            documents = self.table("documents"),
            meta = self.table("meta"),
        ))?;
        Ok(())
    }

    fn check_dimensions(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let stored: Option<String> = conn
            .query_row(
                &format!(
                    "SELECT value FROM {} WHERE key = 'dimensions'",
                    self.table("meta")
                ),
                [],
                |row| row.get(0),
            )
            .optional()?;

        match stored {
            Some(value) => {
                let stored_dims: usize = value.parse().map_err(|_| {
                    GrepaiError::store(format!("corrupted dimension metadata: '{}'", value))
                })?;
                if stored_dims != self.dimensions {
                    return Err(GrepaiError::store(format!(
                        "index has {}-dimensional vectors but the embedder produces {}; \
                         re-run `grepai index --force`",
                        stored_dims, self.dimensions
                    )));
                }
            }
            None => {
                conn.execute(
                    &format!(
                        "INSERT OR REPLACE INTO {} (key, value) VALUES ('dimensions', ?1)",
                        self.table("meta")
                    ),
                    params![self.dimensions.to_string()],
                )?;
            }
        }
        Ok(())
    }

    fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
        Ok(Chunk {
            id: row.get(0)?,
            file_path: row.get(1)?,
            start_line: row.get::<_, i64>(2)? as usize,
            end_line: row.get::<_, i64>(3)? as usize,
            content: row.get(4)?,
            vector: bytes_to_floats(&row.get::<_, Vec<u8>>(5)?),
            hash: row.get(6)?,
            updated_at: parse_timestamp(&row.get::<_, String>(7)?),
        })
    }
}

impl VectorStore for SqliteStore {
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

        let touched: std::collections::HashSet<&str> =
            chunks.iter().map(|c| c.file_path.as_str()).collect();

        // One transaction replaces every touched file, so a concurrent
        // search never observes a half-swapped file.
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut delete = tx.prepare(&format!(
                "DELETE FROM {} WHERE file_path = ?1",
                self.table("chunks")
            ))?;
            for path in &touched {
                delete.execute(params![path])?;
            }

            let mut stmt = tx.prepare(&format!(
                "INSERT OR REPLACE INTO {}
                 (id, file_path, start_line, end_line, content, embedding, hash, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                self.table("chunks")
            ))?;
            for chunk in chunks {
                stmt.execute(params![
                    chunk.id,
                    chunk.file_path,
                    chunk.start_line as i64,
                    chunk.end_line as i64,
                    chunk.content,
                    floats_to_bytes(&chunk.vector),
                    chunk.hash,
                    chunk.updated_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_by_file(&self, token: &CancelToken, file_path: &str) -> Result<()> {
        token.checkpoint()?;
        self.guard()?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!("DELETE FROM {} WHERE file_path = ?1", self.table("chunks")),
            params![file_path],
        )?;
        Ok(())
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

        let conn = self.conn.lock().unwrap();
        let base = format!(
            "SELECT id, file_path, start_line, end_line, content, embedding, hash, updated_at
             FROM {}",
            self.table("chunks")
        );

        let mut results: Vec<SearchResult> = Vec::new();
        let mut push = |chunk: Chunk| {
            results.push(SearchResult {
                score: cosine_similarity(query, &chunk.vector),
                chunk,
            });
        };

        match path_prefix {
            Some(prefix) => {
                let mut stmt =
                    conn.prepare(&format!("{} WHERE file_path LIKE ?1 || '%'", base))?;
                let rows = stmt.query_map(params![prefix], Self::row_to_chunk)?;
                for row in rows {
                    push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(&base)?;
                let rows = stmt.query_map([], Self::row_to_chunk)?;
                for row in rows {
                    push(row?);
                }
            }
        }

        results.sort_by(compare_results);
        results.truncate(limit);
        Ok(results)
    }

    fn get_document(&self, token: &CancelToken, path: &str) -> Result<Option<Document>> {
        token.checkpoint()?;
        self.guard()?;

        let conn = self.conn.lock().unwrap();
        let row: Option<(String, String, String, String)> = conn
            .query_row(
                &format!(
                    "SELECT path, hash, mod_time, chunk_ids FROM {} WHERE path = ?1",
                    self.table("documents")
                ),
                params![path],
                |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                },
            )
            .optional()?;

        Ok(row.map(|(path, hash, mod_time, chunk_ids)| Document {
            path,
            hash,
            mod_time: parse_timestamp(&mod_time),
            chunk_ids: serde_json::from_str(&chunk_ids).unwrap_or_default(),
        }))
    }

    fn save_document(&self, token: &CancelToken, doc: Document) -> Result<()> {
        token.checkpoint()?;
        self.guard()?;

        let chunk_ids = serde_json::to_string(&doc.chunk_ids)
            .map_err(|e| GrepaiError::store(e.to_string()))?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (path, hash, mod_time, chunk_ids)
                 VALUES (?1, ?2, ?3, ?4)",
                self.table("documents")
            ),
            params![doc.path, doc.hash, doc.mod_time.to_rfc3339(), chunk_ids],
        )?;
        Ok(())
    }

    fn delete_document(&self, token: &CancelToken, path: &str) -> Result<()> {
        token.checkpoint()?;
        self.guard()?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!("DELETE FROM {} WHERE path = ?1", self.table("documents")),
            params![path],
        )?;
        Ok(())
    }

    fn list_documents(&self, token: &CancelToken) -> Result<Vec<String>> {
        token.checkpoint()?;
        self.guard()?;

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT path FROM {} ORDER BY path",
            self.table("documents")
        ))?;
        let rows = stmt.query_map([], |row| row.get(0))?;

        let mut paths = Vec::new();
        for row in rows {
            paths.push(row?);
        }
        Ok(paths)
    }

    fn load(&self, token: &CancelToken) -> Result<()> {
        token.checkpoint()?;
        self.guard()
        // Durable at commit; nothing to hydrate.
    }

    fn persist(&self, token: &CancelToken) -> Result<()> {
        token.checkpoint()?;
        self.guard()
        // Durable at commit; nothing to flush.
    }

    fn stats(&self, token: &CancelToken) -> Result<StoreStats> {
        token.checkpoint()?;
        self.guard()?;

        let conn = self.conn.lock().unwrap();
        let total_chunks: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table("chunks")),
            [],
            |row| row.get(0),
        )?;
        let total_files: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table("documents")),
            [],
            |row| row.get(0),
        )?;
        let last_updated: Option<String> = conn.query_row(
            &format!("SELECT MAX(updated_at) FROM {}", self.table("chunks")),
            [],
            |row| row.get(0),
        )?;

        Ok(StoreStats {
            total_files: total_files as usize,
            total_chunks: total_chunks as usize,
            index_size_bytes: fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0),
            last_updated: last_updated.map(|s| parse_timestamp(&s)),
        })
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn floats_to_bytes(floats: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(floats.len() * 4);
    for f in floats {
        bytes.extend_from_slice(&f.to_le_bytes());
    }
    bytes
}

fn bytes_to_floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::make_test_chunk;
    use uuid::Uuid;

    fn temp_store() -> (SqliteStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!("grepai_sqlite_test_{}", Uuid::new_v4()));
        let path = dir.join("index.db");
        let store = SqliteStore::open(&path, "/tmp/demo-project", 3).unwrap();
        (store, dir)
    }

    #[test]
    fn table_prefix_is_sanitized() {
        let (store, dir) = temp_store();
        assert_eq!(store.prefix, "_tmp_demo_project");
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn chunks_roundtrip_through_blobs() {
        let (store, dir) = temp_store();
        let token = CancelToken::new();

        let mut chunk = make_test_chunk("c1", "src/auth.rs", 1);
        chunk.vector = vec![0.25, -1.5, 3.0];
        store.save_chunks(&token, &[chunk.clone()]).unwrap();

        let results = store.search(&token, &[0.25, -1.5, 3.0], 5, None).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.vector, chunk.vector);
        assert_eq!(results[0].chunk.content, chunk.content);
        assert!((results[0].score - 1.0).abs() < 1e-6);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn prefix_pushdown_filters_rows() {
        let (store, dir) = temp_store();
        let token = CancelToken::new();

        store
            .save_chunks(
                &token,
                &[
                    make_test_chunk("a", "app/a.rs", 1),
                    make_test_chunk("b", "lib/b.rs", 1),
                ],
            )
            .unwrap();

        let results = store
            .search(&token, &[1.0, 0.0, 0.0], 10, Some("app/"))
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.file_path, "app/a.rs");

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn replace_all_chunks_for_file_is_transactional() {
        let (store, dir) = temp_store();
        let token = CancelToken::new();

        store
            .save_chunks(
                &token,
                &[
                    make_test_chunk("old1", "a.rs", 1),
                    make_test_chunk("old2", "a.rs", 11),
                ],
            )
            .unwrap();

        store.delete_by_file(&token, "a.rs").unwrap();
        store
            .save_chunks(&token, &[make_test_chunk("new1", "a.rs", 1)])
            .unwrap();

        let results = store.search(&token, &[1.0, 0.0, 0.0], 10, None).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.id, "new1");

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn documents_roundtrip_with_chunk_ids() {
        let (store, dir) = temp_store();
        let token = CancelToken::new();

        let doc = Document {
            path: "src/lib.rs".to_string(),
            hash: "abc".to_string(),
            mod_time: Utc::now(),
            chunk_ids: vec!["c1".to_string(), "c2".to_string()],
        };
        store.save_document(&token, doc.clone()).unwrap();

        let loaded = store.get_document(&token, "src/lib.rs").unwrap().unwrap();
        assert_eq!(loaded.chunk_ids, doc.chunk_ids);
        assert_eq!(loaded.hash, doc.hash);

        store.delete_document(&token, "src/lib.rs").unwrap();
        assert!(store.get_document(&token, "src/lib.rs").unwrap().is_none());
        assert!(store.list_documents(&token).unwrap().is_empty());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn reopening_with_other_dimensions_fails() {
        let dir = std::env::temp_dir().join(format!("grepai_sqlite_dims_{}", Uuid::new_v4()));
        let path = dir.join("index.db");

        let store = SqliteStore::open(&path, "proj", 3).unwrap();
        store.close().unwrap();

        let err = SqliteStore::open(&path, "proj", 8).unwrap_err();
        assert!(err.to_string().contains("dimension"));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn stats_count_rows() {
        let (store, dir) = temp_store();
        let token = CancelToken::new();

        store
            .save_chunks(&token, &[make_test_chunk("c1", "a.rs", 1)])
            .unwrap();
        store
            .save_document(
                &token,
                Document {
                    path: "a.rs".to_string(),
                    hash: "h".to_string(),
                    mod_time: Utc::now(),
                    chunk_ids: vec!["c1".to_string()],
                },
            )
            .unwrap();

        let stats = store.stats(&token).unwrap();
        assert_eq!(stats.total_chunks, 1);
        assert_eq!(stats.total_files, 1);
        assert!(stats.last_updated.is_some());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn closed_store_rejects_operations() {
        let (store, dir) = temp_store();
        store.close().unwrap();
        assert!(store.list_documents(&CancelToken::new()).is_err());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn floats_bytes_roundtrip() {
        let original = vec![1.0f32, -2.5, 0.0, 3.25];
        assert_eq!(bytes_to_floats(&floats_to_bytes(&original)), original);
    }
}
