use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::chunker::{ChunkInfo, Chunker};
use crate::embedding::Embedder;
use crate::error::{GrepaiError, Result};
use crate::scanner::{FileInfo, Scanner};
use crate::store::{Chunk, Document, VectorStore};

const INDEX_TEMPLATE: &str = "{prefix} Indexing files ({pos}/{len}, {percent}%) • {msg}";

/// Outcome of a full indexing run.
#[derive(Debug, Clone, Default)]
pub struct IndexStats {
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub chunks_created: usize,
    pub files_removed: usize,
    pub duration: Duration,
}

/// Drives the scan → chunk → embed → store pipeline and keeps the store
/// consistent with the tree. Best-effort per file: one broken file never
/// abandons the run.
pub struct Indexer {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    chunker: Chunker,
    scanner: Scanner,
    namespace: Option<String>,
    show_progress: bool,
}

struct PreparedFile {
    file: FileInfo,
    chunks: Vec<ChunkInfo>,
    vectors: Vec<Vec<f32>>,
}

impl Indexer {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        chunker: Chunker,
        scanner: Scanner,
    ) -> Self {
        Self {
            store,
            embedder,
            chunker,
            scanner,
            namespace: None,
            show_progress: false,
        }
    }

    /// Prefix every stored path with `workspace/project`, for shared
    /// workspace stores.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_progress(mut self) -> Self {
        self.show_progress = true;
        self
    }

    /// Full reconciliation pass: index new and changed files, then drop
    /// whatever the scan no longer sees. Files are processed in
    /// lexicographic path order, so interrupted runs are reproducible.
    pub fn index_all(&self, token: &CancelToken) -> Result<IndexStats> {
        let start = Instant::now();
        let mut stats = IndexStats::default();

        let (mut files, skipped) = self.scanner.scan()?;
        stats.files_skipped = skipped.len();
        for skip in &skipped {
            debug!("path" = %skip.path, "reason" = skip.reason.as_str(), "msg" = "skipped");
        }

        if let Some(namespace) = &self.namespace {
            for file in &mut files {
                file.path = format!("{}/{}", namespace, file.path);
            }
        }

        let mut existing: BTreeSet<String> =
            self.store.list_documents(token)?.into_iter().collect();

        // Diff against stored document hashes; unchanged files drop out
        // here and never reach the embedder.
        let mut pending: Vec<FileInfo> = Vec::new();
        for file in files {
            token.checkpoint()?;
            existing.remove(&file.path);
            match self.store.get_document(token, &file.path)? {
                Some(doc) if doc.hash == file.hash => continue,
                _ => pending.push(file),
            }
        }

        let pb = self.progress_bar(pending.len());

        // Chunking and embedding run on the worker pool; results come back
        // in input order so the commit phase stays deterministic.
        let prepared: Vec<Result<PreparedFile>> = pending
            .into_par_iter()
            .map(|file| {
                if token.is_cancelled() {
                    return Err(GrepaiError::Cancelled);
                }
                let chunks = self.chunker.chunk(&file.path, &file.content);
                let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
                let vectors = if texts.is_empty() {
                    Vec::new()
                } else {
                    self.embedder.embed_batch(token, &texts)?
                };
                pb.inc(1);
                Ok(PreparedFile {
                    file,
                    chunks,
                    vectors,
                })
            })
            .collect();

        pb.finish_and_clear();

        for result in prepared {
            token.checkpoint()?;
            let prepared = match result {
                Ok(p) => p,
                Err(GrepaiError::Cancelled) => return Err(GrepaiError::Cancelled),
                Err(err) => {
                    warn!("error" = %err, "msg" = "failed to prepare file, skipping");
                    continue;
                }
            };

            match self.commit_file(token, &prepared) {
                Ok(chunk_count) => {
                    stats.files_indexed += 1;
                    stats.chunks_created += chunk_count;
                }
                Err(GrepaiError::Cancelled) => return Err(GrepaiError::Cancelled),
                Err(err) => {
                    warn!(
                        "path" = %prepared.file.path,
                        "error" = %err,
                        "msg" = "failed to index file, skipping"
                    );
                }
            }
        }

        // Deletions still run even when individual files failed.
        for path in existing {
            token.checkpoint()?;
            match self.remove_file(token, &path) {
                Ok(()) => stats.files_removed += 1,
                Err(GrepaiError::Cancelled) => return Err(GrepaiError::Cancelled),
                Err(err) => {
                    warn!("path" = %path, "error" = %err, "msg" = "failed to remove file");
                }
            }
        }

        self.store.persist(token)?;

        stats.duration = start.elapsed();
        Ok(stats)
    }

    /// Index a single file: replace all of its chunks and its document in
    /// one pass. Used by `index_all` and by incremental callers reacting
    /// to filesystem events.
    pub fn index_file(&self, token: &CancelToken, file: &FileInfo) -> Result<usize> {
        let chunks = self.chunker.chunk(&file.path, &file.content);
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed_batch(token, &texts)?
        };

        self.commit_file(
            token,
            &PreparedFile {
                file: file.clone(),
                chunks,
                vectors,
            },
        )
    }

    fn commit_file(&self, token: &CancelToken, prepared: &PreparedFile) -> Result<usize> {
        if prepared.vectors.len() != prepared.chunks.len() {
            return Err(GrepaiError::store(format!(
                "embedder returned {} vectors for {} chunks of {}",
                prepared.vectors.len(),
                prepared.chunks.len(),
                prepared.file.path
            )));
        }

        let now = Utc::now();
        let chunks: Vec<Chunk> = prepared
            .chunks
            .iter()
            .zip(&prepared.vectors)
            .map(|(info, vector)| Chunk {
                id: info.id.clone(),
                file_path: info.file_path.clone(),
                start_line: info.start_line,
                end_line: info.end_line,
                content: info.content.clone(),
                vector: vector.clone(),
                hash: info.hash.clone(),
                updated_at: now,
            })
            .collect();

        // `save_chunks` replaces the file's previous chunks atomically;
        // only an emptied file needs an explicit delete.
        if chunks.is_empty() {
            self.store.delete_by_file(token, &prepared.file.path)?;
        } else {
            self.store.save_chunks(token, &chunks)?;
        }

        let document = Document {
            path: prepared.file.path.clone(),
            hash: prepared.file.hash.clone(),
            mod_time: prepared.file.mod_time,
            chunk_ids: chunks.iter().map(|c| c.id.clone()).collect(),
        };
        self.store.save_document(token, document)?;

        Ok(chunks.len())
    }

    /// Drop a file's chunks and document.
    pub fn remove_file(&self, token: &CancelToken, path: &str) -> Result<()> {
        self.store.delete_by_file(token, path)?;
        self.store.delete_document(token, path)?;
        Ok(())
    }

    /// True when the stored document is missing or its hash differs.
    pub fn needs_reindex(&self, token: &CancelToken, path: &str, hash: &str) -> Result<bool> {
        match self.store.get_document(token, path)? {
            Some(doc) => Ok(doc.hash != hash),
            None => Ok(true),
        }
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::with_draw_target(Some(len as u64), ProgressDrawTarget::stderr());
        pb.set_prefix(console::style("[info]").blue().bold().to_string());
        pb.set_style(
            ProgressStyle::with_template(INDEX_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        pb.set_message("embedding");
        pb
    }
}
