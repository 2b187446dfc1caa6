use std::path::{Component, Path};
use std::sync::Arc;

use chrono::Utc;

use crate::cancel::CancelToken;
use crate::chunker::strip_content_header;
use crate::config::SearchConfig;
use crate::embedding::Embedder;
use crate::error::{GrepaiError, Result};
use crate::fts::{query_terms, Bm25Index};
use crate::store::{SearchResult, VectorStore};

/// Candidate multiplier so boosting and residual filtering have headroom.
pub const OVER_FETCH: usize = 3;

const RECENCY_HALF_LIFE_HOURS: f32 = 48.0;

/// Executes a query end-to-end: embed, retrieve, optionally fuse with a
/// lexical ranking, boost, filter, and order. Strict: any failure along
/// the way surfaces to the caller.
pub struct Searcher {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    config: SearchConfig,
}

impl Searcher {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        config: SearchConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// `path_prefix` must already be normalized (see
    /// [`normalize_path_prefix`]). Empty means unfiltered.
    pub fn search(
        &self,
        token: &CancelToken,
        query: &str,
        limit: usize,
        path_prefix: &str,
    ) -> Result<Vec<SearchResult>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(token, query)?;
        let prefix = if path_prefix.is_empty() {
            None
        } else {
            Some(path_prefix)
        };

        let fetch_limit = limit.saturating_mul(OVER_FETCH);
        let mut results = self
            .store
            .search(token, &query_vector, fetch_limit, prefix)?;

        if self.config.hybrid.enabled {
            self.fuse_with_lexical(query, &mut results);
        }

        let terms = query_terms(query);
        for result in &mut results {
            result.score += self.boost(&terms, result);
        }

        // Backends without pushdown rely on this residual filter.
        if let Some(prefix) = prefix {
            results.retain(|r| r.chunk.file_path.starts_with(prefix));
        }

        sort_results(&mut results);
        results.truncate(limit);
        Ok(results)
    }

    /// Reciprocal-rank fusion of the vector ranking with a BM25 ranking
    /// over the candidate contents: `score(c) = Σ 1/(K + rank)`.
    fn fuse_with_lexical(&self, query: &str, results: &mut [SearchResult]) {
        if results.is_empty() {
            return;
        }

        let k = self.config.hybrid.k as f32;
        let texts: Vec<&str> = results.iter().map(|r| r.chunk.content.as_str()).collect();
        let lexical = Bm25Index::build(&texts).rank(query);

        let mut fused: Vec<f32> = (0..results.len())
            .map(|rank| 1.0 / (k + (rank + 1) as f32))
            .collect();
        for (rank, (idx, _)) in lexical.iter().enumerate() {
            fused[*idx] += 1.0 / (k + (rank + 1) as f32);
        }

        for (result, score) in results.iter_mut().zip(fused) {
            result.score = score;
        }
    }

    /// Additive boosts from configured predicates.
    fn boost(&self, terms: &[String], result: &SearchResult) -> f32 {
        let chunk = &result.chunk;
        let weights = &self.config.boost;
        let mut total = 0.0f32;

        let basename = chunk
            .file_path
            .rsplit('/')
            .next()
            .unwrap_or(&chunk.file_path)
            .to_lowercase();
        if terms.iter().any(|term| basename.contains(term.as_str())) {
            total += weights.filename;
        }

        let first_line = strip_content_header(&chunk.content)
            .lines()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("")
            .to_lowercase();
        if terms.iter().any(|term| first_line.contains(term.as_str())) {
            total += weights.symbol;
        }

        let depth = chunk.file_path.matches('/').count();
        total += weights.path_depth / (1.0 + depth as f32);

        let age_hours = (Utc::now() - chunk.updated_at).num_hours().max(0) as f32;
        total += weights.recency / (1.0 + age_hours / RECENCY_HALF_LIFE_HOURS);

        total
    }
}

/// Final ordering: score descending, ties broken by `(file_path,
/// start_line)` ascending.
pub fn sort_results(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.file_path.cmp(&b.chunk.file_path))
            .then_with(|| a.chunk.start_line.cmp(&b.chunk.start_line))
    });
}

/// Normalize a user-supplied path prefix against the project root.
///
/// Accepts project-relative paths and absolute paths inside the project;
/// rejects anything escaping the root. Returns a relative prefix with
/// forward slashes, or an empty string for "no filter".
pub fn normalize_path_prefix(raw: &str, project_root: &Path) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(String::new());
    }

    let mut candidate = trimmed.replace('\\', "/");

    if Path::new(&candidate).is_absolute() {
        let root = project_root
            .canonicalize()
            .unwrap_or_else(|_| project_root.to_path_buf());
        let absolute = Path::new(&candidate).to_path_buf();
        let absolute = absolute.canonicalize().unwrap_or(absolute);
        match absolute.strip_prefix(&root) {
            Ok(stripped) => {
                candidate = stripped.to_string_lossy().replace('\\', "/");
            }
            Err(_) => {
                return Err(GrepaiError::FailedPath(format!(
                    "{} is outside the project root",
                    raw
                )));
            }
        }
    }

    resolve_relative(&candidate, trimmed)
}

/// Lexically resolve a relative prefix; `..` may never climb past the
/// root. Keeps a trailing slash from the original input.
pub(crate) fn resolve_relative(candidate: &str, original: &str) -> Result<String> {
    let mut parts: Vec<&str> = Vec::new();
    for component in Path::new(candidate).components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => parts.push(part.to_str().unwrap_or_default()),
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(GrepaiError::FailedPath(format!(
                        "{} escapes the project root",
                        original
                    )));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(GrepaiError::FailedPath(format!(
                    "{} is not a project-relative path",
                    original
                )));
            }
        }
    }

    let mut normalized = parts.join("/");
    if !normalized.is_empty() && original.ends_with('/') {
        normalized.push('/');
    }
    Ok(normalized)
}
