use std::fmt::Write as _;

use serde::Serialize;

use crate::error::{GrepaiError, Result};
use crate::store::SearchResult;

const SNIPPET_LINES: usize = 15;

/// Result projection for agents; `feature_path` and `symbol_name` are
/// filled by the external repository-graph enricher when present.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResultJson {
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub score: f32,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol_name: Option<String>,
}

/// Minimal projection without content.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResultCompactJson {
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol_name: Option<String>,
}

pub fn to_json(results: &[SearchResult]) -> Result<String> {
    let projected: Vec<SearchResultJson> = results
        .iter()
        .map(|r| SearchResultJson {
            file_path: r.chunk.file_path.clone(),
            start_line: r.chunk.start_line,
            end_line: r.chunk.end_line,
            score: r.score,
            content: r.chunk.content.clone(),
            feature_path: None,
            symbol_name: None,
        })
        .collect();
    serde_json::to_string_pretty(&projected).map_err(|e| GrepaiError::store(e.to_string()))
}

pub fn to_compact_json(results: &[SearchResult]) -> Result<String> {
    let projected: Vec<SearchResultCompactJson> = results
        .iter()
        .map(|r| SearchResultCompactJson {
            file_path: r.chunk.file_path.clone(),
            start_line: r.chunk.start_line,
            end_line: r.chunk.end_line,
            score: r.score,
            feature_path: None,
            symbol_name: None,
        })
        .collect();
    serde_json::to_string_pretty(&projected).map_err(|e| GrepaiError::store(e.to_string()))
}

pub fn error_json(err: &GrepaiError) -> String {
    serde_json::json!({ "error": err.to_string() }).to_string()
}

/// Plain-text rendering: per-result header, the first 15 content lines
/// numbered from `start_line`, an overflow marker past that. The
/// synthetic `"File: …"` context header is skipped.
pub fn render_plain(query: &str, results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "No results found.\n".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(out, "Found {} results for: {:?}\n", results.len(), query);

    for (i, result) in results.iter().enumerate() {
        let _ = writeln!(out, "─── Result {} (score: {:.4}) ───", i + 1, result.score);
        let _ = writeln!(
            out,
            "File: {}:{}-{}",
            result.chunk.file_path, result.chunk.start_line, result.chunk.end_line
        );
        out.push('\n');

        let lines: Vec<&str> = result.chunk.content.lines().collect();
        let start_idx = if lines.first().map(|l| l.starts_with("File: ")).unwrap_or(false) {
            2
        } else {
            0
        };

        let mut line_number = result.chunk.start_line;
        for line in lines.iter().skip(start_idx).take(SNIPPET_LINES) {
            let _ = writeln!(out, "{:>4} │ {}", line_number, line);
            line_number += 1;
        }

        let remaining = lines.len().saturating_sub(start_idx + SNIPPET_LINES);
        if remaining > 0 {
            let _ = writeln!(out, "     │ ... ({} more lines)", remaining);
        }
        out.push('\n');
    }

    out
}
