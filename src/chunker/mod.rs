pub const DEFAULT_CHUNK_SIZE: usize = 512;
pub const DEFAULT_OVERLAP_LINES: usize = 0;

const CHARS_PER_TOKEN: usize = 4;
const CONTENT_HEADER_PREFIX: &str = "File: ";

/// A file slice ready for embedding. `start_line`/`end_line` are 1-based,
/// inclusive, and refer to the original source; the context header is not
/// counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInfo {
    pub id: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub hash: String,
}

#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    overlap_lines: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP_LINES)
    }
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap_lines: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            overlap_lines,
        }
    }

    /// Split `content` into token-budgeted chunks. Deterministic: the same
    /// input bytes always produce identical chunks and ids.
    pub fn chunk(&self, file_path: &str, content: &str) -> Vec<ChunkInfo> {
        if content.trim().is_empty() {
            return Vec::new();
        }

        let lines: Vec<&str> = content.lines().collect();
        let budget_chars = self.chunk_size * CHARS_PER_TOKEN;
        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < lines.len() {
            let mut end = start;
            let mut used = 0usize;
            while end < lines.len() {
                let cost = lines[end].len() + 1;
                if end > start && used + cost > budget_chars {
                    break;
                }
                used += cost;
                end += 1;
            }

            let body = lines[start..end].join("\n");
            chunks.push(build_chunk(file_path, &body, start + 1, end));

            if end >= lines.len() {
                break;
            }
            // Overlap re-reads trailing lines into the next chunk, but never
            // stalls: the next start always advances.
            start = end.saturating_sub(self.overlap_lines).max(start + 1);
        }

        chunks
    }
}

fn build_chunk(file_path: &str, body: &str, start_line: usize, end_line: usize) -> ChunkInfo {
    let content = format!("{}{}\n\n{}", CONTENT_HEADER_PREFIX, file_path, body);
    let hash = blake3::hash(content.as_bytes()).to_hex().to_string();
    let id = chunk_id(file_path, start_line, end_line, &hash);

    ChunkInfo {
        id,
        file_path: file_path.to_string(),
        start_line,
        end_line,
        content,
        hash,
    }
}

/// Deterministic id derived from the chunk's coordinates and content hash.
pub fn chunk_id(file_path: &str, start_line: usize, end_line: usize, hash: &str) -> String {
    let seed = format!("{}:{}-{}:{}", file_path, start_line, end_line, hash);
    blake3::hash(seed.as_bytes()).to_hex().to_string()
}

/// Remove the synthetic `"File: <path>\n\n"` prefix added for embedding.
pub fn strip_content_header(content: &str) -> &str {
    if !content.starts_with(CONTENT_HEADER_PREFIX) {
        return content;
    }
    match content.find("\n\n") {
        Some(pos) => &content[pos + 2..],
        None => content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn many_lines(n: usize) -> String {
        (0..n)
            .map(|i| format!("let value_{} = compute({});\n", i, i))
            .collect()
    }

    #[test]
    fn empty_and_whitespace_files_yield_no_chunks() {
        let chunker = Chunker::default();
        assert!(chunker.chunk("a.rs", "").is_empty());
        assert!(chunker.chunk("a.rs", "  \n\t\n").is_empty());
    }

    #[test]
    fn small_file_is_a_single_chunk() {
        let chunker = Chunker::default();
        let chunks = chunker.chunk("src/lib.rs", "fn main() {}\n");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 1);
        assert!(chunks[0].content.starts_with("File: src/lib.rs\n\n"));
    }

    #[test]
    fn large_file_splits_into_contiguous_ranges() {
        let chunker = Chunker::new(64, 0);
        let source = many_lines(200);
        let chunks = chunker.chunk("big.rs", &source);

        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].start_line, 1);
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start_line, pair[0].end_line + 1);
        }
        assert_eq!(chunks.last().unwrap().end_line, 200);
    }

    #[test]
    fn overlap_duplicates_boundary_lines() {
        let chunker = Chunker::new(64, 2);
        let source = many_lines(200);
        let chunks = chunker.chunk("big.rs", &source);

        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start_line, pair[0].end_line + 1 - 2);
        }
    }

    #[test]
    fn chunking_is_deterministic() {
        let chunker = Chunker::default();
        let source = many_lines(500);
        let first = chunker.chunk("src/main.rs", &source);
        let second = chunker.chunk("src/main.rs", &source);
        assert_eq!(first, second);
    }

    #[test]
    fn same_content_at_different_paths_gets_distinct_ids() {
        let chunker = Chunker::default();
        let source = "fn shared() {}\n";
        let a = chunker.chunk("a.rs", source);
        let b = chunker.chunk("b.rs", source);

        assert_ne!(a[0].id, b[0].id);
        assert_eq!(
            strip_content_header(&a[0].content),
            strip_content_header(&b[0].content)
        );
    }

    #[test]
    fn line_ranges_ignore_the_header() {
        let chunker = Chunker::default();
        let chunks = chunker.chunk("x.rs", "line one\nline two\nline three\n");
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 3);
        assert_eq!(
            strip_content_header(&chunks[0].content),
            "line one\nline two\nline three"
        );
    }

    #[test]
    fn oversized_single_line_still_makes_progress() {
        let chunker = Chunker::new(4, 0);
        let long_line = "x".repeat(1000);
        let source = format!("{}\nshort\n", long_line);
        let chunks = chunker.chunk("wide.txt", &source);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].end_line, 1);
        assert_eq!(chunks[1].start_line, 2);
    }

    #[test]
    fn strip_header_leaves_plain_content_alone() {
        assert_eq!(strip_content_header("no header here"), "no header here");
    }
}
