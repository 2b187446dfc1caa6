// End-to-end tests for the indexing and retrieval pipeline, wired with the
// synthetic embedder and the single-file binary store.

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::TempDir;

use grepai::cancel::CancelToken;
use grepai::chunker::Chunker;
use grepai::config::{Config, IndexerConfig, SearchConfig};
use grepai::embedding::{Embedder, SyntheticEmbedder};
use grepai::error::{GrepaiError, Result};
use grepai::indexer::Indexer;
use grepai::scanner::Scanner;
use grepai::search::{normalize_path_prefix, Searcher};
use grepai::store::{BinaryStore, VectorStore};

const DIMS: usize = 128;

struct CountingEmbedder {
    inner: SyntheticEmbedder,
    embedded_texts: AtomicUsize,
}

impl CountingEmbedder {
    fn new() -> Self {
        Self {
            inner: SyntheticEmbedder::new(DIMS),
            embedded_texts: AtomicUsize::new(0),
        }
    }

    fn texts(&self) -> usize {
        self.embedded_texts.load(Ordering::SeqCst)
    }
}

impl Embedder for CountingEmbedder {
    fn embed_batch(&self, token: &CancelToken, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embedded_texts.fetch_add(texts.len(), Ordering::SeqCst);
        self.inner.embed_batch(token, texts)
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}

struct Pipeline {
    _repo: TempDir,
    root: std::path::PathBuf,
    store: Arc<BinaryStore>,
    embedder: Arc<CountingEmbedder>,
    token: CancelToken,
}

impl Pipeline {
    fn new() -> Self {
        let repo = tempfile::tempdir().unwrap();
        let root = repo.path().to_path_buf();
        fs::create_dir_all(root.join(".grepai")).unwrap();
        Config::init(&root).unwrap();

        let embedder = Arc::new(CountingEmbedder::new());
        let store = Arc::new(BinaryStore::new(root.join(".grepai").join("index.bin"), DIMS));

        Self {
            _repo: repo,
            root,
            store,
            embedder,
            token: CancelToken::new(),
        }
    }

    fn indexer(&self) -> Indexer {
        let scanner = Scanner::new(&self.root, &IndexerConfig::default()).unwrap();
        Indexer::new(
            self.store.clone(),
            self.embedder.clone(),
            Chunker::default(),
            scanner,
        )
    }

    fn searcher(&self) -> Searcher {
        Searcher::new(
            self.store.clone(),
            self.embedder.clone(),
            SearchConfig::default(),
        )
    }

    fn write(&self, name: &str, content: &str) {
        let path = self.root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn all_chunks(&self) -> Vec<grepai::store::SearchResult> {
        self.store
            .search(&self.token, &vec![0.0; DIMS], usize::MAX, None)
            .unwrap()
    }

    fn index_bytes(&self) -> Vec<u8> {
        fs::read(self.root.join(".grepai").join("index.bin")).unwrap()
    }
}

#[test]
fn empty_project_indexes_nothing_and_finds_nothing() {
    let pipeline = Pipeline::new();

    let stats = pipeline.indexer().index_all(&pipeline.token).unwrap();
    assert_eq!(stats.files_indexed, 0);
    assert_eq!(stats.chunks_created, 0);
    assert_eq!(stats.files_removed, 0);

    let results = pipeline
        .searcher()
        .search(&pipeline.token, "anything", 5, "")
        .unwrap();
    assert!(results.is_empty());
}

#[test]
fn single_file_covers_all_lines_with_ascending_chunks() {
    let pipeline = Pipeline::new();
    let body: String = (1..=1200)
        .map(|i| format!("line {} of sample text\n", i))
        .collect();
    pipeline.write("a.txt", &body);

    let stats = pipeline.indexer().index_all(&pipeline.token).unwrap();
    assert_eq!(stats.files_indexed, 1);
    assert!(stats.chunks_created >= 2);

    let docs = pipeline.store.list_documents(&pipeline.token).unwrap();
    assert_eq!(docs, vec!["a.txt"]);

    let chunks = pipeline.all_chunks();
    assert_eq!(chunks.len(), stats.chunks_created);
    assert_eq!(chunks[0].chunk.start_line, 1);
    for pair in chunks.windows(2) {
        assert_eq!(pair[1].chunk.start_line, pair[0].chunk.end_line + 1);
    }
    assert_eq!(chunks.last().unwrap().chunk.end_line, 1200);
}

#[test]
fn document_and_chunk_invariants_hold_after_indexing() {
    let pipeline = Pipeline::new();
    pipeline.write("src/one.rs", "fn one() {}\n");
    pipeline.write("src/two.rs", "fn two() {}\n");

    pipeline.indexer().index_all(&pipeline.token).unwrap();

    let chunks = pipeline.all_chunks();
    let docs = pipeline.store.list_documents(&pipeline.token).unwrap();

    // Every chunk belongs to a document that lists its id.
    for result in &chunks {
        let doc = pipeline
            .store
            .get_document(&pipeline.token, &result.chunk.file_path)
            .unwrap()
            .expect("chunk without document");
        assert!(doc.chunk_ids.contains(&result.chunk.id));
    }

    // Every document chunk id exists with a matching path.
    for path in docs {
        let doc = pipeline
            .store
            .get_document(&pipeline.token, &path)
            .unwrap()
            .unwrap();
        for id in &doc.chunk_ids {
            let found = chunks
                .iter()
                .find(|r| &r.chunk.id == id)
                .expect("document references missing chunk");
            assert_eq!(found.chunk.file_path, path);
        }
    }

    // Ids are unique and vectors sized to the embedder.
    let mut ids: Vec<&str> = chunks.iter().map(|r| r.chunk.id.as_str()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), chunks.len());
    assert!(chunks.iter().all(|r| r.chunk.vector.len() == DIMS));
}

#[test]
fn reindexing_unchanged_tree_embeds_nothing_and_keeps_bytes() {
    let pipeline = Pipeline::new();
    pipeline.write("a.rs", "fn alpha() {}\n");
    pipeline.write("b.rs", "fn beta() {}\n");

    pipeline.indexer().index_all(&pipeline.token).unwrap();
    let after_first = pipeline.embedder.texts();
    let bytes_first = pipeline.index_bytes();

    let stats = pipeline.indexer().index_all(&pipeline.token).unwrap();
    assert_eq!(stats.files_indexed, 0);
    assert_eq!(pipeline.embedder.texts(), after_first);
    assert_eq!(pipeline.index_bytes(), bytes_first);
}

#[test]
fn modifying_one_file_touches_only_its_chunks() {
    let pipeline = Pipeline::new();
    pipeline.write("a.txt", "original content line\n");
    pipeline.write("b.txt", "other file content\n");

    pipeline.indexer().index_all(&pipeline.token).unwrap();
    let untouched_before: Vec<String> = pipeline
        .all_chunks()
        .iter()
        .filter(|r| r.chunk.file_path == "b.txt")
        .map(|r| r.chunk.id.clone())
        .collect();
    let old_a_ids: Vec<String> = pipeline
        .all_chunks()
        .iter()
        .filter(|r| r.chunk.file_path == "a.txt")
        .map(|r| r.chunk.id.clone())
        .collect();

    let extended: String = std::iter::once("original content line\n".to_string())
        .chain((0..100).map(|i| format!("appended line {}\n", i)))
        .collect();
    pipeline.write("a.txt", &extended);

    let stats = pipeline.indexer().index_all(&pipeline.token).unwrap();
    assert_eq!(stats.files_indexed, 1);

    let chunks = pipeline.all_chunks();
    let new_a: Vec<_> = chunks
        .iter()
        .filter(|r| r.chunk.file_path == "a.txt")
        .collect();
    assert!(new_a.iter().all(|r| !old_a_ids.contains(&r.chunk.id)));
    assert_eq!(new_a.last().unwrap().chunk.end_line, 101);

    let untouched_after: Vec<String> = chunks
        .iter()
        .filter(|r| r.chunk.file_path == "b.txt")
        .map(|r| r.chunk.id.clone())
        .collect();
    assert_eq!(untouched_before, untouched_after);
}

#[test]
fn deleting_a_file_removes_its_chunks_and_document() {
    let pipeline = Pipeline::new();
    pipeline.write("a.txt", "to be deleted\n");

    pipeline.indexer().index_all(&pipeline.token).unwrap();
    assert_eq!(
        pipeline.store.list_documents(&pipeline.token).unwrap(),
        vec!["a.txt"]
    );

    fs::remove_file(pipeline.root.join("a.txt")).unwrap();
    let stats = pipeline.indexer().index_all(&pipeline.token).unwrap();

    assert_eq!(stats.files_removed, 1);
    assert!(pipeline
        .store
        .list_documents(&pipeline.token)
        .unwrap()
        .is_empty());
    assert!(pipeline.all_chunks().is_empty());
}

#[test]
fn search_ranks_authentication_code_above_file_io() {
    let pipeline = Pipeline::new();
    pipeline.write(
        "src/auth.rs",
        "/// user login validation\n\
         fn authenticate_user(user: &str, password: &str) -> bool {\n\
             validate_credentials(user, password)\n\
         }\n",
    );
    pipeline.write(
        "src/fileio.rs",
        "fn copy_bytes(source: &Path, target: &Path) -> io::Result<u64> {\n\
             fs::copy(source, target)\n\
         }\n",
    );

    pipeline.indexer().index_all(&pipeline.token).unwrap();
    let results = pipeline
        .searcher()
        .search(&pipeline.token, "user login validation", 2, "")
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].chunk.file_path, "src/auth.rs");
    assert!(results[0].score > results[1].score);
}

#[test]
fn search_results_are_ordered_and_prefix_filtered() {
    let pipeline = Pipeline::new();
    for i in 0..5 {
        pipeline.write(
            &format!("app/module_{}.rs", i),
            &format!("fn handler_{}() {{ process_request() }}\n", i),
        );
        pipeline.write(
            &format!("lib/util_{}.rs", i),
            &format!("fn helper_{}() {{ shared_logic() }}\n", i),
        );
    }

    pipeline.indexer().index_all(&pipeline.token).unwrap();
    let results = pipeline
        .searcher()
        .search(&pipeline.token, "process request handler", 20, "app/")
        .unwrap();

    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.chunk.file_path.starts_with("app/")));
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[test]
fn path_escapes_are_rejected() {
    let pipeline = Pipeline::new();
    let err = normalize_path_prefix("../../etc", &pipeline.root).unwrap_err();
    assert!(matches!(err, GrepaiError::FailedPath(_)));
}

#[test]
fn persist_then_load_roundtrips_the_store() {
    let pipeline = Pipeline::new();
    pipeline.write("src/lib.rs", "pub fn answer() -> u32 { 42 }\n");
    pipeline.indexer().index_all(&pipeline.token).unwrap();

    let original = pipeline.all_chunks();
    let original_doc = pipeline
        .store
        .get_document(&pipeline.token, "src/lib.rs")
        .unwrap()
        .unwrap();

    let reloaded = BinaryStore::new(pipeline.root.join(".grepai").join("index.bin"), DIMS);
    reloaded.load(&pipeline.token).unwrap();

    let loaded = reloaded
        .search(&pipeline.token, &vec![0.0; DIMS], usize::MAX, None)
        .unwrap();
    assert_eq!(loaded.len(), original.len());
    for (a, b) in original.iter().zip(&loaded) {
        assert_eq!(a.chunk, b.chunk);
    }
    assert_eq!(
        reloaded
            .get_document(&pipeline.token, "src/lib.rs")
            .unwrap()
            .unwrap(),
        original_doc
    );
}

#[test]
fn cosine_scores_stay_in_bounds_before_boosting() {
    let pipeline = Pipeline::new();
    pipeline.write("noise.txt", "completely unrelated words here\n");
    pipeline.indexer().index_all(&pipeline.token).unwrap();

    let query = pipeline
        .embedder
        .embed(&pipeline.token, "some query text")
        .unwrap();
    let results = pipeline
        .store
        .search(&pipeline.token, &query, 10, None)
        .unwrap();

    for result in results {
        assert!((-1.0..=1.0).contains(&result.score));
        assert!(!result.score.is_nan());
    }
}

#[test]
fn gitignored_files_never_reach_the_store() {
    let pipeline = Pipeline::new();
    std::process::Command::new("git")
        .args(["init"])
        .current_dir(&pipeline.root)
        .output()
        .ok();
    pipeline.write(".gitignore", "secret.txt\n");
    pipeline.write("secret.txt", "do not index\n");
    pipeline.write("visible.txt", "index me\n");

    pipeline.indexer().index_all(&pipeline.token).unwrap();
    let docs = pipeline.store.list_documents(&pipeline.token).unwrap();

    assert!(docs.contains(&"visible.txt".to_string()));
    assert!(!docs.contains(&"secret.txt".to_string()));
}
