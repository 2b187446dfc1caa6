use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use super::{compare_results, cosine_similarity, Chunk, Document, SearchResult, StoreStats};
use crate::cancel::CancelToken;
use crate::error::{GrepaiError, Result};
use crate::store::VectorStore;

const MAGIC: [u8; 4] = *b"GAI1";
const FORMAT_VERSION: u32 = 1;

/// Single-file backend: the whole chunk and document table lives in memory
/// and is serialized to `.grepai/index.bin` on `persist`. Search is a
/// brute-force cosine scan, which holds up to roughly 10^5 chunks.
pub struct BinaryStore {
    path: PathBuf,
    dimensions: usize,
    state: RwLock<State>,
    closed: AtomicBool,
}

#[derive(Default)]
struct State {
    chunks: HashMap<String, Chunk>,
    documents: BTreeMap<String, Document>,
    dirty: bool,
}

impl BinaryStore {
    pub fn new(path: PathBuf, dimensions: usize) -> Self {
        Self {
            path,
            dimensions,
            state: RwLock::new(State::default()),
            closed: AtomicBool::new(false),
        }
    }

    fn guard(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GrepaiError::store("store is closed"));
        }
        Ok(())
    }

    fn encode(&self, state: &State) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&(self.dimensions as u32).to_le_bytes());

        buf.extend_from_slice(&(state.documents.len() as u64).to_le_bytes());
        for doc in state.documents.values() {
            write_record(&mut buf, doc)?;
        }

        // Chunk order is fixed so an unchanged store re-serializes
        // byte-identically.
        let mut chunks: Vec<&Chunk> = state.chunks.values().collect();
        chunks.sort_by(|a, b| {
            a.file_path
                .cmp(&b.file_path)
                .then_with(|| a.start_line.cmp(&b.start_line))
                .then_with(|| a.id.cmp(&b.id))
        });

        buf.extend_from_slice(&(chunks.len() as u64).to_le_bytes());
        for chunk in chunks {
            write_record(&mut buf, chunk)?;
        }

        Ok(buf)
    }

    fn decode(&self, bytes: &[u8]) -> Result<State> {
        let mut cursor = Cursor::new(bytes);

        let magic = cursor.take(4)?;
        if magic != MAGIC {
            return Err(GrepaiError::store(format!(
                "unrecognized index magic in {}",
                self.path.display()
            )));
        }

        let version = cursor.read_u32()?;
        if version != FORMAT_VERSION {
            return Err(GrepaiError::store(format!(
                "unsupported index version {} in {}",
                version,
                self.path.display()
            )));
        }

        let dimensions = cursor.read_u32()? as usize;
        if dimensions != self.dimensions {
            return Err(GrepaiError::store(format!(
                "index has {}-dimensional vectors but the embedder produces {}; \
                 re-run `grepai index --force`",
                dimensions, self.dimensions
            )));
        }

        let doc_count = cursor.read_u64()?;
        let mut documents = BTreeMap::new();
        for _ in 0..doc_count {
            let doc: Document = read_record(&mut cursor)?;
            documents.insert(doc.path.clone(), doc);
        }

        let chunk_count = cursor.read_u64()?;
        let mut chunks = HashMap::with_capacity(chunk_count as usize);
        for _ in 0..chunk_count {
            let chunk: Chunk = read_record(&mut cursor)?;
            if chunk.vector.len() != self.dimensions {
                return Err(GrepaiError::store(format!(
                    "corrupted index: chunk {} has {} dimensions, header says {}",
                    chunk.id,
                    chunk.vector.len(),
                    self.dimensions
                )));
            }
            chunks.insert(chunk.id.clone(), chunk);
        }

        Ok(State {
            chunks,
            documents,
            dirty: false,
        })
    }
}

impl VectorStore for BinaryStore {
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

        // Replace-per-file under one writer lock: readers see the old set
        // or the new set, never the gap between.
        let touched: std::collections::HashSet<&str> =
            chunks.iter().map(|c| c.file_path.as_str()).collect();

        let mut state = self.state.write().unwrap();
        state
            .chunks
            .retain(|_, chunk| !touched.contains(chunk.file_path.as_str()));
        for chunk in chunks {
            state.chunks.insert(chunk.id.clone(), chunk.clone());
        }
        state.dirty = true;
        Ok(())
    }

    fn delete_by_file(&self, token: &CancelToken, file_path: &str) -> Result<()> {
        token.checkpoint()?;
        self.guard()?;

        let mut state = self.state.write().unwrap();
        let before = state.chunks.len();
        state.chunks.retain(|_, chunk| chunk.file_path != file_path);
        if state.chunks.len() != before {
            state.dirty = true;
        }
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

        let state = self.state.read().unwrap();
        let mut results: Vec<SearchResult> = state
            .chunks
            .values()
            .filter(|chunk| match path_prefix {
                Some(prefix) => chunk.file_path.starts_with(prefix),
                None => true,
            })
            .map(|chunk| SearchResult {
                score: cosine_similarity(query, &chunk.vector),
                chunk: chunk.clone(),
            })
            .collect();

        results.sort_by(compare_results);
        results.truncate(limit);
        Ok(results)
    }

    fn get_document(&self, token: &CancelToken, path: &str) -> Result<Option<Document>> {
        token.checkpoint()?;
        self.guard()?;
        Ok(self.state.read().unwrap().documents.get(path).cloned())
    }

    fn save_document(&self, token: &CancelToken, doc: Document) -> Result<()> {
        token.checkpoint()?;
        self.guard()?;
        let mut state = self.state.write().unwrap();
        state.documents.insert(doc.path.clone(), doc);
        state.dirty = true;
        Ok(())
    }

    fn delete_document(&self, token: &CancelToken, path: &str) -> Result<()> {
        token.checkpoint()?;
        self.guard()?;
        let mut state = self.state.write().unwrap();
        if state.documents.remove(path).is_some() {
            state.dirty = true;
        }
        Ok(())
    }

    fn list_documents(&self, token: &CancelToken) -> Result<Vec<String>> {
        token.checkpoint()?;
        self.guard()?;
        Ok(self
            .state
            .read()
            .unwrap()
            .documents
            .keys()
            .cloned()
            .collect())
    }

    fn load(&self, token: &CancelToken) -> Result<()> {
        token.checkpoint()?;
        self.guard()?;

        if !self.path.exists() {
            return Ok(());
        }

        let bytes = fs::read(&self.path)?;
        let loaded = self.decode(&bytes)?;
        *self.state.write().unwrap() = loaded;
        Ok(())
    }

    fn persist(&self, token: &CancelToken) -> Result<()> {
        token.checkpoint()?;
        self.guard()?;

        let mut state = self.state.write().unwrap();
        if !state.dirty {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let encoded = self.encode(&state)?;
        let tmp_path = self.path.with_extension("bin.tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(&encoded)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        state.dirty = false;
        Ok(())
    }

    fn stats(&self, token: &CancelToken) -> Result<StoreStats> {
        token.checkpoint()?;
        self.guard()?;

        let state = self.state.read().unwrap();
        let index_size_bytes = fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        let last_updated = state.chunks.values().map(|c| c.updated_at).max();

        Ok(StoreStats {
            total_files: state.documents.len(),
            total_chunks: state.chunks.len(),
            index_size_bytes,
            last_updated,
        })
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn write_record<T: serde::Serialize>(buf: &mut Vec<u8>, record: &T) -> Result<()> {
    let bytes = bincode::serialize(record)?;
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(&bytes);
    Ok(())
}

fn read_record<T: serde::de::DeserializeOwned>(cursor: &mut Cursor<'_>) -> Result<T> {
    let len = cursor.read_u32()? as usize;
    let bytes = cursor.take(len)?;
    Ok(bincode::deserialize(bytes)?)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.offset + len > self.bytes.len() {
            return Err(GrepaiError::store("truncated index file"));
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]))
    }
}
