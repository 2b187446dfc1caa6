use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GrepaiError, Result};

pub const GREPAI_DIR: &str = ".grepai";
const CONFIG_FILE: &str = "config.yaml";
const INDEX_FILE: &str = "index.bin";
const SQLITE_FILE: &str = "index.db";
const IGNORE_FILE: &str = "ignore";

pub const DEFAULT_MAX_FILE_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub embedder: EmbedderConfig,
    pub store: StoreConfig,
    pub search: SearchConfig,
    pub indexer: IndexerConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderProvider {
    #[default]
    Ollama,
    Openai,
    Lmstudio,
    Openrouter,
    Synthetic,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EmbedderConfig {
    pub provider: EmbedderProvider,
    pub ollama: OllamaConfig,
    pub openai: OpenAiConfig,
    pub lmstudio: LmStudioConfig,
    pub openrouter: OpenRouterConfig,
    pub synthetic: SyntheticConfig,
}

impl EmbedderConfig {
    /// Dimensions the configured provider is expected to produce.
    pub fn dimensions(&self) -> usize {
        match self.provider {
            EmbedderProvider::Ollama => self
                .ollama
                .dimensions
                .unwrap_or(OllamaConfig::DEFAULT_DIMENSIONS),
            EmbedderProvider::Openai => self.openai.dimensions,
            EmbedderProvider::Lmstudio => self.lmstudio.dimensions,
            EmbedderProvider::Openrouter => self.openrouter.dimensions,
            EmbedderProvider::Synthetic => self.synthetic.dimensions,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub url: String,
    pub model: String,
    /// Discovered on the first embedding call when unset.
    pub dimensions: Option<usize>,
}

impl OllamaConfig {
    pub const DEFAULT_DIMENSIONS: usize = 768;
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            dimensions: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub url: String,
    pub api_key: String,
    pub model: String,
    pub dimensions: usize,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            url: "https://api.openai.com".to_string(),
            api_key: String::new(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LmStudioConfig {
    pub url: String,
    pub model: String,
    pub dimensions: usize,
}

impl Default for LmStudioConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:1234".to_string(),
            model: "text-embedding-nomic-embed-text-v1.5".to_string(),
            dimensions: 768,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OpenRouterConfig {
    pub url: String,
    pub api_key: String,
    pub model: String,
    pub dimensions: usize,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            url: "https://openrouter.ai/api".to_string(),
            api_key: String::new(),
            model: "openai/text-embedding-3-small".to_string(),
            dimensions: 1536,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub dimensions: usize,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self { dimensions: 256 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Binary,
    Sqlite,
    Qdrant,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub binary: BinaryStoreConfig,
    pub sqlite: SqliteStoreConfig,
    pub qdrant: QdrantStoreConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BinaryStoreConfig {
    /// Index file location; defaults to `.grepai/index.bin`.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SqliteStoreConfig {
    /// Database location; defaults to `.grepai/index.db`.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QdrantStoreConfig {
    pub endpoint: String,
    pub port: u16,
    pub tls: bool,
    /// Derived from the project root when empty.
    pub collection: String,
    pub api_key: String,
}

impl Default for QdrantStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "localhost".to_string(),
            port: 6333,
            tls: false,
            collection: String::new(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SearchConfig {
    pub hybrid: HybridConfig,
    pub boost: BoostConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HybridConfig {
    pub enabled: bool,
    pub k: usize,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            k: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BoostConfig {
    pub filename: f32,
    pub symbol: f32,
    pub path_depth: f32,
    pub recency: f32,
}

impl Default for BoostConfig {
    fn default() -> Self {
        Self {
            filename: 0.15,
            symbol: 0.10,
            path_depth: 0.05,
            recency: 0.05,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Chunk budget in estimated tokens (~4 characters each).
    pub chunk_size: usize,
    /// Lines of context duplicated between adjacent chunks. 0 keeps chunk
    /// line ranges strictly non-overlapping.
    pub overlap_lines: usize,
    pub max_file_bytes: u64,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            overlap_lines: 0,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

impl Config {
    /// Load `.grepai/config.yaml` under `project_root`, falling back to
    /// defaults when the file does not exist. `${VAR}` references are
    /// expanded from the environment before parsing.
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = config_path(project_root);
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(&path)?;
        let expanded = expand_env(&raw);
        let config: Config = serde_yaml::from_str(&expanded).map_err(|e| {
            GrepaiError::config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.indexer.chunk_size == 0 {
            return Err(GrepaiError::config("indexer.chunk_size must be positive"));
        }
        if self.indexer.max_file_bytes == 0 {
            return Err(GrepaiError::config(
                "indexer.max_file_bytes must be positive",
            ));
        }
        if self.search.hybrid.k == 0 {
            return Err(GrepaiError::config("search.hybrid.k must be positive"));
        }
        Ok(())
    }

    /// Write the default configuration and an empty supplementary ignore
    /// file under `<project_root>/.grepai/`.
    pub fn init(project_root: &Path) -> Result<PathBuf> {
        let dir = grepai_dir(project_root);
        let path = dir.join(CONFIG_FILE);
        if path.exists() {
            return Err(GrepaiError::config(format!(
                "{} already exists",
                path.display()
            )));
        }

        fs::create_dir_all(&dir)?;
        fs::write(&path, DEFAULT_CONFIG)?;

        let ignore = dir.join(IGNORE_FILE);
        if !ignore.exists() {
            fs::write(&ignore, "# Supplementary ignore globs, gitignore syntax.\n")?;
        }

        Ok(path)
    }
}

pub fn grepai_dir(project_root: &Path) -> PathBuf {
    project_root.join(GREPAI_DIR)
}

pub fn config_path(project_root: &Path) -> PathBuf {
    grepai_dir(project_root).join(CONFIG_FILE)
}

pub fn index_path(project_root: &Path) -> PathBuf {
    grepai_dir(project_root).join(INDEX_FILE)
}

pub fn sqlite_path(project_root: &Path) -> PathBuf {
    grepai_dir(project_root).join(SQLITE_FILE)
}

pub fn ignore_path(project_root: &Path) -> PathBuf {
    grepai_dir(project_root).join(IGNORE_FILE)
}

/// Walk upward from `start` to the first directory containing `.grepai/`.
pub fn find_project_root_from(start: &Path) -> Result<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        if grepai_dir(&current).is_dir() {
            return Ok(current);
        }
        if !current.pop() {
            return Err(GrepaiError::config(
                "no .grepai directory found; run `grepai init` first",
            ));
        }
    }
}

pub fn find_project_root() -> Result<PathBuf> {
    let cwd = env::current_dir()?;
    find_project_root_from(&cwd)
}

/// Expand `${VAR}` references from the environment. Unknown variables are
/// left untouched.
pub fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 2..];
        match tail.find('}') {
            Some(end) => {
                let name = &tail[..end];
                match env::var(name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &tail[end + 1..];
            }
            None => {
                out.push_str("${");
                rest = tail;
            }
        }
    }

    out.push_str(rest);
    out
}

const DEFAULT_CONFIG: &str = r#"# grepai configuration
embedder:
  provider: ollama
  ollama:
    url: http://localhost:11434
    model: nomic-embed-text

store:
  backend: binary

search:
  hybrid:
    enabled: false
    k: 60
  boost:
    filename: 0.15
    symbol: 0.10
    path_depth: 0.05
    recency: 0.05

indexer:
  chunk_size: 512
  overlap_lines: 0
  max_file_bytes: 5242880
"#;
