use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::{WalkBuilder, WalkState};
use tracing::warn;

use crate::config::{self, IndexerConfig};
use crate::error::Result;

const DEFAULT_IGNORE: &str = include_str!("../../default-ignore.txt");
const BINARY_SNIFF_BYTES: usize = 8000;

const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "svg", "ico", "webp", "avif", "psd", "tiff", "heic", "mp4",
    "mov", "avi", "mkv", "webm", "mp3", "wav", "flac", "ogg", "aac", "pdf", "doc", "docx", "xls",
    "xlsx", "ppt", "pptx", "zip", "gz", "bz2", "7z", "rar", "tar", "xz", "zst", "exe", "dll", "so",
    "a", "dylib", "bin", "class", "wasm", "pyc", "pyo", "woff", "woff2", "ttf", "otf", "eot",
    "sqlite", "sqlite3", "db",
];

/// One readable, indexable file discovered by a scan.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Project-relative path with forward slashes.
    pub path: String,
    /// Content hash, stable across runs.
    pub hash: String,
    pub mod_time: DateTime<Utc>,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Binary,
    TooLarge,
    Unreadable,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Binary => "binary",
            SkipReason::TooLarge => "too large",
            SkipReason::Unreadable => "unreadable",
        }
    }
}

pub struct Scanner {
    root: PathBuf,
    max_file_bytes: u64,
    include: Option<GlobSet>,
    exclude: GlobSet,
}

impl Scanner {
    pub fn new(root: &Path, cfg: &IndexerConfig) -> Result<Self> {
        // Fails early on unreadable roots.
        fs::read_dir(root)?;

        let include = if cfg.include.is_empty() {
            None
        } else {
            Some(build_globset(&cfg.include))
        };

        let mut exclude_patterns: Vec<String> = default_ignore_patterns();
        exclude_patterns.extend(cfg.exclude.iter().cloned());
        let exclude = build_globset(&exclude_patterns);

        Ok(Self {
            root: root.to_path_buf(),
            max_file_bytes: cfg.max_file_bytes,
            include,
            exclude,
        })
    }

    /// Walk the project tree, honoring `.gitignore` and `.grepai/ignore`,
    /// and read every indexable file. Results are sorted by path so a run
    /// is reproducible.
    pub fn scan(&self) -> Result<(Vec<FileInfo>, Vec<SkippedFile>)> {
        let files = Arc::new(Mutex::new(Vec::new()));
        let skipped = Arc::new(Mutex::new(Vec::new()));
        let root = Arc::new(self.root.clone());
        let include = Arc::new(self.include.clone());
        let exclude = Arc::new(self.exclude.clone());
        let max_file_bytes = self.max_file_bytes;

        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(true)
            .ignore(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .require_git(false)
            .parents(true)
            .follow_links(false)
            .threads(crate::threading::ThreadConfig::get().walker_threads);

        let supplementary = config::ignore_path(&self.root);
        if supplementary.is_file() {
            builder.add_ignore(&supplementary);
        }

        builder.build_parallel().run(|| {
            let files = Arc::clone(&files);
            let skipped = Arc::clone(&skipped);
            let root = Arc::clone(&root);
            let include = Arc::clone(&include);
            let exclude = Arc::clone(&exclude);

            Box::new(move |entry| {
                let entry = match entry {
                    Ok(e) => e,
                    Err(_) => return WalkState::Continue,
                };

                if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                    return WalkState::Continue;
                }

                let relative = relative_unix_path(entry.path(), &root);

                if let Some(include) = include.as_ref() {
                    if !include.is_match(relative.as_str()) {
                        return WalkState::Continue;
                    }
                }
                if exclude.is_match(relative.as_str()) {
                    return WalkState::Continue;
                }

                match read_file(entry.path(), relative, max_file_bytes) {
                    Ok(Some(info)) => files.lock().unwrap().push(info),
                    Ok(None) => {}
                    Err(skip) => skipped.lock().unwrap().push(skip),
                }

                WalkState::Continue
            })
        });

        let mut files = Arc::try_unwrap(files)
            .expect("walker threads finished")
            .into_inner()
            .unwrap();
        let mut skipped = Arc::try_unwrap(skipped)
            .expect("walker threads finished")
            .into_inner()
            .unwrap();

        files.sort_by(|a, b| a.path.cmp(&b.path));
        skipped.sort_by(|a, b| a.path.cmp(&b.path));

        Ok((files, skipped))
    }
}

fn read_file(
    path: &Path,
    relative: String,
    max_file_bytes: u64,
) -> std::result::Result<Option<FileInfo>, SkippedFile> {
    if has_binary_extension(path) {
        return Err(SkippedFile {
            path: relative,
            reason: SkipReason::Binary,
        });
    }

    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(err) => {
            warn!("path" = %path.display(), "error" = %err, "msg" = "skipping");
            return Err(SkippedFile {
                path: relative,
                reason: SkipReason::Unreadable,
            });
        }
    };

    if metadata.len() > max_file_bytes {
        return Err(SkippedFile {
            path: relative,
            reason: SkipReason::TooLarge,
        });
    }

    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(err) => {
            warn!("path" = %path.display(), "error" = %err, "msg" = "skipping");
            return Err(SkippedFile {
                path: relative,
                reason: SkipReason::Unreadable,
            });
        }
    };

    if is_binary_content(&bytes) {
        return Err(SkippedFile {
            path: relative,
            reason: SkipReason::Binary,
        });
    }

    let mod_time: DateTime<Utc> = metadata
        .modified()
        .unwrap_or_else(|_| SystemTime::now())
        .into();

    Ok(Some(FileInfo {
        hash: hash_content(&bytes),
        content: String::from_utf8_lossy(&bytes).into_owned(),
        path: relative,
        mod_time,
    }))
}

pub fn hash_content(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// A NUL byte in the first few KiB marks the file as binary.
pub fn is_binary_content(bytes: &[u8]) -> bool {
    let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_BYTES)];
    sniff.contains(&0)
}

pub fn has_binary_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let lower = ext.to_ascii_lowercase();
            lower == "min" || BINARY_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

pub fn relative_unix_path(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let joined = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    joined
}

fn default_ignore_patterns() -> Vec<String> {
    DEFAULT_IGNORE
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn build_globset(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();

    for line in patterns {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Ok(glob) = Glob::new(line) {
            builder.add(glob);
        }

        let without_slash = line.trim_end_matches('/');
        if without_slash != line {
            if let Ok(glob) = Glob::new(&format!("**/{}", without_slash)) {
                builder.add(glob);
            }
            if let Ok(glob) = Glob::new(&format!("{}/**", without_slash)) {
                builder.add(glob);
            }
            if let Ok(glob) = Glob::new(&format!("**/{}/**", without_slash)) {
                builder.add(glob);
            }
        }
    }

    builder
        .build()
        .unwrap_or_else(|_| GlobSetBuilder::new().build().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use uuid::Uuid;

    fn temp_repo() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("grepai_scanner_test_{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn scan_collects_files_sorted_by_path() {
        let repo = temp_repo();
        fs::write(repo.join("b.rs"), "fn b() {}").unwrap();
        fs::write(repo.join("a.rs"), "fn a() {}").unwrap();

        let scanner = Scanner::new(&repo, &IndexerConfig::default()).unwrap();
        let (files, skipped) = scanner.scan().unwrap();

        assert_eq!(files.len(), 2);
        assert!(skipped.is_empty());
        assert_eq!(files[0].path, "a.rs");
        assert_eq!(files[1].path, "b.rs");

        fs::remove_dir_all(&repo).ok();
    }

    #[test]
    fn scan_skips_binary_and_oversized_files() {
        let repo = temp_repo();
        fs::write(repo.join("keep.rs"), "fn keep() {}").unwrap();
        fs::write(repo.join("blob.dat"), b"ab\x00cd").unwrap();
        fs::write(repo.join("photo.png"), b"not really a png").unwrap();

        let cfg = IndexerConfig {
            max_file_bytes: 16,
            ..IndexerConfig::default()
        };
        fs::write(repo.join("big.txt"), vec![b'x'; 64]).unwrap();

        let scanner = Scanner::new(&repo, &cfg).unwrap();
        let (files, skipped) = scanner.scan().unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "keep.rs");

        let reason_of = |name: &str| {
            skipped
                .iter()
                .find(|s| s.path == name)
                .map(|s| s.reason)
                .unwrap()
        };
        assert_eq!(reason_of("blob.dat"), SkipReason::Binary);
        assert_eq!(reason_of("photo.png"), SkipReason::Binary);
        assert_eq!(reason_of("big.txt"), SkipReason::TooLarge);

        fs::remove_dir_all(&repo).ok();
    }

    #[test]
    fn scan_honors_supplementary_ignore_file() {
        let repo = temp_repo();
        fs::create_dir_all(config::grepai_dir(&repo)).unwrap();
        fs::write(config::ignore_path(&repo), "generated.rs\n").unwrap();
        fs::write(repo.join("generated.rs"), "fn gen() {}").unwrap();
        fs::write(repo.join("source.rs"), "fn real() {}").unwrap();

        let scanner = Scanner::new(&repo, &IndexerConfig::default()).unwrap();
        let (files, _) = scanner.scan().unwrap();

        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert!(paths.contains(&"source.rs"));
        assert!(!paths.contains(&"generated.rs"));

        fs::remove_dir_all(&repo).ok();
    }

    #[test]
    fn scan_honors_gitignore_negation() {
        let repo = temp_repo();
        std::process::Command::new("git")
            .args(["init"])
            .current_dir(&repo)
            .output()
            .ok();

        fs::write(repo.join(".gitignore"), "*.log\n!keep.log\n").unwrap();
        fs::write(repo.join("noise.log"), "noise").unwrap();
        fs::write(repo.join("keep.log"), "keep me").unwrap();

        let scanner = Scanner::new(&repo, &IndexerConfig::default()).unwrap();
        let (files, _) = scanner.scan().unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();

        assert!(!paths.contains(&"noise.log"));
        assert!(paths.contains(&"keep.log"));

        fs::remove_dir_all(&repo).ok();
    }

    #[test]
    fn include_globs_restrict_the_walk() {
        let repo = temp_repo();
        fs::write(repo.join("lib.rs"), "fn lib() {}").unwrap();
        fs::write(repo.join("notes.txt"), "notes").unwrap();

        let cfg = IndexerConfig {
            include: vec!["*.rs".to_string()],
            ..IndexerConfig::default()
        };
        let scanner = Scanner::new(&repo, &cfg).unwrap();
        let (files, _) = scanner.scan().unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "lib.rs");

        fs::remove_dir_all(&repo).ok();
    }

    #[test]
    fn default_excludes_cover_dependency_dirs() {
        let repo = temp_repo();
        let deps = repo.join("node_modules").join("pkg");
        fs::create_dir_all(&deps).unwrap();
        fs::write(deps.join("index.js"), "module.exports = {}").unwrap();
        fs::write(repo.join("app.js"), "console.log('hi')").unwrap();

        let scanner = Scanner::new(&repo, &IndexerConfig::default()).unwrap();
        let (files, _) = scanner.scan().unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();

        assert!(paths.contains(&"app.js"));
        assert!(!paths.iter().any(|p| p.starts_with("node_modules/")));

        fs::remove_dir_all(&repo).ok();
    }

    #[test]
    fn unreadable_root_is_an_error() {
        let missing = std::env::temp_dir().join(format!("grepai_missing_{}", Uuid::new_v4()));
        assert!(Scanner::new(&missing, &IndexerConfig::default()).is_err());
    }

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        assert_eq!(hash_content(b"abc"), hash_content(b"abc"));
        assert_ne!(hash_content(b"abc"), hash_content(b"abd"));
    }

    #[test]
    fn nul_byte_marks_binary() {
        assert!(is_binary_content(b"a\x00b"));
        assert!(!is_binary_content(b"plain text"));
    }
}
