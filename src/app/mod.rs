use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use console::style;
use tracing::warn;

use crate::cancel::CancelToken;
use crate::chunker::Chunker;
use crate::cli::{Cli, Commands};
use crate::config::{self, Config};
use crate::embedding::{self, Embedder};
use crate::error::GrepaiError;
use crate::indexer::Indexer;
use crate::scanner::Scanner;
use crate::search::{normalize_path_prefix, Searcher};
use crate::store::{self, VectorStore};
use crate::threading::ThreadConfig;
use crate::workspace::{self, WorkspaceConfig};
use crate::{output, workspace::Workspace};

pub fn run() -> Result<()> {
    setup_tracing();
    run_with_cli(Cli::parse())
}

pub fn run_with_cli(cli: Cli) -> Result<()> {
    ThreadConfig::init(cli.max_threads);
    ThreadConfig::get().apply();

    match cli.command {
        Commands::Init { path } => handle_init(path),
        Commands::Index {
            path,
            force,
            workspace,
            project,
            json,
        } => match (workspace, project) {
            (Some(ws), Some(project)) => handle_workspace_index(&ws, &project, force, json),
            (Some(_), None) => Err(anyhow!("--workspace requires --project for indexing")),
            (None, Some(_)) => Err(anyhow!("--project requires --workspace")),
            (None, None) => handle_index(path, force, json),
        },
        Commands::Search {
            query,
            limit,
            path,
            json,
            compact,
            workspace,
            projects,
        } => {
            if compact && !json {
                return Err(anyhow!("--compact requires --json"));
            }
            if !projects.is_empty() && workspace.is_none() {
                return Err(anyhow!("--project requires --workspace"));
            }
            match workspace {
                Some(ws) => handle_workspace_search(
                    &ws,
                    &query,
                    limit,
                    &projects,
                    path.as_deref().unwrap_or(""),
                    json,
                    compact,
                ),
                None => handle_search(
                    &query,
                    limit,
                    path.as_deref().unwrap_or(""),
                    json,
                    compact,
                ),
            }
        }
        Commands::Status { json } => handle_status(json),
    }
}

fn handle_init(path: Option<PathBuf>) -> Result<()> {
    let root = match path {
        Some(p) => p,
        None => std::env::current_dir()?,
    };
    let config_path = Config::init(&root)?;
    println!("Created {}", config_path.display());
    println!("Adjust the embedder settings, then run `grepai index`.");
    Ok(())
}

fn handle_index(path: Option<PathBuf>, force: bool, json: bool) -> Result<()> {
    let root = resolve_project_root(path)?;
    let cfg = Config::load(&root)?;
    let token = CancelToken::new();

    let embedder: Arc<dyn Embedder> = Arc::from(embedding::from_config(&cfg.embedder)?);
    let store: Arc<dyn VectorStore> = Arc::from(store::open_project_store(
        &root,
        &cfg.store,
        embedder.dimensions(),
    )?);

    if force {
        // Rebuild from scratch: drop whatever the backend already holds.
        if let Err(err) = store.load(&token) {
            warn!("error" = %err, "msg" = "existing index unreadable, rebuilding");
        }
        for path in store.list_documents(&token)? {
            store.delete_by_file(&token, &path)?;
            store.delete_document(&token, &path)?;
        }
    } else {
        store.load(&token)?;
    }

    let scanner = Scanner::new(&root, &cfg.indexer)?;
    let chunker = Chunker::new(cfg.indexer.chunk_size, cfg.indexer.overlap_lines);
    let indexer = Indexer::new(store.clone(), embedder.clone(), chunker, scanner).with_progress();

    let stats = indexer.index_all(&token)?;
    store.close()?;
    embedder.close();

    if json {
        println!("{}", serde_json::to_string_pretty(&serde_json::json!({
            "files_indexed": stats.files_indexed,
            "files_skipped": stats.files_skipped,
            "chunks_created": stats.chunks_created,
            "files_removed": stats.files_removed,
            "duration_ms": stats.duration.as_millis(),
        }))?);
    } else {
        println!(
            "{} indexed {} files ({} chunks, {} skipped, {} removed) in {:.2?}",
            style("[info]").blue().bold(),
            stats.files_indexed,
            stats.chunks_created,
            stats.files_skipped,
            stats.files_removed,
            stats.duration
        );
    }
    Ok(())
}

fn handle_workspace_index(
    workspace_name: &str,
    project_name: &str,
    force: bool,
    json: bool,
) -> Result<()> {
    let ws = load_workspace(workspace_name)?;
    let project = ws.project(project_name)?.clone();
    let token = CancelToken::new();

    let embedder: Arc<dyn Embedder> = Arc::from(embedding::from_config(&ws.embedder)?);
    let store: Arc<dyn VectorStore> = Arc::from(ws.open_store()?);
    store.load(&token)?;

    let namespace = ws.namespace(project_name);
    if force {
        for path in store.list_documents(&token)? {
            if path.starts_with(&format!("{}/", namespace)) {
                store.delete_by_file(&token, &path)?;
                store.delete_document(&token, &path)?;
            }
        }
    }

    let cfg = Config::load(&project.root).unwrap_or_default();
    let scanner = Scanner::new(&project.root, &cfg.indexer)?;
    let chunker = Chunker::new(cfg.indexer.chunk_size, cfg.indexer.overlap_lines);
    let indexer = Indexer::new(store.clone(), embedder.clone(), chunker, scanner)
        .with_namespace(namespace)
        .with_progress();

    let stats = indexer.index_all(&token)?;
    store.close()?;
    embedder.close();

    if json {
        println!("{}", serde_json::to_string_pretty(&serde_json::json!({
            "workspace": workspace_name,
            "project": project_name,
            "files_indexed": stats.files_indexed,
            "chunks_created": stats.chunks_created,
            "files_removed": stats.files_removed,
        }))?);
    } else {
        println!(
            "{} indexed {}/{}: {} files, {} chunks",
            style("[info]").blue().bold(),
            workspace_name,
            project_name,
            stats.files_indexed,
            stats.chunks_created
        );
    }
    Ok(())
}

fn handle_search(query: &str, limit: usize, path: &str, json: bool, compact: bool) -> Result<()> {
    let root = config::find_project_root()?;
    let cfg = Config::load(&root)?;
    let token = CancelToken::new();

    let embedder: Arc<dyn Embedder> = Arc::from(embedding::from_config(&cfg.embedder)?);
    let store: Arc<dyn VectorStore> = Arc::from(store::open_project_store(
        &root,
        &cfg.store,
        embedder.dimensions(),
    )?);
    store.load(&token)?;

    let normalized = normalize_path_prefix(path, &root)?;
    let searcher = Searcher::new(store.clone(), embedder.clone(), cfg.search.clone());

    let results = match searcher.search(&token, query, limit, &normalized) {
        Ok(results) => results,
        Err(err) if json => {
            println!("{}", output::error_json(&err));
            return Ok(());
        }
        Err(err) => return Err(err).context("search failed"),
    };
    store.close()?;
    embedder.close();

    print_results(query, &results, json, compact)
}

fn handle_workspace_search(
    workspace_name: &str,
    query: &str,
    limit: usize,
    projects: &[String],
    path: &str,
    json: bool,
    compact: bool,
) -> Result<()> {
    let ws = load_workspace(workspace_name)?;
    let token = CancelToken::new();

    let results = match workspace::search_workspace(&token, &ws, query, limit, projects, path) {
        Ok(results) => results,
        Err(err) if json => {
            println!("{}", output::error_json(&err));
            return Ok(());
        }
        Err(err) => return Err(err).context("workspace search failed"),
    };

    print_results(query, &results, json, compact)
}

fn handle_status(json: bool) -> Result<()> {
    let root = config::find_project_root()?;
    let cfg = Config::load(&root)?;
    let token = CancelToken::new();

    let store = store::open_project_store(&root, &cfg.store, cfg.embedder.dimensions())?;
    store.load(&token)?;
    let stats = store.stats(&token)?;
    store.close()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("Indexed files:  {}", stats.total_files);
        println!("Indexed chunks: {}", stats.total_chunks);
        println!("Index size:     {} bytes", stats.index_size_bytes);
        match stats.last_updated {
            Some(when) => println!("Last updated:   {}", when.to_rfc3339()),
            None => println!("Last updated:   never"),
        }
    }
    Ok(())
}

fn print_results(
    query: &str,
    results: &[crate::store::SearchResult],
    json: bool,
    compact: bool,
) -> Result<()> {
    if json {
        let rendered = if compact {
            output::to_compact_json(results)?
        } else {
            output::to_json(results)?
        };
        println!("{}", rendered);
    } else {
        print!("{}", output::render_plain(query, results));
    }
    Ok(())
}

fn load_workspace(name: &str) -> Result<Workspace> {
    let config = WorkspaceConfig::load()?
        .ok_or_else(|| GrepaiError::NotFound("no workspaces configured".to_string()))?;
    Ok(config.get(name)?.clone())
}

fn resolve_project_root(path: Option<PathBuf>) -> Result<PathBuf> {
    match path {
        Some(p) => Ok(canonical(&p)),
        None => Ok(config::find_project_root()?),
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn setup_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "grepai=info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn resolve_project_root_prefers_explicit_path() {
        let dir = std::env::temp_dir().join(format!("grepai_app_test_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let resolved = resolve_project_root(Some(dir.clone())).unwrap();
        assert!(resolved.ends_with(dir.file_name().unwrap()));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn canonical_passes_through_missing_paths() {
        let missing = PathBuf::from("/definitely/not/here");
        assert_eq!(canonical(&missing), missing);
    }

    #[test]
    fn compact_without_json_is_rejected() {
        let cli = Cli::parse_from(["grepai", "search", "q", "--compact"]);
        assert!(run_with_cli(cli).is_err());
    }

    #[test]
    fn project_without_workspace_is_rejected() {
        let cli = Cli::parse_from(["grepai", "search", "q", "--project", "api"]);
        assert!(run_with_cli(cli).is_err());
    }
}
