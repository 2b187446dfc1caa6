use std::env;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::config::{EmbedderConfig, SearchConfig, StoreBackend, StoreConfig};
use crate::embedding;
use crate::error::{GrepaiError, Result};
use crate::search::{resolve_relative, Searcher};
use crate::store::{self, SearchResult, VectorStore};

const WORKSPACES_FILE: &str = "workspaces.yaml";

/// A named bundle of projects indexed into one shared store. File paths
/// are namespaced `workspace_name/project_name/relative_path`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub workspaces: Vec<Workspace>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Workspace {
    pub name: String,
    pub projects: Vec<WorkspaceProject>,
    pub embedder: EmbedderConfig,
    pub store: StoreConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkspaceProject {
    pub name: String,
    pub root: PathBuf,
}

impl WorkspaceConfig {
    /// Read `$GREPAI_HOME/workspaces.yaml`; `None` when no workspaces have
    /// been configured yet.
    pub fn load() -> Result<Option<Self>> {
        let path = grepai_home()?.join(WORKSPACES_FILE);
        if !path.exists() {
            return Ok(None);
        }

        let raw = fs::read_to_string(&path)?;
        let expanded = crate::config::expand_env(&raw);
        let config: WorkspaceConfig = serde_yaml::from_str(&expanded).map_err(|e| {
            GrepaiError::config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        Ok(Some(config))
    }

    pub fn get(&self, name: &str) -> Result<&Workspace> {
        self.workspaces
            .iter()
            .find(|ws| ws.name == name)
            .ok_or_else(|| GrepaiError::NotFound(format!("workspace {}", name)))
    }
}

impl Workspace {
    pub fn project(&self, name: &str) -> Result<&WorkspaceProject> {
        self.projects
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| {
                GrepaiError::NotFound(format!("project {} in workspace {}", name, self.name))
            })
    }

    /// Workspaces need a store that several projects can share; the
    /// per-project binary file does not qualify.
    pub fn validate_backend(&self) -> Result<()> {
        if self.store.backend == StoreBackend::Binary {
            return Err(GrepaiError::config(format!(
                "workspace {} requires a shared store backend (sqlite or qdrant)",
                self.name
            )));
        }
        Ok(())
    }

    /// Validate requested project names; empty means every project.
    pub fn resolve_projects(&self, requested: &[String]) -> Result<Vec<String>> {
        if requested.is_empty() {
            return Ok(self.projects.iter().map(|p| p.name.clone()).collect());
        }
        for name in requested {
            self.project(name)?;
        }
        Ok(requested.to_vec())
    }

    /// Namespace prefix for a project indexed into this workspace.
    pub fn namespace(&self, project: &str) -> String {
        format!("{}/{}", self.name, project)
    }

    pub fn open_store(&self) -> Result<Box<dyn VectorStore>> {
        self.validate_backend()?;
        let base_dir = grepai_home()?.join("workspaces").join(&self.name);
        fs::create_dir_all(&base_dir)?;
        store::open_store(
            &self.store,
            &format!("workspace_{}", self.name),
            &base_dir,
            self.embedder.dimensions(),
        )
    }
}

/// Reject absolute prefixes (a workspace spans several roots) and resolve
/// the rest the same way single-project search does.
pub fn normalize_workspace_path(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(String::new());
    }

    let candidate = trimmed.replace('\\', "/");
    if std::path::Path::new(&candidate).is_absolute() {
        return Err(GrepaiError::FailedPath(format!(
            "{} must be relative in workspace mode",
            raw
        )));
    }
    resolve_relative(&candidate, trimmed)
}

/// The pushed-down prefix: always the workspace namespace, plus the
/// project when exactly one is selected, plus any path filter.
pub fn workspace_prefix(workspace: &Workspace, projects: &[String], path: &str) -> String {
    let mut prefix = format!("{}/", workspace.name);
    if projects.len() == 1 {
        prefix.push_str(&projects[0]);
        prefix.push('/');
    }
    prefix.push_str(path);
    prefix
}

/// Cross-project query against a workspace's shared store. Multi-project
/// filtering happens client-side after the over-fetched retrieval.
pub fn search_workspace(
    token: &CancelToken,
    workspace: &Workspace,
    query: &str,
    limit: usize,
    requested_projects: &[String],
    raw_path: &str,
) -> Result<Vec<SearchResult>> {
    let normalized = normalize_workspace_path(raw_path)?;
    let projects = workspace.resolve_projects(requested_projects)?;

    let embedder: std::sync::Arc<dyn embedding::Embedder> =
        std::sync::Arc::from(embedding::from_config(&workspace.embedder)?);
    let store: std::sync::Arc<dyn VectorStore> = std::sync::Arc::from(workspace.open_store()?);
    store.load(token)?;

    let prefix = workspace_prefix(workspace, &projects, &normalized);
    let searcher = Searcher::new(store.clone(), embedder.clone(), workspace.search.clone());
    let mut results = searcher.search(token, query, limit, &prefix)?;

    if projects.len() > 1 {
        results.retain(|r| {
            projects.iter().any(|project| {
                let expected = format!("{}/{}/", workspace.name, project);
                r.chunk.file_path.starts_with(&expected)
            })
        });
    }

    store.close()?;
    embedder.close();
    Ok(results)
}

/// `$GREPAI_HOME`, defaulting to `~/.grepai`.
pub fn grepai_home() -> Result<PathBuf> {
    if let Ok(home) = env::var("GREPAI_HOME") {
        return Ok(PathBuf::from(home));
    }
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".grepai"))
        .ok_or_else(|| GrepaiError::config("cannot determine home directory; set GREPAI_HOME"))
}
