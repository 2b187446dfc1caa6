use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueHint};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "grepai",
    version,
    about = "Privacy-first semantic code search"
)]
pub struct Cli {
    /// Maximum threads for parallel operations (0 = auto). Also reads
    /// GREPAI_MAX_THREADS.
    #[arg(global = true, long = "threads", env = "GREPAI_MAX_THREADS")]
    pub max_threads: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Create .grepai/config.yaml in the current project
    Init {
        /// Project root (defaults to the current directory)
        #[arg(value_hint = ValueHint::DirPath)]
        path: Option<PathBuf>,
    },
    /// Index the project (or a workspace project) for semantic search
    Index {
        /// Project root (defaults to the nearest .grepai ancestor)
        #[arg(value_hint = ValueHint::DirPath)]
        path: Option<PathBuf>,
        /// Discard the existing index and rebuild from scratch
        #[arg(short, long)]
        force: bool,
        /// Workspace to index into (requires --project)
        #[arg(long)]
        workspace: Option<String>,
        /// Workspace project to index (requires --workspace)
        #[arg(long)]
        project: Option<String>,
        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Search the index with a natural-language query
    Search {
        /// Query such as "where do we validate user logins?"
        query: String,
        /// Maximum results to return
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
        /// Path prefix to filter results
        #[arg(long)]
        path: Option<String>,
        /// Output results as JSON (for AI agents)
        #[arg(long)]
        json: bool,
        /// Minimal output without content (requires --json)
        #[arg(long)]
        compact: bool,
        /// Workspace name for cross-project search
        #[arg(long)]
        workspace: Option<String>,
        /// Project name(s) to search within the workspace (repeatable)
        #[arg(long = "project")]
        projects: Vec<String>,
    },
    /// Show index statistics
    Status {
        /// Emit statistics as JSON
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_search_with_flags() {
        let cli = Cli::parse_from([
            "grepai", "search", "auth logic", "-n", "5", "--path", "src/", "--json",
        ]);
        match cli.command {
            Commands::Search {
                query,
                limit,
                path,
                json,
                compact,
                ..
            } => {
                assert_eq!(query, "auth logic");
                assert_eq!(limit, 5);
                assert_eq!(path.as_deref(), Some("src/"));
                assert!(json);
                assert!(!compact);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parse_workspace_search_with_repeated_projects() {
        let cli = Cli::parse_from([
            "grepai",
            "search",
            "query",
            "--workspace",
            "team",
            "--project",
            "api",
            "--project",
            "web",
        ]);
        match cli.command {
            Commands::Search {
                workspace,
                projects,
                ..
            } => {
                assert_eq!(workspace.as_deref(), Some("team"));
                assert_eq!(projects, vec!["api", "web"]);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parse_index_force() {
        let cli = Cli::parse_from(["grepai", "index", "--force"]);
        match cli.command {
            Commands::Index { force, .. } => assert!(force),
            _ => panic!("expected index command"),
        }
    }

    #[test]
    fn search_limit_defaults_to_ten() {
        let cli = Cli::parse_from(["grepai", "search", "q"]);
        match cli.command {
            Commands::Search { limit, .. } => assert_eq!(limit, 10),
            _ => panic!("expected search command"),
        }
    }
}
