mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "codescout")]
#[command(author, version, about = "Hybrid code retrieval: vector + BM25 search over repositories")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a repository checkout into a session
    Index {
        /// Path to the repository checkout
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Repository URL; the session id is derived from it
        #[arg(short, long)]
        repo: Option<String>,

        /// Explicit session name (overrides --repo)
        #[arg(short, long)]
        session: Option<String>,

        /// Reset the session before indexing
        #[arg(long)]
        force: bool,
    },

    /// Search an indexed session
    Search {
        /// Search query
        query: String,

        /// Repository URL; the session id is derived from it
        #[arg(short, long)]
        repo: Option<String>,

        /// Explicit session name (overrides --repo)
        #[arg(short, long)]
        session: Option<String>,

        /// Maximum results
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Restrict results to one file path
        #[arg(short, long)]
        file: Option<String>,
    },

    /// Show session statistics
    Stats {
        #[arg(short, long)]
        repo: Option<String>,

        #[arg(short, long)]
        session: Option<String>,
    },

    /// Delete every indexed document in a session
    Reset {
        #[arg(short, long)]
        repo: Option<String>,

        #[arg(short, long)]
        session: Option<String>,
    },

    /// Inspect or force-release a session's indexing lock
    Locks {
        #[arg(short, long)]
        repo: Option<String>,

        #[arg(short, long)]
        session: Option<String>,

        /// Force-release the lock even if held
        #[arg(long)]
        release: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Index {
            path,
            repo,
            session,
            force,
        } => commands::index(&path, repo.as_deref(), session.as_deref(), force).await,
        Commands::Search {
            query,
            repo,
            session,
            limit,
            file,
        } => {
            commands::search(
                &query,
                repo.as_deref(),
                session.as_deref(),
                limit,
                file.as_deref(),
            )
            .await
        }
        Commands::Stats { repo, session } => {
            commands::stats(repo.as_deref(), session.as_deref()).await
        }
        Commands::Reset { repo, session } => {
            commands::reset(repo.as_deref(), session.as_deref()).await
        }
        Commands::Locks {
            repo,
            session,
            release,
        } => commands::locks(repo.as_deref(), session.as_deref(), release).await,
    }
}
