//! # codectx CLI
//!
//! The `codectx` binary ingests project artifacts into a local SQLite
//! vector store and turns similarity search over them into markdown
//! context documents.
//!
//! ## Usage
//!
//! ```bash
//! codectx --config ./config/codectx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `codectx init` | Create the SQLite database and run schema migrations |
//! | `codectx ingest <project>` | Chunk, embed and store a project's sources |
//! | `codectx search "<query>"` | Ranked similarity search over stored chunks |
//! | `codectx context "<query>"` | Assemble a grouped markdown context document |
//! | `codectx overview <project>` | Chunk counts per source type |
//! | `codectx structure <project>` | Per-file listing of code chunks |
//! | `codectx projects` | List ingested projects |
//! | `codectx delete <project>` | Remove a project and all its chunks |
//!
//! `OPENAI_API_KEY` must be set for `ingest`, `search` and `context`;
//! `AIRTABLE_API_KEY` when Airtable tables are ingested. Log verbosity is
//! controlled with `RUST_LOG`; logs go to stderr.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use codectx::context::{self, ContextOptions};
use codectx::ingest::{self, IngestOptions};
use codectx::search::{self, SearchOptions};
use codectx::{config, migrate, projects};

/// codectx: a personal RAG pipeline for code, docs and design records.
#[derive(Parser)]
#[command(
    name = "codectx",
    about = "Chunk, embed and retrieve project artifacts as markdown context for AI assistants",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/codectx.toml` when that file exists, otherwise
    /// built-in defaults are used.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest a project's sources: read, chunk, embed and upsert.
    ///
    /// Re-ingesting replaces chunks at the same path; project metadata
    /// given here is merged into the stored record.
    Ingest {
        /// Project name (created on first ingest).
        project: String,

        #[arg(long)]
        description: Option<String>,

        /// Comma-separated technologies, e.g. `rust,sqlite`.
        #[arg(long, value_delimiter = ',')]
        tech_stack: Vec<String>,

        /// Work tree to ingest. Defaults to `.` when no tables are given.
        #[arg(long)]
        path: Option<PathBuf>,

        #[arg(long)]
        repo_url: Option<String>,

        /// Comma-separated Airtable table names.
        #[arg(long, value_delimiter = ',')]
        airtable_tables: Vec<String>,

        /// Count documents and chunks without embedding or writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Search stored chunks by semantic similarity.
    Search {
        query: String,

        /// Restrict results to one project.
        #[arg(long)]
        project: Option<String>,

        /// Minimum similarity (exclusive), 0.0 to 1.0.
        #[arg(long)]
        threshold: Option<f64>,

        #[arg(long)]
        limit: Option<usize>,

        /// Also render a context document from the results.
        #[arg(long)]
        context: bool,

        /// Write the context document here. Implies `--context`.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Generate a markdown context document for a query.
    Context {
        query: String,

        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        threshold: Option<f64>,

        #[arg(long)]
        limit: Option<usize>,

        /// Write the document to a file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Summarize a project's chunk counts by source type.
    Overview {
        project: String,

        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// List a project's code chunks grouped by file.
    Structure {
        project: String,

        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// List ingested projects.
    Projects,

    /// Delete a project and all of its chunks.
    Delete { project: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::resolve_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            project,
            description,
            tech_stack,
            path,
            repo_url,
            airtable_tables,
            dry_run,
        } => {
            let opts = IngestOptions {
                project,
                description,
                tech_stack,
                path,
                repo_url,
                airtable_tables,
                dry_run,
            };
            ingest::run_ingest(&cfg, &opts).await?;
        }
        Commands::Search {
            query,
            project,
            threshold,
            limit,
            context,
            output,
        } => {
            let opts = SearchOptions {
                query,
                project,
                threshold,
                limit,
                context,
                output,
            };
            search::run_search(&cfg, &opts).await?;
        }
        Commands::Context {
            query,
            project,
            threshold,
            limit,
            output,
        } => {
            let opts = ContextOptions {
                query,
                project,
                threshold,
                limit,
                output,
            };
            context::run_context(&cfg, &opts).await?;
        }
        Commands::Overview { project, output } => {
            context::run_overview(&cfg, &project, output.as_deref()).await?;
        }
        Commands::Structure { project, output } => {
            context::run_structure(&cfg, &project, output.as_deref()).await?;
        }
        Commands::Projects => {
            projects::run_projects(&cfg).await?;
        }
        Commands::Delete { project } => {
            projects::run_delete(&cfg, &project).await?;
        }
    }

    Ok(())
}
