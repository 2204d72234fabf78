//! # Doc Refinery CLI (`refinery`)
//!
//! ## Usage
//!
//! ```bash
//! refinery --config ./config/refinery.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `refinery init` | Create the SQLite database and run schema migrations |
//! | `refinery ingest <file>` | Parse and store a document, or reuse the live record |
//! | `refinery list` | List stored artifacts, newest first |
//! | `refinery get <id>` | Show one artifact |
//! | `refinery rename <id> <name>` | Set an artifact's display name |
//! | `refinery delete <id>` | Remove an artifact |
//! | `refinery improve --target <text>` | Stream rewrite progress and a patch as SSE frames |
//! | `refinery serve` | Start the HTTP server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use doc_refinery::{commands, config, logging, server};

/// Content-addressed document ingestion with a similarity-gated rewrite
/// pipeline.
#[derive(Parser)]
#[command(
    name = "refinery",
    about = "Doc Refinery: deduplicated document ingestion and similarity-gated rewriting",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/refinery.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Ingest a document.
    ///
    /// Prints the artifact id and whether it came from the cache.
    Ingest {
        file: PathBuf,

        /// Parsing model identifier; overrides `[cache].model`.
        #[arg(long)]
        model: Option<String>,
    },

    /// List stored artifacts.
    List,

    /// Show one artifact by id.
    Get { id: String },

    /// Set an artifact's display name.
    Rename { id: String, name: String },

    /// Delete an artifact.
    Delete { id: String },

    /// Rewrite items toward a target description.
    ///
    /// Items are read one per line from `--items-file`, or from stdin.
    /// Output is the SSE event stream: progress frames, then a patch frame.
    Improve {
        #[arg(long)]
        target: String,

        #[arg(long)]
        items_file: Option<PathBuf>,

        /// Similarity threshold in [0, 1]; overrides `[rewrite].threshold`.
        #[arg(long)]
        threshold: Option<f32>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => commands::run_init(&cfg).await?,
        Commands::Ingest { file, model } => {
            commands::run_ingest(&cfg, &file, model.as_deref()).await?
        }
        Commands::List => commands::run_list(&cfg).await?,
        Commands::Get { id } => commands::run_get(&cfg, &id).await?,
        Commands::Rename { id, name } => commands::run_rename(&cfg, &id, &name).await?,
        Commands::Delete { id } => commands::run_delete(&cfg, &id).await?,
        Commands::Improve {
            target,
            items_file,
            threshold,
        } => {
            commands::run_improve(&cfg, &target, items_file.as_deref(), threshold).await?;
        }
        Commands::Serve => server::run_server(&cfg).await?,
    }

    Ok(())
}
