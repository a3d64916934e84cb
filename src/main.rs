//! # Doc Harness CLI (`dh`)
//!
//! Extracts text from local documents into an encrypted cache, assembles
//! citation-ready prompt context, and asks an LLM about it.
//!
//! ## Usage
//!
//! ```bash
//! dh --config ./config/dh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dh extract <paths..>` | Extract and cache every file under the paths |
//! | `dh pending <paths..>` | List files with no cached extraction |
//! | `dh show <name>` | Print the cached text for a cache key or name |
//! | `dh list` | List every cache key |
//! | `dh reprocess <path>` | Drop the cached text for a file (or folder) and extract again |
//! | `dh clear [name]` | Clear one entry group, or the whole cache |
//! | `dh context <paths..>` | Print the prompt context the LLM would see |
//! | `dh ask "<question>" <paths..>` | Run one chat turn and print the reply |
//! | `dh verify` | Check that the configured LLM is reachable |
//!
//! Without a config file, defaults from `Config::minimal()` apply (store at
//! `./data/dh-store.json`, no LLM, no OCR). See `config/dh.example.toml`.
//!
//! Logging goes to stderr; set `RUST_LOG` (e.g. `RUST_LOG=doc_harness=debug`).

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use doc_harness::{commands, config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "dh",
    about = "Doc Harness: document extraction cache and citation-ready LLM context",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract text from files and folders into the cache.
    ///
    /// Files already cached (same name and size) are not parsed again.
    Extract {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// List files under the paths that have no cached extraction.
    Pending {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Print the cached text for a name (`report.pdf`, `Docs/a.txt`, `report.pdf_2048`).
    Show { name: String },

    /// List every cache key.
    List,

    /// Clear the cached text for a file or folder and extract it again.
    Reprocess { path: PathBuf },

    /// Clear one cache entry group, or everything when no name is given.
    Clear { name: Option<String> },

    /// Print the assembled prompt context for a set of sources.
    Context {
        paths: Vec<PathBuf>,

        /// Pasted text source, as NAME=CONTENT. Repeatable.
        #[arg(long = "text", value_name = "NAME=CONTENT")]
        texts: Vec<String>,
    },

    /// Ask a question about a set of sources.
    Ask {
        question: String,

        paths: Vec<PathBuf>,

        /// Pasted text source, as NAME=CONTENT. Repeatable.
        #[arg(long = "text", value_name = "NAME=CONTENT")]
        texts: Vec<String>,
    },

    /// Check connectivity to the configured LLM.
    Verify,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "doc_harness=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        tracing::debug!(path = %cli.config.display(), "config not found, using defaults");
        config::Config::minimal()
    };

    match cli.command {
        Commands::Extract { paths } => commands::run_extract(&cfg, &paths).await?,
        Commands::Pending { paths } => commands::run_pending(&cfg, &paths).await?,
        Commands::Show { name } => commands::run_show(&cfg, &name).await?,
        Commands::List => commands::run_list(&cfg).await?,
        Commands::Reprocess { path } => commands::run_reprocess(&cfg, &path).await?,
        Commands::Clear { name } => commands::run_clear(&cfg, name.as_deref()).await?,
        Commands::Context { paths, texts } => commands::run_context(&cfg, &paths, &texts).await?,
        Commands::Ask {
            question,
            paths,
            texts,
        } => commands::run_ask(&cfg, &question, &paths, &texts).await?,
        Commands::Verify => commands::run_verify(&cfg).await?,
    }

    Ok(())
}
