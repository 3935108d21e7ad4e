use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use scriptorium_autosave::{DocumentId, DraftStore, SqliteDraftStore};
use scriptorium_common::config::{Config, FileStore};
use scriptorium_common::telemetry::{self, TelemetryConfig};

#[derive(Parser)]
#[command(version, about = "Scriptorium - inspect and repair the local draft store", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the draft store (defaults to the configured store)
    #[arg(long, env = "SCRIPTORIUM_STORE", global = true)]
    store: Option<PathBuf>,

    /// Path to a .json or .toml config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored drafts and how many writes each has queued
    Drafts {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show a draft and its pending queue
    Show {
        /// Document id
        id: String,
    },
    /// Drop the pending queue for a document, keeping its draft
    ClearQueue {
        /// Document id
        id: String,
    },
    /// Delete a draft and its pending queue
    Discard {
        /// Document id
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_miette();
    telemetry::init(TelemetryConfig::from_env("scriptorium"));

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref()).await?;
    let store_path = cli.store.unwrap_or(config.store_path);
    let store = SqliteDraftStore::open(&store_path)?;
    tracing::debug!(path = %store_path.display(), "using draft store");

    match cli.command {
        Commands::Drafts { json } => list_drafts(&store, json).await?,
        Commands::Show { id } => show_draft(&store, DocumentId::new(id)).await?,
        Commands::ClearQueue { id } => {
            let id = DocumentId::new(id);
            let pending = store.read_queue(&id).await?.len();
            store.clear_queue(&id).await?;
            println!("Cleared {pending} queued write(s) for {id}");
        }
        Commands::Discard { id } => {
            let id = DocumentId::new(id);
            store.delete_draft(&id).await?;
            println!("Discarded draft {id}");
        }
    }

    Ok(())
}

async fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load(&FileStore::new(path)).await?,
        None => Config::default(),
    };
    Ok(config.with_env_overrides()?)
}

async fn list_drafts(store: &SqliteDraftStore, json: bool) -> Result<()> {
    let drafts = store.list_drafts().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&drafts).into_diagnostic()?);
        return Ok(());
    }
    if drafts.is_empty() {
        println!("No drafts in {}", store.path().display());
        return Ok(());
    }

    println!("{:<24} {:<8} {:>6}  {:<20} TITLE", "ID", "PUBLIC", "QUEUED", "UPDATED");
    for draft in drafts {
        println!(
            "{:<24} {:<8} {:>6}  {:<20} {}",
            draft.id,
            if draft.is_public { "yes" } else { "no" },
            draft.queued,
            draft.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            draft.title
        );
    }
    Ok(())
}

async fn show_draft(store: &SqliteDraftStore, id: DocumentId) -> Result<()> {
    let draft = store
        .load_draft(&id)
        .await?
        .ok_or_else(|| miette::miette!("No draft stored for {id}"))?;
    let queue = store.read_queue(&id).await?;

    println!("{}", serde_json::to_string_pretty(&draft).into_diagnostic()?);
    if queue.is_empty() {
        println!("No queued writes");
    } else {
        println!("{} queued write(s):", queue.len());
        for entry in &queue {
            println!("  ts={} title={:?}", entry.ts, entry.payload.title);
        }
    }
    Ok(())
}

fn init_miette() {
    let hook = miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .with_cause_chain()
                .color(true)
                .context_lines(5)
                .tab_width(2)
                .break_words(true)
                .build(),
        )
    }));
    if hook.is_ok() {
        miette::set_panic_hook();
    }
}
