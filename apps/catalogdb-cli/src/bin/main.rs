use async_trait::async_trait;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use catalogdb_core::config::{Config, Settings};
use catalogdb_core::VersionId;
use catalogdb_hybrid::HybridSearchEngine;
use catalogdb_lifecycle::{CatalogOrchestrator, LanceVersionRepository};
use catalogdb_vector::{provider_from_settings, CanonicalHandle, LanceStore, ProgressSink};

#[derive(Debug, Parser)]
#[command(name = "catalogdb", about = "Hybrid article/keyword/semantic search over product catalogs")]
struct Cli {
    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Index a catalog file straight into the live collection
    Index { path: PathBuf },
    /// Stage a catalog file as a new version
    Upload {
        path: PathBuf,
        #[arg(long)]
        by: Option<String>,
        /// Reindex right after staging
        #[arg(long)]
        reindex: bool,
    },
    /// Rebuild the live collection from a stored version
    Reindex { id: VersionId },
    /// Search the live catalog
    Search {
        query: String,
        #[arg(short, long)]
        category: Option<String>,
        #[arg(short, long, default_value_t = 10)]
        k: usize,
    },
    /// List the categories of the live catalog
    Categories,
    /// List catalog versions, newest first
    Versions {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show the status of one version
    Status { id: VersionId },
    /// Serve a previously indexed version again
    Activate { id: VersionId },
    /// Remove a non-active version
    Delete { id: VersionId },
}

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

struct BarProgress(ProgressBar);

#[async_trait]
impl ProgressSink for BarProgress {
    async fn on_batch(&self, processed: usize, total: usize) {
        self.0.set_length(total as u64);
        self.0.set_position(processed as u64);
    }
}

struct App {
    settings: Settings,
    engine: HybridSearchEngine,
    orchestrator: CatalogOrchestrator,
}

impl App {
    async fn open(settings: Settings) -> anyhow::Result<Self> {
        let base = std::env::current_dir()?;
        let index_path = settings.storage.index_path(&base);
        tokio::fs::create_dir_all(&index_path).await?;

        let store = Arc::new(LanceStore::open(&index_path.to_string_lossy()).await?);
        let repo = Arc::new(LanceVersionRepository::new(store.connection().clone(), settings.storage.versions_table.clone()));
        let provider = provider_from_settings(&settings.embedding)?;
        let handle = Arc::new(CanonicalHandle::bootstrap(store.as_ref(), &settings.storage.canonical_collection).await?);

        let engine = HybridSearchEngine::new(store.clone(), provider.clone(), handle.clone(), settings.search.clone());
        let orchestrator = CatalogOrchestrator::new(store, provider, handle, repo, &settings);
        Ok(Self { settings, engine, orchestrator })
    }

    async fn reindex(&self, id: VersionId) -> anyhow::Result<()> {
        let spinner = ProgressBar::new_spinner();
        spinner.enable_steady_tick(Duration::from_millis(120));
        spinner.set_message(format!("Reindexing catalog version {id}"));
        let result = self.orchestrator.reindex(id).await;
        spinner.finish_and_clear();
        let version = result?;
        println!("✅ Version {} active with {} products", version.id, version.products_count);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let settings = Config::load()?.settings()?;
    let app = App::open(settings).await?;

    match cli.command {
        Command::Index { path } => {
            let pb = ProgressBar::new(0);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} products ({percent}%)")?
                    .progress_chars("#>-"),
            );
            let sink = BarProgress(pb);
            let result = app.orchestrator.index_catalog(&path, Some(&sink)).await;
            sink.0.finish_and_clear();
            println!("✅ Indexed {} products from {}", result?, path.display());
        }
        Command::Upload { path, by, reindex } => {
            let upload_dir = app.settings.storage.upload_path(&std::env::current_dir()?);
            let staged = CatalogOrchestrator::stage_upload(&path, &upload_dir).await?;
            let id = app.orchestrator.create_version(&staged, by).await?;
            println!("📦 Stored {} as version {id}", staged.filename);
            if reindex {
                app.reindex(id).await?;
            }
        }
        Command::Reindex { id } => app.reindex(id).await?,
        Command::Search { query, category, k } => {
            let results = app.engine.try_search(&query, category.as_deref(), k).await?;
            if results.is_empty() {
                println!("No results for '{query}'");
            }
            for (rank, r) in results.iter().enumerate() {
                let p = &r.product;
                println!("{:>2}. [{:.3}] {} | {} | {}", rank + 1, r.score, p.article, p.product_name, p.categories().collect::<Vec<_>>().join(" / "));
            }
        }
        Command::Categories => {
            for category in app.engine.get_categories().await {
                println!("{category}");
            }
        }
        Command::Versions { limit } => {
            for v in app.orchestrator.list_versions(limit).await? {
                println!(
                    "{:>4}  {:<10} {:>3}%  {:>7} products  {}  {}",
                    v.id,
                    v.status.to_string(),
                    v.progress,
                    v.products_count,
                    v.created_at.format("%Y-%m-%d %H:%M:%S"),
                    v.filename
                );
            }
        }
        Command::Status { id } => {
            let s = app.orchestrator.get_status(id).await?;
            println!("Version {}: {} ({}%) {}", s.id, s.status, s.progress, s.message);
            println!("Products: {}", s.products_count);
            if let Some(err) = s.error {
                println!("Error: {err}");
            }
        }
        Command::Activate { id } => {
            let v = app.orchestrator.activate(id).await?;
            println!("✅ Version {} is now active", v.id);
        }
        Command::Delete { id } => {
            app.orchestrator.delete(id).await?;
            println!("🗑️  Deleted version {id}");
        }
    }
    Ok(())
}
