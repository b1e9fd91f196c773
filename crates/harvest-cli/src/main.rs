use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::time::{Duration, sleep};

use harvest_core::app::{AppBuilder, CollectionService, StartRequest};
use harvest_core::config::HarvestConfig;
use harvest_core::domain::{Category, CollectOutcome, CollectionId, OwnerId, SessionId};
use harvest_core::impls::LocalObjectStore;
use harvest_core::observability::init_tracing;
use harvest_core::ports::{AuthContext, Collector};

const DEMO_CATEGORIES: &[&str] = &["compute", "storage", "network", "identity", "billing"];

#[derive(Parser)]
#[command(name = "harvest")]
#[command(about = "Collect, list and inspect inventory snapshots", long_about = None)]
struct Cli {
    /// JSON config file; HARVEST_* env vars are applied on top
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides the configured store root
    #[arg(long, global = true)]
    store_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a collection and wait for it to finish
    Collect {
        #[arg(long)]
        owner: String,
        #[arg(long, default_value = "cli")]
        session: String,
        #[arg(long, default_value = "us-east-1")]
        region: String,
        #[arg(long, value_delimiter = ',', default_value = "compute,storage,network,identity,billing")]
        categories: Vec<String>,
    },
    /// List an owner's collections, most recent first
    List {
        #[arg(long)]
        owner: String,
    },
    /// Print one collection as JSON
    Show {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        id: String,
    },
    /// Delete one collection
    Delete {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        id: String,
    },
}

/// Fake inventory so the CLI works without cloud credentials.
/// `billing` always fails to show how a failed category is persisted.
struct DemoCollector;

#[async_trait]
impl Collector for DemoCollector {
    async fn collect(
        &self,
        category: &Category,
        region: &str,
        _auth: &AuthContext,
    ) -> Result<CollectOutcome, String> {
        sleep(Duration::from_millis(150)).await;
        match category.as_str() {
            "billing" => Err("billing API not enabled for this account".to_string()),
            name => Ok(CollectOutcome::success(serde_json::json!({
                "region": region,
                "resources": name.len() * 3,
            }))),
        }
    }
}

fn load_config(cli: &Cli) -> Result<HarvestConfig> {
    let mut config = match &cli.config {
        Some(path) => HarvestConfig::from_json_file(path)?,
        None => HarvestConfig::default(),
    }
    .with_env_overrides(|k| std::env::var(k).ok());
    if let Some(root) = &cli.store_root {
        config.store_root = root.clone();
    }
    Ok(config)
}

fn build_service(config: HarvestConfig) -> Result<CollectionService> {
    tracing::debug!(store_root = %config.store_root.display(), "using local object store");
    let collector: Arc<dyn Collector> = Arc::new(DemoCollector);
    let mut builder = AppBuilder::new().store(Arc::new(LocalObjectStore::new(config.store_root.clone())));
    for category in DEMO_CATEGORIES {
        builder = builder.collector(*category, collector.clone())?;
    }
    Ok(builder.config(config).expect_categories(DEMO_CATEGORIES).build()?)
}

async fn collect(
    service: &CollectionService,
    owner: String,
    session: String,
    region: String,
    categories: Vec<String>,
) -> Result<()> {
    let session = SessionId::new(session);
    let owner = OwnerId::new(owner);
    let id = service.start_collection(StartRequest {
        session: session.clone(),
        owner: owner.clone(),
        region,
        categories: categories.iter().map(|c| Category::new(c.as_str())).collect(),
        auth: AuthContext::new(),
    })?;
    println!("started {id}");

    let mut last_progress = None;
    let status = loop {
        let status = service.poll_status(&session);
        if last_progress != Some(status.progress_percent) {
            let current = status
                .current_category
                .as_ref()
                .map_or("-".to_string(), |c| c.to_string());
            println!(
                "{:>3}% ({}/{}) current={}",
                status.progress_percent, status.completed_count, status.total_categories, current
            );
            last_progress = Some(status.progress_percent);
        }
        if !status.is_running {
            break status;
        }
        sleep(Duration::from_millis(100)).await;
    };

    if let Some(err) = status.error {
        bail!("collection {id} aborted: {err}");
    }
    for (category, err) in &status.failed_categories {
        println!("  {category}: failed ({err}), stored as placeholder");
    }

    let record = service
        .get_collection(&owner, id)
        .await
        .with_context(|| format!("collection {id} finished but was not persisted"))?;
    println!("saved {id} with {} categories", record.payload.len());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing(&config.log);
    let service = build_service(config)?;

    match cli.command {
        Commands::Collect {
            owner,
            session,
            region,
            categories,
        } => collect(&service, owner, session, region, categories).await?,
        Commands::List { owner } => {
            let list = service.list_collections(&OwnerId::new(owner)).await?;
            if list.is_empty() {
                println!("no collections");
            }
            for m in list {
                let categories: Vec<String> =
                    m.selected_categories.iter().map(|c| c.to_string()).collect();
                println!(
                    "{}  {}  {}  [{}]",
                    m.collection_id,
                    m.timestamp.to_rfc3339(),
                    m.region,
                    categories.join(",")
                );
            }
        }
        Commands::Show { owner, id } => {
            let id: CollectionId = id.parse()?;
            let record = service.get_collection(&OwnerId::new(owner), id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Delete { owner, id } => {
            let id: CollectionId = id.parse()?;
            if service.delete_collection(&OwnerId::new(owner), id).await? {
                println!("deleted {id}");
            } else {
                bail!("collection {id} not found");
            }
        }
    }

    Ok(())
}
