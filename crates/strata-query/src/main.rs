//! CLI entry point for the Strata graph store.
//!
//! Works against a JSON snapshot on disk: reads a JSON request from stdin
//! where one is needed, writes a JSON result to stdout.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

use strata_core::schema::StaticSchemaRegistry;
use strata_core::{CanonicalId, OrganizationId, ProjectId, StrataConfig, TenantScope};
use strata_query::types::{SearchRequest, TraversalRequest};
use strata_query::{import_batch, HashingEmbedder, ImportBatch, SearchEngine, TraversalEngine};
use strata_store::{AdminStore, GraphStore, Storage};

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Versioned graph store with traversal and hybrid search")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Tenant as `<organization-id>/<project-id>`.
    #[arg(long, global = true)]
    tenant_id: Option<String>,

    /// Config file prefix (default: strata).
    #[arg(short, long, default_value = "strata", global = true)]
    config: String,

    /// Snapshot file. Overrides `store.snapshot_path`.
    #[arg(long, global = true)]
    snapshot: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Breadth-first traversal page (reads JSON from stdin).
    Traverse,
    /// Search page (reads JSON from stdin).
    Search {
        #[arg(long, value_enum, default_value = "hybrid")]
        mode: SearchMode,
    },
    /// Version history of an object or relationship, newest first.
    History {
        /// Canonical id.
        #[arg(long)]
        id: Uuid,
        /// Treat the id as a relationship.
        #[arg(long)]
        relationship: bool,
        /// Continue below this version.
        #[arg(long)]
        cursor: Option<u32>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Verify every hash chain in the snapshot, across all tenants.
    Verify,
    /// Create objects and relationships (reads JSON from stdin), then save.
    Import,
}

#[derive(Clone, Copy, ValueEnum)]
enum SearchMode {
    Hybrid,
    Lexical,
    Vector,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = StrataConfig::load(&cli.config)?;
    let snapshot = cli
        .snapshot
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.store.snapshot_path));

    let storage = if snapshot.exists() {
        Storage::load_snapshot(&config.store, &snapshot)?
    } else {
        Storage::open(&config.store)?
    };
    let store = GraphStore::new(
        Arc::new(storage),
        Arc::new(StaticSchemaRegistry::permissive()),
        config.store.clone(),
    );
    let embedder = Arc::new(HashingEmbedder::default());

    match cli.command {
        Command::Traverse => {
            let tenant = resolve_tenant(&cli)?;
            let input = std::io::read_to_string(std::io::stdin())?;
            let request: TraversalRequest = serde_json::from_str(&input)?;
            let engine = TraversalEngine::new(store, config.traversal.clone());
            let page = engine.traverse(&tenant, &request)?;
            println!("{}", serde_json::to_string(&page)?);
        }
        Command::Search { mode } => {
            let tenant = resolve_tenant(&cli)?;
            let input = std::io::read_to_string(std::io::stdin())?;
            let request: SearchRequest = serde_json::from_str(&input)?;
            let engine =
                SearchEngine::new(store, config.search.clone()).with_embedder(embedder.clone());
            let page = match mode {
                SearchMode::Hybrid => engine.search(&tenant, &request).await?,
                SearchMode::Lexical => engine.lexical_search(&tenant, &request).await?,
                SearchMode::Vector => engine.vector_search(&tenant, &request).await?,
            };
            println!("{}", serde_json::to_string(&page)?);
        }
        Command::History {
            id,
            relationship,
            cursor,
            limit,
        } => {
            let tenant = resolve_tenant(&cli)?;
            let id = CanonicalId(id);
            let json = if relationship {
                serde_json::to_string(&store.relationship_history(&tenant, id, cursor, limit)?)?
            } else {
                serde_json::to_string(&store.object_history(&tenant, id, cursor, limit)?)?
            };
            println!("{json}");
        }
        Command::Verify => {
            let admin = AdminStore::new(store.storage().clone());
            let report = admin.verify_all_chains();
            println!("{}", serde_json::to_string(&report)?);
            if !report.is_clean() {
                anyhow::bail!("{} hash chain(s) failed verification", report.failures.len());
            }
        }
        Command::Import => {
            let tenant = resolve_tenant(&cli)?;
            let input = std::io::read_to_string(std::io::stdin())?;
            let batch: ImportBatch = serde_json::from_str(&input)?;
            let summary = import_batch(&store, &tenant, batch, Some(embedder.as_ref())).await?;
            store.storage().save_snapshot(&snapshot)?;
            println!("{}", serde_json::to_string(&summary)?);
        }
    }

    Ok(())
}

fn resolve_tenant(cli: &Cli) -> anyhow::Result<TenantScope> {
    let raw = cli
        .tenant_id
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("--tenant-id is required for this command"))?;
    let (org, project) = raw
        .split_once('/')
        .ok_or_else(|| anyhow::anyhow!("--tenant-id must be <organization-id>/<project-id>"))?;
    Ok(TenantScope::new(
        OrganizationId(Uuid::parse_str(org)?),
        ProjectId(Uuid::parse_str(project)?),
    ))
}
