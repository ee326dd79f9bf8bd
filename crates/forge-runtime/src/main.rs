//! The Forge runtime daemon binary.
//!
//! The worker processes that actually execute fan-out tasks, the
//! durable event bus, the persistence store, and the HTTP surface are
//! all external collaborators (purpose & scope §1) — this binary only
//! wires the reference in-process/SQLite implementations together so
//! the engine can be driven end-to-end from a terminal for local
//! development and smoke-testing.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use forge_runtime::config::PhaseConfigLoader;
use forge_runtime::coordinator::PhaseCoordinator;
use forge_runtime::events::InMemoryEventBus;
use forge_runtime::executor::RoutedEchoExecutor;
use forge_runtime::gate::NullGateEvaluator;
use forge_runtime::mothership::MothershipOrchestrator;
use forge_runtime::router::ModelRouter;
use forge_runtime::signals::SignalBus;
use forge_runtime::store::{InMemoryStore, SqliteStore, Store};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "forge-runtime")]
#[command(version, about = "Forge multi-phase workflow orchestration engine")]
struct Cli {
    /// Directory of `<phase_id>.toml` phase descriptors.
    #[arg(long, global = true, default_value = "phases")]
    phases_dir: PathBuf,

    /// Path to a SQLite database file. Defaults to an in-memory store.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a fresh run over an ordered list of phases.
    Run {
        /// Tenant id this run belongs to.
        #[arg(long)]
        tenant: String,
        /// Idea spec text driving this run.
        #[arg(long)]
        idea_spec: String,
        /// Ordered phase ids to execute, e.g. "INTAKE,BUILD,QA".
        #[arg(long, value_delimiter = ',')]
        phases: Vec<String>,
        /// Hard USD budget ceiling for the run.
        #[arg(long)]
        budget_usd: Option<f64>,
    },
    /// Resume a previously checkpointed run from its last completed phase.
    Resume {
        run_id: Uuid,
        #[arg(long, value_delimiter = ',')]
        phases: Vec<String>,
        #[arg(long)]
        budget_usd: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    forge_runtime::logging::init();
    let cli = Cli::parse();

    let store: Arc<dyn Store> = match &cli.db {
        Some(path) => Arc::new(SqliteStore::open(path)?),
        None => Arc::new(InMemoryStore::new()),
    };
    let bus = Arc::new(InMemoryEventBus::new());
    let signals = Arc::new(SignalBus::new());
    let loader = Arc::new(PhaseConfigLoader::new(&cli.phases_dir));
    let router = Arc::new(ModelRouter::new());
    let executor = Arc::new(RoutedEchoExecutor::new(Arc::clone(&router)));
    let coordinator = Arc::new(PhaseCoordinator::new(
        Arc::clone(&store),
        Arc::clone(&bus),
        Arc::clone(&signals),
        Arc::new(NullGateEvaluator),
        executor,
    ));
    let mothership = MothershipOrchestrator::new(store, bus, signals, coordinator, loader);

    match cli.command {
        Commands::Run {
            tenant,
            idea_spec,
            phases,
            budget_usd,
        } => {
            let result = mothership.start_run(tenant, idea_spec, &phases, budget_usd).await?;
            tracing::info!(run_id = %result.run.run_id, status = ?result.run.status, "run finished");
        }
        Commands::Resume {
            run_id,
            phases,
            budget_usd,
        } => {
            let result = mothership.resume_run(run_id, &phases, budget_usd).await?;
            tracing::info!(run_id = %result.run.run_id, status = ?result.run.status, "run finished");
        }
    }

    Ok(())
}
