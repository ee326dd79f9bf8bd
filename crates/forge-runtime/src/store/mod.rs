//! Persistence boundary (purpose & scope: the store is an external
//! collaborator). `Store` is the abstract contract every other
//! component talks to; `memory` and `sqlite` are the two concrete
//! backends.

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forge_common::error::EngineError;
use forge_common::model::{Heartbeat, PhaseRun, Run, Task};
use forge_common::signal::Signal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A durable snapshot of run progress, written at each phase boundary so
/// the mothership orchestrator can resume a crashed or paused run
/// without replaying completed phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: Uuid,
    pub run_id: Uuid,
    pub phase: String,
    pub last_complete_phase: Option<String>,
    pub cumulative_cost_usd: f64,
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(
        run_id: Uuid,
        phase: impl Into<String>,
        last_complete_phase: Option<String>,
        cumulative_cost_usd: f64,
        hash: impl Into<String>,
    ) -> Self {
        Self {
            checkpoint_id: Uuid::new_v4(),
            run_id,
            phase: phase.into(),
            last_complete_phase,
            cumulative_cost_usd,
            hash: hash.into(),
            created_at: Utc::now(),
        }
    }
}

/// The row-level persistence contract. Status-transition guards (e.g.
/// "only advance a `PhaseRun` from `running`") are enforced by callers
/// reading the current row before writing an update, not by the store
/// itself, which is a plain keyed table per entity.
#[async_trait]
pub trait Store: Send + Sync {
    async fn put_run(&self, run: Run) -> Result<(), EngineError>;
    async fn get_run(&self, run_id: Uuid) -> Result<Run, EngineError>;

    async fn put_phase_run(&self, phase_run: PhaseRun) -> Result<(), EngineError>;
    async fn get_phase_run(&self, phase_run_id: Uuid) -> Result<PhaseRun, EngineError>;
    async fn phase_runs_for_run(&self, run_id: Uuid) -> Result<Vec<PhaseRun>, EngineError>;

    async fn put_task(&self, task: Task) -> Result<(), EngineError>;
    async fn get_task(&self, task_id: Uuid) -> Result<Task, EngineError>;
    async fn tasks_for_phase_run(&self, phase_run_id: Uuid) -> Result<Vec<Task>, EngineError>;

    async fn put_heartbeat(&self, heartbeat: Heartbeat) -> Result<(), EngineError>;
    async fn latest_heartbeat(&self, task_id: Uuid) -> Result<Option<Heartbeat>, EngineError>;

    async fn put_signal(&self, signal: Signal) -> Result<(), EngineError>;

    async fn put_checkpoint(&self, checkpoint: Checkpoint) -> Result<(), EngineError>;
    async fn latest_checkpoint(&self, run_id: Uuid) -> Result<Option<Checkpoint>, EngineError>;
}
