//! Core run/phase/task entities.
//!
//! Ownership is strictly hierarchical: a `Run` owns `PhaseRun`s which own
//! `Task`s. Cross-references (shard assignments, signal targets, heartbeats)
//! are weak — they carry ids, not owned data, and are looked up through a
//! `Store` implementation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a `Run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Created,
    Running,
    Paused,
    Failed,
    Completed,
}

/// A workflow execution spanning the full ordered phase pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: Uuid,
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub idea_spec: String,
    pub status: RunStatus,
    pub current_phase: Option<String>,
    /// Monotonic sequence, incremented each time the run advances to a new phase.
    pub phase_sequence: u64,
    pub running_cost_usd: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    pub fn new(tenant_id: impl Into<String>, idea_spec: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            project_id: None,
            idea_spec: idea_spec.into(),
            status: RunStatus::Created,
            current_phase: None,
            phase_sequence: 0,
            running_cost_usd: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, RunStatus::Failed | RunStatus::Completed)
    }
}

/// Lifecycle status of a `PhaseRun`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseRunStatus {
    Pending,
    Running,
    Stalled,
    Ready,
    GatePassed,
    GateFailed,
    Errored,
}

impl PhaseRunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PhaseRunStatus::GatePassed | PhaseRunStatus::GateFailed | PhaseRunStatus::Errored
        )
    }
}

/// One execution of one phase within a `Run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRun {
    pub phase_run_id: Uuid,
    pub run_id: Uuid,
    pub phase: String,
    pub hash: String,
    pub status: PhaseRunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PhaseRun {
    pub fn new(run_id: Uuid, phase: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            phase_run_id: Uuid::new_v4(),
            run_id,
            phase: phase.into(),
            hash: hash.into(),
            status: PhaseRunStatus::Pending,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn start(&mut self) {
        self.status = PhaseRunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self, status: PhaseRunStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}

/// Lifecycle status of a `Task`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// One unit of work handed to a worker inside a phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: Uuid,
    pub phase_run_id: Uuid,
    pub agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_model: Option<String>,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub progress_pct: f32,
    pub eta: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(phase_run_id: Uuid, agent: impl Into<String>) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            phase_run_id,
            agent: agent.into(),
            shard_id: None,
            backend_model: None,
            status: TaskStatus::Pending,
            retry_count: 0,
            last_heartbeat_at: None,
            progress_pct: 0.0,
            eta: None,
        }
    }

    pub fn reset_for_retry(&mut self) {
        self.status = TaskStatus::Pending;
        self.retry_count += 1;
        self.progress_pct = 0.0;
        self.last_heartbeat_at = None;
    }
}

/// An append-only progress report for a task. The latest per task, by
/// `received_at`, is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub task_id: Uuid,
    pub run_id: Uuid,
    pub phase: String,
    pub pct: f32,
    pub eta: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metrics: serde_json::Map<String, serde_json::Value>,
    pub received_at: DateTime<Utc>,
}

impl Heartbeat {
    pub fn new(task_id: Uuid, run_id: Uuid, phase: impl Into<String>, pct: f32) -> Self {
        Self {
            task_id,
            run_id,
            phase: phase.into(),
            pct: pct.clamp(0.0, 100.0),
            eta: None,
            metrics: serde_json::Map::new(),
            received_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_starts_in_created_status() {
        let run = Run::new("tenant-a", "build a todo app");
        assert_eq!(run.status, RunStatus::Created);
        assert!(!run.is_terminal());
        assert!(run.project_id.is_none());
    }

    #[test]
    fn run_with_project_sets_project_id() {
        let run = Run::new("tenant-a", "spec").with_project("proj-1");
        assert_eq!(run.project_id.as_deref(), Some("proj-1"));
    }

    #[test]
    fn run_completed_is_terminal() {
        let mut run = Run::new("tenant-a", "spec");
        run.status = RunStatus::Completed;
        assert!(run.is_terminal());
    }

    #[test]
    fn phase_run_lifecycle_transitions() {
        let run_id = Uuid::new_v4();
        let mut phase_run = PhaseRun::new(run_id, "INTAKE", "deadbeef");
        assert_eq!(phase_run.status, PhaseRunStatus::Pending);

        phase_run.start();
        assert_eq!(phase_run.status, PhaseRunStatus::Running);
        assert!(phase_run.started_at.is_some());

        phase_run.complete(PhaseRunStatus::GatePassed);
        assert!(phase_run.status.is_terminal());
        assert!(phase_run.completed_at.is_some());
    }

    #[test]
    fn task_reset_for_retry_increments_count_and_clears_progress() {
        let mut task = Task::new(Uuid::new_v4(), "agent-a");
        task.status = TaskStatus::Failed;
        task.progress_pct = 42.0;
        task.reset_for_retry();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.progress_pct, 0.0);
        assert!(task.last_heartbeat_at.is_none());
    }

    #[test]
    fn heartbeat_clamps_pct_to_valid_range() {
        let hb = Heartbeat::new(Uuid::new_v4(), Uuid::new_v4(), "BUILD", 150.0);
        assert_eq!(hb.pct, 100.0);
        let hb2 = Heartbeat::new(Uuid::new_v4(), Uuid::new_v4(), "BUILD", -5.0);
        assert_eq!(hb2.pct, 0.0);
    }

    #[test]
    fn run_serializes_without_project_id_field_when_none() {
        let run = Run::new("tenant-a", "spec");
        let json = serde_json::to_string(&run).unwrap();
        assert!(!json.contains("project_id"));
    }
}
