use async_trait::async_trait;
use dashmap::DashMap;
use forge_common::error::{EngineError, StoreError};
use forge_common::model::{Heartbeat, PhaseRun, Run, Task};
use forge_common::signal::Signal;
use uuid::Uuid;

use super::{Checkpoint, Store};

/// A process-local store backed by `DashMap`s, used for tests and for
/// single-process deployments that don't need cross-restart durability.
#[derive(Default)]
pub struct InMemoryStore {
    runs: DashMap<Uuid, Run>,
    phase_runs: DashMap<Uuid, PhaseRun>,
    tasks: DashMap<Uuid, Task>,
    heartbeats: DashMap<Uuid, Vec<Heartbeat>>,
    signals: DashMap<Uuid, Signal>,
    checkpoints: DashMap<Uuid, Vec<Checkpoint>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn put_run(&self, run: Run) -> Result<(), EngineError> {
        self.runs.insert(run.run_id, run);
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Run, EngineError> {
        self.runs
            .get(&run_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| StoreError::NotFound {
                entity: "run".to_string(),
                id: run_id.to_string(),
            }.into())
    }

    async fn put_phase_run(&self, phase_run: PhaseRun) -> Result<(), EngineError> {
        self.phase_runs.insert(phase_run.phase_run_id, phase_run);
        Ok(())
    }

    async fn get_phase_run(&self, phase_run_id: Uuid) -> Result<PhaseRun, EngineError> {
        self.phase_runs
            .get(&phase_run_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| StoreError::NotFound {
                entity: "phase_run".to_string(),
                id: phase_run_id.to_string(),
            }.into())
    }

    async fn phase_runs_for_run(&self, run_id: Uuid) -> Result<Vec<PhaseRun>, EngineError> {
        Ok(self
            .phase_runs
            .iter()
            .filter(|entry| entry.run_id == run_id)
            .map(|entry| entry.clone())
            .collect())
    }

    async fn put_task(&self, task: Task) -> Result<(), EngineError> {
        self.tasks.insert(task.task_id, task);
        Ok(())
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Task, EngineError> {
        self.tasks
            .get(&task_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| StoreError::NotFound {
                entity: "task".to_string(),
                id: task_id.to_string(),
            }.into())
    }

    async fn tasks_for_phase_run(&self, phase_run_id: Uuid) -> Result<Vec<Task>, EngineError> {
        Ok(self
            .tasks
            .iter()
            .filter(|entry| entry.phase_run_id == phase_run_id)
            .map(|entry| entry.clone())
            .collect())
    }

    async fn put_heartbeat(&self, heartbeat: Heartbeat) -> Result<(), EngineError> {
        self.heartbeats
            .entry(heartbeat.task_id)
            .or_default()
            .push(heartbeat);
        Ok(())
    }

    async fn latest_heartbeat(&self, task_id: Uuid) -> Result<Option<Heartbeat>, EngineError> {
        Ok(self
            .heartbeats
            .get(&task_id)
            .and_then(|entries| entries.iter().max_by_key(|hb| hb.received_at).cloned()))
    }

    async fn put_signal(&self, signal: Signal) -> Result<(), EngineError> {
        self.signals.insert(signal.id, signal);
        Ok(())
    }

    async fn put_checkpoint(&self, checkpoint: Checkpoint) -> Result<(), EngineError> {
        self.checkpoints
            .entry(checkpoint.run_id)
            .or_default()
            .push(checkpoint);
        Ok(())
    }

    async fn latest_checkpoint(&self, run_id: Uuid) -> Result<Option<Checkpoint>, EngineError> {
        Ok(self
            .checkpoints
            .get(&run_id)
            .and_then(|entries| entries.iter().max_by_key(|cp| cp.created_at).cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_common::model::RunStatus;

    #[tokio::test]
    async fn put_then_get_run_round_trips() {
        let store = InMemoryStore::new();
        let run = Run::new("tenant-a", "spec");
        let run_id = run.run_id;
        store.put_run(run).await.unwrap();
        let fetched = store.get_run(run_id).await.unwrap();
        assert_eq!(fetched.run_id, run_id);
        assert_eq!(fetched.status, RunStatus::Created);
    }

    #[tokio::test]
    async fn get_missing_run_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.get_run(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn latest_heartbeat_picks_most_recent() {
        let store = InMemoryStore::new();
        let task_id = Uuid::new_v4();
        let run_id = Uuid::new_v4();
        let mut first = Heartbeat::new(task_id, run_id, "BUILD", 10.0);
        first.received_at = chrono::Utc::now() - chrono::Duration::seconds(60);
        let second = Heartbeat::new(task_id, run_id, "BUILD", 50.0);
        store.put_heartbeat(first).await.unwrap();
        store.put_heartbeat(second).await.unwrap();
        let latest = store.latest_heartbeat(task_id).await.unwrap().unwrap();
        assert_eq!(latest.pct, 50.0);
    }

    #[tokio::test]
    async fn latest_checkpoint_picks_most_recent() {
        let store = InMemoryStore::new();
        let run_id = Uuid::new_v4();
        let mut first = Checkpoint::new(run_id, "BUILD", None, 1.0, "h1");
        first.created_at = chrono::Utc::now() - chrono::Duration::seconds(60);
        let second = Checkpoint::new(run_id, "TEST", Some("BUILD".to_string()), 2.0, "h2");
        store.put_checkpoint(first).await.unwrap();
        store.put_checkpoint(second).await.unwrap();
        let latest = store.latest_checkpoint(run_id).await.unwrap().unwrap();
        assert_eq!(latest.phase, "TEST");
    }

    #[tokio::test]
    async fn tasks_for_phase_run_filters_correctly() {
        let store = InMemoryStore::new();
        let phase_run_id = Uuid::new_v4();
        let other_phase_run_id = Uuid::new_v4();
        store.put_task(Task::new(phase_run_id, "agent-a")).await.unwrap();
        store.put_task(Task::new(other_phase_run_id, "agent-b")).await.unwrap();
        let tasks = store.tasks_for_phase_run(phase_run_id).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].agent, "agent-a");
    }
}
