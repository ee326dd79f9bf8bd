use async_trait::async_trait;
use forge_common::error::{EngineError, StoreError};
use forge_common::model::{Heartbeat, PhaseRun, Run, Task};
use forge_common::signal::Signal;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

use super::{Checkpoint, Store};

/// A `rusqlite`-backed store for single-node durability across restarts.
/// Every row is stored as a JSON blob keyed by id; this trades columnar
/// query power for schema simplicity, matching the narrow access
/// patterns the `Store` trait actually exposes.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), EngineError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS runs (id TEXT PRIMARY KEY, body TEXT NOT NULL);
            CREATE TABLE IF NOT EXISTS phase_runs (id TEXT PRIMARY KEY, run_id TEXT NOT NULL, body TEXT NOT NULL);
            CREATE TABLE IF NOT EXISTS tasks (id TEXT PRIMARY KEY, phase_run_id TEXT NOT NULL, body TEXT NOT NULL);
            CREATE TABLE IF NOT EXISTS heartbeats (task_id TEXT NOT NULL, received_at TEXT NOT NULL, body TEXT NOT NULL);
            CREATE TABLE IF NOT EXISTS signals (id TEXT PRIMARY KEY, body TEXT NOT NULL);
            CREATE TABLE IF NOT EXISTS checkpoints (run_id TEXT NOT NULL, created_at TEXT NOT NULL, body TEXT NOT NULL);
            ",
        )
        .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        Ok(())
    }
}

fn backend_err(e: rusqlite::Error) -> EngineError {
    StoreError::Backend(anyhow::anyhow!(e)).into()
}

#[async_trait]
impl Store for SqliteStore {
    async fn put_run(&self, run: Run) -> Result<(), EngineError> {
        let body = serde_json::to_string(&run).map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO runs (id, body) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET body = excluded.body",
            params![run.run_id.to_string(), body],
        )
        .map_err(backend_err)?;
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Run, EngineError> {
        let conn = self.conn.lock().unwrap();
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM runs WHERE id = ?1",
                params![run_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend_err)?;
        match body {
            Some(body) => {
                serde_json::from_str(&body).map_err(|e| StoreError::Backend(anyhow::anyhow!(e)).into())
            }
            None => Err(StoreError::NotFound {
                entity: "run".to_string(),
                id: run_id.to_string(),
            }
            .into()),
        }
    }

    async fn put_phase_run(&self, phase_run: PhaseRun) -> Result<(), EngineError> {
        let body = serde_json::to_string(&phase_run).map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO phase_runs (id, run_id, body) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET body = excluded.body",
            params![
                phase_run.phase_run_id.to_string(),
                phase_run.run_id.to_string(),
                body
            ],
        )
        .map_err(backend_err)?;
        Ok(())
    }

    async fn get_phase_run(&self, phase_run_id: Uuid) -> Result<PhaseRun, EngineError> {
        let conn = self.conn.lock().unwrap();
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM phase_runs WHERE id = ?1",
                params![phase_run_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend_err)?;
        match body {
            Some(body) => {
                serde_json::from_str(&body).map_err(|e| StoreError::Backend(anyhow::anyhow!(e)).into())
            }
            None => Err(StoreError::NotFound {
                entity: "phase_run".to_string(),
                id: phase_run_id.to_string(),
            }
            .into()),
        }
    }

    async fn phase_runs_for_run(&self, run_id: Uuid) -> Result<Vec<PhaseRun>, EngineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT body FROM phase_runs WHERE run_id = ?1")
            .map_err(backend_err)?;
        let rows = stmt
            .query_map(params![run_id.to_string()], |row| row.get::<_, String>(0))
            .map_err(backend_err)?;
        let mut out = Vec::new();
        for row in rows {
            let body = row.map_err(backend_err)?;
            out.push(serde_json::from_str(&body).map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?);
        }
        Ok(out)
    }

    async fn put_task(&self, task: Task) -> Result<(), EngineError> {
        let body = serde_json::to_string(&task).map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tasks (id, phase_run_id, body) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET body = excluded.body",
            params![task.task_id.to_string(), task.phase_run_id.to_string(), body],
        )
        .map_err(backend_err)?;
        Ok(())
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Task, EngineError> {
        let conn = self.conn.lock().unwrap();
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM tasks WHERE id = ?1",
                params![task_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend_err)?;
        match body {
            Some(body) => {
                serde_json::from_str(&body).map_err(|e| StoreError::Backend(anyhow::anyhow!(e)).into())
            }
            None => Err(StoreError::NotFound {
                entity: "task".to_string(),
                id: task_id.to_string(),
            }
            .into()),
        }
    }

    async fn tasks_for_phase_run(&self, phase_run_id: Uuid) -> Result<Vec<Task>, EngineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT body FROM tasks WHERE phase_run_id = ?1")
            .map_err(backend_err)?;
        let rows = stmt
            .query_map(params![phase_run_id.to_string()], |row| {
                row.get::<_, String>(0)
            })
            .map_err(backend_err)?;
        let mut out = Vec::new();
        for row in rows {
            let body = row.map_err(backend_err)?;
            out.push(serde_json::from_str(&body).map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?);
        }
        Ok(out)
    }

    async fn put_heartbeat(&self, heartbeat: Heartbeat) -> Result<(), EngineError> {
        let body =
            serde_json::to_string(&heartbeat).map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO heartbeats (task_id, received_at, body) VALUES (?1, ?2, ?3)",
            params![
                heartbeat.task_id.to_string(),
                heartbeat.received_at.to_rfc3339(),
                body
            ],
        )
        .map_err(backend_err)?;
        Ok(())
    }

    async fn latest_heartbeat(&self, task_id: Uuid) -> Result<Option<Heartbeat>, EngineError> {
        let conn = self.conn.lock().unwrap();
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM heartbeats WHERE task_id = ?1 ORDER BY received_at DESC LIMIT 1",
                params![task_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend_err)?;
        body.map(|body| serde_json::from_str(&body).map_err(|e| StoreError::Backend(anyhow::anyhow!(e)).into()))
            .transpose()
    }

    async fn put_signal(&self, signal: Signal) -> Result<(), EngineError> {
        let body = serde_json::to_string(&signal).map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO signals (id, body) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET body = excluded.body",
            params![signal.id.to_string(), body],
        )
        .map_err(backend_err)?;
        Ok(())
    }

    async fn put_checkpoint(&self, checkpoint: Checkpoint) -> Result<(), EngineError> {
        let body =
            serde_json::to_string(&checkpoint).map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO checkpoints (run_id, created_at, body) VALUES (?1, ?2, ?3)",
            params![
                checkpoint.run_id.to_string(),
                checkpoint.created_at.to_rfc3339(),
                body
            ],
        )
        .map_err(backend_err)?;
        Ok(())
    }

    async fn latest_checkpoint(&self, run_id: Uuid) -> Result<Option<Checkpoint>, EngineError> {
        let conn = self.conn.lock().unwrap();
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM checkpoints WHERE run_id = ?1 ORDER BY created_at DESC LIMIT 1",
                params![run_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend_err)?;
        body.map(|body| serde_json::from_str(&body).map_err(|e| StoreError::Backend(anyhow::anyhow!(e)).into()))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_run_round_trips() {
        let store = SqliteStore::open_in_memory().unwrap();
        let run = Run::new("tenant-a", "spec");
        let run_id = run.run_id;
        store.put_run(run).await.unwrap();
        let fetched = store.get_run(run_id).await.unwrap();
        assert_eq!(fetched.run_id, run_id);
    }

    #[tokio::test]
    async fn get_missing_run_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store.get_run(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn checkpoint_round_trip_and_latest_selection() {
        let store = SqliteStore::open_in_memory().unwrap();
        let run_id = Uuid::new_v4();
        store
            .put_checkpoint(Checkpoint::new(run_id, "BUILD", None, 1.0, "h1"))
            .await
            .unwrap();
        store
            .put_checkpoint(Checkpoint::new(
                run_id,
                "TEST",
                Some("BUILD".to_string()),
                2.0,
                "h2",
            ))
            .await
            .unwrap();
        let latest = store.latest_checkpoint(run_id).await.unwrap().unwrap();
        assert_eq!(latest.phase, "TEST");
        assert_eq!(latest.cumulative_cost_usd, 2.0);
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_run_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut run = Run::new("tenant-a", "spec");
        let run_id = run.run_id;
        store.put_run(run.clone()).await.unwrap();
        run.running_cost_usd = 5.0;
        store.put_run(run).await.unwrap();
        let fetched = store.get_run(run_id).await.unwrap();
        assert_eq!(fetched.running_cost_usd, 5.0);
    }
}
