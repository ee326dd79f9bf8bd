use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Map as JsonMap;
use uuid::Uuid;

/// `POST /heartbeat` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub task_id: Uuid,
    pub run_id: Uuid,
    pub phase: String,
    pub pct: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metrics: JsonMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub accepted: bool,
    pub received_at: DateTime<Utc>,
}

/// `GET /heartbeat/status/:task_id` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskHeartbeatStatus {
    pub task_id: Uuid,
    pub tracked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pct: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

/// `GET /heartbeat/stalled` response body: one entry per currently
/// stalled task observed on the most recent monitor tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StalledTask {
    pub task_id: Uuid,
    pub phase_run_id: Uuid,
    pub reason: String,
    pub elapsed_ms: i64,
}

/// `GET /checkpoints/runs/:run_id` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointView {
    pub checkpoint_id: Uuid,
    pub run_id: Uuid,
    pub phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_complete_phase: Option<String>,
    pub cumulative_cost_usd: f64,
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

impl From<crate::store::Checkpoint> for CheckpointView {
    fn from(checkpoint: crate::store::Checkpoint) -> Self {
        Self {
            checkpoint_id: checkpoint.checkpoint_id,
            run_id: checkpoint.run_id,
            phase: checkpoint.phase,
            last_complete_phase: checkpoint.last_complete_phase,
            cumulative_cost_usd: checkpoint.cumulative_cost_usd,
            hash: checkpoint.hash,
            created_at: checkpoint.created_at,
        }
    }
}

/// `POST /checkpoints/:id/resume` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeRequest {
    pub phases: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_usd: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeResponse {
    pub run_id: Uuid,
    pub status: String,
}

/// `DELETE /checkpoints/cleanup` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub purged: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_request_round_trips_through_json() {
        let request = HeartbeatRequest {
            task_id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            phase: "BUILD".to_string(),
            pct: 42.0,
            eta: None,
            metrics: JsonMap::new(),
        };
        let json = serde_json::to_string(&request).unwrap();
        let back: HeartbeatRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.task_id, request.task_id);
        assert_eq!(back.pct, 42.0);
    }

    #[test]
    fn checkpoint_view_converts_from_checkpoint() {
        let checkpoint = crate::store::Checkpoint::new(
            Uuid::new_v4(),
            "BUILD",
            Some("INTAKE".to_string()),
            1.5,
            "deadbeef",
        );
        let view: CheckpointView = checkpoint.clone().into();
        assert_eq!(view.phase, "BUILD");
        assert_eq!(view.hash, "deadbeef");
    }
}
