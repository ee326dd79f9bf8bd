//! `HeartbeatMonitor` implementation.
//!
//! A task is stalled when `now − last_heartbeat > heartbeat_seconds ×
//! stall_threshold_heartbeats`. A task with no heartbeat yet is tracked
//! from its registration time, which stands in for a first heartbeat so
//! the same grace window applies before anything has been heard from it —
//! stall detection never fires before that window has elapsed once.
//!
//! Per the stall-callback + tracking-removal design note: the monitor
//! removes a stalled task from tracking before invoking the unsticker. If
//! the unsticker reclassifies the task as running again (e.g. via retry),
//! the caller must `register` it again before the next tick, or repeated
//! stalls on that task are silently lost.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Map as JsonMap;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait Unsticker: Send + Sync {
    async fn unstick(&self, event: &StallEvent);
}

#[derive(Debug, Clone)]
pub struct StallEvent {
    pub task_id: Uuid,
    pub phase_run_id: Uuid,
    pub reason: String,
    pub last_heartbeat_at: DateTime<Utc>,
    pub elapsed_ms: i64,
}

struct TrackedTask {
    phase_run_id: Uuid,
    heartbeat_seconds: u32,
    stall_threshold_heartbeats: u32,
    last_heartbeat_at: DateTime<Utc>,
    pct: f32,
    eta: Option<DateTime<Utc>>,
    metrics: JsonMap<String, Value>,
}

impl TrackedTask {
    fn stall_window_ms(&self) -> i64 {
        i64::from(self.heartbeat_seconds) * i64::from(self.stall_threshold_heartbeats) * 1000
    }
}

pub struct HeartbeatMonitor {
    tracked: DashMap<Uuid, TrackedTask>,
    unsticker: Option<Arc<dyn Unsticker>>,
}

impl HeartbeatMonitor {
    pub fn new() -> Self {
        Self {
            tracked: DashMap::new(),
            unsticker: None,
        }
    }

    pub fn with_unsticker(unsticker: Arc<dyn Unsticker>) -> Self {
        Self {
            tracked: DashMap::new(),
            unsticker: Some(unsticker),
        }
    }

    /// Begins tracking a task. Must be called once per task at phase
    /// start, and again any time an unsticker reclassifies a previously
    /// stalled task as running.
    pub fn register(
        &self,
        task_id: Uuid,
        phase_run_id: Uuid,
        heartbeat_seconds: u32,
        stall_threshold_heartbeats: u32,
    ) {
        self.tracked.insert(
            task_id,
            TrackedTask {
                phase_run_id,
                heartbeat_seconds,
                stall_threshold_heartbeats,
                last_heartbeat_at: Utc::now(),
                pct: 0.0,
                eta: None,
                metrics: JsonMap::new(),
            },
        );
    }

    pub fn record(&self, task_id: Uuid, pct: f32, eta: Option<DateTime<Utc>>, metrics: JsonMap<String, Value>) {
        if let Some(mut entry) = self.tracked.get_mut(&task_id) {
            entry.last_heartbeat_at = Utc::now();
            entry.pct = pct.clamp(0.0, 100.0);
            entry.eta = eta;
            entry.metrics = metrics;
        }
    }

    pub fn task_completed(&self, task_id: Uuid) {
        self.tracked.remove(&task_id);
    }

    pub fn is_tracked(&self, task_id: Uuid) -> bool {
        self.tracked.contains_key(&task_id)
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    /// Scans tracked tasks for stalls relative to `now`. Stalled tasks are
    /// reported in ascending `last_heartbeat_at` order, removed from
    /// tracking, and handed to the unsticker (if configured).
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<StallEvent> {
        let mut stalled: Vec<(Uuid, StallEvent)> = self
            .tracked
            .iter()
            .filter_map(|entry| {
                let task_id = *entry.key();
                let task = entry.value();
                let elapsed_ms = (now - task.last_heartbeat_at).num_milliseconds();
                if elapsed_ms > task.stall_window_ms() {
                    Some((
                        task_id,
                        StallEvent {
                            task_id,
                            phase_run_id: task.phase_run_id,
                            reason: "no heartbeat within stall window".to_string(),
                            last_heartbeat_at: task.last_heartbeat_at,
                            elapsed_ms,
                        },
                    ))
                } else {
                    None
                }
            })
            .collect();

        stalled.sort_by_key(|(_, event)| event.last_heartbeat_at);

        for (task_id, _) in &stalled {
            self.tracked.remove(task_id);
        }

        if let Some(unsticker) = &self.unsticker {
            for (_, event) in &stalled {
                unsticker.unstick(event).await;
            }
        }

        stalled.into_iter().map(|(_, event)| event).collect()
    }
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self::new()
    }
}
