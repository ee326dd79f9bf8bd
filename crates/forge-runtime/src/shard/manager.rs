//! `ShardManager` implementation: consistent-hash run placement.
//!
//! Every shard contributes 100 virtual nodes named `"<shard_id>:<0..99>"`.
//! Each virtual node hashes to a 32-bit integer via the first 8 hex digits
//! of the MD5 of its name. The ring is this sorted list of virtual nodes,
//! tie-broken on `(hash, name)` lexical order per the deduplicated-MD5
//! open question, so the ring stays deterministic even on a collision.

use chrono::Utc;
use dashmap::DashMap;
use forge_common::error::EngineError;
use forge_common::shard::{Shard, ShardAssignment, ShardStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
struct VirtualNode {
    hash: u32,
    name: String,
    shard_id: String,
}

fn hash_name(name: &str) -> u32 {
    let digest = md5::compute(name.as_bytes());
    let hex = format!("{digest:x}");
    u32::from_str_radix(&hex[..8], 16).expect("first 8 hex digits always parse as u32")
}

fn build_ring(shards: &[Shard]) -> Vec<VirtualNode> {
    let mut ring: Vec<VirtualNode> = Vec::with_capacity(shards.len() * 100);
    for shard in shards {
        for i in 0..100u32 {
            let name = format!("{}:{}", shard.id, i);
            let hash = hash_name(&name);
            ring.push(VirtualNode {
                hash,
                name,
                shard_id: shard.id.clone(),
            });
        }
    }
    ring.sort_by(|a, b| a.hash.cmp(&b.hash).then_with(|| a.name.cmp(&b.name)));
    ring
}

/// Read-only view of durable run state a caller already has, needed to
/// compute `stats` without this component depending on a concrete store.
pub trait RunStatsSource: Send + Sync {
    fn active_runs(&self, shard_id: &str) -> u64;
    fn total_runs(&self, shard_id: &str) -> u64;
    fn avg_run_duration_ms(&self, shard_id: &str) -> f64;
    fn queue_depth(&self, shard_id: &str) -> u64;
}

/// Pluggable resource telemetry. Implementations may be absent; `stats`
/// falls back to synthetic zeros when no source is supplied.
pub trait ResourceMetricsSource: Send + Sync {
    fn cpu_usage(&self, shard_id: &str) -> f64;
    fn memory_usage(&self, shard_id: &str) -> f64;
    fn gpu_usage(&self, shard_id: &str) -> Option<f64>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardStats {
    pub active_runs: u64,
    pub total_runs: u64,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_usage: Option<f64>,
    pub avg_run_duration_ms: f64,
    pub queue_depth: u64,
}

#[derive(Debug, Clone, Default)]
pub struct RebalanceReport {
    pub moved: u64,
    pub failed: u64,
}

pub struct ShardManager {
    shards: DashMap<String, Shard>,
    assignments: DashMap<String, ShardAssignment>,
    ring: std::sync::RwLock<Vec<VirtualNode>>,
}

impl Default for ShardManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardManager {
    pub fn new() -> Self {
        Self {
            shards: DashMap::new(),
            assignments: DashMap::new(),
            ring: std::sync::RwLock::new(Vec::new()),
        }
    }

    fn rebuild_ring(&self) {
        let shards: Vec<Shard> = self.shards.iter().map(|e| e.value().clone()).collect();
        *self.ring.write().unwrap() = build_ring(&shards);
    }

    pub fn create_shard(&self, shard: Shard) {
        self.shards.insert(shard.id.clone(), shard);
        self.rebuild_ring();
    }

    pub fn get_shard(&self, shard_id: &str) -> Option<Shard> {
        self.shards.get(shard_id).map(|s| s.clone())
    }

    pub fn set_shard_status(&self, shard_id: &str, status: ShardStatus) -> Result<(), EngineError> {
        let mut shard = self
            .shards
            .get_mut(shard_id)
            .ok_or_else(|| EngineError::NotFound(format!("shard {shard_id}")))?;
        shard.status = status;
        Ok(())
    }

    /// Looks up the ring for `key`, returning the first active shard at or
    /// after the key's hash position, wrapping around once.
    fn ring_lookup(&self, key: &str) -> Option<String> {
        let key_hash = hash_name(key);
        let ring = self.ring.read().unwrap();
        if ring.is_empty() {
            return None;
        }
        let start = ring.partition_point(|node| node.hash < key_hash);
        let n = ring.len();
        for offset in 0..n {
            let node = &ring[(start + offset) % n];
            if self
                .shards
                .get(&node.shard_id)
                .map(|s| s.is_active())
                .unwrap_or(false)
            {
                return Some(node.shard_id.clone());
            }
        }
        None
    }

    /// Chooses a shard for `run_id` under the precedence rule: sticky
    /// existing assignment, then tenant-scoped shard, then project-scoped
    /// shard, then consistent hash over active global shards.
    pub fn assign_run(
        &self,
        run_id: &str,
        tenant_id: &str,
        project_id: Option<&str>,
    ) -> Result<ShardAssignment, EngineError> {
        if let Some(existing) = self.assignments.get(run_id) {
            return Ok(existing.clone());
        }

        let chosen = self
            .shards
            .iter()
            .find(|e| e.value().matches_tenant(tenant_id) && e.value().is_active())
            .map(|e| e.key().clone())
            .or_else(|| {
                project_id.and_then(|project_id| {
                    self.shards
                        .iter()
                        .find(|e| e.value().matches_project(tenant_id, project_id) && e.value().is_active())
                        .map(|e| e.key().clone())
                })
            })
            .or_else(|| self.ring_lookup(run_id));

        let shard_id = chosen.ok_or_else(|| EngineError::NoCapacity(
            "no active shard available for assignment".to_string(),
        ))?;

        let mut assignment = ShardAssignment::new(run_id, shard_id, tenant_id);
        if let Some(project_id) = project_id {
            assignment.project_id = Some(project_id.to_string());
        }
        self.assignments.insert(run_id.to_string(), assignment.clone());
        Ok(assignment)
    }

    /// Reassigns every run currently on an inactive shard via consistent
    /// hash. Sticky assignments on active shards are left untouched.
    pub fn rebalance(&self) -> RebalanceReport {
        let mut report = RebalanceReport::default();
        let stale_run_ids: Vec<String> = self
            .assignments
            .iter()
            .filter(|e| {
                !self
                    .shards
                    .get(&e.value().shard_id)
                    .map(|s| s.is_active())
                    .unwrap_or(false)
            })
            .map(|e| e.key().clone())
            .collect();

        for run_id in stale_run_ids {
            match self.ring_lookup(&run_id) {
                Some(shard_id) => {
                    if let Some(mut assignment) = self.assignments.get_mut(&run_id) {
                        assignment.shard_id = shard_id;
                        assignment.assigned_at = Utc::now();
                    }
                    report.moved += 1;
                }
                None => report.failed += 1,
            }
        }
        report
    }

    pub fn stats(
        &self,
        shard_id: &str,
        run_stats: &dyn RunStatsSource,
        metrics: Option<&dyn ResourceMetricsSource>,
    ) -> Result<ShardStats, EngineError> {
        if self.shards.get(shard_id).is_none() {
            return Err(EngineError::NotFound(format!("shard {shard_id}")));
        }
        Ok(ShardStats {
            active_runs: run_stats.active_runs(shard_id),
            total_runs: run_stats.total_runs(shard_id),
            cpu_usage: metrics.map(|m| m.cpu_usage(shard_id)).unwrap_or(0.0),
            memory_usage: metrics.map(|m| m.memory_usage(shard_id)).unwrap_or(0.0),
            gpu_usage: metrics.and_then(|m| m.gpu_usage(shard_id)),
            avg_run_duration_ms: run_stats.avg_run_duration_ms(shard_id),
            queue_depth: run_stats.queue_depth(shard_id),
        })
    }
}
