//! Shard and worker-pool domain types.
//!
//! A `Shard` is a partition of runs mapped to a worker pool. The shard
//! manager (in `forge-runtime`) picks shards for runs and maintains the
//! consistent hash ring; this module only holds the data it operates on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardType {
    Tenant,
    Project,
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardStatus {
    Active,
    Draining,
    Offline,
}

/// Per-phase capacity bounds for a worker pool living on a shard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPool {
    pub min: u32,
    pub max: u32,
    pub current: u32,
    pub resource_type: String,
}

impl WorkerPool {
    pub fn new(min: u32, max: u32, resource_type: impl Into<String>) -> Self {
        Self {
            min,
            max,
            current: min,
            resource_type: resource_type.into(),
        }
    }
}

/// Resource ceilings applied to the shard as a whole.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_runs: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cpu_cores: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_memory_gb: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shard {
    pub id: String,
    pub shard_type: ShardType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Worker pools keyed by phase name.
    pub worker_pools: HashMap<String, WorkerPool>,
    #[serde(default)]
    pub resource_limits: ResourceLimits,
    pub status: ShardStatus,
}

impl Shard {
    pub fn new(id: impl Into<String>, shard_type: ShardType) -> Self {
        Self {
            id: id.into(),
            shard_type,
            tenant_id: None,
            project_id: None,
            worker_pools: HashMap::new(),
            resource_limits: ResourceLimits::default(),
            status: ShardStatus::Active,
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == ShardStatus::Active
    }

    /// Matches a tenant-scoped shard to the precedence rule's first clause.
    pub fn matches_tenant(&self, tenant_id: &str) -> bool {
        self.shard_type == ShardType::Tenant
            && self.tenant_id.as_deref() == Some(tenant_id)
    }

    /// Matches a project-scoped shard to the precedence rule's second clause.
    pub fn matches_project(&self, tenant_id: &str, project_id: &str) -> bool {
        self.shard_type == ShardType::Project
            && self.tenant_id.as_deref() == Some(tenant_id)
            && self.project_id.as_deref() == Some(project_id)
    }
}

/// A sticky binding of a run to the shard chosen for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardAssignment {
    pub run_id: String,
    pub shard_id: String,
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub assigned_at: DateTime<Utc>,
    pub sticky: bool,
}

impl ShardAssignment {
    pub fn new(run_id: impl Into<String>, shard_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            shard_id: shard_id.into(),
            tenant_id: tenant_id.into(),
            project_id: None,
            assigned_at: Utc::now(),
            sticky: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_shard_matches_its_tenant_only() {
        let shard = Shard::new("s1", ShardType::Tenant).with_tenant("tenant-a");
        assert!(shard.matches_tenant("tenant-a"));
        assert!(!shard.matches_tenant("tenant-b"));
    }

    #[test]
    fn project_shard_requires_both_tenant_and_project() {
        let shard = Shard::new("s2", ShardType::Project)
            .with_tenant("tenant-a")
            .with_project("proj-1");
        assert!(shard.matches_project("tenant-a", "proj-1"));
        assert!(!shard.matches_project("tenant-a", "proj-2"));
        assert!(!shard.matches_project("tenant-b", "proj-1"));
    }

    #[test]
    fn new_shard_is_active() {
        let shard = Shard::new("s3", ShardType::Global);
        assert!(shard.is_active());
    }

    #[test]
    fn assignment_defaults_to_sticky() {
        let assignment = ShardAssignment::new("run-1", "s1", "tenant-a");
        assert!(assignment.sticky);
    }
}
