//! Model routing domain types.
//!
//! The scoring pipeline itself lives in the model router component of
//! `forge-runtime`; this module holds the request/response shapes and the
//! capability/health records the router reasons over.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyMode {
    Public,
    Confidential,
    LocalOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCapabilities {
    pub model_id: String,
    pub max_tokens: u64,
    pub supports_tools: bool,
    pub code_optimized: bool,
    pub cost_per_million_tokens: f64,
    pub latency_p95_ms: f64,
    pub skills: HashSet<String>,
    /// Whether the model runs on infrastructure the tenant controls,
    /// required to satisfy `PrivacyMode::LocalOnly`.
    pub locally_hosted: bool,
    /// Whether the model is a cheap/free tier offering, excluded under
    /// `PrivacyMode::Confidential`.
    pub cheap_tier: bool,
}

impl ModelCapabilities {
    pub fn new(model_id: impl Into<String>, cost_per_million_tokens: f64, latency_p95_ms: f64) -> Self {
        Self {
            model_id: model_id.into(),
            max_tokens: 128_000,
            supports_tools: true,
            code_optimized: false,
            cost_per_million_tokens,
            latency_p95_ms,
            skills: HashSet::new(),
            locally_hosted: false,
            cheap_tier: false,
        }
    }

    pub fn with_skills(mut self, skills: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.skills = skills.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn locally_hosted(mut self) -> Self {
        self.locally_hosted = true;
        self
    }

    pub fn cheap_tier(mut self) -> Self {
        self.cheap_tier = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelHealth {
    pub model_id: String,
    pub healthy: bool,
    pub last_check: DateTime<Utc>,
    pub error_rate: f64,
    pub avg_latency_ms: f64,
    pub availability: f64,
}

impl ModelHealth {
    pub fn healthy(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            healthy: true,
            last_check: Utc::now(),
            error_rate: 0.0,
            avg_latency_ms: 0.0,
            availability: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRequest {
    pub task_affinity: String,
    pub estimated_tokens: u64,
    pub requires_tools: bool,
    pub privacy_mode: PrivacyMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cost_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

impl RoutingRequest {
    pub fn new(task_affinity: impl Into<String>, estimated_tokens: u64) -> Self {
        Self {
            task_affinity: task_affinity.into(),
            estimated_tokens,
            requires_tools: false,
            privacy_mode: PrivacyMode::Public,
            max_cost_usd: None,
            max_latency_ms: None,
            tenant_id: None,
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>, max_cost_usd: f64) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self.max_cost_usd = Some(max_cost_usd);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub selected_model: String,
    pub rationale: String,
    pub fallback_list: Vec<String>,
    pub estimated_cost: f64,
    pub estimated_latency: f64,
    pub confidence: f64,
}
