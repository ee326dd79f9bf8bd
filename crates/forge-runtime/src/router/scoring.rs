//! `ModelRouter` implementation: the routing pipeline from privacy
//! filtering through tenant budget enforcement.

use dashmap::DashMap;
use forge_common::error::EngineError;
use forge_common::router::{ModelCapabilities, ModelHealth, PrivacyMode, RoutingDecision, RoutingRequest};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub model_id: String,
    pub actual_tokens: u64,
    pub actual_cost: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantBudget {
    pub remaining_usd: f64,
    pub usage: Vec<UsageRecord>,
}

struct ScoredCandidate {
    capabilities: ModelCapabilities,
    score: f64,
}

pub struct ModelRouter {
    capabilities: DashMap<String, ModelCapabilities>,
    health: DashMap<String, ModelHealth>,
    budgets: DashMap<String, TenantBudget>,
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRouter {
    pub fn new() -> Self {
        Self {
            capabilities: DashMap::new(),
            health: DashMap::new(),
            budgets: DashMap::new(),
        }
    }

    pub fn register_model(&self, capabilities: ModelCapabilities, health: ModelHealth) {
        self.health.insert(capabilities.model_id.clone(), health);
        self.capabilities.insert(capabilities.model_id.clone(), capabilities);
    }

    pub fn set_tenant_budget(&self, tenant_id: impl Into<String>, remaining_usd: f64) {
        self.budgets.insert(
            tenant_id.into(),
            TenantBudget {
                remaining_usd,
                usage: Vec::new(),
            },
        );
    }

    pub fn mark_unhealthy(&self, model_id: &str) {
        if let Some(mut health) = self.health.get_mut(model_id) {
            health.healthy = false;
        }
    }

    pub fn restore(&self, model_id: &str) {
        if let Some(mut health) = self.health.get_mut(model_id) {
            health.healthy = true;
        }
    }

    /// Periodic telemetry update. Does not flip `healthy` — only explicit
    /// `mark_unhealthy`/`restore` calls do that.
    pub fn health_tick(&self, model_id: &str, error_rate: f64, avg_latency_ms: f64, availability: f64) {
        if let Some(mut health) = self.health.get_mut(model_id) {
            health.error_rate = error_rate;
            health.avg_latency_ms = avg_latency_ms;
            health.availability = availability;
        }
    }

    fn privacy_filter(&self, candidates: Vec<ModelCapabilities>, mode: PrivacyMode) -> Vec<ModelCapabilities> {
        match mode {
            PrivacyMode::LocalOnly => candidates.into_iter().filter(|c| c.locally_hosted).collect(),
            PrivacyMode::Confidential => candidates.into_iter().filter(|c| !c.cheap_tier).collect(),
            PrivacyMode::Public => candidates,
        }
    }

    fn capability_filter(&self, candidates: Vec<ModelCapabilities>, request: &RoutingRequest) -> Vec<ModelCapabilities> {
        candidates
            .into_iter()
            .filter(|c| c.max_tokens >= request.estimated_tokens)
            .filter(|c| !request.requires_tools || c.supports_tools)
            .filter(|c| c.skills.contains(&request.task_affinity) || c.skills.contains("general"))
            .collect()
    }

    fn health_filter(&self, candidates: Vec<ModelCapabilities>) -> Vec<ModelCapabilities> {
        candidates
            .into_iter()
            .filter(|c| {
                self.health
                    .get(&c.model_id)
                    .map(|h| h.healthy && h.availability >= 0.95)
                    .unwrap_or(false)
            })
            .collect()
    }

    fn score(&self, model: &ModelCapabilities, request: &RoutingRequest) -> f64 {
        let skill_match = if model.skills.contains(&request.task_affinity) {
            1.0
        } else {
            0.5
        };
        let cost_score = 1.0 / (1.0 + model.cost_per_million_tokens / 10.0);
        let latency_score = 1.0 / (1.0 + model.latency_p95_ms / 10_000.0);
        let availability = self.health.get(&model.model_id).map(|h| h.availability).unwrap_or(0.0);

        let mut score = skill_match * 50.0 + cost_score * 30.0 + latency_score * 10.0 + availability * 10.0;

        if let Some(max_latency_ms) = request.max_latency_ms {
            if model.latency_p95_ms > max_latency_ms {
                score *= 0.5;
            }
        }
        score
    }

    fn estimated_cost(model: &ModelCapabilities, estimated_tokens: u64) -> f64 {
        (estimated_tokens as f64 / 1_000_000.0) * model.cost_per_million_tokens
    }

    /// Runs the full pipeline: privacy, capability, and health filters,
    /// then scoring, then tenant budget enforcement.
    pub fn route(&self, request: &RoutingRequest) -> Result<RoutingDecision, EngineError> {
        let all: Vec<ModelCapabilities> = self.capabilities.iter().map(|e| e.value().clone()).collect();
        let filtered = self.health_filter(self.capability_filter(
            self.privacy_filter(all, request.privacy_mode),
            request,
        ));

        if filtered.is_empty() {
            return Err(EngineError::NotFound(
                "no model candidate survives privacy/capability/health filters".to_string(),
            ));
        }

        let mut scored: Vec<ScoredCandidate> = filtered
            .into_iter()
            .map(|capabilities| {
                let score = self.score(&capabilities, request);
                ScoredCandidate { capabilities, score }
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap()
                .then_with(|| a.capabilities.model_id.cmp(&b.capabilities.model_id))
        });

        let chosen_index = self.apply_tenant_budget(&scored, request)?;
        let chosen = &scored[chosen_index];

        let fallback_list: Vec<String> = scored
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != chosen_index)
            .take(3)
            .map(|(_, c)| c.capabilities.model_id.clone())
            .collect();

        let estimated_cost = Self::estimated_cost(&chosen.capabilities, request.estimated_tokens);
        let mut rationale = format!(
            "selected {} (score {:.1}) for affinity '{}'",
            chosen.capabilities.model_id, chosen.score, request.task_affinity
        );
        if chosen_index > 0 {
            rationale.push_str(" — top-scored candidate exceeded remaining tenant budget");
        }

        Ok(RoutingDecision {
            selected_model: chosen.capabilities.model_id.clone(),
            rationale,
            fallback_list,
            estimated_cost,
            estimated_latency: chosen.capabilities.latency_p95_ms,
            confidence: chosen.score / 100.0,
        })
    }

    /// Returns the index into `scored` of the candidate to use after
    /// applying the tenant budget rule, or `budget_exceeded` if none fit.
    fn apply_tenant_budget(&self, scored: &[ScoredCandidate], request: &RoutingRequest) -> Result<usize, EngineError> {
        let (Some(tenant_id), Some(_max_cost_usd)) = (&request.tenant_id, request.max_cost_usd) else {
            return Ok(0);
        };
        let Some(budget) = self.budgets.get(tenant_id) else {
            return Ok(0);
        };

        let top_cost = Self::estimated_cost(&scored[0].capabilities, request.estimated_tokens);
        if top_cost <= budget.remaining_usd {
            return Ok(0);
        }

        for (i, candidate) in scored.iter().enumerate() {
            let cost = Self::estimated_cost(&candidate.capabilities, request.estimated_tokens);
            if cost <= budget.remaining_usd {
                return Ok(i);
            }
        }

        Err(EngineError::BudgetExceeded(format!(
            "no candidate fits remaining budget for tenant {tenant_id}"
        )))
    }

    /// Marks the prior model unhealthy and promotes the first fallback
    /// candidate to a new decision with `confidence=0.8`.
    pub fn failover(&self, prior: &RoutingDecision, reason: &str) -> Result<RoutingDecision, EngineError> {
        self.mark_unhealthy(&prior.selected_model);

        let next_model_id = prior
            .fallback_list
            .first()
            .ok_or_else(|| EngineError::NoCapacity("no_fallback: fallback list is empty".to_string()))?
            .clone();

        let next = self
            .capabilities
            .get(&next_model_id)
            .ok_or_else(|| EngineError::NotFound(format!("model {next_model_id}")))?
            .clone();

        let estimated_tokens = if let Some(prior_model) = self.capabilities.get(&prior.selected_model) {
            if prior_model.cost_per_million_tokens > 0.0 {
                (prior.estimated_cost * 1_000_000.0 / prior_model.cost_per_million_tokens).round() as u64
            } else {
                0
            }
        } else {
            0
        };

        Ok(RoutingDecision {
            selected_model: next.model_id.clone(),
            rationale: format!("failover from {} due to {reason}", prior.selected_model),
            fallback_list: prior.fallback_list.iter().skip(1).cloned().collect(),
            estimated_cost: Self::estimated_cost(&next, estimated_tokens),
            estimated_latency: next.latency_p95_ms,
            confidence: 0.8,
        })
    }

    /// Deducts `actual_cost` from the tenant's remaining budget and
    /// appends a usage record.
    pub fn record_usage(&self, tenant_id: &str, model_id: &str, actual_tokens: u64, actual_cost: f64) {
        let mut budget = self.budgets.entry(tenant_id.to_string()).or_default();
        budget.remaining_usd -= actual_cost;
        budget.usage.push(UsageRecord {
            model_id: model_id.to_string(),
            actual_tokens,
            actual_cost,
        });
    }
}
