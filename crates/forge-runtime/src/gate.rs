//! Gate evaluation boundary (purpose & scope non-goal): rubric scoring
//! and waiver policy live outside this crate. This module only defines
//! the contract the phase coordinator calls through, plus a pass-through
//! default useful for tests and early integration.

use async_trait::async_trait;
use forge_common::error::EngineError;
use forge_common::phase_config::Refinery;
use std::collections::BTreeMap;

/// The verdict returned by a gate evaluation against a phase's rubrics.
#[derive(Debug, Clone)]
pub struct GateVerdict {
    pub passed: bool,
    pub score: f64,
    pub rubrics_met: Vec<String>,
    pub reasons: Vec<String>,
    pub required_actions: Vec<String>,
    pub can_waive: bool,
    pub evidence_pack_id: String,
}

#[async_trait]
pub trait GateEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        phase: &str,
        rubrics: &BTreeMap<String, serde_json::Value>,
        refinery: &Refinery,
        results: &[serde_json::Value],
    ) -> Result<GateVerdict, EngineError>;
}

/// A pass-through evaluator that always passes with full confidence,
/// useful before a real rubric-scoring collaborator is wired in.
pub struct NullGateEvaluator;

#[async_trait]
impl GateEvaluator for NullGateEvaluator {
    async fn evaluate(
        &self,
        _phase: &str,
        rubrics: &BTreeMap<String, serde_json::Value>,
        _refinery: &Refinery,
        _results: &[serde_json::Value],
    ) -> Result<GateVerdict, EngineError> {
        Ok(GateVerdict {
            passed: true,
            score: 1.0,
            rubrics_met: rubrics.keys().cloned().collect(),
            reasons: Vec::new(),
            required_actions: Vec::new(),
            can_waive: true,
            evidence_pack_id: uuid::Uuid::new_v4().to_string(),
        })
    }
}
