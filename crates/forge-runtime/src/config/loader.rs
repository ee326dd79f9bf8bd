//! Loads and caches `PhaseConfig` descriptors and derives `PhasePlan`s.
//!
//! The source this engine replaces used a process-global singleton for
//! this job. Per the composition-root redesign, `PhaseConfigLoader` is an
//! explicit, constructed-once dependency handed to whatever needs it —
//! normally the phase coordinator and the mothership orchestrator.

use dashmap::DashMap;
use forge_common::error::ConfigError;
use forge_common::phase_config::{Budgets, PhaseConfig, PhasePlan};
use forge_common::EngineError;
use serde_json::Map as JsonMap;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Schema version baked into the replay hash. Bumping it invalidates every
/// previously computed hash, so it only changes alongside a deliberate
/// phase-plan format migration.
pub const PHASE_PLAN_VERSION: &str = "1.0.0";

const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

struct CacheEntry {
    config: PhaseConfig,
    loaded_at: Instant,
}

/// Loads phase descriptor files from a directory, one TOML file per
/// phase named `<phase_id>.toml`, and caches parsed results for five
/// minutes.
pub struct PhaseConfigLoader {
    descriptors_dir: PathBuf,
    cache: DashMap<String, CacheEntry>,
}

impl PhaseConfigLoader {
    pub fn new(descriptors_dir: impl Into<PathBuf>) -> Self {
        Self {
            descriptors_dir: descriptors_dir.into(),
            cache: DashMap::new(),
        }
    }

    fn descriptor_path(&self, phase_id: &str) -> PathBuf {
        self.descriptors_dir.join(format!("{phase_id}.toml"))
    }

    /// Reads, parses, and validates the descriptor for `phase_id`, caching
    /// the result for `CACHE_TTL`. A cache hit within the TTL skips disk
    /// entirely.
    pub fn load(&self, phase_id: &str) -> Result<PhaseConfig, EngineError> {
        if let Some(entry) = self.cache.get(phase_id) {
            if entry.loaded_at.elapsed() < CACHE_TTL {
                return Ok(entry.config.clone());
            }
        }

        let path = self.descriptor_path(phase_id);
        let config = Self::read_and_validate(&path)?;
        self.cache.insert(
            phase_id.to_string(),
            CacheEntry {
                config: config.clone(),
                loaded_at: Instant::now(),
            },
        );
        Ok(config)
    }

    fn read_and_validate(path: &Path) -> Result<PhaseConfig, EngineError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.display().to_string(),
            }
            .into());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ParseError {
            path: path.display().to_string(),
            source: source.into(),
        })?;
        let config: PhaseConfig = toml::from_str(&content).map_err(|source| ConfigError::ParseError {
            path: path.display().to_string(),
            source: source.into(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Forces the next `load` for `phase_id` to re-read from disk.
    pub fn invalidate(&self, phase_id: &str) {
        self.cache.remove(phase_id);
    }

    /// Loads the descriptor for `phase_id` and derives its `PhasePlan`:
    /// splits tools/guards by allowlist prefix and computes the
    /// deterministic replay hash.
    ///
    /// `run_context` is accepted for forward compatibility with
    /// per-run plan materialization but does not currently enter the
    /// hash — only `agents`, `rubrics`, `budgets`, and the plan version
    /// do, per the determinism requirement.
    pub fn derive_plan(
        &self,
        phase_id: &str,
        _run_context: Option<&serde_json::Value>,
    ) -> Result<PhasePlan, EngineError> {
        let config = self.load(phase_id)?;

        let mut tools = Vec::new();
        let mut guards = Vec::new();
        for entry in &config.allowlisted_tools {
            if entry.starts_with("tool.") {
                tools.push(entry.clone());
            } else if entry.starts_with("guard.") {
                guards.push(entry.clone());
            }
        }

        let hash = compute_replay_hash(&config.agents, &config.rubrics, &config.budgets);

        Ok(PhasePlan {
            phase: config.phase.clone(),
            hash,
            version: PHASE_PLAN_VERSION.to_string(),
            parallelism: config.parallelism,
            agents: config.agents.clone(),
            tools,
            guards,
            budgets: config.budgets,
            rubrics: config.rubrics.clone(),
            heartbeat_seconds: config.heartbeat_seconds,
            stall_threshold_heartbeats: config.stall_threshold_heartbeats,
            refinery: config.refinery,
            timebox: config.timebox.clone(),
            loop_config: config.loop_config.clone(),
        })
    }
}

/// `SHA-256(canonical_json({agents: sorted(agents), rubrics: sort_keys_deep(rubrics), budgets, version}))`.
///
/// Canonicalization goes through `serde_json::Value` rather than hand-rolled
/// key sorting: the default (non `preserve_order`) `serde_json::Map` is
/// `BTreeMap`-backed, so converting any struct to a `Value` and serializing
/// that recursively sorts every object level for free.
fn compute_replay_hash(
    agents: &[String],
    rubrics: &BTreeMap<String, serde_json::Value>,
    budgets: &Budgets,
) -> String {
    let mut sorted_agents = agents.to_vec();
    sorted_agents.sort();

    let mut obj = JsonMap::new();
    obj.insert("agents".to_string(), serde_json::to_value(&sorted_agents).unwrap());
    obj.insert("budgets".to_string(), serde_json::to_value(budgets).unwrap());
    obj.insert("rubrics".to_string(), serde_json::to_value(rubrics).unwrap());
    obj.insert("version".to_string(), serde_json::Value::String(PHASE_PLAN_VERSION.to_string()));

    let canonical = serde_json::to_value(obj).expect("hash input always serializes");
    let canonical_json = serde_json::to_string(&canonical).expect("canonical value always serializes");

    let mut hasher = Sha256::new();
    hasher.update(canonical_json.as_bytes());
    hex::encode(hasher.finalize())
}
