//! Declarative phase descriptor types.
//!
//! `PhaseConfig` is the data a phase descriptor file deserializes into.
//! `PhasePlan` is the runtime-materialized, hashed, immutable view the
//! phase config loader derives from it — see `forge_runtime::config`.

use crate::error::ConfigError;
use regex::Regex;
use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Fan-out parallelism strategy for a phase.
///
/// Serializes as either a bare keyword (`"sequential"`, `"partial"`,
/// `"iterative"`) or a positive integer, matching the descriptor file's
/// `parallelism` field exactly as specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parallelism {
    Sequential,
    Partial,
    Iterative,
    Integer(u32),
}

impl Serialize for Parallelism {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Parallelism::Sequential => serializer.serialize_str("sequential"),
            Parallelism::Partial => serializer.serialize_str("partial"),
            Parallelism::Iterative => serializer.serialize_str("iterative"),
            Parallelism::Integer(n) => serializer.serialize_u32(*n),
        }
    }
}

struct ParallelismVisitor;

impl<'de> Visitor<'de> for ParallelismVisitor {
    type Value = Parallelism;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("\"sequential\", \"partial\", \"iterative\", or a positive integer")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        match v {
            "sequential" => Ok(Parallelism::Sequential),
            "partial" => Ok(Parallelism::Partial),
            "iterative" => Ok(Parallelism::Iterative),
            other => other
                .parse::<u32>()
                .map(Parallelism::Integer)
                .map_err(|_| de::Error::custom(format!("unknown parallelism keyword '{other}'"))),
        }
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        u32::try_from(v)
            .map(Parallelism::Integer)
            .map_err(|_| de::Error::custom("parallelism integer out of range"))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        if v < 1 {
            return Err(de::Error::custom("parallelism integer must be >= 1"));
        }
        self.visit_u64(v as u64)
    }
}

impl<'de> Deserialize<'de> for Parallelism {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ParallelismVisitor)
    }
}

impl fmt::Display for Parallelism {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Parallelism::Sequential => write!(f, "sequential"),
            Parallelism::Partial => write!(f, "partial"),
            Parallelism::Iterative => write!(f, "iterative"),
            Parallelism::Integer(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Budgets {
    pub tokens: u64,
    pub tools_minutes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_hours: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Refinery {
    pub fission_min_coverage: f64,
    pub fusion_min_consensus: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    pub max_iterations: u32,
    pub completion_condition: String,
    pub iteration_timeout: String,
}

/// A single declarative phase descriptor, deserialized from the phase
/// descriptor file (see `forge_runtime::config::loader`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseConfig {
    pub phase: String,
    pub parallelism: Parallelism,
    pub agents: Vec<String>,
    pub budgets: Budgets,
    #[serde(default)]
    pub rubrics: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub allowlisted_tools: Vec<String>,
    pub heartbeat_seconds: u32,
    pub stall_threshold_heartbeats: u32,
    pub refinery: Refinery,
    pub timebox: String,
    #[serde(rename = "loop", skip_serializing_if = "Option::is_none", default)]
    pub loop_config: Option<LoopConfig>,
}

fn timebox_regex() -> Regex {
    Regex::new(r"^PT(\d+H)?(\d+M)?(\d+S)?$").expect("static timebox regex is valid")
}

/// Parses an `ISO-8601` `PT<H>H(<M>M)?(<S>S)?` duration string into a
/// wall-clock `Duration`. Panics on a string that failed `validate()` —
/// callers only ever hold a `timebox` that already passed validation.
fn parse_timebox(timebox: &str) -> std::time::Duration {
    let captures = timebox_regex()
        .captures(timebox)
        .expect("timebox already validated against the ISO-8601 regex");
    let part = |group: usize, suffix: char| -> u64 {
        captures
            .get(group)
            .and_then(|m| m.as_str().trim_end_matches(suffix).parse().ok())
            .unwrap_or(0)
    };
    let hours = part(1, 'H');
    let minutes = part(2, 'M');
    let seconds = part(3, 'S');
    std::time::Duration::from_secs(hours * 3600 + minutes * 60 + seconds)
}

impl PhaseConfig {
    /// Validates every invariant from the data model: required fields,
    /// numeric constraints, parallelism keyword, and timebox syntax.
    /// Returns the name of the first failing field on error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, message: &str| ConfigError::InvalidConfig {
            field: field.to_string(),
            message: message.to_string(),
        };

        if self.phase.trim().is_empty() {
            return Err(invalid("phase", "must not be empty"));
        }
        if self.agents.is_empty() {
            return Err(invalid("agents", "must not be empty"));
        }
        if self.budgets.tokens == 0 {
            return Err(invalid("budgets.tokens", "must be positive"));
        }
        if self.budgets.tools_minutes == 0 {
            return Err(invalid("budgets.tools_minutes", "must be positive"));
        }
        if let Some(gpu_hours) = self.budgets.gpu_hours {
            if gpu_hours <= 0.0 {
                return Err(invalid("budgets.gpu_hours", "must be positive when present"));
            }
        }
        if self.heartbeat_seconds < 1 {
            return Err(invalid("heartbeat_seconds", "must be >= 1"));
        }
        if self.stall_threshold_heartbeats < 1 {
            return Err(invalid("stall_threshold_heartbeats", "must be >= 1"));
        }
        if !(0.0..=1.0).contains(&self.refinery.fission_min_coverage) {
            return Err(invalid(
                "refinery.fission_min_coverage",
                "must be in [0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.refinery.fusion_min_consensus) {
            return Err(invalid(
                "refinery.fusion_min_consensus",
                "must be in [0, 1]",
            ));
        }
        if let Parallelism::Integer(n) = self.parallelism {
            if n < 1 {
                return Err(invalid("parallelism", "integer parallelism must be >= 1"));
            }
        }
        if !timebox_regex().is_match(&self.timebox) {
            return Err(invalid(
                "timebox",
                "must match ISO-8601 duration PT<H>H(<M>M)?(<S>S)?",
            ));
        }
        if let Some(loop_config) = &self.loop_config {
            if loop_config.max_iterations < 1 {
                return Err(invalid("loop.max_iterations", "must be >= 1"));
            }
        }
        Ok(())
    }
}

/// Runtime-materialized, hashed, immutable view of a `PhaseConfig`.
/// Produced by `forge_runtime::config::loader::derive_plan`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhasePlan {
    pub phase: String,
    pub hash: String,
    pub version: String,
    pub parallelism: Parallelism,
    pub agents: Vec<String>,
    pub tools: Vec<String>,
    pub guards: Vec<String>,
    pub budgets: Budgets,
    pub rubrics: BTreeMap<String, serde_json::Value>,
    pub heartbeat_seconds: u32,
    pub stall_threshold_heartbeats: u32,
    pub refinery: Refinery,
    pub timebox: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_config: Option<LoopConfig>,
}

impl PhasePlan {
    /// The wall-clock bound the phase coordinator enforces (§4.G): the
    /// declared `timebox` parsed to a `Duration`.
    pub fn timebox_duration(&self) -> std::time::Duration {
        parse_timebox(&self.timebox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> PhaseConfig {
        PhaseConfig {
            phase: "INTAKE".to_string(),
            parallelism: Parallelism::Sequential,
            agents: vec!["A".to_string(), "B".to_string()],
            budgets: Budgets {
                tokens: 700_000,
                tools_minutes: 60,
                gpu_hours: None,
            },
            rubrics: BTreeMap::from([("grounding_min".to_string(), serde_json::json!(0.85))]),
            allowlisted_tools: vec!["tool.norm".to_string(), "guard.cm".to_string()],
            heartbeat_seconds: 60,
            stall_threshold_heartbeats: 3,
            refinery: Refinery {
                fission_min_coverage: 0.9,
                fusion_min_consensus: 0.85,
            },
            timebox: "PT1H".to_string(),
            loop_config: None,
        }
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn empty_agents_list_is_rejected() {
        let mut config = valid_config();
        config.agents.clear();
        let err = config.validate().unwrap_err();
        match err {
            ConfigError::InvalidConfig { field, .. } => assert_eq!(field, "agents"),
            _ => panic!("expected InvalidConfig"),
        }
    }

    #[test]
    fn zero_token_budget_is_rejected() {
        let mut config = valid_config();
        config.budgets.tokens = 0;
        let err = config.validate().unwrap_err();
        match err {
            ConfigError::InvalidConfig { field, .. } => assert_eq!(field, "budgets.tokens"),
            _ => panic!("expected InvalidConfig"),
        }
    }

    #[test]
    fn malformed_timebox_is_rejected() {
        let mut config = valid_config();
        config.timebox = "1 hour".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn timebox_with_hours_minutes_seconds_is_accepted() {
        let mut config = valid_config();
        config.timebox = "PT1H30M15S".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_timebox_combines_hours_minutes_seconds() {
        assert_eq!(parse_timebox("PT1H30M15S"), std::time::Duration::from_secs(3600 + 1800 + 15));
        assert_eq!(parse_timebox("PT1H"), std::time::Duration::from_secs(3600));
        assert_eq!(parse_timebox("PT45S"), std::time::Duration::from_secs(45));
    }

    #[test]
    fn parallelism_deserializes_from_keyword_or_integer() {
        let seq: Parallelism = serde_json::from_str("\"sequential\"").unwrap();
        assert_eq!(seq, Parallelism::Sequential);

        let n: Parallelism = serde_json::from_str("4").unwrap();
        assert_eq!(n, Parallelism::Integer(4));
    }

    #[test]
    fn parallelism_rejects_unknown_keyword() {
        let result: Result<Parallelism, _> = serde_json::from_str("\"bogus\"");
        assert!(result.is_err());
    }

    #[test]
    fn parallelism_round_trips_through_json() {
        let original = Parallelism::Integer(7);
        let json = serde_json::to_string(&original).unwrap();
        let back: Parallelism = serde_json::from_str(&json).unwrap();
        assert_eq!(original, back);
    }

    #[test]
    fn zero_heartbeat_seconds_is_rejected() {
        let mut config = valid_config();
        config.heartbeat_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn refinery_fields_out_of_range_are_rejected() {
        let mut config = valid_config();
        config.refinery.fission_min_coverage = 1.5;
        assert!(config.validate().is_err());
    }
}
