//! Typed error hierarchy for the Forge runtime engine.
//!
//! `EngineError` covers the failure kinds named in the error handling
//! design: configuration problems, missing entities, budget and capacity
//! exhaustion, stalls, transient backend trouble, and unrecoverable
//! invariant violations. `ConfigError` and `StoreError` are narrower
//! subsystem errors that convert into `EngineError` via `#[from]` so
//! callers can propagate with `?` all the way up to the coordinator.

use thiserror::Error;

/// Errors raised while loading or validating a phase descriptor.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("phase descriptor not found at {path}")]
    NotFound { path: String },

    #[error("invalid config: field '{field}' {message}")]
    InvalidConfig { field: String, message: String },

    #[error("failed to parse phase descriptor at {path}: {source}")]
    ParseError {
        path: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Errors raised by a `Store` implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: String },

    #[error("conditional write rejected: {entity} {id} expected status {expected}, found {actual}")]
    StaleStatus {
        entity: String,
        id: String,
        expected: String,
        actual: String,
    },

    #[error("store backend error: {0}")]
    Backend(#[source] anyhow::Error),
}

/// Top-level error hierarchy for the runtime engine.
///
/// Each variant corresponds to one of the error kinds in the error
/// handling design: `validation`, `not_found`, `budget_exceeded`,
/// `stalled`, `transient`, `backend_unhealthy`, `timebox_exceeded`,
/// `no_capacity`, `fatal`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("stalled: {0}")]
    Stalled(String),

    #[error("transient error (attempt {attempt}): {message}")]
    Transient { attempt: u32, message: String },

    #[error("backend unhealthy: {model_id}")]
    BackendUnhealthy { model_id: String },

    #[error("timebox exceeded after {elapsed_ms}ms")]
    TimeboxExceeded { elapsed_ms: u64 },

    #[error("no capacity: {0}")]
    NoCapacity(String),

    #[error("fatal invariant violation: {0}")]
    Fatal(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// The error kind name used in logs and events, per the error handling design.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::NotFound(_) => "not_found",
            EngineError::BudgetExceeded(_) => "budget_exceeded",
            EngineError::Stalled(_) => "stalled",
            EngineError::Transient { .. } => "transient",
            EngineError::BackendUnhealthy { .. } => "backend_unhealthy",
            EngineError::TimeboxExceeded { .. } => "timebox_exceeded",
            EngineError::NoCapacity(_) => "no_capacity",
            EngineError::Fatal(_) => "fatal",
            EngineError::Config(ConfigError::NotFound { .. }) => "not_found",
            EngineError::Config(_) => "validation",
            EngineError::Store(StoreError::NotFound { .. }) => "not_found",
            EngineError::Store(_) => "fatal",
            EngineError::Other(_) => "fatal",
        }
    }

    /// Whether the error handling design retries this kind automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Transient { .. } | EngineError::Stalled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_not_found_message_includes_path() {
        let err = ConfigError::NotFound {
            path: "/etc/forge/phases/intake.toml".to_string(),
        };
        assert!(err.to_string().contains("/etc/forge/phases/intake.toml"));
    }

    #[test]
    fn engine_error_converts_from_config_error() {
        let inner = ConfigError::InvalidConfig {
            field: "budgets.tokens".to_string(),
            message: "must be positive".to_string(),
        };
        let engine_err: EngineError = inner.into();
        assert_eq!(engine_err.kind(), "validation");
        match &engine_err {
            EngineError::Config(ConfigError::InvalidConfig { field, .. }) => {
                assert_eq!(field, "budgets.tokens");
            }
            _ => panic!("expected Config(InvalidConfig)"),
        }
    }

    #[test]
    fn engine_error_converts_from_store_error() {
        let inner = StoreError::NotFound {
            entity: "run".to_string(),
            id: "abc".to_string(),
        };
        let engine_err: EngineError = inner.into();
        assert_eq!(engine_err.kind(), "not_found");
    }

    #[test]
    fn transient_is_retryable_but_validation_is_not() {
        let transient = EngineError::Transient {
            attempt: 1,
            message: "connection reset".to_string(),
        };
        assert!(transient.is_retryable());

        let validation = EngineError::Validation("bad input".to_string());
        assert!(!validation.is_retryable());
    }

    #[test]
    fn stalled_carries_message_and_kind() {
        let err = EngineError::Stalled("task-1 exceeded threshold".to_string());
        assert_eq!(err.kind(), "stalled");
        assert!(err.to_string().contains("task-1"));
    }

    #[test]
    fn budget_exceeded_kind_is_stable() {
        let err = EngineError::BudgetExceeded("tenant-a".to_string());
        assert_eq!(err.kind(), "budget_exceeded");
    }

    #[test]
    fn all_error_types_implement_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ConfigError::NotFound {
            path: "x".into(),
        });
        assert_std_error(&StoreError::Backend(anyhow::anyhow!("x")));
        assert_std_error(&EngineError::Fatal("x".into()));
    }
}
