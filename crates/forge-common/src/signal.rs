//! Control-plane signals delivered through the signal bus.
//!
//! A `Signal` directs the orchestrator to pause, resume, retry, or cancel
//! work at the run, phase, or task scope. Signals are durable: they are
//! persisted before dispatch and carry their own acknowledgement state so
//! at-least-once delivery never loses the fact that something was asked.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Pause,
    Resume,
    Retry,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalScope {
    Run,
    Phase,
    Task,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    Pending,
    Acknowledged,
    Ignored,
}

/// The scope and id a signal addresses. Ids are opaque strings so the
/// target can name a run id, a `"<run_id>/<phase>"` pair, or a task id
/// without the bus needing to know entity internals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalTarget {
    pub scope: SignalScope,
    pub id: String,
}

impl SignalTarget {
    pub fn run(id: impl Into<String>) -> Self {
        Self {
            scope: SignalScope::Run,
            id: id.into(),
        }
    }

    pub fn phase(run_id: impl AsRef<str>, phase: impl AsRef<str>) -> Self {
        Self {
            scope: SignalScope::Phase,
            id: format!("{}/{}", run_id.as_ref(), phase.as_ref()),
        }
    }

    pub fn task(id: impl Into<String>) -> Self {
        Self {
            scope: SignalScope::Task,
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    pub target: SignalTarget,
    pub reason: String,
    pub sent_by: String,
    pub sent_at: DateTime<Utc>,
    pub status: SignalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl Signal {
    pub fn new(
        signal_type: SignalType,
        target: SignalTarget,
        reason: impl Into<String>,
        sent_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            signal_type,
            target,
            reason: reason.into(),
            sent_by: sent_by.into(),
            sent_at: Utc::now(),
            status: SignalStatus::Pending,
            acknowledged_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == SignalStatus::Pending
    }

    /// Marks the signal acknowledged. Returns `false` (a no-op) if it was
    /// already non-pending, per the bus's idempotent-acknowledge contract.
    pub fn acknowledge(&mut self) -> bool {
        if self.status != SignalStatus::Pending {
            return false;
        }
        self.status = SignalStatus::Acknowledged;
        self.acknowledged_at = Some(Utc::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_signal_is_pending() {
        let sig = Signal::new(
            SignalType::Pause,
            SignalTarget::run("run-1"),
            "operator request",
            "api",
        );
        assert!(sig.is_pending());
        assert!(sig.acknowledged_at.is_none());
    }

    #[test]
    fn acknowledge_transitions_pending_to_acknowledged() {
        let mut sig = Signal::new(SignalType::Retry, SignalTarget::task("task-1"), "flaky", "system");
        assert!(sig.acknowledge());
        assert_eq!(sig.status, SignalStatus::Acknowledged);
        assert!(sig.acknowledged_at.is_some());
    }

    #[test]
    fn repeat_acknowledge_is_a_no_op() {
        let mut sig = Signal::new(SignalType::Cancel, SignalTarget::run("run-2"), "abort", "api");
        assert!(sig.acknowledge());
        let first_ack = sig.acknowledged_at;
        assert!(!sig.acknowledge());
        assert_eq!(sig.acknowledged_at, first_ack);
    }

    #[test]
    fn phase_target_formats_as_run_slash_phase() {
        let target = SignalTarget::phase("run-1", "BUILD");
        assert_eq!(target.scope, SignalScope::Phase);
        assert_eq!(target.id, "run-1/BUILD");
    }
}
