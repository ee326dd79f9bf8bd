//! Event taxonomy emitted on the bus.
//!
//! Every event carries the common envelope fields (`event_id`,
//! `event_type`, `timestamp`, `workflow_run_id`, `correlation_id`) plus a
//! payload specific to its family. `EventKind` is the tagged union of all
//! payload shapes; `Event` wraps it with the envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventKind {
    #[serde(rename = "workflow.created")]
    WorkflowCreated { run_id: Uuid },
    #[serde(rename = "workflow.state.changed")]
    WorkflowStateChanged { run_id: Uuid, from: String, to: String },
    #[serde(rename = "workflow.paused")]
    WorkflowPaused { run_id: Uuid, reason: String },
    #[serde(rename = "workflow.resumed")]
    WorkflowResumed { run_id: Uuid },
    #[serde(rename = "workflow.failed")]
    WorkflowFailed { run_id: Uuid, reason: String },
    #[serde(rename = "workflow.completed")]
    WorkflowCompleted { run_id: Uuid },

    #[serde(rename = "phase.started")]
    PhaseStarted {
        phase_run_id: Uuid,
        started_at: DateTime<Utc>,
        config_hash: String,
    },
    #[serde(rename = "phase.progress")]
    PhaseProgress {
        phase_run_id: Uuid,
        tasks_completed: u32,
        tasks_total: u32,
        tokens_used: u64,
        tools_minutes_used: u64,
        pct: f32,
        #[serde(skip_serializing_if = "Option::is_none")]
        eta: Option<DateTime<Utc>>,
    },
    #[serde(rename = "phase.stalled")]
    PhaseStalled {
        phase_run_id: Uuid,
        task_id: Uuid,
        reason: String,
        last_heartbeat_at: Option<DateTime<Utc>>,
        elapsed_ms: u64,
    },
    #[serde(rename = "phase.ready")]
    PhaseReady {
        phase_run_id: Uuid,
        artifacts: Vec<String>,
        completed_at: DateTime<Utc>,
    },
    #[serde(rename = "phase.gate.passed")]
    PhaseGatePassed {
        phase_run_id: Uuid,
        evidence_pack_id: String,
        score: f64,
        rubrics_met: Vec<String>,
    },
    #[serde(rename = "phase.gate.failed")]
    PhaseGateFailed {
        phase_run_id: Uuid,
        reasons: Vec<String>,
        score: f64,
        required_actions: Vec<String>,
        can_waive: bool,
    },
    #[serde(rename = "phase.error")]
    PhaseError {
        phase_run_id: Uuid,
        error: String,
        retryable: bool,
    },

    #[serde(rename = "agent.started")]
    AgentStarted { task_id: Uuid, agent: String },
    #[serde(rename = "agent.completed")]
    AgentCompleted { task_id: Uuid, agent: String },
    #[serde(rename = "agent.failed")]
    AgentFailed { task_id: Uuid, agent: String, error: String },
    #[serde(rename = "agent.tool.requested")]
    AgentToolRequested { task_id: Uuid, tool: String },

    #[serde(rename = "tool.execution.started")]
    ToolExecutionStarted { task_id: Uuid, tool: String },
    #[serde(rename = "tool.execution.completed")]
    ToolExecutionCompleted { task_id: Uuid, tool: String },
    #[serde(rename = "tool.execution.failed")]
    ToolExecutionFailed { task_id: Uuid, tool: String, error: String },

    #[serde(rename = "gate.evaluation.started")]
    GateEvaluationStarted { phase_run_id: Uuid },
    #[serde(rename = "gate.evaluation.completed")]
    GateEvaluationCompleted { phase_run_id: Uuid, passed: bool },
    #[serde(rename = "gate.blocked")]
    GateBlocked { phase_run_id: Uuid, reasons: Vec<String> },

    #[serde(rename = "artifact.created")]
    ArtifactCreated { artifact_id: String, phase_run_id: Uuid },
    #[serde(rename = "artifact.updated")]
    ArtifactUpdated { artifact_id: String, phase_run_id: Uuid },

    #[serde(rename = "budget.threshold.exceeded")]
    BudgetThresholdExceeded { run_id: Uuid, remaining_usd: f64 },
    #[serde(rename = "budget.limit.reached")]
    BudgetLimitReached { run_id: Uuid },
}

impl EventKind {
    /// The dotted event type name, as it appears on the wire.
    pub fn type_name(&self) -> &'static str {
        match self {
            EventKind::WorkflowCreated { .. } => "workflow.created",
            EventKind::WorkflowStateChanged { .. } => "workflow.state.changed",
            EventKind::WorkflowPaused { .. } => "workflow.paused",
            EventKind::WorkflowResumed { .. } => "workflow.resumed",
            EventKind::WorkflowFailed { .. } => "workflow.failed",
            EventKind::WorkflowCompleted { .. } => "workflow.completed",
            EventKind::PhaseStarted { .. } => "phase.started",
            EventKind::PhaseProgress { .. } => "phase.progress",
            EventKind::PhaseStalled { .. } => "phase.stalled",
            EventKind::PhaseReady { .. } => "phase.ready",
            EventKind::PhaseGatePassed { .. } => "phase.gate.passed",
            EventKind::PhaseGateFailed { .. } => "phase.gate.failed",
            EventKind::PhaseError { .. } => "phase.error",
            EventKind::AgentStarted { .. } => "agent.started",
            EventKind::AgentCompleted { .. } => "agent.completed",
            EventKind::AgentFailed { .. } => "agent.failed",
            EventKind::AgentToolRequested { .. } => "agent.tool.requested",
            EventKind::ToolExecutionStarted { .. } => "tool.execution.started",
            EventKind::ToolExecutionCompleted { .. } => "tool.execution.completed",
            EventKind::ToolExecutionFailed { .. } => "tool.execution.failed",
            EventKind::GateEvaluationStarted { .. } => "gate.evaluation.started",
            EventKind::GateEvaluationCompleted { .. } => "gate.evaluation.completed",
            EventKind::GateBlocked { .. } => "gate.blocked",
            EventKind::ArtifactCreated { .. } => "artifact.created",
            EventKind::ArtifactUpdated { .. } => "artifact.updated",
            EventKind::BudgetThresholdExceeded { .. } => "budget.threshold.exceeded",
            EventKind::BudgetLimitReached { .. } => "budget.limit.reached",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub workflow_run_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn new(workflow_run_id: Uuid, kind: EventKind) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            workflow_run_id,
            correlation_id: None,
            kind,
        }
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn event_type(&self) -> &'static str {
        self.kind.type_name()
    }

    /// Converts the event to a JSON `Value`, used by event bus
    /// implementations that persist or transmit events generically.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).expect("Event always serializes")
    }
}
