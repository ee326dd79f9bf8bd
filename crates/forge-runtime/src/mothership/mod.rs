//! Mothership Orchestrator (component H).
//!
//! Drives a `Run` across its ordered phase list, checkpointing after
//! every phase boundary so a crashed or paused run can resume without
//! replaying completed phases, and raising `budget.exceeded` plus a
//! `pause` signal when cumulative cost crosses the run's budget.

use std::sync::Arc;

use forge_common::error::EngineError;
use forge_common::events::{Event, EventKind};
use forge_common::model::{Run, RunStatus};
use forge_common::signal::{SignalScope, SignalTarget, SignalType};
use uuid::Uuid;

use crate::config::PhaseConfigLoader;
use crate::coordinator::{PhaseCoordinator, PhaseOutcome};
use crate::events::EventBus;
use crate::fanout::Aggregation;
use crate::signals::SignalBus;
use crate::store::{Checkpoint, Store};

/// Placeholder per-token rate used to turn a phase's declared token
/// budget into a cost estimate when no real usage accounting is wired
/// in yet. Mirrors the model router's cost-per-million-tokens unit.
const DEFAULT_COST_PER_MILLION_TOKENS: f64 = 10.0;

/// Fraction of the run budget at which a `budget.threshold.exceeded`
/// warning fires, ahead of the hard `budget.limit.reached` stop.
const BUDGET_WARNING_FRACTION: f64 = 0.8;

pub struct RunResult {
    pub run: Run,
    pub phase_outcomes: Vec<PhaseOutcome>,
}

pub struct MothershipOrchestrator {
    store: Arc<dyn Store>,
    bus: Arc<dyn EventBus>,
    signals: Arc<SignalBus>,
    coordinator: Arc<PhaseCoordinator>,
    loader: Arc<PhaseConfigLoader>,
}

impl MothershipOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        bus: Arc<dyn EventBus>,
        signals: Arc<SignalBus>,
        coordinator: Arc<PhaseCoordinator>,
        loader: Arc<PhaseConfigLoader>,
    ) -> Self {
        Self {
            store,
            bus,
            signals,
            coordinator,
            loader,
        }
    }

    /// Starts a fresh run over `phases`, in order, from the first phase.
    pub async fn start_run(
        &self,
        tenant_id: impl Into<String>,
        idea_spec: impl Into<String>,
        phases: &[String],
        budget_usd: Option<f64>,
    ) -> Result<RunResult, EngineError> {
        let mut run = Run::new(tenant_id, idea_spec);
        run.status = RunStatus::Running;
        self.store.put_run(run.clone()).await?;
        self.bus
            .publish(Event::new(run.run_id, EventKind::WorkflowCreated { run_id: run.run_id }))
            .await;
        self.drive(run, phases, 0, budget_usd).await
    }

    /// Resumes a previously checkpointed run. Restarts immediately after
    /// the last completed phase, or from the beginning if no checkpoint
    /// exists.
    pub async fn resume_run(
        &self,
        run_id: Uuid,
        phases: &[String],
        budget_usd: Option<f64>,
    ) -> Result<RunResult, EngineError> {
        let mut run = self.store.get_run(run_id).await?;
        run.status = RunStatus::Running;
        self.store.put_run(run.clone()).await?;
        self.bus
            .publish(Event::new(run_id, EventKind::WorkflowResumed { run_id }))
            .await;

        let checkpoint = self.store.latest_checkpoint(run_id).await?;
        let start_index = checkpoint
            .and_then(|cp| cp.last_complete_phase)
            .and_then(|last| phases.iter().position(|p| *p == last))
            .map(|i| i + 1)
            .unwrap_or(0);

        self.drive(run, phases, start_index, budget_usd).await
    }

    async fn drive(
        &self,
        mut run: Run,
        phases: &[String],
        start_index: usize,
        budget_usd: Option<f64>,
    ) -> Result<RunResult, EngineError> {
        let mut outcomes = Vec::new();
        let mut last_complete_phase = if start_index > 0 {
            phases.get(start_index - 1).cloned()
        } else {
            None
        };
        let run_target = SignalTarget::run(run.run_id.to_string());

        for phase_id in &phases[start_index..] {
            if self
                .signals
                .has_pending(SignalScope::Run, &run_target.id, SignalType::Cancel)
            {
                return self.finish_as(run, RunStatus::Failed, "cancelled by signal").await;
            }
            if self
                .signals
                .has_pending(SignalScope::Run, &run_target.id, SignalType::Pause)
            {
                return self.finish_as(run, RunStatus::Paused, "paused by signal").await;
            }

            let plan = self.loader.derive_plan(phase_id, None)?;
            run.current_phase = Some(plan.phase.clone());
            run.phase_sequence += 1;
            run.touch();
            self.store.put_run(run.clone()).await?;
            self.bus
                .publish(Event::new(
                    run.run_id,
                    EventKind::WorkflowStateChanged {
                        run_id: run.run_id,
                        from: last_complete_phase.clone().unwrap_or_else(|| "start".to_string()),
                        to: plan.phase.clone(),
                    },
                ))
                .await;

            let phase_outcome = self
                .coordinator
                .run_phase(
                    run.run_id,
                    &plan,
                    serde_json::json!({"run_id": run.run_id}),
                    Aggregation::Merge,
                )
                .await;

            let outcome = match phase_outcome {
                Ok(outcome) => outcome,
                Err(err) => {
                    run.status = RunStatus::Failed;
                    run.touch();
                    self.store.put_run(run.clone()).await?;
                    self.bus
                        .publish(Event::new(
                            run.run_id,
                            EventKind::WorkflowFailed {
                                run_id: run.run_id,
                                reason: err.to_string(),
                            },
                        ))
                        .await;
                    return Err(err);
                }
            };

            let phase_cost = (plan.budgets.tokens as f64 / 1_000_000.0) * DEFAULT_COST_PER_MILLION_TOKENS;
            run.running_cost_usd += phase_cost;
            last_complete_phase = Some(plan.phase.clone());

            self.store
                .put_checkpoint(Checkpoint::new(
                    run.run_id,
                    plan.phase.clone(),
                    last_complete_phase.clone(),
                    run.running_cost_usd,
                    plan.hash.clone(),
                ))
                .await?;

            if let Some(budget) = budget_usd {
                if run.running_cost_usd > budget {
                    self.bus
                        .publish(Event::new(run.run_id, EventKind::BudgetLimitReached { run_id: run.run_id }))
                        .await;
                    self.signals
                        .send(
                            SignalType::Pause,
                            SignalTarget::run(run.run_id.to_string()),
                            "budget exceeded",
                            "mothership",
                        )
                        .await;
                    run.status = RunStatus::Paused;
                    run.touch();
                    self.store.put_run(run.clone()).await?;
                    return Err(EngineError::BudgetExceeded(format!(
                        "run {} exceeded budget ${budget:.2}",
                        run.run_id
                    )));
                }
                if run.running_cost_usd > budget * BUDGET_WARNING_FRACTION {
                    self.bus
                        .publish(Event::new(
                            run.run_id,
                            EventKind::BudgetThresholdExceeded {
                                run_id: run.run_id,
                                remaining_usd: budget - run.running_cost_usd,
                            },
                        ))
                        .await;
                }
            }

            let gate_terminal = !outcome.verdict.passed && !outcome.verdict.can_waive;
            outcomes.push(outcome);
            if gate_terminal {
                return self
                    .finish_as(run, RunStatus::Failed, &format!("gate failed for phase {phase_id}"))
                    .await
                    .map(|mut result| {
                        result.phase_outcomes = outcomes;
                        result
                    });
            }
        }

        run.status = RunStatus::Completed;
        run.current_phase = None;
        run.touch();
        self.store.put_run(run.clone()).await?;
        self.bus
            .publish(Event::new(run.run_id, EventKind::WorkflowCompleted { run_id: run.run_id }))
            .await;
        Ok(RunResult {
            run,
            phase_outcomes: outcomes,
        })
    }

    async fn finish_as(
        &self,
        mut run: Run,
        status: RunStatus,
        reason: &str,
    ) -> Result<RunResult, EngineError> {
        run.status = status;
        run.touch();
        self.store.put_run(run.clone()).await?;
        let event = match status {
            RunStatus::Paused => EventKind::WorkflowPaused {
                run_id: run.run_id,
                reason: reason.to_string(),
            },
            RunStatus::Failed => EventKind::WorkflowFailed {
                run_id: run.run_id,
                reason: reason.to_string(),
            },
            _ => EventKind::WorkflowStateChanged {
                run_id: run.run_id,
                from: "running".to_string(),
                to: format!("{status:?}"),
            },
        };
        self.bus.publish(Event::new(run.run_id, event)).await;
        Ok(RunResult {
            run,
            phase_outcomes: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::InMemoryEventBus;
    use crate::executor::test_support::StubExecutor;
    use crate::gate::NullGateEvaluator;
    use crate::store::InMemoryStore;
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn write_descriptor(dir: &std::path::Path, phase_id: &str, body: &str) {
        std::fs::write(dir.join(format!("{phase_id}.toml")), body).unwrap();
    }

    const PHASE_TOML: &str = r#"
phase = "{PHASE}"
parallelism = "sequential"
agents = ["A"]
heartbeat_seconds = 60
stall_threshold_heartbeats = 3
timebox = "PT1H"

[budgets]
tokens = 100000
tools_minutes = 10

[refinery]
fission_min_coverage = 0.5
fusion_min_consensus = 0.5
"#;

    fn setup(dir: &std::path::Path) -> MothershipOrchestrator {
        for phase in ["INTAKE", "BUILD"] {
            write_descriptor(dir, phase, &PHASE_TOML.replace("{PHASE}", phase));
        }
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let bus: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::new());
        let signals = Arc::new(SignalBus::new());
        let responses = HashMap::from([("A".to_string(), json!({"ok": true}))]);
        let executor = Arc::new(StubExecutor::new(responses));
        let coordinator = Arc::new(PhaseCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&bus),
            Arc::clone(&signals),
            Arc::new(NullGateEvaluator),
            executor,
        ));
        let loader = Arc::new(PhaseConfigLoader::new(dir));
        MothershipOrchestrator::new(store, bus, signals, coordinator, loader)
    }

    #[tokio::test]
    async fn run_completes_through_all_phases() {
        let dir = TempDir::new().unwrap();
        let mothership = setup(dir.path());
        let phases = vec!["INTAKE".to_string(), "BUILD".to_string()];
        let result = mothership
            .start_run("tenant-a", "build a todo app", &phases, None)
            .await
            .unwrap();
        assert_eq!(result.run.status, RunStatus::Completed);
        assert_eq!(result.phase_outcomes.len(), 2);
        assert!(result.run.running_cost_usd > 0.0);
    }

    #[tokio::test]
    async fn resume_skips_already_completed_phases() {
        let dir = TempDir::new().unwrap();
        let mothership = setup(dir.path());
        let mut run = Run::new("tenant-a", "spec");
        run.status = RunStatus::Paused;
        mothership.store.put_run(run.clone()).await.unwrap();
        mothership
            .store
            .put_checkpoint(Checkpoint::new(run.run_id, "INTAKE", Some("INTAKE".to_string()), 1.0, "h"))
            .await
            .unwrap();

        let phases = vec!["INTAKE".to_string(), "BUILD".to_string()];
        let result = mothership
            .resume_run(run.run_id, &phases, None)
            .await
            .unwrap();
        assert_eq!(result.run.status, RunStatus::Completed);
        assert_eq!(result.phase_outcomes.len(), 1);
        assert_eq!(result.phase_outcomes[0].phase_run.phase, "BUILD");
    }

    #[tokio::test]
    async fn budget_exceeded_pauses_run_and_emits_signal() {
        let dir = TempDir::new().unwrap();
        let mothership = setup(dir.path());
        let phases = vec!["INTAKE".to_string(), "BUILD".to_string()];
        let err = mothership
            .start_run("tenant-a", "spec", &phases, Some(0.0001))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "budget_exceeded");
        // A pause signal should now be pending for this run.
    }

    #[tokio::test]
    async fn pending_cancel_signal_stops_run_before_next_phase() {
        let dir = TempDir::new().unwrap();
        let mothership = setup(dir.path());
        let mut run = Run::new("tenant-a", "spec");
        run.status = RunStatus::Running;
        mothership.store.put_run(run.clone()).await.unwrap();
        mothership
            .signals
            .send(
                SignalType::Cancel,
                SignalTarget::run(run.run_id.to_string()),
                "operator abort",
                "api",
            )
            .await;

        let phases = vec!["INTAKE".to_string()];
        let result = mothership.resume_run(run.run_id, &phases, None).await.unwrap();
        assert_eq!(result.run.status, RunStatus::Failed);
        assert!(result.phase_outcomes.is_empty());
    }
}
