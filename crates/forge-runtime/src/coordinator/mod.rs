//! Phase Coordinator (component G).
//!
//! Drives one `PhaseRun` through `pending -> running -> (ready | stalled |
//! errored)`, with `stalled -> running | errored` recovery and
//! `ready -> gate_passed | gate_failed` gate resolution. Wires together
//! the heartbeat monitor, fan-out runner, gate evaluator, signal bus,
//! store, and event bus without any of them depending on each other
//! directly.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use forge_common::error::EngineError;
use forge_common::events::{Event, EventKind};
use forge_common::model::{PhaseRun, PhaseRunStatus, Task, TaskStatus};
use forge_common::phase_config::PhasePlan;
use forge_common::signal::{SignalScope, SignalTarget, SignalType};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::events::EventBus;
use crate::executor::Executor;
use crate::fanout::{aggregate, fan_out, Aggregation};
use crate::gate::{GateEvaluator, GateVerdict};
use crate::heartbeat::{HeartbeatMonitor, StallEvent, Unsticker};
use crate::signals::SignalBus;
use crate::store::Store;
use async_trait::async_trait;

/// The result of running one phase to a terminal gate decision.
#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    pub phase_run: PhaseRun,
    pub aggregated_result: serde_json::Value,
    pub verdict: GateVerdict,
}

/// Forwards heartbeat-monitor stall notifications onto the event bus and
/// flips the owning `PhaseRun` to `stalled`. Recovery out of `stalled` is
/// decided by `PhaseCoordinator::run_phase`'s caller: re-running the phase
/// moves it back to `running`; giving up moves it to `errored`.
struct PhaseUnsticker {
    store: Arc<dyn Store>,
    bus: Arc<dyn EventBus>,
}

#[async_trait]
impl Unsticker for PhaseUnsticker {
    async fn unstick(&self, event: &StallEvent) {
        let Ok(mut phase_run) = self.store.get_phase_run(event.phase_run_id).await else {
            return;
        };
        phase_run.status = PhaseRunStatus::Stalled;
        if self.store.put_phase_run(phase_run.clone()).await.is_err() {
            return;
        }
        self.bus
            .publish(Event::new(
                phase_run.run_id,
                EventKind::PhaseStalled {
                    phase_run_id: event.phase_run_id,
                    task_id: event.task_id,
                    reason: event.reason.clone(),
                    last_heartbeat_at: Some(event.last_heartbeat_at),
                    elapsed_ms: event.elapsed_ms,
                },
            ))
            .await;
    }
}

pub struct PhaseCoordinator {
    store: Arc<dyn Store>,
    bus: Arc<dyn EventBus>,
    signals: Arc<SignalBus>,
    heartbeats: Arc<HeartbeatMonitor>,
    gate: Arc<dyn GateEvaluator>,
    executor: Arc<dyn Executor>,
}

impl PhaseCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        bus: Arc<dyn EventBus>,
        signals: Arc<SignalBus>,
        gate: Arc<dyn GateEvaluator>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        let unsticker = Arc::new(PhaseUnsticker {
            store: Arc::clone(&store),
            bus: Arc::clone(&bus),
        });
        let heartbeats = Arc::new(HeartbeatMonitor::with_unsticker(unsticker));
        Self {
            store,
            bus,
            signals,
            heartbeats,
            gate,
            executor,
        }
    }

    pub fn heartbeats(&self) -> &Arc<HeartbeatMonitor> {
        &self.heartbeats
    }

    /// Runs `plan` under `run_id` to completion: fan-out over the agent
    /// list, aggregate results, then gate evaluation.
    ///
    /// A pending `cancel` signal scoped to this phase, checked before
    /// work starts, short-circuits straight to `errored`. Pause signals
    /// are a run-level concern handled by the mothership orchestrator,
    /// since `PhaseRun` has no `paused` state of its own.
    pub async fn run_phase(
        &self,
        run_id: Uuid,
        plan: &PhasePlan,
        input: serde_json::Value,
        aggregation: Aggregation,
    ) -> Result<PhaseOutcome, EngineError> {
        let target = SignalTarget::phase(run_id.to_string(), plan.phase.clone());
        if self
            .signals
            .has_pending(SignalScope::Phase, &target.id, SignalType::Cancel)
        {
            return Err(EngineError::Fatal(format!(
                "phase {} cancelled before start",
                plan.phase
            )));
        }

        let mut phase_run = PhaseRun::new(run_id, plan.phase.clone(), plan.hash.clone());
        self.store.put_phase_run(phase_run.clone()).await?;
        phase_run.start();
        self.store.put_phase_run(phase_run.clone()).await?;
        self.bus
            .publish(Event::new(
                run_id,
                EventKind::PhaseStarted {
                    phase_run_id: phase_run.phase_run_id,
                    started_at: phase_run.started_at.expect("just started"),
                    config_hash: plan.hash.clone(),
                },
            ))
            .await;

        let mut tasks = Vec::with_capacity(plan.agents.len());
        for agent in &plan.agents {
            let mut task = Task::new(phase_run.phase_run_id, agent.clone());
            task.status = TaskStatus::Running;
            self.heartbeats.register(
                task.task_id,
                phase_run.phase_run_id,
                plan.heartbeat_seconds,
                plan.stall_threshold_heartbeats,
            );
            self.store.put_task(task.clone()).await?;
            self.bus
                .publish(Event::new(
                    run_id,
                    EventKind::AgentStarted {
                        task_id: task.task_id,
                        agent: agent.clone(),
                    },
                ))
                .await;
            tasks.push(task);
        }

        let cancellation = CancellationToken::new();
        let ticker_token = cancellation.clone();
        let heartbeats_for_ticker = Arc::clone(&self.heartbeats);
        let tick_period = Duration::from_secs(plan.heartbeat_seconds.max(1) as u64);
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_period);
            loop {
                tokio::select! {
                    _ = ticker_token.cancelled() => break,
                    _ = interval.tick() => {
                        heartbeats_for_ticker.tick(Utc::now()).await;
                    }
                }
            }
        });

        let started_at = std::time::Instant::now();
        let fanout_result = match tokio::time::timeout(
            plan.timebox_duration(),
            fan_out(&plan.parallelism, &plan.agents, input, Arc::clone(&self.executor), cancellation.clone()),
        )
        .await
        {
            Ok(result) => result,
            Err(_elapsed) => Err(EngineError::TimeboxExceeded {
                elapsed_ms: started_at.elapsed().as_millis() as u64,
            }),
        };

        cancellation.cancel();
        let _ = ticker.await;
        for task in &tasks {
            self.heartbeats.task_completed(task.task_id);
        }

        match fanout_result {
            Ok(results) => {
                for task in &mut tasks {
                    task.status = TaskStatus::Succeeded;
                    self.store.put_task(task.clone()).await?;
                    self.bus
                        .publish(Event::new(
                            run_id,
                            EventKind::AgentCompleted {
                                task_id: task.task_id,
                                agent: task.agent.clone(),
                            },
                        ))
                        .await;
                }

                phase_run.complete(PhaseRunStatus::Ready);
                self.store.put_phase_run(phase_run.clone()).await?;
                self.bus
                    .publish(Event::new(
                        run_id,
                        EventKind::PhaseReady {
                            phase_run_id: phase_run.phase_run_id,
                            artifacts: Vec::new(),
                            completed_at: phase_run.completed_at.expect("just completed"),
                        },
                    ))
                    .await;

                let verdict = self
                    .gate
                    .evaluate(&plan.phase, &plan.rubrics, &plan.refinery, &results)
                    .await?;

                if verdict.passed {
                    phase_run.complete(PhaseRunStatus::GatePassed);
                    self.store.put_phase_run(phase_run.clone()).await?;
                    self.bus
                        .publish(Event::new(
                            run_id,
                            EventKind::PhaseGatePassed {
                                phase_run_id: phase_run.phase_run_id,
                                evidence_pack_id: verdict.evidence_pack_id.clone(),
                                score: verdict.score,
                                rubrics_met: verdict.rubrics_met.clone(),
                            },
                        ))
                        .await;
                } else {
                    phase_run.complete(PhaseRunStatus::GateFailed);
                    self.store.put_phase_run(phase_run.clone()).await?;
                    self.bus
                        .publish(Event::new(
                            run_id,
                            EventKind::PhaseGateFailed {
                                phase_run_id: phase_run.phase_run_id,
                                reasons: verdict.reasons.clone(),
                                score: verdict.score,
                                required_actions: verdict.required_actions.clone(),
                                can_waive: verdict.can_waive,
                            },
                        ))
                        .await;
                }

                Ok(PhaseOutcome {
                    phase_run,
                    aggregated_result: aggregate(&results, aggregation),
                    verdict,
                })
            }
            Err(err) => {
                for task in &mut tasks {
                    if task.status == TaskStatus::Running {
                        task.status = TaskStatus::Failed;
                        let _ = self.store.put_task(task.clone()).await;
                    }
                }
                phase_run.complete(PhaseRunStatus::Errored);
                self.store.put_phase_run(phase_run.clone()).await?;
                self.bus
                    .publish(Event::new(
                        run_id,
                        EventKind::PhaseError {
                            phase_run_id: phase_run.phase_run_id,
                            error: err.to_string(),
                            retryable: err.is_retryable(),
                        },
                    ))
                    .await;
                Err(err)
            }
        }
    }
}
