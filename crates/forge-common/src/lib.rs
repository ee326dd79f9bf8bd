//! Shared domain types for the Forge runtime platform.
//!
//! This crate holds the entities, event taxonomy, and error hierarchy that
//! every runtime component depends on, so that `forge-runtime`'s components
//! (phase config loader, signal bus, heartbeat monitor, shard manager,
//! model router, fan-out/fan-in runner, phase coordinator, mothership
//! orchestrator) share one vocabulary instead of redefining it per module.

pub mod error;
pub mod events;
pub mod model;
pub mod phase_config;
pub mod router;
pub mod shard;
pub mod signal;

pub use error::{ConfigError, EngineError, StoreError};
pub use events::{Event, EventKind};
pub use model::{Heartbeat, PhaseRun, PhaseRunStatus, Run, RunStatus, Task, TaskStatus};
pub use phase_config::{Budgets, LoopConfig, Parallelism, PhaseConfig, PhasePlan, Refinery};
pub use router::{ModelCapabilities, ModelHealth, PrivacyMode, RoutingDecision, RoutingRequest};
pub use shard::{ResourceLimits, Shard, ShardAssignment, ShardStatus, ShardType, WorkerPool};
pub use signal::{Signal, SignalScope, SignalStatus, SignalTarget, SignalType};
