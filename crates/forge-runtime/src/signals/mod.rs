//! Signal Bus (component B).
//!
//! Durable delivery of pause/resume/retry/cancel directives to run, phase,
//! and task targets.

mod bus;

pub use bus::{SignalBus, SignalSubscriber};
