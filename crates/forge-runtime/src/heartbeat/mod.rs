//! Heartbeat Monitor (component C).
//!
//! Tracks liveness of in-flight tasks and emits stall signals when a task
//! goes quiet for longer than its phase's configured threshold.

mod monitor;

pub use monitor::{HeartbeatMonitor, StallEvent, Unsticker};
