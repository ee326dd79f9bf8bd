//! Fan-Out / Fan-In Runner (component F).
//!
//! Executes a phase's agent list under a parallelism strategy and
//! aggregates results deterministically.

mod aggregate;
mod runner;

pub use aggregate::{aggregate, Aggregation};
pub use runner::{fan_out, resolve_batch_size};
