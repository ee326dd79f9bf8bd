//! Model Router (component E).
//!
//! Selects the best backend per task under skill, cost, health, and
//! privacy constraints, with failover and tenant budget accounting.

mod scoring;

pub use scoring::{ModelRouter, TenantBudget};
