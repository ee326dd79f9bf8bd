//! Phase Config Loader (component A).
//!
//! Loads declarative phase descriptors from disk, validates them, and
//! derives the deterministic replay hash a `PhasePlan` carries.

mod loader;

pub use loader::{PhaseConfigLoader, PHASE_PLAN_VERSION};
