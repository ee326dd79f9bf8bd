//! Cross-component event emission (design note): the coordinator and
//! mothership publish through an injected bus rather than depending on
//! each other directly.

mod bus;

pub use bus::{EventBus, InMemoryEventBus, InMemorySubscription};
