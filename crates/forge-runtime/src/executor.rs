//! The "promise-based" executor contract (design note): any async-capable
//! callable that, given an input, produces a result or fails. Concurrency
//! is modeled via the runtime's task primitive, not a specific keyword —
//! `async_trait` is the idiomatic way to express that boundary here.
//!
//! The executor is an external collaborator per the purpose & scope: this
//! crate only defines the contract the fan-out runner and phase
//! coordinator call through, plus a cancellation handle for best-effort
//! mid-task termination.

use async_trait::async_trait;
use forge_common::error::EngineError;
use forge_common::router::RoutingRequest;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::router::ModelRouter;

/// A single worker invocation: agent role name plus a JSON input payload.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        agent: &str,
        input: serde_json::Value,
        cancellation: CancellationToken,
    ) -> Result<serde_json::Value, EngineError>;
}

/// A reference `Executor` that does no worker domain logic of its own
/// (worker processes are an external collaborator per purpose & scope
/// §1) but still exercises the real data flow described in §2: every
/// invocation routes through the model router to pick a backend before
/// echoing the agent's input back as its result. Useful for driving the
/// engine end-to-end without a real worker fleet attached.
pub struct RoutedEchoExecutor {
    router: Arc<ModelRouter>,
}

impl RoutedEchoExecutor {
    pub fn new(router: Arc<ModelRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl Executor for RoutedEchoExecutor {
    async fn execute(
        &self,
        agent: &str,
        input: serde_json::Value,
        _cancellation: CancellationToken,
    ) -> Result<serde_json::Value, EngineError> {
        let request = RoutingRequest::new(agent, 1_000);
        let model = match self.router.route(&request) {
            Ok(decision) => decision.selected_model,
            Err(_) => "unrouted".to_string(),
        };
        Ok(serde_json::json!({
            "agent": agent,
            "model": model,
            "echo": input,
        }))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// An in-memory executor returning canned results per agent, used
    /// across the fan-out and coordinator test suites.
    pub struct StubExecutor {
        responses: HashMap<String, serde_json::Value>,
        fail_on: Option<String>,
        calls: Mutex<Vec<String>>,
    }

    impl StubExecutor {
        pub fn new(responses: HashMap<String, serde_json::Value>) -> Self {
            Self {
                responses,
                fail_on: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn failing_on(mut self, agent: impl Into<String>) -> Self {
            self.fail_on = Some(agent.into());
            self
        }

        pub fn call_order(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Executor for StubExecutor {
        async fn execute(
            &self,
            agent: &str,
            input: serde_json::Value,
            _cancellation: CancellationToken,
        ) -> Result<serde_json::Value, EngineError> {
            self.calls.lock().unwrap().push(agent.to_string());
            if self.fail_on.as_deref() == Some(agent) {
                return Err(EngineError::Transient {
                    attempt: 0,
                    message: format!("agent {agent} failed"),
                });
            }
            let mut result = self
                .responses
                .get(agent)
                .cloned()
                .unwrap_or(serde_json::json!({}));
            if let (Some(obj), Some(iteration)) = (result.as_object_mut(), input.get("iteration")) {
                obj.insert("iteration".to_string(), iteration.clone());
            }
            Ok(result)
        }
    }
}
