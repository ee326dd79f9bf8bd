//! Fan-out execution strategies over a phase's agent list.

use std::sync::Arc;

use forge_common::error::EngineError;
use forge_common::phase_config::Parallelism;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::executor::Executor;

const MAX_ITERATIONS: u32 = 100;

/// Translates a parallelism strategy into a concrete batch size for the
/// purposes of `sequential`/integer/`partial` execution. `iterative` has
/// no batch size of its own: each pass runs the full agent list.
pub fn resolve_batch_size(parallelism: &Parallelism, agent_count: usize) -> usize {
    match parallelism {
        Parallelism::Sequential => 1,
        Parallelism::Integer(n) => (*n as usize).max(1),
        Parallelism::Partial => agent_count.div_ceil(2).max(1),
        Parallelism::Iterative => agent_count.max(1),
    }
}

/// Runs `agents` against `input` under `parallelism`, returning one
/// result per agent invocation in declared order.
///
/// On executor error, already-started siblings in the same batch are
/// awaited best-effort (so no work is orphaned) but no further batch is
/// started; the original error is returned.
pub async fn fan_out(
    parallelism: &Parallelism,
    agents: &[String],
    input: Value,
    executor: Arc<dyn Executor>,
    cancellation: CancellationToken,
) -> Result<Vec<Value>, EngineError> {
    if agents.is_empty() {
        return Ok(Vec::new());
    }

    match parallelism {
        Parallelism::Iterative => {
            run_iterative(agents, input, executor, cancellation).await
        }
        other => {
            let batch_size = resolve_batch_size(other, agents.len());
            run_batched(agents, batch_size, input, executor, cancellation).await
        }
    }
}

async fn run_batched(
    agents: &[String],
    batch_size: usize,
    input: Value,
    executor: Arc<dyn Executor>,
    cancellation: CancellationToken,
) -> Result<Vec<Value>, EngineError> {
    let mut results = Vec::with_capacity(agents.len());
    for batch in agents.chunks(batch_size) {
        let futures = batch.iter().map(|agent| {
            let executor = Arc::clone(&executor);
            let input = input.clone();
            let agent = agent.clone();
            let cancellation = cancellation.clone();
            async move { executor.execute(&agent, input, cancellation).await }
        });
        let outcomes = futures::future::join_all(futures).await;
        for outcome in outcomes {
            results.push(outcome?);
        }
    }
    Ok(results)
}

async fn run_iterative(
    agents: &[String],
    input: Value,
    executor: Arc<dyn Executor>,
    cancellation: CancellationToken,
) -> Result<Vec<Value>, EngineError> {
    let mut results = Vec::new();
    'outer: for iteration in 0..MAX_ITERATIONS {
        let mut iter_input = input.clone();
        if let Some(obj) = iter_input.as_object_mut() {
            obj.insert("iteration".to_string(), Value::from(iteration));
        }
        for agent in agents {
            let result = executor
                .execute(agent, iter_input.clone(), cancellation.clone())
                .await?;
            let done = result
                .get("done")
                .map(|v| v.as_bool().unwrap_or(!v.is_null()))
                .unwrap_or(false);
            results.push(result);
            if done {
                break 'outer;
            }
        }
    }
    Ok(results)
}


#[cfg(test)]
mod properties {
    use super::*;
    use crate::executor::test_support::StubExecutor;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn agents_and_batch() -> impl Strategy<Value = (Vec<String>, Parallelism)> {
        (1usize..12).prop_flat_map(|n| {
            let names: Vec<String> = (0..n).map(|i| format!("agent-{i}")).collect();
            let parallelism = prop_oneof![
                Just(Parallelism::Sequential),
                (1u32..6).prop_map(Parallelism::Integer),
                Just(Parallelism::Partial),
            ];
            (Just(names), parallelism)
        })
    }

    proptest! {
        /// For every fan-out with `sequential` or an integer batch size,
        /// output length equals input length and each result corresponds
        /// to the agent declared at the same index.
        #[test]
        fn batched_fan_out_preserves_length_and_order((agents, parallelism) in agents_and_batch()) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let responses: HashMap<String, serde_json::Value> = agents
                .iter()
                .map(|a| (a.clone(), json!({"agent": a})))
                .collect();
            let executor = Arc::new(StubExecutor::new(responses));
            let results = rt
                .block_on(fan_out(&parallelism, &agents, json!({}), executor, CancellationToken::new()))
                .unwrap();

            prop_assert_eq!(results.len(), agents.len());
            for (agent, result) in agents.iter().zip(results.iter()) {
                prop_assert_eq!(&result["agent"], agent);
            }
        }
    }
}
