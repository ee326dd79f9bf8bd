//! Fan-in aggregation strategies.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// How a batch of agent results collapses into one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Deep-merge every result's object fields, later results winning on
    /// key collisions. Non-object results are skipped.
    Merge,
    /// Flatten one level: each result's array elements (or the result
    /// itself, if not an array) are concatenated in order.
    Concat,
    /// Group results by their canonical form and return the
    /// highest-count group, ties broken by first appearance.
    Vote,
    /// No built-in collapsing; the caller post-processes the raw list.
    Custom,
}

pub fn aggregate(results: &[Value], strategy: Aggregation) -> Value {
    match strategy {
        Aggregation::Merge => merge_all(results),
        Aggregation::Concat => concat_all(results),
        Aggregation::Vote => vote(results),
        Aggregation::Custom => Value::Array(results.to_vec()),
    }
}

fn merge_all(results: &[Value]) -> Value {
    let mut acc = Map::new();
    for result in results {
        if let Some(obj) = result.as_object() {
            for (key, value) in obj {
                merge_into(&mut acc, key, value);
            }
        }
    }
    canonicalize(&Value::Object(acc))
}

/// Merges `value` into `acc` under `key`: if both the existing and
/// incoming value are objects, merges recursively field by field;
/// otherwise the incoming value wins outright.
fn merge_into(acc: &mut Map<String, Value>, key: &str, value: &Value) {
    match (acc.get(key), value) {
        (Some(Value::Object(existing)), Value::Object(incoming)) => {
            let mut merged = existing.clone();
            for (k, v) in incoming {
                merge_into(&mut merged, k, v);
            }
            acc.insert(key.to_string(), Value::Object(merged));
        }
        _ => {
            acc.insert(key.to_string(), value.clone());
        }
    }
}

fn concat_all(results: &[Value]) -> Value {
    let mut out = Vec::new();
    for result in results {
        match result {
            Value::Array(items) => out.extend(items.iter().cloned()),
            other => out.push(other.clone()),
        }
    }
    Value::Array(out)
}

fn vote(results: &[Value]) -> Value {
    let mut order: Vec<String> = Vec::new();
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_key: BTreeMap<String, Value> = BTreeMap::new();

    for result in results {
        let canonical = canonicalize(result);
        let key = serde_json::to_string(&canonical).unwrap_or_default();
        if !counts.contains_key(&key) {
            order.push(key.clone());
            by_key.insert(key.clone(), canonical);
        }
        *counts.entry(key).or_insert(0) += 1;
    }

    // `Iterator::max_by_key` returns the *last* maximal element on a
    // tie; the vote contract breaks ties by first appearance, so the
    // winner is tracked by hand with a strict `>` comparison instead.
    let mut winner: Option<String> = None;
    let mut best_count = 0usize;
    for key in order {
        let count = counts[&key];
        if count > best_count {
            best_count = count;
            winner = Some(key);
        }
    }
    winner.and_then(|key| by_key.remove(&key)).unwrap_or(Value::Null)
}

/// Recursively sorts object keys so equivalent values compare equal
/// regardless of field declaration order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_overwrites_with_later_results_and_sorts_keys() {
        let results = vec![json!({"b": 1, "a": 1}), json!({"a": 2, "c": 3})];
        let merged = aggregate(&results, Aggregation::Merge);
        assert_eq!(merged, json!({"a": 2, "b": 1, "c": 3}));
        let keys: Vec<&String> = merged.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn merge_deep_merges_nested_objects_instead_of_overwriting() {
        let results = vec![json!({"x": {"a": 1}}), json!({"x": {"b": 2}})];
        let merged = aggregate(&results, Aggregation::Merge);
        assert_eq!(merged, json!({"x": {"a": 1, "b": 2}}));
    }

    #[test]
    fn merge_nested_scalar_collision_keeps_later_value() {
        let results = vec![json!({"x": {"a": 1}}), json!({"x": {"a": 2, "b": 3}})];
        let merged = aggregate(&results, Aggregation::Merge);
        assert_eq!(merged, json!({"x": {"a": 2, "b": 3}}));
    }

    #[test]
    fn merge_skips_non_object_results() {
        let results = vec![json!("ignored"), json!({"a": 1})];
        let merged = aggregate(&results, Aggregation::Merge);
        assert_eq!(merged, json!({"a": 1}));
    }

    #[test]
    fn concat_flattens_arrays_one_level() {
        let results = vec![json!([1, 2]), json!([3]), json!(4)];
        let out = aggregate(&results, Aggregation::Concat);
        assert_eq!(out, json!([1, 2, 3, 4]));
    }

    #[test]
    fn vote_returns_highest_count_group() {
        let results = vec![json!({"v": "yes"}), json!({"v": "no"}), json!({"v": "yes"})];
        let winner = aggregate(&results, Aggregation::Vote);
        assert_eq!(winner, json!({"v": "yes"}));
    }

    #[test]
    fn vote_tie_breaks_by_first_appearance() {
        let results = vec![json!({"v": "a"}), json!({"v": "b"})];
        let winner = aggregate(&results, Aggregation::Vote);
        assert_eq!(winner, json!({"v": "a"}));
    }

    #[test]
    fn vote_is_indifferent_to_key_order_within_a_result() {
        let results = vec![json!({"a": 1, "b": 2}), json!({"b": 2, "a": 1}), json!({"c": 3})];
        let winner = aggregate(&results, Aggregation::Vote);
        assert_eq!(winner, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn custom_passes_through_raw_list() {
        let results = vec![json!(1), json!(2)];
        let out = aggregate(&results, Aggregation::Custom);
        assert_eq!(out, json!([1, 2]));
    }
}

#[cfg(test)]
mod properties {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn flat_object() -> impl Strategy<Value = Value> {
        proptest::collection::btree_map(
            "[a-f]",
            proptest::prop_oneof![any::<i64>().prop_map(Value::from), any::<bool>().prop_map(Value::from)],
            0..6,
        )
        .prop_map(|map| Value::Object(map.into_iter().collect()))
    }

    proptest! {
        /// For every merge aggregation, the result's key set equals the
        /// union of every input object's keys, key-sorted recursively.
        #[test]
        fn merge_key_set_is_union_of_input_keys(results in proptest::collection::vec(flat_object(), 0..8)) {
            let expected: BTreeSet<String> = results
                .iter()
                .flat_map(|v| v.as_object().unwrap().keys().cloned())
                .collect();
            let merged = aggregate(&results, Aggregation::Merge);
            let actual: BTreeSet<String> = merged.as_object().unwrap().keys().cloned().collect();
            prop_assert_eq!(actual, expected);

            let keys: Vec<&String> = merged.as_object().unwrap().keys().collect();
            let mut sorted = keys.clone();
            sorted.sort();
            prop_assert_eq!(keys, sorted);
        }

        /// Concat preserves source order across arbitrary arrays-of-ints.
        #[test]
        fn concat_preserves_source_order(chunks in proptest::collection::vec(proptest::collection::vec(any::<i32>(), 0..5), 0..5)) {
            let results: Vec<Value> = chunks.iter().map(|c| serde_json::to_value(c).unwrap()).collect();
            let flattened: Vec<i32> = chunks.into_iter().flatten().collect();
            let out = aggregate(&results, Aggregation::Concat);
            let actual: Vec<i32> = serde_json::from_value(out).unwrap();
            prop_assert_eq!(actual, flattened);
        }

        /// Given identical inputs, aggregation is bit-stable: running it
        /// twice over the same result list yields byte-identical JSON.
        #[test]
        fn aggregation_is_bitwise_stable(results in proptest::collection::vec(flat_object(), 0..8)) {
            for strategy in [Aggregation::Merge, Aggregation::Vote, Aggregation::Concat] {
                let first = serde_json::to_string(&aggregate(&results, strategy)).unwrap();
                let second = serde_json::to_string(&aggregate(&results, strategy)).unwrap();
                prop_assert_eq!(first, second);
            }
        }
    }
}
