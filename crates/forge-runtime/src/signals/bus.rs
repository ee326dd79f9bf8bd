//! `SignalBus` implementation: durable, FIFO-per-target signal delivery.
//!
//! Signals are written to `by_id` before subscribers are notified, so a
//! crash between persistence and dispatch still leaves the signal
//! discoverable via `pending_for`/`has_pending` — at-least-once delivery
//! falls out of callers re-polling those, not from retrying the
//! notification itself.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use forge_common::signal::{Signal, SignalScope, SignalStatus, SignalTarget, SignalType};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Notified whenever a signal is sent. Implementations act on the signal
/// and call `acknowledge` on the bus once they have.
#[async_trait]
pub trait SignalSubscriber: Send + Sync {
    async fn on_signal(&self, signal: &Signal);
}

fn target_key(target: &SignalTarget) -> String {
    let scope = match target.scope {
        SignalScope::Run => "run",
        SignalScope::Phase => "phase",
        SignalScope::Task => "task",
    };
    format!("{scope}:{}", target.id)
}

pub struct SignalBus {
    by_id: DashMap<Uuid, Signal>,
    /// FIFO insertion order per target key.
    order: DashMap<String, RwLock<Vec<Uuid>>>,
    subscribers: RwLock<Vec<Arc<dyn SignalSubscriber>>>,
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalBus {
    pub fn new() -> Self {
        Self {
            by_id: DashMap::new(),
            order: DashMap::new(),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, subscriber: Arc<dyn SignalSubscriber>) {
        self.subscribers.write().unwrap().push(subscriber);
    }

    /// Persists the signal durably, then dispatches it to every
    /// subscriber at-least-once.
    pub async fn send(
        &self,
        signal_type: SignalType,
        target: SignalTarget,
        reason: impl Into<String>,
        sent_by: impl Into<String>,
    ) -> Signal {
        let signal = Signal::new(signal_type, target.clone(), reason, sent_by);
        let key = target_key(&target);

        self.by_id.insert(signal.id, signal.clone());
        self.order
            .entry(key)
            .or_insert_with(|| RwLock::new(Vec::new()))
            .write()
            .unwrap()
            .push(signal.id);

        let subscribers = self.subscribers.read().unwrap().clone();
        for subscriber in subscribers {
            subscriber.on_signal(&signal).await;
        }

        signal
    }

    /// Marks a pending signal acknowledged. Acknowledging a signal that is
    /// already non-pending is a no-op and returns its current state
    /// unchanged.
    pub fn acknowledge(&self, signal_id: Uuid) -> Option<Signal> {
        let mut entry = self.by_id.get_mut(&signal_id)?;
        entry.acknowledge();
        Some(entry.clone())
    }

    /// Unacknowledged signals for a target, in FIFO (send) order.
    pub fn pending_for(&self, scope: SignalScope, id: &str) -> Vec<Signal> {
        let key = target_key(&SignalTarget {
            scope,
            id: id.to_string(),
        });
        let Some(order) = self.order.get(&key) else {
            return Vec::new();
        };
        order
            .read()
            .unwrap()
            .iter()
            .filter_map(|signal_id| self.by_id.get(signal_id).map(|s| s.clone()))
            .filter(|s| s.is_pending())
            .collect()
    }

    /// Hot-path check used inside runner loops between tasks/batches.
    pub fn has_pending(&self, scope: SignalScope, id: &str, signal_type: SignalType) -> bool {
        self.pending_for(scope, id)
            .iter()
            .any(|s| s.signal_type == signal_type)
    }

    /// Purges signals with non-pending status older than `retention`,
    /// relative to `now`. Returns the number of signals removed.
    pub fn purge_expired(&self, now: DateTime<Utc>, retention: ChronoDuration) -> usize {
        let cutoff = now - retention;
        let expired: Vec<Uuid> = self
            .by_id
            .iter()
            .filter(|entry| {
                let signal = entry.value();
                !signal.is_pending() && signal.sent_at < cutoff
            })
            .map(|entry| *entry.key())
            .collect();

        for id in &expired {
            self.by_id.remove(id);
        }
        for order in self.order.iter() {
            order.write().unwrap().retain(|id| !expired.contains(id));
        }
        expired.len()
    }

    pub fn default_retention() -> ChronoDuration {
        ChronoDuration::days(30)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct RecordingSubscriber {
        seen: Mutex<Vec<Uuid>>,
        calls: AtomicUsize,
    }

    impl RecordingSubscriber {
        fn new() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SignalSubscriber for RecordingSubscriber {
        async fn on_signal(&self, signal: &Signal) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(signal.id);
        }
    }

    #[tokio::test]
    async fn send_persists_before_dispatching_to_subscribers() {
        let bus = SignalBus::new();
        let subscriber = Arc::new(RecordingSubscriber::new());
        bus.subscribe(subscriber.clone());

        let signal = bus
            .send(
                SignalType::Pause,
                SignalTarget::run("run-1"),
                "operator",
                "api",
            )
            .await;

        assert_eq!(subscriber.calls.load(Ordering::SeqCst), 1);
        assert_eq!(subscriber.seen.lock().unwrap()[0], signal.id);
    }

    #[tokio::test]
    async fn pending_for_returns_only_pending_signals_fifo() {
        let bus = SignalBus::new();
        let first = bus
            .send(SignalType::Retry, SignalTarget::task("t1"), "flaky", "sys")
            .await;
        let second = bus
            .send(SignalType::Cancel, SignalTarget::task("t1"), "abort", "sys")
            .await;

        bus.acknowledge(first.id);

        let pending = bus.pending_for(SignalScope::Task, "t1");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second.id);
    }

    #[tokio::test]
    async fn has_pending_matches_on_signal_type() {
        let bus = SignalBus::new();
        bus.send(SignalType::Pause, SignalTarget::run("r1"), "x", "sys")
            .await;

        assert!(bus.has_pending(SignalScope::Run, "r1", SignalType::Pause));
        assert!(!bus.has_pending(SignalScope::Run, "r1", SignalType::Cancel));
    }

    #[tokio::test]
    async fn repeat_acknowledge_is_a_no_op() {
        let bus = SignalBus::new();
        let signal = bus
            .send(SignalType::Resume, SignalTarget::run("r1"), "x", "sys")
            .await;

        let first_ack = bus.acknowledge(signal.id).unwrap();
        let second_ack = bus.acknowledge(signal.id).unwrap();
        assert_eq!(first_ack.acknowledged_at, second_ack.acknowledged_at);
        assert_eq!(second_ack.status, SignalStatus::Acknowledged);
    }

    #[tokio::test]
    async fn signals_are_delivered_fifo_per_target() {
        let bus = SignalBus::new();
        let a = bus
            .send(SignalType::Retry, SignalTarget::task("t1"), "a", "sys")
            .await;
        let b = bus
            .send(SignalType::Retry, SignalTarget::task("t1"), "b", "sys")
            .await;
        let c = bus
            .send(SignalType::Retry, SignalTarget::task("t1"), "c", "sys")
            .await;

        let pending = bus.pending_for(SignalScope::Task, "t1");
        assert_eq!(pending.iter().map(|s| s.id).collect::<Vec<_>>(), vec![a.id, b.id, c.id]);
    }

    #[tokio::test]
    async fn purge_expired_removes_old_non_pending_signals_only() {
        let bus = SignalBus::new();
        let stale = bus
            .send(SignalType::Pause, SignalTarget::run("r1"), "x", "sys")
            .await;
        bus.acknowledge(stale.id);
        let fresh_pending = bus
            .send(SignalType::Cancel, SignalTarget::run("r1"), "y", "sys")
            .await;

        let far_future = stale.sent_at + ChronoDuration::days(31);
        let removed = bus.purge_expired(far_future, SignalBus::default_retention());

        assert_eq!(removed, 1);
        assert!(bus.by_id.get(&stale.id).is_none());
        assert!(bus.by_id.get(&fresh_pending.id).is_some());
    }
}
