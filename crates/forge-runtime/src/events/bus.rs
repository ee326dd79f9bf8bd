use std::collections::VecDeque;
use std::sync::RwLock;

use async_trait::async_trait;
use forge_common::events::Event;
use tokio::sync::broadcast;

const HISTORY_CAPACITY: usize = 1_000;
const CHANNEL_CAPACITY: usize = 1_024;

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: Event);
    fn subscribe(&self) -> InMemorySubscription;
}

/// A live handle for draining events published after subscription.
pub struct InMemorySubscription {
    receiver: broadcast::Receiver<Event>,
}

impl InMemorySubscription {
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Broadcast-backed event bus with a bounded replay buffer for
/// subscribers that attach after publication (e.g. HTTP polling clients).
pub struct InMemoryEventBus {
    sender: broadcast::Sender<Event>,
    history: RwLock<VecDeque<Event>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            history: RwLock::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
        }
    }

    pub fn history_for(&self, workflow_run_id: uuid::Uuid) -> Vec<Event> {
        self.history
            .read()
            .unwrap()
            .iter()
            .filter(|event| event.workflow_run_id == workflow_run_id)
            .cloned()
            .collect()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: Event) {
        {
            let mut history = self.history.write().unwrap();
            if history.len() == HISTORY_CAPACITY {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        // No active subscribers is not an error; the event is still recorded.
        let _ = self.sender.send(event);
    }

    fn subscribe(&self) -> InMemorySubscription {
        InMemorySubscription {
            receiver: self.sender.subscribe(),
        }
    }
}
