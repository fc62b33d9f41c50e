//! Assistant event system: decoupled notification of the rest of the shell.
//!
//! The orchestration loop publishes lifecycle events as a turn progresses.
//! Voice output, logging and UI subscribe without the loop knowing about
//! them. Delivery is fire-and-forget: publishing never blocks and never fails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::value::Value;

/// All events the assistant core emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AssistantEvent {
    /// A function call is about to be dispatched
    FunctionCallStarted {
        call_id: String,
        name: String,
        args: serde_json::Value,
    },

    /// A function call succeeded
    FunctionCallCompleted {
        call_id: String,
        name: String,
        result: Value,
    },

    /// A function call failed (unknown function, bad arguments, handler error, timeout)
    FunctionCallFailed {
        call_id: String,
        name: String,
        error: String,
    },

    /// The answer for the current user turn is ready
    FinalAnswer { text: String },

    /// The model kept requesting calls past the round-trip limit
    LoopLimitExceeded { partial_text: String },

    /// A stored reminder fell due
    ReminderTriggered {
        id: String,
        title: String,
        description: Option<String>,
        due_at: DateTime<Utc>,
    },

    /// A turn terminated on a gateway failure
    TurnFailed { turn_id: String, error: String },
}

impl AssistantEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::FunctionCallStarted { .. } => EventKind::FunctionCallStarted,
            Self::FunctionCallCompleted { .. } => EventKind::FunctionCallCompleted,
            Self::FunctionCallFailed { .. } => EventKind::FunctionCallFailed,
            Self::FinalAnswer { .. } => EventKind::FinalAnswer,
            Self::LoopLimitExceeded { .. } => EventKind::LoopLimitExceeded,
            Self::ReminderTriggered { .. } => EventKind::ReminderTriggered,
            Self::TurnFailed { .. } => EventKind::TurnFailed,
        }
    }
}

/// Payload-free tag of an [`AssistantEvent`], used for filtered subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    FunctionCallStarted,
    FunctionCallCompleted,
    FunctionCallFailed,
    FinalAnswer,
    LoopLimitExceeded,
    ReminderTriggered,
    TurnFailed,
}

/// A broadcast-based event bus.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Cloning the bus
/// yields another handle to the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<AssistantEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: AssistantEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to every event.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            kinds: None,
        }
    }

    /// Subscribe to the given kinds only.
    pub fn subscribe_to(&self, kinds: &[EventKind]) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            kinds: Some(kinds.to_vec()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Run `callback` on its own task for every matching event until the bus
    /// is dropped. Callbacks on the same listener run one at a time.
    pub fn spawn_listener<F, Fut>(&self, kinds: &[EventKind], callback: F) -> JoinHandle<()>
    where
        F: Fn(Arc<AssistantEvent>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut subscription = self.subscribe_to(kinds);
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                callback(event).await;
            }
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// A receiver, optionally filtered by event kind.
pub struct Subscription {
    receiver: broadcast::Receiver<Arc<AssistantEvent>>,
    kinds: Option<Vec<EventKind>>,
}

impl Subscription {
    /// Next matching event, or `None` once every bus handle is dropped.
    ///
    /// A subscriber that falls behind skips the events it missed.
    pub async fn recv(&mut self) -> Option<Arc<AssistantEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv): drains until a matching
    /// event or an empty channel.
    pub fn try_recv(&mut self) -> Option<Arc<AssistantEvent>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged, events dropped");
                }
                Err(_) => return None,
            }
        }
    }

    fn matches(&self, event: &AssistantEvent) -> bool {
        self.kinds
            .as_ref()
            .is_none_or(|kinds| kinds.contains(&event.kind()))
    }
}
