//! # Fleetsim Events
//!
//! In-process publish/subscribe keyed by event type string. Handlers run in
//! their own tasks; publishing never waits for them. A bounded history of
//! recent events backs the admin event-tail endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Maximum number of events retained for the tail endpoint
const MAX_EVENT_HISTORY: usize = 1000;

/// Well-known event type names used across the workspace
pub mod topics {
    pub const CHARGER_STATUS_CHANGED: &str = "charger.status.changed";
    pub const CHARGER_STOPPED: &str = "charger.stopped";
    pub const CHARGER_BOOT_SENT: &str = "charger.boot_notification.sent";
    pub const TRANSACTION_STARTED: &str = "charger.transaction.started";
    pub const TRANSACTION_STOPPED: &str = "charger.transaction.stopped";
    pub const SIMULATION_STARTED: &str = "simulation.started";
    pub const SIMULATION_STOPPED: &str = "simulation.stopped";
    pub const CHAOS_INJECTED: &str = "chaos.injected";
    pub const FLOW_EXPECTATION_FAILED: &str = "flow.expectation.failed";
}

/// A system event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Dotted event type, e.g. "charger.transaction.started"
    #[serde(rename = "type")]
    pub event_type: String,
    /// Charger the event relates to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charger_id: Option<String>,
    /// Free-form payload
    pub data: serde_json::Value,
    /// When the event was published
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            charger_id: None,
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn for_charger(
        event_type: impl Into<String>,
        charger_id: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            charger_id: Some(charger_id.into()),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Result returned by event handlers; errors are logged and dropped
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type BoxedHandler =
    Arc<dyn Fn(Event) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>> + Send + Sync>;

/// Token identifying one subscription, required for unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// In-memory event bus
pub struct EventBus {
    handlers: RwLock<HashMap<String, Vec<(SubscriptionId, BoxedHandler)>>>,
    history: RwLock<VecDeque<Event>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::with_capacity(MAX_EVENT_HISTORY)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler for one event type
    pub async fn subscribe<F, Fut>(&self, event_type: &str, handler: F) -> SubscriptionId
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let boxed: BoxedHandler = Arc::new(move |event| Box::pin(handler(event)));

        let mut handlers = self.handlers.write().await;
        handlers
            .entry(event_type.to_string())
            .or_default()
            .push((id, boxed));
        id
    }

    /// Remove a previously registered handler
    pub async fn unsubscribe(&self, event_type: &str, id: SubscriptionId) {
        let mut handlers = self.handlers.write().await;
        if let Some(list) = handlers.get_mut(event_type) {
            list.retain(|(sub_id, _)| *sub_id != id);
            if list.is_empty() {
                handlers.remove(event_type);
            }
        }
    }

    /// Publish an event; handlers run fire-and-forget in spawned tasks
    pub async fn publish(&self, event: Event) {
        debug!(event_type = %event.event_type, "publishing event");

        {
            let mut history = self.history.write().await;
            if history.len() >= MAX_EVENT_HISTORY {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        let matched: Vec<BoxedHandler> = {
            let handlers = self.handlers.read().await;
            handlers
                .get(&event.event_type)
                .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };

        for handler in matched {
            let event = event.clone();
            tokio::spawn(async move {
                let event_type = event.event_type.clone();
                if let Err(err) = handler(event).await {
                    warn!(%event_type, error = %err, "event handler failed");
                }
            });
        }
    }

    /// Most recent events, oldest first, at most `count`
    pub async fn recent(&self, count: usize) -> Vec<Event> {
        let history = self.history.read().await;
        history
            .iter()
            .rev()
            .take(count)
            .rev()
            .cloned()
            .collect()
    }

    /// Total events published since startup or the last close
    pub async fn history_len(&self) -> usize {
        self.history.read().await.len()
    }

    /// Drop every handler and clear the history
    pub async fn close(&self) {
        self.handlers.write().await.clear();
        self.history.write().await.clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
