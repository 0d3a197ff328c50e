//! Breaker lifecycle events
//!
//! Every breaker owns a broadcast channel. Subscribers receive a clone of
//! each event; a breaker with no subscribers drops events silently.

use crate::circuit_breaker::CircuitState;
use serde::Serialize;
use tokio::sync::broadcast;

/// Capacity of each breaker's event channel. Slow subscribers lag and
/// observe `RecvError::Lagged` rather than blocking the breaker.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Observable breaker event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum BreakerEvent {
    /// The breaker moved between states
    StateChange {
        from: CircuitState,
        to: CircuitState,
    },
    /// A protected call succeeded
    Success,
    /// A protected call failed with a counted failure
    Failure { error: String },
    /// The breaker tripped
    Open,
    /// The breaker recovered
    Close,
    /// The cooldown elapsed and the breaker is probing
    HalfOpen,
    /// A call was short-circuited to the fallback
    Fallback,
}

/// Sending half shared by a breaker and its reset timer
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    name: String,
    sender: broadcast::Sender<BreakerEvent>,
}

impl EventBus {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            name: name.into(),
            sender,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn emit(&self, event: BreakerEvent) {
        match &event {
            BreakerEvent::StateChange { from, to } => {
                tracing::info!(breaker = %self.name, %from, %to, "circuit state changed");
            }
            BreakerEvent::Open => {
                tracing::warn!(breaker = %self.name, "circuit opened");
            }
            BreakerEvent::Failure { error } => {
                tracing::debug!(breaker = %self.name, %error, "counted failure");
            }
            BreakerEvent::Fallback => {
                tracing::debug!(breaker = %self.name, "call short-circuited");
            }
            other => {
                tracing::trace!(breaker = %self.name, event = ?other, "breaker event");
            }
        }

        // No receivers is the common case
        let _ = self.sender.send(event);
    }
}
