//! Domain event system: decoupled observation of a research session.
//!
//! The orchestrator publishes events as the loop advances; tests and the
//! CLI subscribe to audit state transitions, drift ticks and delegation
//! decisions without coupling to the loop itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// The loop moved between states
    StateChanged {
        session_id: String,
        from: String,
        to: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed (after retries)
    ToolExecuted {
        tool_name: String,
        success: bool,
        attempts: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The drift monitor produced a tick for a turn
    DriftMeasured {
        turn: u32,
        similarity: f64,
        recommendation: String,
        compression_ratio: f64,
        verify_k: usize,
        timestamp: DateTime<Utc>,
    },

    /// The delegation policy allowed or denied a call
    DelegationDecided {
        agent: String,
        allowed: bool,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// The verifier gate processed a batch of claims
    ClaimsVerified {
        turn: u32,
        accepted: usize,
        rejected: usize,
        timestamp: DateTime<Utc>,
    },

    /// The session reached a terminal state
    SessionFinished {
        session_id: String,
        answered: bool,
        turns: u32,
        tool_calls: u32,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::DriftMeasured {
            turn: 2,
            similarity: 0.4,
            recommendation: "increase_compression".into(),
            compression_ratio: 0.4,
            verify_k: 3,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::DriftMeasured { turn, verify_k, .. } => {
                assert_eq!(*turn, 2);
                assert_eq!(*verify_k, 3);
            }
            _ => panic!("Expected DriftMeasured event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::DelegationDecided {
            agent: "summarizer".into(),
            allowed: false,
            reason: Some("budget_exhausted".into()),
            timestamp: Utc::now(),
        });
    }
}
