//! Trust Event Bus
//!
//! In-process broadcast of trust notifications (topic `trust_event`).
//! Delivery is at-least-once to currently attached subscribers; a
//! subscriber that lags or restarts re-syncs from the stores.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::broadcast;

use crate::event::TrustEventType;
use crate::tier::TrustTier;

/// Notification payload broadcast for every trust state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustNotification {
    /// Agent the notification concerns
    pub agent_id: String,
    /// What happened
    pub event_type: TrustEventType,
    /// Structured metadata; carries `old_tier`/`new_tier` for tier changes,
    /// `reason` for freezes, `tier` for profile creation
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TrustNotification {
    pub fn new(agent_id: impl Into<String>, event_type: TrustEventType) -> Self {
        Self {
            agent_id: agent_id.into(),
            event_type,
            metadata: HashMap::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Tier transition carried in metadata, when present.
    pub fn tier_transition(&self) -> Option<(TrustTier, TrustTier)> {
        let old = self
            .metadata
            .get("old_tier")
            .and_then(|v| v.as_str())
            .and_then(TrustTier::parse)?;
        let new = self
            .metadata
            .get("new_tier")
            .and_then(|v| v.as_str())
            .and_then(TrustTier::parse)?;
        Some((old, new))
    }
}

/// Handle to the trust-event broadcast channel.
///
/// Cloning is cheap; all clones publish to the same channel.
#[derive(Debug, Clone)]
pub struct TrustEventBus {
    sender: broadcast::Sender<TrustNotification>,
}

impl Default for TrustEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl TrustEventBus {
    /// Create a bus with the given per-subscriber buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a notification. Lack of subscribers is not an error.
    pub fn publish(&self, notification: TrustNotification) {
        let receivers = self.sender.receiver_count();
        if self.sender.send(notification.clone()).is_err() {
            tracing::debug!(
                agent_id = %notification.agent_id,
                event_type = notification.event_type.as_str(),
                "No subscribers for trust notification"
            );
        } else {
            tracing::trace!(
                agent_id = %notification.agent_id,
                event_type = notification.event_type.as_str(),
                receivers,
                "Trust notification published"
            );
        }
    }

    /// Attach a new subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<TrustNotification> {
        self.sender.subscribe()
    }

    /// Number of currently attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = TrustEventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(
            TrustNotification::new("agent-1", TrustEventType::TierChanged)
                .with_meta("old_tier", serde_json::json!("untrusted"))
                .with_meta("new_tier", serde_json::json!("trusted")),
        );

        let received = rx.recv().await.unwrap();
        assert_eq!(received.agent_id, "agent-1");
        assert_eq!(
            received.tier_transition(),
            Some((TrustTier::Untrusted, TrustTier::Trusted))
        );
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = TrustEventBus::default();
        bus.publish(TrustNotification::new("agent-1", TrustEventType::ActionSuccess));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_per_agent_ordering() {
        let bus = TrustEventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(TrustNotification::new("agent-1", TrustEventType::ProfileCreated));
        bus.publish(TrustNotification::new("agent-1", TrustEventType::TierChanged));

        assert_eq!(rx.recv().await.unwrap().event_type, TrustEventType::ProfileCreated);
        assert_eq!(rx.recv().await.unwrap().event_type, TrustEventType::TierChanged);
    }
}
