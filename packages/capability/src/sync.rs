//! Capability Sync
//!
//! Subscribes to trust notifications and reconciles each agent's
//! capability set: grants on creation and promotion, revokes on demotion
//! and freezes, re-syncs on unfreeze. Handler failures are logged and
//! swallowed; the notification pipeline must keep flowing.

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;

use arbor_core::{TrustEventType, TrustNotification, TrustTier};
use arbor_trust::ProfileFilter;

use crate::policy::Policy;

const MAX_SUBSCRIBE_ATTEMPTS: u32 = 10;

/// Trust-to-capability reconciler.
#[derive(Clone)]
pub struct CapabilitySync {
    policy: Policy,
}

impl CapabilitySync {
    pub fn new(policy: Policy) -> Self {
        Self { policy }
    }

    /// Apply one notification. Never propagates errors.
    pub fn handle(&self, notification: &TrustNotification) {
        let agent_id = notification.agent_id.as_str();
        let result = match notification.event_type {
            TrustEventType::ProfileCreated => {
                let tier = notification
                    .metadata
                    .get("tier")
                    .and_then(|v| v.as_str())
                    .and_then(TrustTier::parse)
                    .unwrap_or(TrustTier::Untrusted);
                self.policy
                    .grant_tier_capabilities(agent_id, tier)
                    .map(|_| ())
            }
            TrustEventType::TierChanged => self.apply_tier_transition(notification),
            TrustEventType::TrustFrozen => {
                self.policy.revoke_non_readonly(agent_id);
                Ok(())
            }
            TrustEventType::TrustUnfrozen => self.resync_agent(agent_id),
            TrustEventType::ProfileDeleted => {
                self.policy.revoke_agent_capabilities(agent_id);
                Ok(())
            }
            // Anything else that still carries a tier transition is treated
            // like a tier change
            _ if notification.tier_transition().is_some() => {
                self.apply_tier_transition(notification)
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            tracing::warn!(
                agent_id = %agent_id,
                event_type = notification.event_type.as_str(),
                error = %e,
                "Capability sync handler failed"
            );
        }
    }

    fn apply_tier_transition(
        &self,
        notification: &TrustNotification,
    ) -> Result<(), arbor_core::ArborError> {
        let agent_id = notification.agent_id.as_str();
        match notification.tier_transition() {
            Some((old, new)) if old != new => self
                .policy
                .sync_capabilities(agent_id, old, new)
                .map(|_| ()),
            Some(_) => Ok(()),
            None => self.resync_agent(agent_id),
        }
    }

    /// Re-sync one agent to its current tier.
    pub fn resync_agent(&self, agent_id: &str) -> Result<(), arbor_core::ArborError> {
        let profile = self.policy.trust().get_profile(agent_id)?;
        if profile.frozen {
            self.policy.revoke_non_readonly(agent_id);
            return Ok(());
        }
        self.policy
            .sync_capabilities(agent_id, profile.tier, profile.tier)
            .map(|_| ())
    }

    /// Re-sync every known agent. Used after missed notifications.
    pub fn resync_all(&self) {
        for profile in self
            .policy
            .trust()
            .list_profiles(&ProfileFilter::default(), None)
        {
            if let Err(e) = self.resync_agent(&profile.agent_id) {
                tracing::warn!(agent_id = %profile.agent_id, error = %e, "Resync failed");
            }
        }
    }

    /// Subscribe to the trust bus and reconcile until shutdown. If the bus
    /// goes away, resubscription retries with exponential backoff up to
    /// [`MAX_SUBSCRIBE_ATTEMPTS`], then the task drops to standalone mode
    /// (explicit `resync_*` calls only).
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        // Subscribe before the task is scheduled so no notification
        // published right after spawn is missed.
        let mut rx = self.policy.trust().bus().subscribe();
        tokio::spawn(async move {
            let mut attempts: u32 = 0;
            loop {
                tokio::select! {
                    result = rx.recv() => match result {
                        Ok(notification) => {
                            attempts = 0;
                            self.handle(&notification);
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Missed trust notifications, resyncing from stores");
                            self.resync_all();
                        }
                        Err(RecvError::Closed) => {
                            attempts += 1;
                            if attempts > MAX_SUBSCRIBE_ATTEMPTS {
                                tracing::warn!(
                                    attempts,
                                    "Trust bus unavailable, capability sync entering standalone mode"
                                );
                                break;
                            }
                            let backoff =
                                std::time::Duration::from_millis(100u64 << attempts.min(6));
                            tokio::time::sleep(backoff).await;
                            rx = self.policy.trust().bus().subscribe();
                        }
                    },
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::SystemAuthority;
    use crate::matrix::ConfirmationMatrix;
    use crate::store::CapabilityStore;
    use crate::templates::CapabilityTemplates;
    use crate::tracker::ConfirmationTracker;
    use arbor_trust::TrustManager;
    use serde_json::json;
    use std::sync::Arc;

    fn sync() -> CapabilitySync {
        let trust = TrustManager::with_defaults();
        let store = CapabilityStore::with_authority(Arc::new(SystemAuthority::new()));
        let policy = Policy::new(
            store,
            CapabilityTemplates::builtin(),
            ConfirmationMatrix::standard(),
            ConfirmationTracker::default(),
            trust,
        );
        CapabilitySync::new(policy)
    }

    fn notification(
        agent: &str,
        event_type: TrustEventType,
        meta: &[(&str, &str)],
    ) -> TrustNotification {
        let mut n = TrustNotification::new(agent, event_type);
        for (k, v) in meta {
            n.metadata.insert(k.to_string(), json!(v));
        }
        n
    }

    #[test]
    fn test_profile_created_grants_tier_template() {
        let sync = sync();
        sync.policy.trust().create_profile("agent-a").unwrap();
        sync.handle(&notification(
            "agent-a",
            TrustEventType::ProfileCreated,
            &[("tier", "untrusted")],
        ));
        assert_eq!(sync.policy.store().list_capabilities("agent-a").len(), 2);
    }

    #[test]
    fn test_tier_changed_resyncs() {
        let sync = sync();
        sync.policy.trust().create_profile("agent-a").unwrap();
        sync.policy
            .grant_tier_capabilities("agent-a", TrustTier::Untrusted)
            .unwrap();

        sync.handle(&notification(
            "agent-a",
            TrustEventType::TierChanged,
            &[("old_tier", "untrusted"), ("new_tier", "trusted")],
        ));
        let expected = sync
            .policy
            .templates()
            .capabilities_for_tier(TrustTier::Trusted)
            .len();
        assert_eq!(sync.policy.store().list_capabilities("agent-a").len(), expected);
    }

    #[test]
    fn test_freeze_revokes_writes_unfreeze_restores() {
        let sync = sync();
        sync.policy.trust().create_profile("agent-a").unwrap();
        sync.policy.trust().set_tier("agent-a", TrustTier::Trusted).unwrap();
        sync.policy
            .grant_tier_capabilities("agent-a", TrustTier::Trusted)
            .unwrap();
        assert!(sync.policy.allowed("agent-a", "arbor://code/write/agent-a/x"));

        sync.handle(&notification("agent-a", TrustEventType::TrustFrozen, &[("reason", "incident")]));
        assert!(!sync.policy.allowed("agent-a", "arbor://code/write/agent-a/x"));
        assert!(sync.policy.allowed("agent-a", "arbor://code/read/agent-a/x"));

        // Freeze flag cleared before the unfreeze notification arrives
        sync.policy.trust().freeze("agent-a", "incident").unwrap();
        sync.policy.trust().unfreeze("agent-a").unwrap();
        sync.handle(&notification("agent-a", TrustEventType::TrustUnfrozen, &[]));
        assert!(sync.policy.allowed("agent-a", "arbor://code/write/agent-a/x"));
    }

    #[test]
    fn test_unknown_event_with_tiers_treated_as_change() {
        let sync = sync();
        sync.policy.trust().create_profile("agent-a").unwrap();
        sync.handle(&notification(
            "agent-a",
            TrustEventType::TrustDecayed,
            &[("old_tier", "trusted"), ("new_tier", "probationary")],
        ));
        let expected = sync
            .policy
            .templates()
            .capabilities_for_tier(TrustTier::Probationary)
            .len();
        assert_eq!(sync.policy.store().list_capabilities("agent-a").len(), expected);
    }

    #[test]
    fn test_handler_failure_does_not_panic() {
        let sync = sync();
        // No profile exists: the unfreeze path fails internally, and the
        // handler must swallow it
        sync.handle(&notification("ghost", TrustEventType::TrustUnfrozen, &[]));
        assert!(sync.policy.store().list_capabilities("ghost").is_empty());
    }

    #[tokio::test]
    async fn test_spawned_sync_follows_bus() {
        let sync = sync();
        let policy = sync.policy.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = sync.spawn(shutdown_rx);

        policy.trust().create_profile("agent-a").unwrap();
        // Give the subscriber task a chance to drain the notification
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            if !policy.store().list_capabilities("agent-a").is_empty() {
                break;
            }
        }
        assert_eq!(policy.store().list_capabilities("agent-a").len(), 2);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
