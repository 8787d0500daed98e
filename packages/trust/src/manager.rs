//! Trust Manager
//!
//! Sole owner of trust profile mutation. Consumes trust events, updates
//! component scores, re-derives the tier, freezes and unfreezes agents, and
//! publishes a notification for every state change. The circuit breaker
//! feeds back in through the same path: threshold breaches freeze the
//! agent, rollback breaches demote its tier.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use arbor_core::{
    ArborError, ArborConfig, Clock, SystemClock, TierResolver, TrustEvent, TrustEventBus,
    TrustEventType, TrustManagerConfig, TrustNotification, TrustTier,
};

use crate::breaker::{BreakerCategory, BreakerTrip, CircuitBreaker};
use crate::decay;
use crate::event_store::EventStore;
use crate::profile::{ProfileFilter, ProfileStore, TrustProfile};

type Metadata = HashMap<String, serde_json::Value>;

struct ManagerInner {
    profiles: ProfileStore,
    events: EventStore,
    bus: TrustEventBus,
    resolver: TierResolver,
    breaker: Option<CircuitBreaker>,
    config: TrustManagerConfig,
    decay_config: arbor_core::DecayConfig,
    clock: Arc<dyn Clock>,
}

/// Cheaply cloneable handle; all clones share state.
#[derive(Clone)]
pub struct TrustManager {
    inner: Arc<ManagerInner>,
}

impl TrustManager {
    pub fn new(config: &ArborConfig, clock: Arc<dyn Clock>) -> Self {
        let breaker = config
            .trust_manager
            .circuit_breaker_enabled
            .then(|| CircuitBreaker::new(config.circuit_breaker.clone(), clock.clone()));
        Self {
            inner: Arc::new(ManagerInner {
                profiles: ProfileStore::new(),
                events: EventStore::new(clock.clone()),
                bus: TrustEventBus::default(),
                resolver: TierResolver::new(config.tier_thresholds.clone()),
                breaker,
                config: config.trust_manager.clone(),
                decay_config: config.decay.clone(),
                clock,
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(&ArborConfig::default(), Arc::new(SystemClock))
    }

    pub fn bus(&self) -> &TrustEventBus {
        &self.inner.bus
    }

    pub fn event_store(&self) -> &EventStore {
        &self.inner.events
    }

    pub fn profile_store(&self) -> &ProfileStore {
        &self.inner.profiles
    }

    pub fn breaker(&self) -> Option<&CircuitBreaker> {
        self.inner.breaker.as_ref()
    }

    pub fn resolver(&self) -> &TierResolver {
        &self.inner.resolver
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Create a fresh profile for an agent.
    pub fn create_profile(&self, agent_id: &str) -> Result<TrustProfile, ArborError> {
        if agent_id.trim().is_empty() {
            return Err(ArborError::invalid_input("agent_id must be non-empty"));
        }
        if self.inner.profiles.contains(agent_id) {
            return Err(ArborError::AlreadyExists {
                entity: "profile",
                id: agent_id.to_string(),
            });
        }
        let profile = TrustProfile::new(agent_id, self.now());
        self.inner.profiles.store_profile(profile.clone());

        self.persist_event(
            agent_id,
            TrustEventType::ProfileCreated,
            None,
            Some(profile.trust_score),
            None,
            Some(profile.tier),
            None,
            Metadata::new(),
        );
        self.inner.bus.publish(
            TrustNotification::new(agent_id, TrustEventType::ProfileCreated)
                .with_meta("tier", json!(profile.tier.as_str())),
        );
        tracing::info!(agent_id = %agent_id, "Trust profile created");
        Ok(profile)
    }

    pub fn get_profile(&self, agent_id: &str) -> Result<TrustProfile, ArborError> {
        self.inner
            .profiles
            .get_profile(agent_id)
            .ok_or_else(|| ArborError::profile_not_found(agent_id))
    }

    pub fn list_profiles(
        &self,
        filter: &ProfileFilter,
        limit: Option<usize>,
    ) -> Vec<TrustProfile> {
        self.inner.profiles.list_profiles(filter, limit)
    }

    /// Delete a profile and announce it.
    pub fn delete_profile(&self, agent_id: &str) -> Result<(), ArborError> {
        let removed = self.inner.profiles.delete_profile(agent_id)?;
        self.persist_event(
            agent_id,
            TrustEventType::ProfileDeleted,
            Some(removed.trust_score),
            None,
            Some(removed.tier),
            None,
            None,
            Metadata::new(),
        );
        self.inner
            .bus
            .publish(TrustNotification::new(agent_id, TrustEventType::ProfileDeleted));
        tracing::info!(agent_id = %agent_id, "Trust profile deleted");
        Ok(())
    }

    /// Record a behavioral event. Fire-and-forget: failures are logged and
    /// swallowed, a missing profile is created inline before the event is
    /// applied (a direct state transition, never a call back into this
    /// handler).
    pub fn record_event(&self, agent_id: &str, event_type: TrustEventType, metadata: Metadata) {
        if agent_id.trim().is_empty() {
            tracing::warn!("Dropping trust event with empty agent_id");
            return;
        }
        if !self.inner.profiles.contains(agent_id) {
            if let Err(e) = self.create_profile(agent_id) {
                // Lost a race with a concurrent creator; that is fine.
                if !matches!(e, ArborError::AlreadyExists { .. }) {
                    tracing::warn!(agent_id = %agent_id, error = %e, "Auto-create failed, dropping event");
                    return;
                }
            }
        }
        if let Err(e) = self.apply_event(agent_id, event_type, metadata) {
            tracing::warn!(
                agent_id = %agent_id,
                event_type = event_type.as_str(),
                error = %e,
                "Failed to apply trust event"
            );
        }
    }

    /// Event types that update counters. Everything else is logged without
    /// touching the profile.
    fn has_counter_effect(event_type: TrustEventType) -> bool {
        matches!(
            event_type,
            TrustEventType::ActionSuccess
                | TrustEventType::ActionFailure
                | TrustEventType::TestPassed
                | TrustEventType::TestFailed
                | TrustEventType::SecurityViolation
                | TrustEventType::RollbackExecuted
                | TrustEventType::ImprovementApplied
                | TrustEventType::ProposalSubmitted
                | TrustEventType::ProposalApproved
                | TrustEventType::InstallationSuccess
                | TrustEventType::InstallationRollback
                | TrustEventType::TrustPointsAwarded
                | TrustEventType::TrustPointsDeducted
        )
    }

    fn apply_event(
        &self,
        agent_id: &str,
        event_type: TrustEventType,
        metadata: Metadata,
    ) -> Result<(), ArborError> {
        let now = self.now();
        let config = &self.inner.config;
        let points = &config.points;

        if !Self::has_counter_effect(event_type) {
            // No state change; the event is still logged and broadcast.
            let profile = self.get_profile(agent_id)?;
            self.persist_event(
                agent_id,
                event_type,
                Some(profile.trust_score),
                Some(profile.trust_score),
                Some(profile.tier),
                Some(profile.tier),
                None,
                metadata.clone(),
            );
            self.inner.bus.publish(TrustNotification {
                agent_id: agent_id.to_string(),
                event_type,
                metadata,
            });
            return Ok(());
        }

        let mut previous_score = 0;
        let mut previous_tier = TrustTier::Untrusted;
        let updated = self.inner.profiles.update_profile(agent_id, |p| {
            previous_score = p.trust_score;
            previous_tier = p.tier;

            match event_type {
                TrustEventType::ActionSuccess => {
                    p.total_actions += 1;
                    p.successful_actions += 1;
                }
                TrustEventType::ActionFailure => {
                    p.total_actions += 1;
                }
                TrustEventType::TestPassed => {
                    p.total_tests += 1;
                    p.tests_passed += 1;
                }
                TrustEventType::TestFailed => {
                    p.total_tests += 1;
                }
                TrustEventType::SecurityViolation => {
                    p.security_violations += 1;
                    p.security_score =
                        (p.security_score - config.security_penalty).max(config.security_floor);
                }
                TrustEventType::RollbackExecuted => {
                    p.rollback_count += 1;
                }
                TrustEventType::ImprovementApplied => {
                    p.improvement_count += 1;
                }
                TrustEventType::ProposalSubmitted => {
                    p.proposals_submitted += 1;
                }
                TrustEventType::ProposalApproved => {
                    p.proposals_approved += 1;
                    p.trust_points += points.proposal_approved;
                }
                TrustEventType::InstallationSuccess => {
                    p.installations_successful += 1;
                    let impact = metadata
                        .get("impact")
                        .and_then(|v| v.as_f64())
                        .unwrap_or(1.0);
                    p.trust_points += (points.installation_success as f64 * impact).round() as u64;
                }
                TrustEventType::InstallationRollback => {
                    p.installations_rolled_back += 1;
                    p.trust_points = p.trust_points.saturating_sub(points.installation_rollback);
                }
                TrustEventType::TrustPointsAwarded => {
                    let awarded = metadata.get("points").and_then(|v| v.as_u64()).unwrap_or(0);
                    p.trust_points += awarded;
                }
                TrustEventType::TrustPointsDeducted => {
                    let deducted = metadata.get("points").and_then(|v| v.as_u64()).unwrap_or(0);
                    p.trust_points = p.trust_points.saturating_sub(deducted);
                }
                // Administrative types carry no counter updates here; they
                // are still logged below.
                _ => {}
            }

            recompute(p, config, &self.inner.resolver);
            p.updated_at = now;
            p.last_activity_at = Some(now);
        })?;

        self.persist_event(
            agent_id,
            event_type,
            Some(previous_score),
            Some(updated.trust_score),
            Some(previous_tier),
            Some(updated.tier),
            None,
            metadata.clone(),
        );
        self.inner.bus.publish(TrustNotification {
            agent_id: agent_id.to_string(),
            event_type,
            metadata,
        });

        if updated.tier != previous_tier {
            self.announce_tier_change(agent_id, previous_tier, updated.tier, updated.trust_score, None);
        }

        self.feed_breaker(agent_id, event_type);
        Ok(())
    }

    fn feed_breaker(&self, agent_id: &str, event_type: TrustEventType) {
        let Some(breaker) = &self.inner.breaker else {
            return;
        };
        let category = match event_type {
            TrustEventType::ActionFailure => BreakerCategory::RapidFailure,
            TrustEventType::SecurityViolation => BreakerCategory::SecurityViolation,
            TrustEventType::RollbackExecuted => BreakerCategory::Rollback,
            TrustEventType::TestFailed => BreakerCategory::TestFailure,
            _ => return,
        };
        match breaker.record(agent_id, category) {
            None => {}
            Some(BreakerTrip::Freeze(category)) => {
                let reason = format!("circuit breaker: {} threshold breached", category.as_str());
                if let Err(e) = self.freeze(agent_id, &reason) {
                    tracing::warn!(agent_id = %agent_id, error = %e, "Breaker-driven freeze failed");
                }
            }
            Some(BreakerTrip::Demote) => {
                if let Err(e) = self.demote_tier(agent_id, "rollback threshold breached") {
                    tracing::warn!(agent_id = %agent_id, error = %e, "Breaker-driven demotion failed");
                }
            }
        }
    }

    /// Tier-gated authorization check.
    pub fn check_authorization(
        &self,
        agent_id: &str,
        required: TrustTier,
    ) -> Result<(), ArborError> {
        let profile = self.get_profile(agent_id)?;
        if profile.frozen {
            return Err(ArborError::TrustFrozen {
                agent_id: agent_id.to_string(),
                reason: profile
                    .frozen_reason
                    .unwrap_or_else(|| "frozen".to_string()),
            });
        }
        if !self.inner.resolver.sufficient(profile.tier, required) {
            return Err(ArborError::InsufficientTrust {
                agent_id: agent_id.to_string(),
                held: profile.tier,
                required,
            });
        }
        Ok(())
    }

    /// Freeze an agent. All non-read capabilities are revoked downstream.
    pub fn freeze(&self, agent_id: &str, reason: &str) -> Result<TrustProfile, ArborError> {
        let now = self.now();
        let updated = self.inner.profiles.update_profile(agent_id, |p| {
            p.frozen = true;
            p.frozen_reason = Some(reason.to_string());
            p.frozen_at = Some(now);
            p.updated_at = now;
        })?;
        self.persist_event(
            agent_id,
            TrustEventType::TrustFrozen,
            Some(updated.trust_score),
            Some(updated.trust_score),
            Some(updated.tier),
            Some(updated.tier),
            Some(reason.to_string()),
            Metadata::new(),
        );
        self.inner.bus.publish(
            TrustNotification::new(agent_id, TrustEventType::TrustFrozen)
                .with_meta("reason", json!(reason)),
        );
        tracing::warn!(agent_id = %agent_id, reason = %reason, "Agent frozen");
        Ok(updated)
    }

    /// Lift a freeze. Also resets the agent's circuit so the administrative
    /// decision takes effect immediately.
    pub fn unfreeze(&self, agent_id: &str) -> Result<TrustProfile, ArborError> {
        let now = self.now();
        let updated = self.inner.profiles.update_profile(agent_id, |p| {
            p.frozen = false;
            p.frozen_reason = None;
            p.frozen_at = None;
            p.updated_at = now;
        })?;
        if let Some(breaker) = &self.inner.breaker {
            breaker.reset(agent_id);
        }
        self.persist_event(
            agent_id,
            TrustEventType::TrustUnfrozen,
            Some(updated.trust_score),
            Some(updated.trust_score),
            Some(updated.tier),
            Some(updated.tier),
            None,
            Metadata::new(),
        );
        self.inner.bus.publish(
            TrustNotification::new(agent_id, TrustEventType::TrustUnfrozen)
                .with_meta("tier", json!(updated.tier.as_str())),
        );
        tracing::info!(agent_id = %agent_id, "Agent unfrozen");
        Ok(updated)
    }

    /// Recompute the composite score from stored counters.
    pub fn calculate_score(&self, agent_id: &str) -> Result<u32, ArborError> {
        let now = self.now();
        let mut previous_tier = TrustTier::Untrusted;
        let updated = self.inner.profiles.update_profile(agent_id, |p| {
            previous_tier = p.tier;
            recompute(p, &self.inner.config, &self.inner.resolver);
            p.updated_at = now;
        })?;
        if updated.tier != previous_tier {
            self.announce_tier_change(agent_id, previous_tier, updated.tier, updated.trust_score, None);
        }
        Ok(updated.trust_score)
    }

    /// Administrative tier override (council decisions, operator action).
    /// Aligns the score with the target tier's minimum.
    pub fn set_tier(&self, agent_id: &str, tier: TrustTier) -> Result<TrustProfile, ArborError> {
        let now = self.now();
        let resolver = &self.inner.resolver;
        let mut previous_tier = TrustTier::Untrusted;
        let updated = self.inner.profiles.update_profile(agent_id, |p| {
            previous_tier = p.tier;
            p.tier = tier;
            p.trust_score = resolver.min_score(tier).max(p.trust_score.min(resolver.max_score(tier)));
            p.updated_at = now;
        })?;
        if previous_tier != tier {
            self.announce_tier_change(
                agent_id,
                previous_tier,
                tier,
                updated.trust_score,
                Some("administrative override"),
            );
        }
        Ok(updated)
    }

    /// Demote one tier (floor at untrusted), clamping the score into the
    /// demoted band so score and tier stay consistent.
    pub fn demote_tier(&self, agent_id: &str, reason: &str) -> Result<TrustProfile, ArborError> {
        let resolver = &self.inner.resolver;
        let now = self.now();
        let mut previous_tier = TrustTier::Untrusted;
        let mut demoted_to: Option<TrustTier> = None;
        let updated = self.inner.profiles.update_profile(agent_id, |p| {
            previous_tier = p.tier;
            if let Some(lower) = resolver.previous_tier(p.tier) {
                p.tier = lower;
                p.trust_score = p.trust_score.min(resolver.max_score(lower));
                p.updated_at = now;
                demoted_to = Some(lower);
            }
        })?;
        if let Some(new_tier) = demoted_to {
            self.announce_tier_change(
                agent_id,
                previous_tier,
                new_tier,
                updated.trust_score,
                Some(reason),
            );
            tracing::warn!(
                agent_id = %agent_id,
                from = previous_tier.as_str(),
                to = new_tier.as_str(),
                reason = %reason,
                "Agent demoted"
            );
        }
        Ok(updated)
    }

    /// One decay pass over every profile. Returns how many decayed.
    pub fn run_decay_check(&self) -> usize {
        if !self.inner.config.decay_enabled || !self.inner.decay_config.enabled {
            return 0;
        }
        let now = self.now();
        let config = &self.inner.decay_config;
        let mut decayed_count = 0;
        for agent_id in self.inner.profiles.agent_ids() {
            let Some(profile) = self.inner.profiles.get_profile(&agent_id) else {
                continue;
            };
            let days_inactive = profile.days_inactive(now);
            let Some(new_score) = decay::apply_decay(&profile, days_inactive, config) else {
                continue;
            };
            let resolver = &self.inner.resolver;
            let mut previous_tier = profile.tier;
            let previous_score = profile.trust_score;
            let update = self.inner.profiles.update_profile(&agent_id, |p| {
                previous_tier = p.tier;
                p.trust_score = new_score;
                p.tier = resolver.resolve(new_score);
                // Decay is not agent activity; only updated_at moves.
                p.updated_at = now;
            });
            let Ok(updated) = update else { continue };
            decayed_count += 1;

            self.persist_event(
                &agent_id,
                TrustEventType::TrustDecayed,
                Some(previous_score),
                Some(new_score),
                Some(previous_tier),
                Some(updated.tier),
                Some(format!("{days_inactive} days inactive")),
                Metadata::new(),
            );
            self.inner.bus.publish(
                TrustNotification::new(&agent_id, TrustEventType::TrustDecayed)
                    .with_meta("previous_score", json!(previous_score))
                    .with_meta("new_score", json!(new_score)),
            );
            if updated.tier != previous_tier {
                self.announce_tier_change(
                    &agent_id,
                    previous_tier,
                    updated.tier,
                    new_score,
                    Some("trust decay"),
                );
            }
            tracing::info!(
                agent_id = %agent_id,
                previous_score,
                new_score,
                days_inactive,
                "Trust decayed"
            );
        }
        decayed_count
    }

    fn announce_tier_change(
        &self,
        agent_id: &str,
        old_tier: TrustTier,
        new_tier: TrustTier,
        score: u32,
        reason: Option<&str>,
    ) {
        let mut metadata = Metadata::new();
        metadata.insert("old_tier".into(), json!(old_tier.as_str()));
        metadata.insert("new_tier".into(), json!(new_tier.as_str()));
        self.persist_event(
            agent_id,
            TrustEventType::TierChanged,
            Some(score),
            Some(score),
            Some(old_tier),
            Some(new_tier),
            reason.map(str::to_string),
            metadata.clone(),
        );
        self.inner.bus.publish(TrustNotification {
            agent_id: agent_id.to_string(),
            event_type: TrustEventType::TierChanged,
            metadata,
        });
        tracing::info!(
            agent_id = %agent_id,
            from = old_tier.as_str(),
            to = new_tier.as_str(),
            "Tier changed"
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn persist_event(
        &self,
        agent_id: &str,
        event_type: TrustEventType,
        previous_score: Option<u32>,
        new_score: Option<u32>,
        previous_tier: Option<TrustTier>,
        new_tier: Option<TrustTier>,
        reason: Option<String>,
        metadata: Metadata,
    ) {
        if !self.inner.config.event_store_enabled {
            return;
        }
        let mut event = TrustEvent::new(agent_id, event_type, self.now());
        event.previous_score = previous_score;
        event.new_score = new_score;
        event.previous_tier = previous_tier;
        event.new_tier = new_tier;
        event.reason = reason;
        event.metadata = metadata;
        self.inner.events.store_event(event);
    }
}

/// Recompute component scores and the weighted composite from counters.
fn recompute(p: &mut TrustProfile, config: &TrustManagerConfig, resolver: &TierResolver) {
    if p.total_actions > 0 {
        p.success_rate_score = p.successful_actions as f64 / p.total_actions as f64 * 100.0;
    }
    if p.total_tests > 0 {
        p.test_pass_score = p.tests_passed as f64 / p.total_tests as f64 * 100.0;
    }
    p.rollback_score = if p.improvement_count > 0 {
        let ratio = 100.0 * p.rollback_count as f64 / p.improvement_count as f64;
        100.0 - ratio.min(100.0)
    } else {
        100.0
    };

    let w = &config.weights;
    let composite = w.success_rate * p.success_rate_score
        + w.uptime * p.uptime_score
        + w.security * p.security_score
        + w.test_pass * p.test_pass_score
        + w.rollback * p.rollback_score;
    p.trust_score = composite.round().clamp(0.0, 100.0) as u32;
    p.tier = resolver.resolve(p.trust_score);
}
