//! Trust Profiles and the Profile Store
//!
//! One profile per agent, exclusively owned by the trust manager. The store
//! is the durable index; reads hand out cloned snapshots.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arbor_core::{ArborError, TrustTier};

/// Behavioral profile of a single agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustProfile {
    /// Stable agent identifier
    pub agent_id: String,
    /// Composite score (0-100)
    pub trust_score: u32,
    /// Tier derived from the score
    pub tier: TrustTier,

    // Component scores (0-100)
    pub success_rate_score: f64,
    pub uptime_score: f64,
    pub security_score: f64,
    pub test_pass_score: f64,
    pub rollback_score: f64,

    // Counters
    pub total_actions: u64,
    pub successful_actions: u64,
    pub security_violations: u64,
    pub total_tests: u64,
    pub tests_passed: u64,
    pub rollback_count: u64,
    pub improvement_count: u64,
    pub trust_points: u64,
    pub proposals_submitted: u64,
    pub proposals_approved: u64,
    pub installations_successful: u64,
    pub installations_rolled_back: u64,

    // Freeze state
    pub frozen: bool,
    pub frozen_reason: Option<String>,
    pub frozen_at: Option<DateTime<Utc>>,

    // Timestamps
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl TrustProfile {
    /// Fresh profile: full marks on security and rollback, zero elsewhere.
    pub fn new(agent_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            agent_id: agent_id.into(),
            trust_score: 0,
            tier: TrustTier::Untrusted,
            success_rate_score: 0.0,
            uptime_score: 0.0,
            security_score: 100.0,
            test_pass_score: 0.0,
            rollback_score: 100.0,
            total_actions: 0,
            successful_actions: 0,
            security_violations: 0,
            total_tests: 0,
            tests_passed: 0,
            rollback_count: 0,
            improvement_count: 0,
            trust_points: 0,
            proposals_submitted: 0,
            proposals_approved: 0,
            installations_successful: 0,
            installations_rolled_back: 0,
            frozen: false,
            frozen_reason: None,
            frozen_at: None,
            created_at: now,
            updated_at: now,
            last_activity_at: None,
        }
    }

    /// Days since the agent last did anything (creation counts as activity).
    pub fn days_inactive(&self, now: DateTime<Utc>) -> i64 {
        let last = self.last_activity_at.unwrap_or(self.created_at);
        (now - last).num_days()
    }
}

/// Filter for profile listings.
#[derive(Debug, Clone, Default)]
pub struct ProfileFilter {
    pub tier: Option<TrustTier>,
    pub frozen: Option<bool>,
}

/// Store-level cache counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub deletes: u64,
    pub size: usize,
    pub memory_bytes: u64,
}

/// Durable index of trust profiles.
///
/// Cloning shares the underlying map; all mutation goes through the write
/// lock, readers get consistent snapshots.
#[derive(Debug, Clone, Default)]
pub struct ProfileStore {
    profiles: Arc<RwLock<HashMap<String, TrustProfile>>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    writes: Arc<AtomicU64>,
    deletes: Arc<AtomicU64>,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a profile.
    pub fn store_profile(&self, profile: TrustProfile) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.profiles
            .write()
            .insert(profile.agent_id.clone(), profile);
    }

    /// Snapshot of a profile, if present.
    pub fn get_profile(&self, agent_id: &str) -> Option<TrustProfile> {
        let found = self.profiles.read().get(agent_id).cloned();
        match found {
            Some(p) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(p)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// True if a profile exists, without touching hit/miss counters.
    pub fn contains(&self, agent_id: &str) -> bool {
        self.profiles.read().contains_key(agent_id)
    }

    /// Atomic read-modify-write. Returns the updated snapshot.
    pub fn update_profile<F>(&self, agent_id: &str, mutate: F) -> Result<TrustProfile, ArborError>
    where
        F: FnOnce(&mut TrustProfile),
    {
        let mut profiles = self.profiles.write();
        let profile = profiles
            .get_mut(agent_id)
            .ok_or_else(|| ArborError::profile_not_found(agent_id))?;
        mutate(profile);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(profile.clone())
    }

    /// Remove a profile. Returns the removed snapshot.
    pub fn delete_profile(&self, agent_id: &str) -> Result<TrustProfile, ArborError> {
        let removed = self
            .profiles
            .write()
            .remove(agent_id)
            .ok_or_else(|| ArborError::profile_not_found(agent_id))?;
        self.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(removed)
    }

    /// List profiles matching a filter, sorted by score descending.
    pub fn list_profiles(&self, filter: &ProfileFilter, limit: Option<usize>) -> Vec<TrustProfile> {
        let profiles = self.profiles.read();
        let mut matched: Vec<TrustProfile> = profiles
            .values()
            .filter(|p| filter.tier.map_or(true, |t| p.tier == t))
            .filter(|p| filter.frozen.map_or(true, |f| p.frozen == f))
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            b.trust_score
                .cmp(&a.trust_score)
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });
        if let Some(limit) = limit {
            matched.truncate(limit);
        }
        matched
    }

    /// All agent ids currently indexed.
    pub fn agent_ids(&self) -> Vec<String> {
        self.profiles.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.read().is_empty()
    }

    /// Cache counters plus a coarse memory estimate.
    pub fn cache_stats(&self) -> CacheStats {
        let profiles = self.profiles.read();
        let memory_bytes = profiles
            .iter()
            .map(|(k, v)| {
                (std::mem::size_of::<TrustProfile>()
                    + k.len()
                    + v.agent_id.len()
                    + v.frozen_reason.as_ref().map_or(0, String::len)) as u64
            })
            .sum();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            size: profiles.len(),
            memory_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(agent_id: &str, score: u32, tier: TrustTier) -> TrustProfile {
        let mut p = TrustProfile::new(agent_id, Utc::now());
        p.trust_score = score;
        p.tier = tier;
        p
    }

    #[test]
    fn test_new_profile_defaults() {
        let p = TrustProfile::new("agent-1", Utc::now());
        assert_eq!(p.trust_score, 0);
        assert_eq!(p.tier, TrustTier::Untrusted);
        assert_eq!(p.security_score, 100.0);
        assert_eq!(p.rollback_score, 100.0);
        assert_eq!(p.success_rate_score, 0.0);
        assert!(!p.frozen);
    }

    #[test]
    fn test_store_and_get() {
        let store = ProfileStore::new();
        store.store_profile(profile("agent-1", 50, TrustTier::Trusted));

        assert!(store.get_profile("agent-1").is_some());
        assert!(store.get_profile("agent-2").is_none());

        let stats = store.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert!(stats.memory_bytes > 0);
    }

    #[test]
    fn test_update_profile_atomic() {
        let store = ProfileStore::new();
        store.store_profile(profile("agent-1", 10, TrustTier::Untrusted));

        let updated = store
            .update_profile("agent-1", |p| {
                p.total_actions += 1;
                p.successful_actions += 1;
            })
            .unwrap();
        assert_eq!(updated.total_actions, 1);

        let err = store.update_profile("ghost", |_| {}).unwrap_err();
        assert!(matches!(err, ArborError::NotFound { .. }));
    }

    #[test]
    fn test_delete_profile() {
        let store = ProfileStore::new();
        store.store_profile(profile("agent-1", 10, TrustTier::Untrusted));

        assert!(store.delete_profile("agent-1").is_ok());
        assert!(store.delete_profile("agent-1").is_err());
        assert_eq!(store.cache_stats().deletes, 1);
    }

    #[test]
    fn test_list_sorted_by_score_desc() {
        let store = ProfileStore::new();
        store.store_profile(profile("low", 10, TrustTier::Untrusted));
        store.store_profile(profile("high", 80, TrustTier::Veteran));
        store.store_profile(profile("mid", 55, TrustTier::Trusted));

        let all = store.list_profiles(&ProfileFilter::default(), None);
        let ids: Vec<&str> = all.iter().map(|p| p.agent_id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid", "low"]);

        let trusted_only = store.list_profiles(
            &ProfileFilter {
                tier: Some(TrustTier::Trusted),
                frozen: None,
            },
            None,
        );
        assert_eq!(trusted_only.len(), 1);
        assert_eq!(trusted_only[0].agent_id, "mid");

        let limited = store.list_profiles(&ProfileFilter::default(), Some(2));
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn test_days_inactive_falls_back_to_created_at() {
        let now = Utc::now();
        let mut p = TrustProfile::new("agent-1", now - chrono::Duration::days(12));
        assert_eq!(p.days_inactive(now), 12);

        p.last_activity_at = Some(now - chrono::Duration::days(3));
        assert_eq!(p.days_inactive(now), 3);
    }
}
