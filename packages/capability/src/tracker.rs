//! Confirmation Tracker
//!
//! Per-(agent, bundle) approval history. A streak of approvals graduates a
//! gated bundle to auto; one rejection resets the streak and the
//! graduation. Bundles with a `never` threshold (shell, governance) cannot
//! graduate no matter how long the streak.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use arbor_core::{Clock, GraduationThreshold, ResourceUri, SystemClock};

use crate::matrix::Bundle;
use crate::templates::CapabilityTemplates;

/// Approval state for one (agent, bundle) pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfirmationEntry {
    pub approvals: u64,
    pub rejections: u64,
    pub streak: u32,
    pub graduated: bool,
    pub locked: bool,
    pub last_confirmation: Option<DateTime<Utc>>,
    pub graduated_at: Option<DateTime<Utc>>,
}

/// Result of recording an approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Recorded,
    Graduated(Bundle),
}

/// Tracks approvals, rejections and graduation per (agent, bundle).
#[derive(Clone)]
pub struct ConfirmationTracker {
    entries: Arc<RwLock<HashMap<(String, Bundle), ConfirmationEntry>>>,
    thresholds: HashMap<String, GraduationThreshold>,
    clock: Arc<dyn Clock>,
}

impl Default for ConfirmationTracker {
    fn default() -> Self {
        Self::new(CapabilityTemplates::default_thresholds(), Arc::new(SystemClock))
    }
}

impl ConfirmationTracker {
    pub fn new(
        overrides: HashMap<String, GraduationThreshold>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut thresholds = CapabilityTemplates::default_thresholds();
        for (bundle, threshold) in overrides {
            // shell and governance stay :never regardless of configuration
            if Bundle::parse(&bundle).is_some_and(|b| b.is_security_invariant()) {
                continue;
            }
            thresholds.insert(bundle, threshold);
        }
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            thresholds,
            clock,
        }
    }

    /// Graduation threshold for a bundle.
    pub fn threshold_for(&self, bundle: Bundle) -> GraduationThreshold {
        if bundle.is_security_invariant() {
            return GraduationThreshold::Never;
        }
        self.thresholds
            .get(bundle.as_str())
            .copied()
            .unwrap_or(GraduationThreshold::Never)
    }

    fn bundle_of(uri: &str) -> Option<Bundle> {
        ResourceUri::parse(uri).ok().and_then(|u| Bundle::from_uri(&u))
    }

    /// Record a human approval for the bundle behind a URI. URIs without a
    /// bundle are a no-op.
    pub fn record_approval(&self, agent_id: &str, uri: &str) -> ApprovalOutcome {
        let Some(bundle) = Self::bundle_of(uri) else {
            return ApprovalOutcome::Recorded;
        };
        let now = self.clock.now();
        let threshold = self.threshold_for(bundle);
        let mut entries = self.entries.write();
        let entry = entries
            .entry((agent_id.to_string(), bundle))
            .or_default();
        entry.approvals += 1;
        entry.streak += 1;
        entry.last_confirmation = Some(now);

        if !entry.graduated && !entry.locked {
            if let GraduationThreshold::Count(required) = threshold {
                if entry.streak >= required {
                    entry.graduated = true;
                    entry.graduated_at = Some(now);
                    tracing::info!(
                        agent_id = %agent_id,
                        bundle = bundle.as_str(),
                        streak = entry.streak,
                        "Bundle graduated to auto"
                    );
                    return ApprovalOutcome::Graduated(bundle);
                }
            }
        }
        ApprovalOutcome::Recorded
    }

    /// Record a human rejection: the streak and any graduation are gone.
    pub fn record_rejection(&self, agent_id: &str, uri: &str) {
        let Some(bundle) = Self::bundle_of(uri) else {
            return;
        };
        let mut entries = self.entries.write();
        let entry = entries
            .entry((agent_id.to_string(), bundle))
            .or_default();
        entry.rejections += 1;
        entry.streak = 0;
        entry.graduated = false;
        entry.graduated_at = None;
        tracing::info!(agent_id = %agent_id, bundle = bundle.as_str(), "Confirmation rejected");
    }

    /// Lock a bundle: no graduation until unlocked.
    pub fn lock_gated(&self, agent_id: &str, bundle: Bundle) {
        let mut entries = self.entries.write();
        let entry = entries
            .entry((agent_id.to_string(), bundle))
            .or_default();
        entry.locked = true;
        entry.graduated = false;
        entry.graduated_at = None;
    }

    pub fn unlock_gated(&self, agent_id: &str, bundle: Bundle) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&(agent_id.to_string(), bundle)) {
            entry.locked = false;
        }
    }

    /// Drop a graduation and restart the streak.
    pub fn revert_to_gated(&self, agent_id: &str, bundle: Bundle) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&(agent_id.to_string(), bundle)) {
            entry.graduated = false;
            entry.graduated_at = None;
            entry.streak = 0;
        }
    }

    /// Clear all entries for one agent. Other agents are untouched.
    pub fn reset(&self, agent_id: &str) {
        self.entries.write().retain(|(agent, _), _| agent != agent_id);
    }

    /// Has this agent graduated the bundle behind the URI?
    pub fn graduated(&self, agent_id: &str, uri: &str) -> bool {
        let Some(bundle) = Self::bundle_of(uri) else {
            return false;
        };
        self.entries
            .read()
            .get(&(agent_id.to_string(), bundle))
            .is_some_and(|e| e.graduated && !e.locked)
    }

    /// Snapshot of the entry for an (agent, bundle); a default entry when
    /// nothing was recorded yet.
    pub fn status(&self, agent_id: &str, bundle: Bundle) -> ConfirmationEntry {
        self.entries
            .read()
            .get(&(agent_id.to_string(), bundle))
            .cloned()
            .unwrap_or_default()
    }
}
