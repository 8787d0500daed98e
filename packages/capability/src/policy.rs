//! Authorization Policy Bridge
//!
//! The single entry point external subsystems call with
//! `(agent_id, resource_uri)`. Combines the capability store, the
//! confirmation matrix, the graduation tracker and the trust manager into
//! one decision. Fail-closed: any fault on this path reads as deny.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

use arbor_core::{ArborError, GraduationThreshold, ResourceUri, TrustTier};
use arbor_trust::TrustManager;

use crate::matrix::{Bundle, ConfirmationMatrix, ConfirmationMode, PolicyTier};
use crate::store::CapabilityStore;
use crate::templates::CapabilityTemplates;
use crate::tracker::ConfirmationTracker;
use crate::types::Capability;

/// Result of a capability re-sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub effective_tier: TrustTier,
    pub revoked: Vec<String>,
    pub granted: Vec<String>,
}

/// The policy bridge.
#[derive(Clone)]
pub struct Policy {
    store: CapabilityStore,
    templates: CapabilityTemplates,
    matrix: ConfirmationMatrix,
    tracker: ConfirmationTracker,
    trust: TrustManager,
}

impl Policy {
    pub fn new(
        store: CapabilityStore,
        templates: CapabilityTemplates,
        matrix: ConfirmationMatrix,
        tracker: ConfirmationTracker,
        trust: TrustManager,
    ) -> Self {
        Self {
            store,
            templates,
            matrix,
            tracker,
            trust,
        }
    }

    pub fn store(&self) -> &CapabilityStore {
        &self.store
    }

    pub fn templates(&self) -> &CapabilityTemplates {
        &self.templates
    }

    pub fn tracker(&self) -> &ConfirmationTracker {
        &self.tracker
    }

    pub fn trust(&self) -> &TrustManager {
        &self.trust
    }

    /// Does the agent hold a valid capability for this URI?
    pub fn allowed(&self, agent_id: &str, resource_uri: &str) -> bool {
        self.store.can(agent_id, resource_uri)
    }

    /// Does the matching capability require human approval? `Denied` when
    /// no capability matches.
    pub fn requires_approval(&self, agent_id: &str, resource_uri: &str) -> Result<bool, ArborError> {
        match self.store.authorize(agent_id, resource_uri) {
            Ok(capability) => Ok(capability.requires_approval()),
            Err(e) if e.is_security_denial() => Err(ArborError::Denied {
                reason: format!("no matching capability for {resource_uri}"),
            }),
            Err(e) => Err(e),
        }
    }

    /// Confirmation decision for an operation. Never errors: every fault on
    /// this path collapses to `Deny`.
    pub fn confirmation_mode(&self, agent_id: &str, resource_uri: &str) -> ConfirmationMode {
        let Ok(parsed) = ResourceUri::parse(resource_uri) else {
            return ConfirmationMode::Deny;
        };
        let Some(bundle) = Bundle::from_uri(&parsed) else {
            return ConfirmationMode::Deny;
        };
        let Ok(capability) = self.store.authorize(agent_id, resource_uri) else {
            return ConfirmationMode::Deny;
        };
        let Ok(profile) = self.trust.get_profile(agent_id) else {
            return ConfirmationMode::Deny;
        };
        if profile.frozen {
            return ConfirmationMode::Deny;
        }

        let policy_tier = PolicyTier::from_trust(profile.tier);
        let mut mode = self.matrix.mode(bundle, policy_tier);

        // Constraint-level approval requirements override an auto cell
        if mode == ConfirmationMode::Auto && capability.requires_approval() {
            mode = ConfirmationMode::Gated;
        }

        // Graduation can promote gated to auto, except for the bundles
        // whose gate is a security invariant
        if mode == ConfirmationMode::Gated
            && !bundle.is_security_invariant()
            && self.tracker.threshold_for(bundle) != GraduationThreshold::Never
            && self.tracker.graduated(agent_id, resource_uri)
        {
            mode = ConfirmationMode::Auto;
        }
        mode
    }

    /// Grant every capability of a tier's template to an agent, with the
    /// `self` placeholder substituted.
    pub fn grant_tier_capabilities(
        &self,
        agent_id: &str,
        tier: TrustTier,
    ) -> Result<Vec<Capability>, ArborError> {
        let mut granted = Vec::new();
        for (uri, constraints) in self.templates.generate_capabilities(agent_id, tier) {
            let metadata = HashMap::from([("source_tier".to_string(), json!(tier.as_str()))]);
            granted.push(self.store.grant_full(agent_id, &uri, constraints, None, metadata)?);
        }
        tracing::info!(
            agent_id = %agent_id,
            tier = tier.as_str(),
            count = granted.len(),
            "Tier capabilities granted"
        );
        Ok(granted)
    }

    /// Re-sync an agent's tier-sourced capabilities from `from` to `to`:
    /// revoke everything tier-sourced, regrant from the target tier's
    /// template so its constraints win.
    pub fn sync_capabilities(
        &self,
        agent_id: &str,
        from: TrustTier,
        to: TrustTier,
    ) -> Result<SyncOutcome, ArborError> {
        let revoked = self.revoke_tier_sourced(agent_id);
        let granted = self
            .grant_tier_capabilities(agent_id, to)?
            .into_iter()
            .map(|c| c.resource_uri)
            .collect();
        let outcome = SyncOutcome {
            effective_tier: to,
            revoked,
            granted,
        };
        tracing::info!(
            agent_id = %agent_id,
            from = from.as_str(),
            to = to.as_str(),
            revoked = outcome.revoked.len(),
            granted = outcome.granted.len(),
            "Capabilities synced"
        );
        Ok(outcome)
    }

    /// Revoke every capability an agent holds.
    pub fn revoke_agent_capabilities(&self, agent_id: &str) -> Vec<String> {
        let mut revoked = Vec::new();
        for capability in self.store.list_capabilities(agent_id) {
            if self.store.revoke(capability.id).is_ok() {
                revoked.push(capability.resource_uri);
            }
        }
        revoked
    }

    /// Revoke everything except `codebase_read`-bundle capabilities, which
    /// a frozen agent keeps for observability.
    pub fn revoke_non_readonly(&self, agent_id: &str) -> Vec<String> {
        let mut revoked = Vec::new();
        for capability in self.store.list_capabilities(agent_id) {
            let bundle = ResourceUri::parse(&capability.resource_uri)
                .ok()
                .and_then(|u| Bundle::from_uri(&u));
            if bundle == Some(Bundle::CodebaseRead) {
                continue;
            }
            if self.store.revoke(capability.id).is_ok() {
                revoked.push(capability.resource_uri);
            }
        }
        tracing::info!(agent_id = %agent_id, revoked = revoked.len(), "Non-read capabilities revoked");
        revoked
    }

    fn revoke_tier_sourced(&self, agent_id: &str) -> Vec<String> {
        let mut revoked = Vec::new();
        for capability in self.store.list_capabilities(agent_id) {
            if capability.source_tier().is_none() {
                // Explicit (non-template) grants survive tier transitions
                continue;
            }
            if self.store.revoke(capability.id).is_ok() {
                revoked.push(capability.resource_uri);
            }
        }
        revoked
    }
}
