//! Capability Store
//!
//! Persistent set of signed capabilities per principal. Authorization
//! succeeds only for a non-expired, signature-valid capability whose
//! pattern covers the requested URI; everything else is `Unauthorized`.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use arbor_core::{ArborError, Clock, ResourceUri, SystemClock};

use crate::authority::SystemAuthority;
use crate::types::{Capability, Constraints};

/// Store of signed capabilities, keyed by principal.
#[derive(Clone)]
pub struct CapabilityStore {
    capabilities: Arc<RwLock<HashMap<String, Vec<Capability>>>>,
    authority: Arc<SystemAuthority>,
    clock: Arc<dyn Clock>,
}

impl CapabilityStore {
    pub fn new(authority: Arc<SystemAuthority>, clock: Arc<dyn Clock>) -> Self {
        Self {
            capabilities: Arc::new(RwLock::new(HashMap::new())),
            authority,
            clock,
        }
    }

    pub fn with_authority(authority: Arc<SystemAuthority>) -> Self {
        Self::new(authority, Arc::new(SystemClock))
    }

    pub fn authority(&self) -> &SystemAuthority {
        &self.authority
    }

    /// Grant a signed capability. A previous grant of the same URI to the
    /// same principal is replaced, so the newest constraints win.
    pub fn grant(
        &self,
        principal_id: &str,
        resource_uri: &str,
        constraints: Constraints,
    ) -> Result<Capability, ArborError> {
        self.grant_full(principal_id, resource_uri, constraints, None, HashMap::new())
    }

    /// Grant with expiry and bookkeeping metadata.
    pub fn grant_full(
        &self,
        principal_id: &str,
        resource_uri: &str,
        constraints: Constraints,
        expires_at: Option<DateTime<Utc>>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<Capability, ArborError> {
        if principal_id.trim().is_empty() {
            return Err(ArborError::invalid_input("principal_id must be non-empty"));
        }
        // Patterns must still be well-formed URIs
        ResourceUri::parse(resource_uri)?;

        let mut capability =
            Capability::unsigned(principal_id, resource_uri, constraints, self.clock.now());
        capability.expires_at = expires_at;
        capability.metadata = metadata;
        let capability = self.authority.sign_capability(capability);

        let mut store = self.capabilities.write();
        let held = store.entry(principal_id.to_string()).or_default();
        held.retain(|c| c.resource_uri != resource_uri);
        held.push(capability.clone());

        tracing::debug!(
            principal_id = %principal_id,
            resource_uri = %resource_uri,
            capability_id = %capability.id,
            "Capability granted"
        );
        Ok(capability)
    }

    /// Revoke by id. Returns the revoked capability.
    pub fn revoke(&self, id: Uuid) -> Result<Capability, ArborError> {
        let mut store = self.capabilities.write();
        for held in store.values_mut() {
            if let Some(idx) = held.iter().position(|c| c.id == id) {
                let revoked = held.remove(idx);
                tracing::debug!(
                    principal_id = %revoked.principal_id,
                    resource_uri = %revoked.resource_uri,
                    capability_id = %id,
                    "Capability revoked"
                );
                return Ok(revoked);
            }
        }
        Err(ArborError::NotFound {
            entity: "capability",
            id: id.to_string(),
        })
    }

    /// All capabilities held by a principal.
    pub fn list_capabilities(&self, principal_id: &str) -> Vec<Capability> {
        self.capabilities
            .read()
            .get(principal_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Authorize an operation. Returns the covering capability on success.
    pub fn authorize(
        &self,
        principal_id: &str,
        resource_uri: &str,
    ) -> Result<Capability, ArborError> {
        let unauthorized = || ArborError::Unauthorized {
            principal_id: principal_id.to_string(),
            resource_uri: resource_uri.to_string(),
        };
        let concrete = ResourceUri::parse(resource_uri).map_err(|_| unauthorized())?;
        let now = self.clock.now();

        let held = self.list_capabilities(principal_id);
        let mut saw_invalid_signature = false;
        for capability in held {
            if capability.is_expired(now) || !capability.covers(&concrete) {
                continue;
            }
            match self.authority.verify_capability_signature(&capability) {
                Ok(()) => return Ok(capability),
                Err(_) => {
                    saw_invalid_signature = true;
                    tracing::warn!(
                        principal_id = %principal_id,
                        capability_id = %capability.id,
                        "Capability failed signature verification"
                    );
                }
            }
        }
        if saw_invalid_signature {
            // A covering capability existed but its signature did not hold
            return Err(ArborError::InvalidCapabilitySignature {
                capability_id: "covering capability".to_string(),
            });
        }
        Err(unauthorized())
    }

    pub fn can(&self, principal_id: &str, resource_uri: &str) -> bool {
        self.authorize(principal_id, resource_uri).is_ok()
    }

    /// Total capabilities across all principals.
    pub fn len(&self) -> usize {
        self.capabilities.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
