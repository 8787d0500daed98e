//! Capability Domain Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use arbor_core::ResourceUri;

/// Constraint map attached to a capability (`rate_limit`,
/// `requires_approval`, free-form keys).
pub type Constraints = HashMap<String, serde_json::Value>;

/// A signed assertion that `principal_id` may perform the operation named
/// by `resource_uri` under `constraints`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    /// Capability ID
    pub id: Uuid,
    /// Agent the capability is granted to
    pub principal_id: String,
    /// Resource pattern, possibly ending in `*`
    pub resource_uri: String,
    /// Constraint map
    #[serde(default)]
    pub constraints: Constraints,
    /// Signing authority ID
    pub issuer_id: String,
    /// Base64 Ed25519 signature over the authenticated fields
    pub issuer_signature: String,
    /// Issue timestamp
    pub issued_at: DateTime<Utc>,
    /// Optional expiry
    pub expires_at: Option<DateTime<Utc>>,
    /// Unauthenticated bookkeeping (source tier, generation timestamp)
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Capability {
    /// Unsigned capability; the authority fills issuer fields.
    pub fn unsigned(
        principal_id: impl Into<String>,
        resource_uri: impl Into<String>,
        constraints: Constraints,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            principal_id: principal_id.into(),
            resource_uri: resource_uri.into(),
            constraints,
            issuer_id: String::new(),
            issuer_signature: String::new(),
            issued_at,
            expires_at: None,
            metadata: HashMap::new(),
        }
    }

    pub fn requires_approval(&self) -> bool {
        self.constraints
            .get("requires_approval")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn rate_limit(&self) -> Option<u64> {
        self.constraints.get("rate_limit").and_then(|v| v.as_u64())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Source tier recorded at grant time, if any.
    pub fn source_tier(&self) -> Option<&str> {
        self.metadata.get("source_tier").and_then(|v| v.as_str())
    }

    /// Does this capability's pattern cover the concrete URI?
    pub fn covers(&self, concrete: &ResourceUri) -> bool {
        match ResourceUri::parse(&self.resource_uri) {
            Ok(pattern) => pattern.matches(concrete),
            // A stored URI that no longer parses covers nothing.
            Err(_) => false,
        }
    }
}
