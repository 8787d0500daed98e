//! System Authority
//!
//! Process-wide Ed25519 signing identity. Every capability the subsystem
//! hands out is signed here; verification recomputes the canonical message
//! from the capability's authenticated fields, so tampering with any of
//! them fails.

use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use arbor_core::ArborError;

use crate::types::Capability;

/// Process-lifetime signing identity.
pub struct SystemAuthority {
    signing_key: SigningKey,
    authority_id: String,
}

impl Default for SystemAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemAuthority {
    /// Generate a fresh signing key. The authority id embeds the public key
    /// fingerprint so it is stable for the key's lifetime.
    pub fn new() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let authority_id = Self::derive_id(&signing_key.verifying_key());
        tracing::info!(authority_id = %authority_id, "System authority initialized");
        Self {
            signing_key,
            authority_id,
        }
    }

    fn derive_id(verifying_key: &VerifyingKey) -> String {
        let mut hasher = Sha256::new();
        hasher.update(verifying_key.as_bytes());
        let digest = hasher.finalize();
        let fingerprint: String = digest[..4].iter().map(|b| format!("{b:02x}")).collect();
        format!("arbor-authority-{fingerprint}")
    }

    pub fn authority_id(&self) -> &str {
        &self.authority_id
    }

    /// Base64 public key, for out-of-process verification.
    pub fn public_key_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.signing_key.verifying_key().as_bytes())
    }

    /// Sign a capability, filling `issuer_id` and `issuer_signature`.
    pub fn sign_capability(&self, mut capability: Capability) -> Capability {
        capability.issuer_id = self.authority_id.clone();
        let message = canonical_message(&capability);
        let signature = self.signing_key.sign(message.as_bytes());
        capability.issuer_signature =
            base64::engine::general_purpose::STANDARD.encode(signature.to_bytes());
        capability
    }

    /// Verify a capability signature against this authority's key.
    pub fn verify_capability_signature(&self, capability: &Capability) -> Result<(), ArborError> {
        verify_with_key(capability, &self.signing_key.verifying_key())
    }
}

/// Canonical serialization of the authenticated fields:
/// `(principal_id, resource_uri, constraints, issuer_id, issued_at, expires_at)`.
/// Constraint keys are sorted so the message is deterministic.
fn canonical_message(capability: &Capability) -> String {
    let mut keys: Vec<&String> = capability.constraints.keys().collect();
    keys.sort();
    let constraints: Vec<String> = keys
        .into_iter()
        .map(|k| format!("{k}={}", capability.constraints[k]))
        .collect();
    format!(
        "{}|{}|{}|{}|{}|{}",
        capability.principal_id,
        capability.resource_uri,
        constraints.join(","),
        capability.issuer_id,
        capability.issued_at.timestamp_micros(),
        capability
            .expires_at
            .map(|at| at.timestamp_micros().to_string())
            .unwrap_or_default(),
    )
}

/// Verify against an explicit public key (e.g. after restart, with the key
/// loaded from configuration).
pub fn verify_with_key(
    capability: &Capability,
    verifying_key: &VerifyingKey,
) -> Result<(), ArborError> {
    let invalid = || ArborError::InvalidCapabilitySignature {
        capability_id: capability.id.to_string(),
    };

    if capability.issuer_signature.is_empty() {
        return Err(invalid());
    }
    let signature_bytes = base64::engine::general_purpose::STANDARD
        .decode(&capability.issuer_signature)
        .map_err(|_| invalid())?;
    let signature = Signature::try_from(signature_bytes.as_slice()).map_err(|_| invalid())?;

    let message = canonical_message(capability);
    verifying_key
        .verify(message.as_bytes(), &signature)
        .map_err(|_| invalid())
}

/// Verify against a base64-encoded public key.
pub fn verify_with_key_base64(capability: &Capability, key_b64: &str) -> Result<(), ArborError> {
    let invalid = || ArborError::InvalidCapabilitySignature {
        capability_id: capability.id.to_string(),
    };
    let key_bytes = base64::engine::general_purpose::STANDARD
        .decode(key_b64)
        .map_err(|_| invalid())?;
    let verifying_key = VerifyingKey::try_from(key_bytes.as_slice()).map_err(|_| invalid())?;
    verify_with_key(capability, &verifying_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Constraints;
    use chrono::Utc;
    use serde_json::json;

    fn capability() -> Capability {
        let mut constraints = Constraints::new();
        constraints.insert("rate_limit".into(), json!(30));
        constraints.insert("requires_approval".into(), json!(true));
        Capability::unsigned("agent-1", "arbor://code/write/agent-1/*", constraints, Utc::now())
    }

    #[test]
    fn test_sign_and_verify_round_trip() {
        let authority = SystemAuthority::new();
        let signed = authority.sign_capability(capability());

        assert_eq!(signed.issuer_id, authority.authority_id());
        assert!(!signed.issuer_signature.is_empty());
        assert!(authority.verify_capability_signature(&signed).is_ok());
    }

    #[test]
    fn test_tampered_fields_fail_verification() {
        let authority = SystemAuthority::new();
        let signed = authority.sign_capability(capability());

        let mut tampered = signed.clone();
        tampered.principal_id = "agent_evil".into();
        assert!(matches!(
            authority.verify_capability_signature(&tampered),
            Err(ArborError::InvalidCapabilitySignature { .. })
        ));

        let mut tampered = signed.clone();
        tampered.resource_uri = "arbor://shell/exec/agent-1".into();
        assert!(authority.verify_capability_signature(&tampered).is_err());

        let mut tampered = signed.clone();
        tampered.constraints.insert("requires_approval".into(), json!(false));
        assert!(authority.verify_capability_signature(&tampered).is_err());

        let mut tampered = signed.clone();
        tampered.expires_at = Some(Utc::now() + chrono::Duration::days(365));
        assert!(authority.verify_capability_signature(&tampered).is_err());

        let mut tampered = signed.clone();
        tampered.issued_at = signed.issued_at + chrono::Duration::seconds(1);
        assert!(authority.verify_capability_signature(&tampered).is_err());
    }

    #[test]
    fn test_unsigned_capability_rejected() {
        let authority = SystemAuthority::new();
        assert!(authority.verify_capability_signature(&capability()).is_err());
    }

    #[test]
    fn test_metadata_not_authenticated() {
        let authority = SystemAuthority::new();
        let mut signed = authority.sign_capability(capability());
        signed.metadata.insert("source_tier".into(), json!("trusted"));
        // Bookkeeping metadata may change without breaking the signature
        assert!(authority.verify_capability_signature(&signed).is_ok());
    }

    #[test]
    fn test_verify_with_exported_key() {
        let authority = SystemAuthority::new();
        let signed = authority.sign_capability(capability());
        let key = authority.public_key_base64();

        assert!(verify_with_key_base64(&signed, &key).is_ok());

        let other = SystemAuthority::new();
        assert!(verify_with_key_base64(&signed, &other.public_key_base64()).is_err());
    }

    #[test]
    fn test_authority_id_stable_per_key() {
        let authority = SystemAuthority::new();
        assert!(authority.authority_id().starts_with("arbor-authority-"));
        assert_eq!(authority.authority_id(), authority.authority_id());
    }

    #[test]
    fn test_canonical_message_sorts_constraint_keys() {
        let cap = capability();
        let message = canonical_message(&cap);
        let rate = message.find("rate_limit").unwrap();
        let approval = message.find("requires_approval").unwrap();
        assert!(rate < approval);
    }
}
