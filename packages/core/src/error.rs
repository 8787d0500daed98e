//! Arbor Error Types

use thiserror::Error;

use crate::tier::TrustTier;

/// Errors shared across the trust and capability subsystem.
#[derive(Debug, Error)]
pub enum ArborError {
    #[error("Not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Already exists: {entity} {id}")]
    AlreadyExists { entity: &'static str, id: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Insufficient trust: {agent_id} holds {held:?}, requires {required:?}")]
    InsufficientTrust {
        agent_id: String,
        held: TrustTier,
        required: TrustTier,
    },

    #[error("Trust frozen: {agent_id} ({reason})")]
    TrustFrozen { agent_id: String, reason: String },

    #[error("Unauthorized: {principal_id} for {resource_uri}")]
    Unauthorized {
        principal_id: String,
        resource_uri: String,
    },

    #[error("Invalid capability signature: {capability_id}")]
    InvalidCapabilitySignature { capability_id: String },

    #[error("Circuit open for agent: {agent_id}")]
    CircuitOpen { agent_id: String },

    #[error("Denied: {reason}")]
    Denied { reason: String },

    #[error("Subsystem unavailable: {subsystem}")]
    Unavailable { subsystem: &'static str },

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },
}

impl ArborError {
    /// Shorthand for a profile lookup miss.
    pub fn profile_not_found(agent_id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "profile",
            id: agent_id.into(),
        }
    }

    /// Shorthand for malformed caller input.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// True for errors that must never be converted into a grant.
    ///
    /// Callers on the authorization path map everything else to
    /// `Unauthorized` before returning (fail-closed).
    pub fn is_security_denial(&self) -> bool {
        matches!(
            self,
            Self::InsufficientTrust { .. }
                | Self::TrustFrozen { .. }
                | Self::Unauthorized { .. }
                | Self::InvalidCapabilitySignature { .. }
                | Self::CircuitOpen { .. }
                | Self::Denied { .. }
        )
    }
}

impl From<serde_json::Error> for ArborError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidInput {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ArborError::profile_not_found("agent-1");
        assert_eq!(err.to_string(), "Not found: profile agent-1");

        let err = ArborError::Unauthorized {
            principal_id: "agent-1".into(),
            resource_uri: "arbor://shell/exec/self".into(),
        };
        assert!(err.to_string().contains("agent-1"));
    }

    #[test]
    fn test_security_denials_flagged() {
        assert!(ArborError::CircuitOpen { agent_id: "a".into() }.is_security_denial());
        assert!(!ArborError::Unavailable { subsystem: "bus" }.is_security_denial());
        assert!(!ArborError::Timeout { millis: 100 }.is_security_denial());
    }
}
