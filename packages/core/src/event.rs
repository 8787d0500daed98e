//! Trust Event Records
//!
//! Append-only records of everything that moved an agent's trust state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::tier::TrustTier;

/// Closed set of trust event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustEventType {
    ActionSuccess,
    ActionFailure,
    TestPassed,
    TestFailed,
    RollbackExecuted,
    ImprovementApplied,
    SecurityViolation,
    TrustFrozen,
    TrustUnfrozen,
    TrustDecayed,
    TierChanged,
    ProfileCreated,
    ProfileDeleted,
    ProposalSubmitted,
    ProposalApproved,
    ProposalRejected,
    InstallationSuccess,
    InstallationRollback,
    TrustPointsAwarded,
    TrustPointsDeducted,
}

impl TrustEventType {
    /// Stable wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustEventType::ActionSuccess => "action_success",
            TrustEventType::ActionFailure => "action_failure",
            TrustEventType::TestPassed => "test_passed",
            TrustEventType::TestFailed => "test_failed",
            TrustEventType::RollbackExecuted => "rollback_executed",
            TrustEventType::ImprovementApplied => "improvement_applied",
            TrustEventType::SecurityViolation => "security_violation",
            TrustEventType::TrustFrozen => "trust_frozen",
            TrustEventType::TrustUnfrozen => "trust_unfrozen",
            TrustEventType::TrustDecayed => "trust_decayed",
            TrustEventType::TierChanged => "tier_changed",
            TrustEventType::ProfileCreated => "profile_created",
            TrustEventType::ProfileDeleted => "profile_deleted",
            TrustEventType::ProposalSubmitted => "proposal_submitted",
            TrustEventType::ProposalApproved => "proposal_approved",
            TrustEventType::ProposalRejected => "proposal_rejected",
            TrustEventType::InstallationSuccess => "installation_success",
            TrustEventType::InstallationRollback => "installation_rollback",
            TrustEventType::TrustPointsAwarded => "trust_points_awarded",
            TrustEventType::TrustPointsDeducted => "trust_points_deducted",
        }
    }

    /// Events that count against an agent in stats and breaker windows.
    pub fn is_negative(&self) -> bool {
        matches!(
            self,
            TrustEventType::ActionFailure
                | TrustEventType::TestFailed
                | TrustEventType::RollbackExecuted
                | TrustEventType::SecurityViolation
                | TrustEventType::TrustFrozen
                | TrustEventType::ProposalRejected
                | TrustEventType::InstallationRollback
                | TrustEventType::TrustPointsDeducted
        )
    }
}

/// A single trust event, as stored in the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustEvent {
    /// Event ID
    pub id: Uuid,
    /// Agent this event belongs to
    pub agent_id: String,
    /// Event type
    pub event_type: TrustEventType,
    /// When the event was recorded
    pub timestamp: DateTime<Utc>,
    /// Score before applying the event, if a profile existed
    pub previous_score: Option<u32>,
    /// Score after applying the event
    pub new_score: Option<u32>,
    /// Tier before applying the event
    pub previous_tier: Option<TrustTier>,
    /// Tier after applying the event
    pub new_tier: Option<TrustTier>,
    /// Human-readable reason, if any
    pub reason: Option<String>,
    /// Opaque metadata supplied by the emitter
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TrustEvent {
    /// Create an event with a fresh id and the given timestamp.
    pub fn new(
        agent_id: impl Into<String>,
        event_type: TrustEventType,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            event_type,
            timestamp,
            previous_score: None,
            new_score: None,
            previous_tier: None,
            new_tier: None,
            reason: None,
            metadata: HashMap::new(),
        }
    }

    /// Score delta applied by this event, when both sides are known.
    pub fn score_delta(&self) -> Option<i64> {
        match (self.previous_score, self.new_score) {
            (Some(prev), Some(new)) => Some(new as i64 - prev as i64),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_classification() {
        assert!(TrustEventType::SecurityViolation.is_negative());
        assert!(TrustEventType::ActionFailure.is_negative());
        assert!(!TrustEventType::ActionSuccess.is_negative());
        assert!(!TrustEventType::TierChanged.is_negative());
    }

    #[test]
    fn test_score_delta() {
        let mut event = TrustEvent::new("agent-1", TrustEventType::ActionSuccess, Utc::now());
        assert_eq!(event.score_delta(), None);

        event.previous_score = Some(40);
        event.new_score = Some(43);
        assert_eq!(event.score_delta(), Some(3));

        event.new_score = Some(35);
        assert_eq!(event.score_delta(), Some(-5));
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(TrustEventType::TierChanged.as_str(), "tier_changed");
        assert_eq!(
            serde_json::to_string(&TrustEventType::ActionSuccess).unwrap(),
            "\"action_success\""
        );
    }
}
