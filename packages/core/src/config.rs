//! Subsystem Configuration
//!
//! All knobs recognized by the trust and capability components. Components
//! copy what they need at construction; there is no call-time re-read, so
//! decisions stay deterministic within a request.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::tier::{TierThresholds, TrustTier};

/// Component weighting for the composite trust score. Weights sum to 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub success_rate: f64,
    pub uptime: f64,
    pub security: f64,
    pub test_pass: f64,
    pub rollback: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            success_rate: 0.30,
            uptime: 0.15,
            security: 0.25,
            test_pass: 0.20,
            rollback: 0.10,
        }
    }
}

/// Council-based scoring knobs for proposals and installations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsConfig {
    /// Points awarded when a proposal is approved
    pub proposal_approved: u64,
    /// Base points awarded for a successful installation (scaled by `impact`
    /// metadata when present)
    pub installation_success: u64,
    /// Points deducted when an installation is rolled back
    pub installation_rollback: u64,
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self {
            proposal_approved: 10,
            installation_success: 15,
            installation_rollback: 10,
        }
    }
}

/// Trust manager behavior switches and scoring parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustManagerConfig {
    pub circuit_breaker_enabled: bool,
    pub decay_enabled: bool,
    pub event_store_enabled: bool,
    pub weights: ScoreWeights,
    pub points: PointsConfig,
    /// Penalty subtracted from the security component per violation
    pub security_penalty: f64,
    /// Floor for the security component score
    pub security_floor: f64,
}

impl Default for TrustManagerConfig {
    fn default() -> Self {
        Self {
            circuit_breaker_enabled: true,
            decay_enabled: true,
            event_store_enabled: true,
            weights: ScoreWeights::default(),
            points: PointsConfig::default(),
            security_penalty: 20.0,
            security_floor: 0.0,
        }
    }
}

/// Inactivity decay parameters. The trust-score floor here is independent
/// of the security-component floor in [`TrustManagerConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayConfig {
    pub enabled: bool,
    /// Days of inactivity tolerated before decay starts
    pub grace_period_days: i64,
    /// Score points lost per day past the grace period
    pub decay_rate: f64,
    /// Decay never reduces the score below this
    pub floor_score: u32,
    /// Local hour (0-23) at which the daily pass runs
    pub run_hour: u8,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            grace_period_days: 7,
            decay_rate: 1.0,
            floor_score: 10,
            run_hour: 3,
        }
    }
}

/// Circuit breaker thresholds and windows, all in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub rapid_failure_threshold: usize,
    pub rapid_failure_window_seconds: i64,
    pub security_violation_threshold: usize,
    pub security_violation_window_seconds: i64,
    pub rollback_threshold: usize,
    pub rollback_window_seconds: i64,
    pub test_failure_threshold: usize,
    pub test_failure_window_seconds: i64,
    /// How long a tripped circuit stays open
    pub freeze_duration_seconds: i64,
    /// How long the half-open probe period lasts before auto-close
    pub half_open_duration_seconds: i64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            rapid_failure_threshold: 5,
            rapid_failure_window_seconds: 60,
            security_violation_threshold: 3,
            security_violation_window_seconds: 3600,
            rollback_threshold: 3,
            rollback_window_seconds: 3600,
            test_failure_threshold: 5,
            test_failure_window_seconds: 300,
            freeze_duration_seconds: 86_400,
            half_open_duration_seconds: 3600,
        }
    }
}

/// Graduation threshold for a confirmation bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraduationThreshold {
    /// Graduate after this many consecutive approvals
    Count(u32),
    /// Bundle can never graduate to auto
    Never,
}

/// One capability template entry, used for per-tier template overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateEntryConfig {
    /// Pattern, possibly containing `/self` and a trailing `*`
    pub resource_uri_pattern: String,
    /// Constraint map (`rate_limit`, `requires_approval`, free-form keys)
    #[serde(default)]
    pub constraints: HashMap<String, serde_json::Value>,
}

/// Top-level configuration for the subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArborConfig {
    #[serde(default)]
    pub tier_thresholds: TierThresholds,
    #[serde(default)]
    pub trust_manager: TrustManagerConfig,
    #[serde(default)]
    pub decay: DecayConfig,
    #[serde(default)]
    pub circuit_breaker: BreakerConfig,
    /// Per-bundle graduation threshold overrides, keyed by bundle name
    #[serde(default)]
    pub confirmation_thresholds: HashMap<String, GraduationThreshold>,
    /// Per-tier capability template overrides; `None` keeps the built-ins
    #[serde(default)]
    pub capability_templates: Option<HashMap<TrustTier, Vec<TemplateEntryConfig>>>,
}
