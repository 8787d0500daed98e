//! Trust Tiers and Score Resolution
//!
//! Maps the 0-100 trust score to a discrete tier. The resolver is pure;
//! thresholds come from configuration and are frozen at construction.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Trust tier levels, ordered from least to most trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustTier {
    /// New or misbehaving agents (score 0-19 by default)
    Untrusted,
    /// Building a track record (20-49)
    Probationary,
    /// Established agents (50-74)
    Trusted,
    /// Long-standing agents (75-89)
    Veteran,
    /// Fully autonomous operation (90-100)
    Autonomous,
}

impl TrustTier {
    /// All tiers in ascending order.
    pub const ALL: [TrustTier; 5] = [
        TrustTier::Untrusted,
        TrustTier::Probationary,
        TrustTier::Trusted,
        TrustTier::Veteran,
        TrustTier::Autonomous,
    ];

    /// Stable string name, matching the wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustTier::Untrusted => "untrusted",
            TrustTier::Probationary => "probationary",
            TrustTier::Trusted => "trusted",
            TrustTier::Veteran => "veteran",
            TrustTier::Autonomous => "autonomous",
        }
    }

    /// Parse a tier from its wire name.
    pub fn parse(name: &str) -> Option<TrustTier> {
        match name {
            "untrusted" => Some(TrustTier::Untrusted),
            "probationary" => Some(TrustTier::Probationary),
            "trusted" => Some(TrustTier::Trusted),
            "veteran" => Some(TrustTier::Veteran),
            "autonomous" => Some(TrustTier::Autonomous),
            _ => None,
        }
    }
}

/// Per-tier minimum score thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierThresholds {
    pub untrusted: u32,
    pub probationary: u32,
    pub trusted: u32,
    pub veteran: u32,
    pub autonomous: u32,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            untrusted: 0,
            probationary: 20,
            trusted: 50,
            veteran: 75,
            autonomous: 90,
        }
    }
}

impl TierThresholds {
    fn threshold(&self, tier: TrustTier) -> u32 {
        match tier {
            TrustTier::Untrusted => self.untrusted,
            TrustTier::Probationary => self.probationary,
            TrustTier::Trusted => self.trusted,
            TrustTier::Veteran => self.veteran,
            TrustTier::Autonomous => self.autonomous,
        }
    }
}

/// Pure score-to-tier resolver.
#[derive(Debug, Clone)]
pub struct TierResolver {
    thresholds: TierThresholds,
}

impl Default for TierResolver {
    fn default() -> Self {
        Self::new(TierThresholds::default())
    }
}

impl TierResolver {
    /// Create a resolver from configured thresholds.
    pub fn new(thresholds: TierThresholds) -> Self {
        Self { thresholds }
    }

    /// Resolve a score to the largest tier whose threshold is <= score.
    pub fn resolve(&self, score: u32) -> TrustTier {
        let mut resolved = TrustTier::Untrusted;
        for tier in TrustTier::ALL {
            if score >= self.thresholds.threshold(tier) {
                resolved = tier;
            }
        }
        resolved
    }

    /// Check whether a held tier satisfies a requirement.
    pub fn sufficient(&self, held: TrustTier, required: TrustTier) -> bool {
        self.thresholds.threshold(held) >= self.thresholds.threshold(required)
    }

    /// Minimum score for a tier.
    pub fn min_score(&self, tier: TrustTier) -> u32 {
        self.thresholds.threshold(tier)
    }

    /// Maximum score for a tier (one below the next threshold, 100 at the top).
    pub fn max_score(&self, tier: TrustTier) -> u32 {
        match self.next_tier(tier) {
            Some(next) => self.thresholds.threshold(next).saturating_sub(1),
            None => 100,
        }
    }

    /// The tier above, if any.
    pub fn next_tier(&self, tier: TrustTier) -> Option<TrustTier> {
        let idx = TrustTier::ALL.iter().position(|t| *t == tier)?;
        TrustTier::ALL.get(idx + 1).copied()
    }

    /// The tier below, if any.
    pub fn previous_tier(&self, tier: TrustTier) -> Option<TrustTier> {
        let idx = TrustTier::ALL.iter().position(|t| *t == tier)?;
        idx.checked_sub(1).and_then(|i| TrustTier::ALL.get(i)).copied()
    }

    /// Total order on tiers by threshold.
    pub fn compare(&self, a: TrustTier, b: TrustTier) -> Ordering {
        self.thresholds.threshold(a).cmp(&self.thresholds.threshold(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_defaults() {
        let resolver = TierResolver::default();
        assert_eq!(resolver.resolve(0), TrustTier::Untrusted);
        assert_eq!(resolver.resolve(19), TrustTier::Untrusted);
        assert_eq!(resolver.resolve(20), TrustTier::Probationary);
        assert_eq!(resolver.resolve(50), TrustTier::Trusted);
        assert_eq!(resolver.resolve(75), TrustTier::Veteran);
        assert_eq!(resolver.resolve(90), TrustTier::Autonomous);
        assert_eq!(resolver.resolve(100), TrustTier::Autonomous);
    }

    #[test]
    fn test_resolve_total_over_score_range() {
        let resolver = TierResolver::default();
        for score in 0..=100 {
            let tier = resolver.resolve(score);
            assert!(resolver.min_score(tier) <= score);
            assert!(score <= resolver.max_score(tier));
        }
    }

    #[test]
    fn test_boundary_round_trip() {
        let resolver = TierResolver::default();
        for tier in TrustTier::ALL {
            assert_eq!(resolver.resolve(resolver.min_score(tier)), tier);
            assert_eq!(resolver.resolve(resolver.max_score(tier)), tier);
        }
    }

    #[test]
    fn test_sufficiency_is_total_order() {
        let resolver = TierResolver::default();
        assert!(resolver.sufficient(TrustTier::Veteran, TrustTier::Trusted));
        assert!(resolver.sufficient(TrustTier::Trusted, TrustTier::Trusted));
        assert!(!resolver.sufficient(TrustTier::Probationary, TrustTier::Trusted));
    }

    #[test]
    fn test_next_and_previous() {
        let resolver = TierResolver::default();
        assert_eq!(resolver.next_tier(TrustTier::Untrusted), Some(TrustTier::Probationary));
        assert_eq!(resolver.next_tier(TrustTier::Autonomous), None);
        assert_eq!(resolver.previous_tier(TrustTier::Untrusted), None);
        assert_eq!(resolver.previous_tier(TrustTier::Autonomous), Some(TrustTier::Veteran));
    }

    #[test]
    fn test_parse_round_trip() {
        for tier in TrustTier::ALL {
            assert_eq!(TrustTier::parse(tier.as_str()), Some(tier));
        }
        assert_eq!(TrustTier::parse("elite"), None);
    }
}
