//! Confirmation Matrix
//!
//! Static (bundle x policy-tier) table deciding whether an operation runs
//! unattended, needs a human gate, or is denied outright. The table is
//! validated at construction:
//! - `codebase_read` is auto at every tier
//! - `shell` is never auto: deny at restricted, gated above
//! - `governance` stays gated even at autonomous
//! - per bundle, the progression across tiers never regresses

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use arbor_core::{ArborError, Domain, ResourceUri, TrustTier};

/// Coarse operation categories used for confirmation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bundle {
    CodebaseRead,
    CodebaseWrite,
    Shell,
    Network,
    AiGenerate,
    SystemConfig,
    Governance,
}

impl Bundle {
    pub const ALL: [Bundle; 7] = [
        Bundle::CodebaseRead,
        Bundle::CodebaseWrite,
        Bundle::Shell,
        Bundle::Network,
        Bundle::AiGenerate,
        Bundle::SystemConfig,
        Bundle::Governance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bundle::CodebaseRead => "codebase_read",
            Bundle::CodebaseWrite => "codebase_write",
            Bundle::Shell => "shell",
            Bundle::Network => "network",
            Bundle::AiGenerate => "ai_generate",
            Bundle::SystemConfig => "system_config",
            Bundle::Governance => "governance",
        }
    }

    pub fn parse(name: &str) -> Option<Bundle> {
        Bundle::ALL.into_iter().find(|b| b.as_str() == name)
    }

    /// Resolve a URI to its bundle by domain/action prefix. Unknown URIs
    /// resolve to no bundle, which downstream treats as deny.
    pub fn from_uri(uri: &ResourceUri) -> Option<Bundle> {
        match uri.domain {
            Domain::Code => match uri.action.as_str() {
                "read" => Some(Bundle::CodebaseRead),
                "write" => Some(Bundle::CodebaseWrite),
                _ => None,
            },
            Domain::Shell => Some(Bundle::Shell),
            Domain::Network => Some(Bundle::Network),
            Domain::Ai | Domain::Extension => Some(Bundle::AiGenerate),
            Domain::Config | Domain::Install => Some(Bundle::SystemConfig),
            Domain::Capability | Domain::Governance | Domain::Consensus => Some(Bundle::Governance),
            _ => None,
        }
    }

    /// Bundles whose confirmation requirement can never be waived.
    pub fn is_security_invariant(&self) -> bool {
        matches!(self, Bundle::Shell | Bundle::Governance)
    }
}

/// The confirmation matrix's 4-level projection of trust tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyTier {
    Restricted,
    Standard,
    Elevated,
    Autonomous,
}

impl PolicyTier {
    pub const ALL: [PolicyTier; 4] = [
        PolicyTier::Restricted,
        PolicyTier::Standard,
        PolicyTier::Elevated,
        PolicyTier::Autonomous,
    ];

    pub fn from_trust(tier: TrustTier) -> PolicyTier {
        match tier {
            TrustTier::Untrusted | TrustTier::Probationary => PolicyTier::Restricted,
            TrustTier::Trusted => PolicyTier::Standard,
            TrustTier::Veteran => PolicyTier::Elevated,
            TrustTier::Autonomous => PolicyTier::Autonomous,
        }
    }

    /// Parse a trust-tier name into its policy tier; anything unknown maps
    /// to restricted.
    pub fn from_trust_name(name: &str) -> PolicyTier {
        TrustTier::parse(name)
            .map(PolicyTier::from_trust)
            .unwrap_or(PolicyTier::Restricted)
    }
}

/// Confirmation decision, ordered from most to least restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationMode {
    Deny,
    Gated,
    Auto,
}

/// The validated (bundle x policy-tier) table.
#[derive(Debug, Clone)]
pub struct ConfirmationMatrix {
    table: HashMap<(Bundle, PolicyTier), ConfirmationMode>,
}

impl Default for ConfirmationMatrix {
    fn default() -> Self {
        Self::standard()
    }
}

impl ConfirmationMatrix {
    /// The standard table.
    pub fn standard() -> Self {
        use Bundle::*;
        use ConfirmationMode::*;
        // Rows: restricted, standard, elevated, autonomous
        let rows: [(Bundle, [ConfirmationMode; 4]); 7] = [
            (CodebaseRead, [Auto, Auto, Auto, Auto]),
            (CodebaseWrite, [Gated, Gated, Auto, Auto]),
            (Shell, [Deny, Gated, Gated, Gated]),
            (Network, [Deny, Gated, Gated, Auto]),
            (AiGenerate, [Gated, Gated, Auto, Auto]),
            (SystemConfig, [Deny, Deny, Gated, Auto]),
            (Governance, [Deny, Gated, Gated, Gated]),
        ];
        let mut table = HashMap::new();
        for (bundle, modes) in rows {
            for (tier, mode) in PolicyTier::ALL.into_iter().zip(modes) {
                table.insert((bundle, tier), mode);
            }
        }
        let matrix = Self { table };
        matrix
            .validate()
            .expect("standard confirmation matrix violates its own security invariants");
        matrix
    }

    /// Enforce the security invariants over the whole table.
    pub fn validate(&self) -> Result<(), ArborError> {
        for tier in PolicyTier::ALL {
            if self.mode(Bundle::CodebaseRead, tier) != ConfirmationMode::Auto {
                return Err(ArborError::invalid_input("codebase_read must be auto at every tier"));
            }
            if self.mode(Bundle::Shell, tier) == ConfirmationMode::Auto {
                return Err(ArborError::invalid_input("shell must never be auto"));
            }
            if self.mode(Bundle::Governance, tier) == ConfirmationMode::Auto {
                return Err(ArborError::invalid_input("governance must never be auto"));
            }
            if tier >= PolicyTier::Standard
                && self.mode(Bundle::Shell, tier) != ConfirmationMode::Gated
            {
                return Err(ArborError::invalid_input("shell must be gated at standard and above"));
            }
        }
        if self.mode(Bundle::Shell, PolicyTier::Restricted) != ConfirmationMode::Deny {
            return Err(ArborError::invalid_input("shell must be deny at restricted"));
        }
        for bundle in Bundle::ALL {
            let mut previous = ConfirmationMode::Deny;
            for tier in PolicyTier::ALL {
                let mode = self.mode(bundle, tier);
                if mode < previous {
                    return Err(ArborError::invalid_input(format!(
                        "bundle {} regresses at tier {:?}",
                        bundle.as_str(),
                        tier
                    )));
                }
                previous = mode;
            }
        }
        Ok(())
    }

    /// Decision for a bundle at a policy tier. Missing cells deny.
    pub fn mode(&self, bundle: Bundle, tier: PolicyTier) -> ConfirmationMode {
        self.table
            .get(&(bundle, tier))
            .copied()
            .unwrap_or(ConfirmationMode::Deny)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_matrix_validates() {
        let matrix = ConfirmationMatrix::standard();
        assert!(matrix.validate().is_ok());
    }

    #[test]
    fn test_codebase_read_always_auto() {
        let matrix = ConfirmationMatrix::standard();
        for tier in PolicyTier::ALL {
            assert_eq!(matrix.mode(Bundle::CodebaseRead, tier), ConfirmationMode::Auto);
        }
    }

    #[test]
    fn test_shell_and_governance_never_auto() {
        let matrix = ConfirmationMatrix::standard();
        for tier in PolicyTier::ALL {
            assert_ne!(matrix.mode(Bundle::Shell, tier), ConfirmationMode::Auto);
            assert_ne!(matrix.mode(Bundle::Governance, tier), ConfirmationMode::Auto);
        }
        assert_eq!(
            matrix.mode(Bundle::Shell, PolicyTier::Restricted),
            ConfirmationMode::Deny
        );
        assert_eq!(
            matrix.mode(Bundle::Governance, PolicyTier::Autonomous),
            ConfirmationMode::Gated
        );
    }

    #[test]
    fn test_monotone_non_restrictive_progression() {
        let matrix = ConfirmationMatrix::standard();
        for bundle in Bundle::ALL {
            let mut previous = ConfirmationMode::Deny;
            for tier in PolicyTier::ALL {
                let mode = matrix.mode(bundle, tier);
                assert!(
                    mode >= previous,
                    "bundle {} regresses at {:?}",
                    bundle.as_str(),
                    tier
                );
                previous = mode;
            }
        }
    }

    #[test]
    fn test_policy_tier_projection() {
        assert_eq!(PolicyTier::from_trust(TrustTier::Untrusted), PolicyTier::Restricted);
        assert_eq!(PolicyTier::from_trust(TrustTier::Probationary), PolicyTier::Restricted);
        assert_eq!(PolicyTier::from_trust(TrustTier::Trusted), PolicyTier::Standard);
        assert_eq!(PolicyTier::from_trust(TrustTier::Veteran), PolicyTier::Elevated);
        assert_eq!(PolicyTier::from_trust(TrustTier::Autonomous), PolicyTier::Autonomous);
        // Fail-closed for unknown names
        assert_eq!(PolicyTier::from_trust_name("archmage"), PolicyTier::Restricted);
    }

    #[test]
    fn test_bundle_resolution() {
        let resolve = |uri: &str| Bundle::from_uri(&ResourceUri::parse(uri).unwrap());
        assert_eq!(resolve("arbor://code/read/a/x"), Some(Bundle::CodebaseRead));
        assert_eq!(resolve("arbor://code/write/a/x"), Some(Bundle::CodebaseWrite));
        assert_eq!(resolve("arbor://code/compile/a/x"), None);
        assert_eq!(resolve("arbor://shell/exec/a/ls"), Some(Bundle::Shell));
        assert_eq!(resolve("arbor://network/request/a/api"), Some(Bundle::Network));
        assert_eq!(resolve("arbor://ai/generate/a/prompt"), Some(Bundle::AiGenerate));
        assert_eq!(resolve("arbor://extension/reload/a/x"), Some(Bundle::AiGenerate));
        assert_eq!(resolve("arbor://config/reload/a"), Some(Bundle::SystemConfig));
        assert_eq!(resolve("arbor://install/exec/a/pkg"), Some(Bundle::SystemConfig));
        assert_eq!(resolve("arbor://capability/request/a"), Some(Bundle::Governance));
        assert_eq!(resolve("arbor://governance/request/a"), Some(Bundle::Governance));
        assert_eq!(resolve("arbor://consensus/emit/a"), Some(Bundle::Governance));
        assert_eq!(resolve("arbor://docs/read/shared/x"), None);
    }

    #[test]
    fn test_bundle_names_round_trip() {
        for bundle in Bundle::ALL {
            assert_eq!(Bundle::parse(bundle.as_str()), Some(bundle));
        }
        assert_eq!(Bundle::parse("warp_core"), None);
    }
}
