//! Per-Tier Capability Templates
//!
//! Static catalog of what each trust tier is allowed to hold, overridable
//! from configuration. Patterns use `self` as the scope placeholder and may
//! end in a trailing `*`. Each tier's list is complete (higher tiers repeat
//! what lower tiers hold, often with looser constraints); the set can only
//! grow with tier.

use serde_json::json;
use std::collections::HashMap;

use arbor_core::{
    substitute_self, ArborError, GraduationThreshold, ResourceUri, TemplateEntryConfig, TrustTier,
};

use crate::types::Constraints;

/// One template entry: a URI pattern plus the constraints granted with it.
#[derive(Debug, Clone)]
pub struct TemplateEntry {
    pub resource_uri_pattern: String,
    pub constraints: Constraints,
}

impl TemplateEntry {
    fn new(pattern: &str, constraints: Constraints) -> Self {
        Self {
            resource_uri_pattern: pattern.to_string(),
            constraints,
        }
    }

    /// Pattern match against a concrete URI; the `self` scope placeholder
    /// matches any scope.
    fn covers(&self, concrete: &ResourceUri) -> bool {
        let Ok(mut pattern) = ResourceUri::parse(&self.resource_uri_pattern) else {
            return false;
        };
        if pattern.scope == "self" {
            pattern.scope = concrete.scope.clone();
        }
        pattern.matches(concrete)
    }
}

fn constraints(entries: &[(&str, serde_json::Value)]) -> Constraints {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// The per-tier capability catalog.
#[derive(Debug, Clone)]
pub struct CapabilityTemplates {
    by_tier: HashMap<TrustTier, Vec<TemplateEntry>>,
}

impl Default for CapabilityTemplates {
    fn default() -> Self {
        Self::builtin()
    }
}

impl CapabilityTemplates {
    /// The built-in catalog.
    pub fn builtin() -> Self {
        let untrusted = vec![
            TemplateEntry::new("arbor://code/read/self/*", Constraints::new()),
            TemplateEntry::new("arbor://activity/read/self", Constraints::new()),
        ];

        let mut probationary = untrusted.clone();
        probationary.extend([
            TemplateEntry::new("arbor://docs/read/shared/*", Constraints::new()),
            TemplateEntry::new("arbor://test/read/self/*", Constraints::new()),
            TemplateEntry::new(
                "arbor://code/write/self/*",
                constraints(&[("requires_approval", json!(true)), ("rate_limit", json!(10))]),
            ),
        ]);

        let mut trusted: Vec<TemplateEntry> = probationary
            .iter()
            .map(|e| {
                if e.resource_uri_pattern == "arbor://code/write/self/*" {
                    // Same capability, looser constraints at this tier
                    TemplateEntry::new(
                        "arbor://code/write/self/*",
                        constraints(&[("rate_limit", json!(30))]),
                    )
                } else {
                    e.clone()
                }
            })
            .collect();
        trusted.extend([
            TemplateEntry::new("arbor://git/read/self/*", Constraints::new()),
            TemplateEntry::new(
                "arbor://test/exec/self/*",
                constraints(&[("rate_limit", json!(30))]),
            ),
            TemplateEntry::new("arbor://roadmap/read/shared/*", Constraints::new()),
            TemplateEntry::new("arbor://signals/emit/self", Constraints::new()),
        ]);

        let mut veteran = trusted.clone();
        veteran.extend([
            TemplateEntry::new(
                "arbor://network/request/self/*",
                constraints(&[("requires_approval", json!(true)), ("rate_limit", json!(60))]),
            ),
            TemplateEntry::new(
                "arbor://ai/generate/self/*",
                constraints(&[("rate_limit", json!(120))]),
            ),
            TemplateEntry::new(
                "arbor://config/reload/self",
                constraints(&[("requires_approval", json!(true))]),
            ),
        ]);

        let mut autonomous = veteran.clone();
        autonomous.extend([
            TemplateEntry::new(
                "arbor://shell/exec/self/*",
                constraints(&[("requires_approval", json!(true))]),
            ),
            TemplateEntry::new(
                "arbor://install/exec/self/*",
                constraints(&[("requires_approval", json!(true))]),
            ),
            TemplateEntry::new(
                "arbor://governance/request/self",
                constraints(&[("requires_approval", json!(true))]),
            ),
        ]);

        let mut by_tier = HashMap::new();
        by_tier.insert(TrustTier::Untrusted, untrusted);
        by_tier.insert(TrustTier::Probationary, probationary);
        by_tier.insert(TrustTier::Trusted, trusted);
        by_tier.insert(TrustTier::Veteran, veteran);
        by_tier.insert(TrustTier::Autonomous, autonomous);
        Self { by_tier }
    }

    /// Catalog from a configuration override. Rejects catalogs whose entry
    /// count shrinks as tier grows.
    pub fn from_config(
        overrides: &HashMap<TrustTier, Vec<TemplateEntryConfig>>,
    ) -> Result<Self, ArborError> {
        let mut by_tier = HashMap::new();
        for tier in TrustTier::ALL {
            let entries = overrides
                .get(&tier)
                .map(|entries| {
                    entries
                        .iter()
                        .map(|e| TemplateEntry {
                            resource_uri_pattern: e.resource_uri_pattern.clone(),
                            constraints: e.constraints.clone(),
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            by_tier.insert(tier, entries);
        }
        let templates = Self { by_tier };
        let mut previous = 0;
        for tier in TrustTier::ALL {
            let count = templates.capabilities_for_tier(tier).len();
            if count < previous {
                return Err(ArborError::invalid_input(format!(
                    "capability templates shrink at tier {}",
                    tier.as_str()
                )));
            }
            previous = count;
        }
        Ok(templates)
    }

    /// Entries granted at a tier.
    pub fn capabilities_for_tier(&self, tier: TrustTier) -> &[TemplateEntry] {
        self.by_tier.get(&tier).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Concrete (uri, constraints) pairs for an agent at a tier, with the
    /// `self` placeholder substituted.
    pub fn generate_capabilities(
        &self,
        agent_id: &str,
        tier: TrustTier,
    ) -> Vec<(String, Constraints)> {
        self.capabilities_for_tier(tier)
            .iter()
            .map(|entry| {
                (
                    substitute_self(&entry.resource_uri_pattern, agent_id),
                    entry.constraints.clone(),
                )
            })
            .collect()
    }

    /// Entries present at `to` but not `from`, compared by URI pattern.
    pub fn capabilities_gained(&self, from: TrustTier, to: TrustTier) -> Vec<&TemplateEntry> {
        let from_uris: Vec<&str> = self
            .capabilities_for_tier(from)
            .iter()
            .map(|e| e.resource_uri_pattern.as_str())
            .collect();
        self.capabilities_for_tier(to)
            .iter()
            .filter(|e| !from_uris.contains(&e.resource_uri_pattern.as_str()))
            .collect()
    }

    /// Entries present at `from` but not `to`.
    pub fn capabilities_lost(&self, from: TrustTier, to: TrustTier) -> Vec<&TemplateEntry> {
        self.capabilities_gained(to, from)
    }

    /// Does a tier hold a capability covering this URI?
    pub fn has_capability(&self, tier: TrustTier, uri: &str) -> bool {
        let Ok(concrete) = ResourceUri::parse(uri) else {
            return false;
        };
        self.capabilities_for_tier(tier)
            .iter()
            .any(|e| e.covers(&concrete))
    }

    /// Constraints of the first entry covering this URI at a tier.
    pub fn get_constraints(&self, tier: TrustTier, uri: &str) -> Option<&Constraints> {
        let concrete = ResourceUri::parse(uri).ok()?;
        self.capabilities_for_tier(tier)
            .iter()
            .find(|e| e.covers(&concrete))
            .map(|e| &e.constraints)
    }

    /// Lowest tier holding a capability covering this URI.
    pub fn min_tier_for_capability(&self, uri: &str) -> Option<TrustTier> {
        TrustTier::ALL
            .into_iter()
            .find(|tier| self.has_capability(*tier, uri))
    }

    pub fn requires_approval(&self, tier: TrustTier, uri: &str) -> bool {
        self.get_constraints(tier, uri)
            .and_then(|c| c.get("requires_approval"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn rate_limit(&self, tier: TrustTier, uri: &str) -> Option<u64> {
        self.get_constraints(tier, uri)?
            .get("rate_limit")
            .and_then(|v| v.as_u64())
    }

    /// Default graduation thresholds for the confirmation bundles.
    pub fn default_thresholds() -> HashMap<String, GraduationThreshold> {
        HashMap::from([
            ("codebase_read".to_string(), GraduationThreshold::Count(0)),
            ("codebase_write".to_string(), GraduationThreshold::Count(3)),
            ("network".to_string(), GraduationThreshold::Count(5)),
            ("ai_generate".to_string(), GraduationThreshold::Count(3)),
            ("system_config".to_string(), GraduationThreshold::Count(10)),
            ("shell".to_string(), GraduationThreshold::Never),
            ("governance".to_string(), GraduationThreshold::Never),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_non_decreasing_with_tier() {
        let templates = CapabilityTemplates::builtin();
        let mut previous = 0;
        for tier in TrustTier::ALL {
            let count = templates.capabilities_for_tier(tier).len();
            assert!(count >= previous, "tier {} shrank", tier.as_str());
            previous = count;
        }
        assert_eq!(templates.capabilities_for_tier(TrustTier::Untrusted).len(), 2);
    }

    #[test]
    fn test_generate_substitutes_self() {
        let templates = CapabilityTemplates::builtin();
        let generated = templates.generate_capabilities("agent-7", TrustTier::Untrusted);
        assert_eq!(generated.len(), 2);
        for (uri, _) in &generated {
            assert!(uri.contains("agent-7"), "{uri}");
            assert!(!uri.contains("/self"), "{uri}");
        }
    }

    #[test]
    fn test_gained_and_lost_are_set_differences() {
        let templates = CapabilityTemplates::builtin();
        let gained = templates.capabilities_gained(TrustTier::Untrusted, TrustTier::Probationary);
        assert_eq!(gained.len(), 3);

        let lost = templates.capabilities_lost(TrustTier::Probationary, TrustTier::Untrusted);
        assert_eq!(lost.len(), 3);

        // Same URI with different constraints is the same capability
        let gained = templates.capabilities_gained(TrustTier::Probationary, TrustTier::Trusted);
        assert!(gained
            .iter()
            .all(|e| e.resource_uri_pattern != "arbor://code/write/self/*"));

        assert!(templates
            .capabilities_gained(TrustTier::Trusted, TrustTier::Trusted)
            .is_empty());
    }

    #[test]
    fn test_has_capability_wildcards() {
        let templates = CapabilityTemplates::builtin();
        assert!(templates.has_capability(TrustTier::Untrusted, "arbor://code/read/agent-1/src/lib.rs"));
        assert!(!templates.has_capability(TrustTier::Untrusted, "arbor://code/write/agent-1/src/lib.rs"));
        assert!(templates.has_capability(TrustTier::Autonomous, "arbor://shell/exec/agent-1/ls"));
        assert!(!templates.has_capability(TrustTier::Veteran, "arbor://shell/exec/agent-1/ls"));
    }

    #[test]
    fn test_min_tier_for_capability() {
        let templates = CapabilityTemplates::builtin();
        assert_eq!(
            templates.min_tier_for_capability("arbor://code/read/a/x"),
            Some(TrustTier::Untrusted)
        );
        assert_eq!(
            templates.min_tier_for_capability("arbor://code/write/a/x"),
            Some(TrustTier::Probationary)
        );
        assert_eq!(
            templates.min_tier_for_capability("arbor://shell/exec/a/ls"),
            Some(TrustTier::Autonomous)
        );
        assert_eq!(templates.min_tier_for_capability("arbor://git/write/a/x"), None);
    }

    #[test]
    fn test_constraints_tighten_by_tier() {
        let templates = CapabilityTemplates::builtin();
        // Probationary writes need approval; trusted writes do not
        assert!(templates.requires_approval(TrustTier::Probationary, "arbor://code/write/a/x"));
        assert!(!templates.requires_approval(TrustTier::Trusted, "arbor://code/write/a/x"));
        assert_eq!(
            templates.rate_limit(TrustTier::Probationary, "arbor://code/write/a/x"),
            Some(10)
        );
        assert_eq!(
            templates.rate_limit(TrustTier::Trusted, "arbor://code/write/a/x"),
            Some(30)
        );
    }

    #[test]
    fn test_config_override_rejects_shrinking_catalog() {
        let mut overrides = HashMap::new();
        overrides.insert(
            TrustTier::Untrusted,
            vec![TemplateEntryConfig {
                resource_uri_pattern: "arbor://code/read/self/*".into(),
                constraints: HashMap::new(),
            }],
        );
        // Higher tiers default to empty: shrinks, must be rejected
        assert!(CapabilityTemplates::from_config(&overrides).is_err());

        overrides.insert(
            TrustTier::Probationary,
            vec![
                TemplateEntryConfig {
                    resource_uri_pattern: "arbor://code/read/self/*".into(),
                    constraints: HashMap::new(),
                },
                TemplateEntryConfig {
                    resource_uri_pattern: "arbor://docs/read/shared/*".into(),
                    constraints: HashMap::new(),
                },
            ],
        );
        for tier in [TrustTier::Trusted, TrustTier::Veteran, TrustTier::Autonomous] {
            overrides.insert(
                tier,
                vec![
                    TemplateEntryConfig {
                        resource_uri_pattern: "arbor://code/read/self/*".into(),
                        constraints: HashMap::new(),
                    },
                    TemplateEntryConfig {
                        resource_uri_pattern: "arbor://docs/read/shared/*".into(),
                        constraints: HashMap::new(),
                    },
                ],
            );
        }
        let templates = CapabilityTemplates::from_config(&overrides).unwrap();
        assert_eq!(templates.capabilities_for_tier(TrustTier::Untrusted).len(), 1);
        assert!(templates.has_capability(TrustTier::Probationary, "arbor://docs/read/shared/guide.md"));
    }
}
