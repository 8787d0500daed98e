//! Resource URI Grammar
//!
//! `arbor://<domain>/<action>/<scope>[/<path>]` identifies every privileged
//! operation. Patterns may end in a trailing `*` wildcard; `self` in the
//! scope position is a placeholder substituted with an agent id at grant
//! time.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ArborError;

const SCHEME_PREFIX: &str = "arbor://";

/// Closed set of resource domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Code,
    Roadmap,
    Git,
    Activity,
    Consensus,
    Test,
    Docs,
    Config,
    Install,
    Extension,
    Shell,
    Network,
    Signals,
    Ai,
    Capability,
    Governance,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Code => "code",
            Domain::Roadmap => "roadmap",
            Domain::Git => "git",
            Domain::Activity => "activity",
            Domain::Consensus => "consensus",
            Domain::Test => "test",
            Domain::Docs => "docs",
            Domain::Config => "config",
            Domain::Install => "install",
            Domain::Extension => "extension",
            Domain::Shell => "shell",
            Domain::Network => "network",
            Domain::Signals => "signals",
            Domain::Ai => "ai",
            Domain::Capability => "capability",
            Domain::Governance => "governance",
        }
    }

    pub fn parse(s: &str) -> Option<Domain> {
        match s {
            "code" => Some(Domain::Code),
            "roadmap" => Some(Domain::Roadmap),
            "git" => Some(Domain::Git),
            "activity" => Some(Domain::Activity),
            "consensus" => Some(Domain::Consensus),
            "test" => Some(Domain::Test),
            "docs" => Some(Domain::Docs),
            "config" => Some(Domain::Config),
            "install" => Some(Domain::Install),
            "extension" => Some(Domain::Extension),
            "shell" => Some(Domain::Shell),
            "network" => Some(Domain::Network),
            "signals" => Some(Domain::Signals),
            "ai" => Some(Domain::Ai),
            "capability" => Some(Domain::Capability),
            "governance" => Some(Domain::Governance),
            _ => None,
        }
    }
}

/// A parsed resource URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceUri {
    /// Resource domain
    pub domain: Domain,
    /// Short verb (read, write, exec, ...)
    pub action: String,
    /// Scope: an agent id, `self` placeholder, or literal identifier
    pub scope: String,
    /// Optional trailing path, possibly ending in `*`
    pub path: Option<String>,
}

impl ResourceUri {
    /// Parse a full URI. Fails with `InvalidInput` on malformed input.
    pub fn parse(uri: &str) -> Result<ResourceUri, ArborError> {
        let rest = uri
            .strip_prefix(SCHEME_PREFIX)
            .ok_or_else(|| ArborError::invalid_input(format!("missing arbor:// scheme: {uri}")))?;

        let mut segments = rest.splitn(4, '/');
        let domain_str = segments.next().unwrap_or_default();
        let action = segments.next().unwrap_or_default();
        let scope = segments.next().unwrap_or_default();
        let path = segments.next().filter(|p| !p.is_empty());

        let domain = Domain::parse(domain_str)
            .ok_or_else(|| ArborError::invalid_input(format!("unknown domain: {domain_str}")))?;

        if action.is_empty() || scope.is_empty() {
            return Err(ArborError::invalid_input(format!(
                "uri requires domain/action/scope: {uri}"
            )));
        }

        Ok(ResourceUri {
            domain,
            action: action.to_string(),
            scope: scope.to_string(),
            path: path.map(str::to_string),
        })
    }

    /// The `domain/action` pair used for bundle resolution.
    pub fn route(&self) -> String {
        format!("{}/{}", self.domain.as_str(), self.action)
    }

    /// True if this URI (as a pattern) matches a concrete URI.
    ///
    /// Matching is exact, or prefix up to a trailing `*` in the path.
    pub fn matches(&self, concrete: &ResourceUri) -> bool {
        if self.domain != concrete.domain || self.action != concrete.action {
            return false;
        }
        if self.scope != "*" && self.scope != concrete.scope {
            return false;
        }
        match (&self.path, &concrete.path) {
            (None, None) => true,
            (None, Some(_)) => false,
            (Some(pattern), concrete_path) => {
                if let Some(prefix) = pattern.strip_suffix('*') {
                    concrete_path
                        .as_deref()
                        .unwrap_or("")
                        .starts_with(prefix)
                } else {
                    concrete_path.as_deref() == Some(pattern.as_str())
                }
            }
        }
    }

    /// String-level pattern match used where only the pattern text is known.
    pub fn pattern_matches(pattern: &str, concrete: &str) -> bool {
        if let Some(prefix) = pattern.strip_suffix('*') {
            concrete.starts_with(prefix)
        } else {
            pattern == concrete
        }
    }
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}/{}/{}",
            SCHEME_PREFIX,
            self.domain.as_str(),
            self.action,
            self.scope
        )?;
        if let Some(path) = &self.path {
            write!(f, "/{path}")?;
        }
        Ok(())
    }
}

/// Substitute the `self` scope placeholder with an agent id.
///
/// Handles both `/self/` mid-URI and `/self` at the end.
pub fn substitute_self(pattern: &str, agent_id: &str) -> String {
    if let Some(rest) = pattern
        .find("/self/")
        .map(|idx| (&pattern[..idx], &pattern[idx + "/self/".len()..]))
    {
        return format!("{}/{}/{}", rest.0, agent_id, rest.1);
    }
    if let Some(prefix) = pattern.strip_suffix("/self") {
        return format!("{prefix}/{agent_id}");
    }
    pattern.to_string()
}
