//! Arbor Capability: Signed Capabilities and Confirmation Policy
//!
//! Derives what each agent may do from its trust tier:
//! - Templates: the per-tier capability catalog
//! - System authority: the process signing identity
//! - Capability store: grant, revoke, authorize over signed capabilities
//! - Confirmation matrix and tracker: auto/gated/deny decisions with
//!   graduation after approval streaks
//! - Policy: the bridge external subsystems query
//! - Sync: keeps capabilities consistent with trust transitions

pub mod authority;
pub mod matrix;
pub mod policy;
pub mod store;
pub mod sync;
pub mod templates;
pub mod tracker;
pub mod types;

// Re-exports
pub use authority::{verify_with_key, verify_with_key_base64, SystemAuthority};
pub use matrix::{Bundle, ConfirmationMatrix, ConfirmationMode, PolicyTier};
pub use policy::{Policy, SyncOutcome};
pub use store::CapabilityStore;
pub use sync::CapabilitySync;
pub use templates::{CapabilityTemplates, TemplateEntry};
pub use tracker::{ApprovalOutcome, ConfirmationEntry, ConfirmationTracker};
pub use types::{Capability, Constraints};
