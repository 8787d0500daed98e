//! Arbor Core: Shared Domain Types
//!
//! Common vocabulary of the trust and capability subsystem:
//! - Trust tiers and the score-to-tier resolver
//! - Resource URIs (`arbor://domain/action/scope[/path]`)
//! - Trust event types and records
//! - The in-process trust notification bus
//! - The configuration surface
//! - Error kinds shared by every component

pub mod bus;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod tier;
pub mod uri;

// Re-exports
pub use bus::{TrustEventBus, TrustNotification};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ArborConfig, BreakerConfig, DecayConfig, GraduationThreshold, PointsConfig, ScoreWeights,
    TemplateEntryConfig, TrustManagerConfig,
};
pub use error::ArborError;
pub use event::{TrustEvent, TrustEventType};
pub use tier::{TierResolver, TierThresholds, TrustTier};
pub use uri::{substitute_self, Domain, ResourceUri};
