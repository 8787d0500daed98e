//! Arbor Trust: Behavioral Scoring and Trust Tiers
//!
//! Continuously scores each agent's behavior, maps the score to a discrete
//! trust tier, and keeps the rest of the platform informed:
//! - Profile store: the durable index of trust profiles
//! - Event store: append-only log with filtered queries and aggregations
//! - Trust manager: event-driven score updates, freezes, tier transitions
//! - Circuit breaker: sliding-window trip wire feeding freezes/demotions
//! - Decay: inactive agents slowly lose trust toward a floor

pub mod breaker;
pub mod decay;
pub mod event_store;
pub mod manager;
pub mod profile;

// Re-exports
pub use breaker::{BreakerCategory, BreakerTrip, CircuitBreaker, CircuitState};
pub use decay::{apply_decay, DecayScheduler};
pub use event_store::{
    AgentEventStats, EventFilter, EventPage, EventStore, EventStoreStats, SortOrder,
    SystemEventStats, TimelineEntry, TrustEventSink, TrustProgression,
};
pub use manager::TrustManager;
pub use profile::{CacheStats, ProfileFilter, ProfileStore, TrustProfile};
