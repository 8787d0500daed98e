//! Trust lifecycle integration tests
//!
//! Full flows through the trust manager: breaker-driven freezes and
//! recovery, inactivity decay, and event-log pagination.

use std::collections::HashMap;
use std::sync::Arc;

use arbor_core::{ArborConfig, ArborError, ManualClock, TrustEventType, TrustTier};
use arbor_trust::{EventFilter, SortOrder, TrustManager};
use chrono::{Duration, Utc};

fn manager_with_clock() -> (TrustManager, ManualClock) {
    let clock = ManualClock::new(Utc::now());
    let manager = TrustManager::new(&ArborConfig::default(), Arc::new(clock.clone()));
    (manager, clock)
}

fn meta() -> HashMap<String, serde_json::Value> {
    HashMap::new()
}

/// Five rapid failures open the circuit and freeze the agent; after the
/// freeze and half-open windows pass with no further failures, the circuit
/// closes again.
#[test]
fn circuit_breaker_freeze_and_recovery() {
    let (manager, clock) = manager_with_clock();
    manager.create_profile("agent-a").unwrap();

    for _ in 0..5 {
        manager.record_event("agent-a", TrustEventType::ActionFailure, meta());
    }

    let breaker = manager.breaker().unwrap();
    assert!(matches!(
        breaker.check("agent-a"),
        Err(ArborError::CircuitOpen { .. })
    ));
    let profile = manager.get_profile("agent-a").unwrap();
    assert!(profile.frozen);
    assert!(profile
        .frozen_reason
        .as_deref()
        .unwrap()
        .contains("rapid_failure"));

    // Freeze window (1 day), then the half-open probe window (1 hour)
    clock.advance(Duration::seconds(86_400));
    assert!(breaker.check("agent-a").is_err());
    clock.advance(Duration::seconds(3600));
    assert!(breaker.check("agent-a").is_ok());
}

/// Freezing blocks authorization at any tier; unfreezing restores the
/// outcome the agent had before.
#[test]
fn freeze_blocks_and_unfreeze_restores_authorization() {
    let (manager, _clock) = manager_with_clock();
    manager.create_profile("agent-a").unwrap();
    manager.set_tier("agent-a", TrustTier::Trusted).unwrap();

    assert!(manager
        .check_authorization("agent-a", TrustTier::Trusted)
        .is_ok());

    manager.freeze("agent-a", "operator action").unwrap();
    assert!(matches!(
        manager.check_authorization("agent-a", TrustTier::Untrusted),
        Err(ArborError::TrustFrozen { .. })
    ));

    manager.unfreeze("agent-a").unwrap();
    assert!(manager
        .check_authorization("agent-a", TrustTier::Trusted)
        .is_ok());
    assert!(matches!(
        manager.check_authorization("agent-a", TrustTier::Veteran),
        Err(ArborError::InsufficientTrust { .. })
    ));
}

/// A profile idle for 20 days at score 50 decays to 37 and drops a tier.
#[test]
fn decay_reduces_idle_profiles() {
    let (manager, clock) = manager_with_clock();
    manager.create_profile("agent-a").unwrap();
    manager.set_tier("agent-a", TrustTier::Trusted).unwrap();
    assert_eq!(manager.get_profile("agent-a").unwrap().trust_score, 50);

    clock.advance(Duration::days(20));
    let decayed = manager.run_decay_check();
    assert_eq!(decayed, 1);

    let profile = manager.get_profile("agent-a").unwrap();
    assert_eq!(profile.trust_score, 37);
    assert_eq!(profile.tier, TrustTier::Probationary);

    // The decay and the tier change are both on the record
    let stats = manager.event_store().agent_stats("agent-a");
    assert_eq!(*stats.by_type.get("trust_decayed").unwrap(), 1);
    assert!(stats.by_type.contains_key("tier_changed"));

    // Decay is not activity: the inactivity window keeps growing
    assert!(manager.get_profile("agent-a").unwrap().last_activity_at.is_none());
}

/// Seven events paginate as 3/3/1 in descending order with disjoint pages.
#[test]
fn event_log_pagination() {
    let (manager, clock) = manager_with_clock();
    manager.create_profile("agent-a").unwrap();
    for _ in 0..7 {
        clock.advance(Duration::seconds(1));
        manager.record_event("agent-a", TrustEventType::ActionSuccess, meta());
    }

    let filter = EventFilter {
        agent_id: Some("agent-a".into()),
        event_type: Some(TrustEventType::ActionSuccess),
        order: SortOrder::Desc,
        limit: Some(3),
    };
    let store = manager.event_store();

    let page1 = store.get_events_page(&filter, None).unwrap();
    let page2 = store.get_events_page(&filter, page1.next_cursor.as_deref()).unwrap();
    let page3 = store.get_events_page(&filter, page2.next_cursor.as_deref()).unwrap();

    assert_eq!(page1.events.len(), 3);
    assert_eq!(page2.events.len(), 3);
    assert_eq!(page3.events.len(), 1);
    assert!(page1.has_more);
    assert!(page2.has_more);
    assert!(!page3.has_more);

    let mut ids = Vec::new();
    for page in [&page1, &page2, &page3] {
        for event in &page.events {
            assert!(!ids.contains(&event.id), "pages overlap");
            ids.push(event.id);
        }
        // Descending within each page
        for pair in page.events.windows(2) {
            assert!(pair[0].timestamp >= pair[1].timestamp);
        }
    }
    assert_eq!(ids.len(), 7);
}

/// The event log survives a profile's whole arc and the aggregations agree
/// with it.
#[test]
fn event_log_aggregations_follow_profile_history() {
    let (manager, clock) = manager_with_clock();
    manager.create_profile("agent-a").unwrap();

    for _ in 0..4 {
        clock.advance(Duration::seconds(10));
        manager.record_event("agent-a", TrustEventType::ActionSuccess, meta());
    }
    clock.advance(Duration::seconds(10));
    manager.record_event("agent-a", TrustEventType::SecurityViolation, meta());

    let stats = manager.event_store().agent_stats("agent-a");
    assert_eq!(stats.success_rate, 1.0);
    assert_eq!(stats.security_violations, 1);
    assert_eq!(stats.negative_event_count, 1);

    let progression = manager.event_store().trust_progression("agent-a");
    let profile = manager.get_profile("agent-a").unwrap();
    assert_eq!(progression.current_score, Some(profile.trust_score));
    assert!(progression.total_negative_delta > 0);

    let timeline = manager.event_store().agent_timeline("agent-a", None);
    assert_eq!(timeline.last().unwrap().seconds_since_previous, Some(10));

    let system = manager.event_store().system_stats();
    assert_eq!(system.total_agents, 1);

    let recent = manager.event_store().recent_negative_events(60, 10);
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].event_type, TrustEventType::SecurityViolation);
}
