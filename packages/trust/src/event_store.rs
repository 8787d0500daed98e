//! Append-Only Trust Event Log
//!
//! Keyed by agent, with filtered/paginated queries and the aggregations the
//! platform dashboards read. The in-memory log is the reference backend;
//! [`TrustEventSink`] is the swap point for a durable one.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use arbor_core::{ArborError, Clock, SystemClock, TrustEvent, TrustEventType};

/// Durable append boundary. The platform swaps in a persistent log here.
#[async_trait]
pub trait TrustEventSink: Send + Sync {
    async fn append(&self, event: TrustEvent) -> Result<(), ArborError>;

    async fn append_batch(&self, events: Vec<TrustEvent>) -> Result<(), ArborError> {
        for event in events {
            self.append(event).await?;
        }
        Ok(())
    }
}

/// Sort order for event queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Query filter for the event log.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub agent_id: Option<String>,
    pub event_type: Option<TrustEventType>,
    pub order: SortOrder,
    pub limit: Option<usize>,
}

/// One page of a cursor query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPage {
    pub events: Vec<TrustEvent>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// A timeline entry: the event plus the gap since the previous one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub event: TrustEvent,
    /// Seconds since the preceding event for the same agent, `None` for the
    /// first entry
    pub seconds_since_previous: Option<i64>,
}

/// Score movement summary for one agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustProgression {
    pub current_score: Option<u32>,
    pub min_score: Option<u32>,
    pub max_score: Option<u32>,
    pub total_positive_delta: i64,
    pub total_negative_delta: i64,
}

/// Per-agent event statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEventStats {
    pub agent_id: String,
    pub total_events: u64,
    pub by_type: HashMap<String, u64>,
    /// action_success / (action_success + action_failure), 0 when no actions
    pub success_rate: f64,
    pub security_violations: u64,
    pub negative_event_count: u64,
}

/// Log-wide statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemEventStats {
    pub total_events: u64,
    pub total_agents: usize,
    pub by_type: HashMap<String, u64>,
    pub negative_event_count: u64,
}

/// Store counters and a coarse memory estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventStoreStats {
    pub events_appended: u64,
    pub size: usize,
    pub memory_bytes: u64,
}

#[derive(Debug, Default)]
struct EventLog {
    events: Vec<TrustEvent>,
    by_id: HashMap<Uuid, usize>,
    by_agent: HashMap<String, Vec<usize>>,
}

/// In-memory append-only event store.
#[derive(Clone)]
pub struct EventStore {
    log: Arc<RwLock<EventLog>>,
    appended: Arc<AtomicU64>,
    clock: Arc<dyn Clock>,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl EventStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            log: Arc::new(RwLock::new(EventLog::default())),
            appended: Arc::new(AtomicU64::new(0)),
            clock,
        }
    }

    /// Append one event. Returns its id.
    pub fn store_event(&self, event: TrustEvent) -> Uuid {
        let id = event.id;
        let mut log = self.log.write();
        let idx = log.events.len();
        log.by_id.insert(id, idx);
        log.by_agent
            .entry(event.agent_id.clone())
            .or_default()
            .push(idx);
        log.events.push(event);
        self.appended.fetch_add(1, Ordering::Relaxed);
        id
    }

    /// Append a batch under a single lock acquisition.
    pub fn store_events(&self, events: Vec<TrustEvent>) -> Vec<Uuid> {
        let mut log = self.log.write();
        let mut ids = Vec::with_capacity(events.len());
        for event in events {
            let idx = log.events.len();
            ids.push(event.id);
            log.by_id.insert(event.id, idx);
            log.by_agent
                .entry(event.agent_id.clone())
                .or_default()
                .push(idx);
            log.events.push(event);
        }
        self.appended.fetch_add(ids.len() as u64, Ordering::Relaxed);
        ids
    }

    pub fn get_event(&self, id: Uuid) -> Option<TrustEvent> {
        let log = self.log.read();
        log.by_id.get(&id).map(|idx| log.events[*idx].clone())
    }

    fn matching(&self, filter: &EventFilter) -> Vec<TrustEvent> {
        let log = self.log.read();
        let mut events: Vec<TrustEvent> = match &filter.agent_id {
            Some(agent_id) => log
                .by_agent
                .get(agent_id)
                .map(|indices| indices.iter().map(|i| log.events[*i].clone()).collect())
                .unwrap_or_default(),
            None => log.events.clone(),
        };
        if let Some(event_type) = filter.event_type {
            events.retain(|e| e.event_type == event_type);
        }
        // Stable order across equal timestamps: (timestamp, id)
        events.sort_by(|a, b| {
            let key_a = (a.timestamp, a.id);
            let key_b = (b.timestamp, b.id);
            match filter.order {
                SortOrder::Asc => key_a.cmp(&key_b),
                SortOrder::Desc => key_b.cmp(&key_a),
            }
        });
        events
    }

    /// Filtered query, legacy list shape.
    pub fn get_events(&self, filter: &EventFilter) -> Vec<TrustEvent> {
        let mut events = self.matching(filter);
        if let Some(limit) = filter.limit {
            events.truncate(limit);
        }
        events
    }

    /// Filtered query, paginated shape. `filter.limit` is the page size.
    pub fn get_events_page(
        &self,
        filter: &EventFilter,
        cursor: Option<&str>,
    ) -> Result<EventPage, ArborError> {
        let page_size = filter.limit.unwrap_or(50);
        let events = self.matching(filter);

        let start = match cursor {
            None => 0,
            Some(cursor) => {
                let (ts, id) = decode_cursor(cursor)?;
                // First event strictly past the cursor position in this order
                events
                    .iter()
                    .position(|e| match filter.order {
                        SortOrder::Asc => (e.timestamp, e.id) > (ts, id),
                        SortOrder::Desc => (e.timestamp, e.id) < (ts, id),
                    })
                    .unwrap_or(events.len())
            }
        };

        let page: Vec<TrustEvent> = events.iter().skip(start).take(page_size).cloned().collect();
        let has_more = start + page.len() < events.len();
        let next_cursor = if has_more {
            page.last().map(|e| encode_cursor(e.timestamp, e.id))
        } else {
            None
        };

        Ok(EventPage {
            events: page,
            next_cursor,
            has_more,
        })
    }

    /// Events for an agent in ascending order, with inter-event gaps.
    pub fn agent_timeline(&self, agent_id: &str, limit: Option<usize>) -> Vec<TimelineEntry> {
        let filter = EventFilter {
            agent_id: Some(agent_id.to_string()),
            order: SortOrder::Asc,
            limit,
            ..Default::default()
        };
        let events = self.get_events(&filter);
        let mut previous: Option<DateTime<Utc>> = None;
        events
            .into_iter()
            .map(|event| {
                let gap = previous.map(|prev| (event.timestamp - prev).num_seconds());
                previous = Some(event.timestamp);
                TimelineEntry {
                    event,
                    seconds_since_previous: gap,
                }
            })
            .collect()
    }

    /// Score movement summary across an agent's event history.
    pub fn trust_progression(&self, agent_id: &str) -> TrustProgression {
        let filter = EventFilter {
            agent_id: Some(agent_id.to_string()),
            order: SortOrder::Asc,
            ..Default::default()
        };
        let mut progression = TrustProgression::default();
        for event in self.get_events(&filter) {
            if let Some(score) = event.new_score {
                progression.current_score = Some(score);
                progression.min_score =
                    Some(progression.min_score.map_or(score, |m| m.min(score)));
                progression.max_score =
                    Some(progression.max_score.map_or(score, |m| m.max(score)));
            }
            match event.score_delta() {
                Some(delta) if delta > 0 => progression.total_positive_delta += delta,
                Some(delta) if delta < 0 => progression.total_negative_delta += delta.abs(),
                _ => {}
            }
        }
        progression
    }

    /// Tier transitions for an agent, ascending.
    pub fn tier_history(&self, agent_id: &str) -> Vec<TrustEvent> {
        self.get_events(&EventFilter {
            agent_id: Some(agent_id.to_string()),
            event_type: Some(TrustEventType::TierChanged),
            order: SortOrder::Asc,
            ..Default::default()
        })
    }

    /// Totals and per-type breakdown for one agent.
    pub fn agent_stats(&self, agent_id: &str) -> AgentEventStats {
        let events = self.get_events(&EventFilter {
            agent_id: Some(agent_id.to_string()),
            order: SortOrder::Asc,
            ..Default::default()
        });
        let mut by_type: HashMap<String, u64> = HashMap::new();
        let mut negative = 0u64;
        for event in &events {
            *by_type.entry(event.event_type.as_str().to_string()).or_default() += 1;
            if event.event_type.is_negative() {
                negative += 1;
            }
        }
        let successes = *by_type.get("action_success").unwrap_or(&0);
        let failures = *by_type.get("action_failure").unwrap_or(&0);
        let success_rate = if successes + failures > 0 {
            successes as f64 / (successes + failures) as f64
        } else {
            0.0
        };
        AgentEventStats {
            agent_id: agent_id.to_string(),
            total_events: events.len() as u64,
            success_rate,
            security_violations: *by_type.get("security_violation").unwrap_or(&0),
            negative_event_count: negative,
            by_type,
        }
    }

    /// Totals across the whole log.
    pub fn system_stats(&self) -> SystemEventStats {
        let log = self.log.read();
        let mut by_type: HashMap<String, u64> = HashMap::new();
        let mut negative = 0u64;
        for event in &log.events {
            *by_type.entry(event.event_type.as_str().to_string()).or_default() += 1;
            if event.event_type.is_negative() {
                negative += 1;
            }
        }
        SystemEventStats {
            total_events: log.events.len() as u64,
            total_agents: log.by_agent.len(),
            by_type,
            negative_event_count: negative,
        }
    }

    /// Negative events across all agents within the lookback window,
    /// newest first.
    pub fn recent_negative_events(&self, since_minutes: i64, limit: usize) -> Vec<TrustEvent> {
        let cutoff = self.clock.now() - chrono::Duration::minutes(since_minutes);
        let log = self.log.read();
        let mut events: Vec<TrustEvent> = log
            .events
            .iter()
            .filter(|e| e.event_type.is_negative() && e.timestamp >= cutoff)
            .cloned()
            .collect();
        events.sort_by(|a, b| (b.timestamp, b.id).cmp(&(a.timestamp, a.id)));
        events.truncate(limit);
        events
    }

    pub fn stats(&self) -> EventStoreStats {
        let log = self.log.read();
        let memory_bytes = log
            .events
            .iter()
            .map(|e| {
                (std::mem::size_of::<TrustEvent>()
                    + e.agent_id.len()
                    + e.reason.as_ref().map_or(0, String::len)) as u64
            })
            .sum();
        EventStoreStats {
            events_appended: self.appended.load(Ordering::Relaxed),
            size: log.events.len(),
            memory_bytes,
        }
    }
}

#[async_trait]
impl TrustEventSink for EventStore {
    async fn append(&self, event: TrustEvent) -> Result<(), ArborError> {
        self.store_event(event);
        Ok(())
    }

    async fn append_batch(&self, events: Vec<TrustEvent>) -> Result<(), ArborError> {
        self.store_events(events);
        Ok(())
    }
}

fn encode_cursor(timestamp: DateTime<Utc>, id: Uuid) -> String {
    let raw = format!("{}|{}", timestamp.timestamp_micros(), id);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw)
}

fn decode_cursor(cursor: &str) -> Result<(DateTime<Utc>, Uuid), ArborError> {
    let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| ArborError::invalid_input("malformed cursor"))?;
    let raw = String::from_utf8(raw).map_err(|_| ArborError::invalid_input("malformed cursor"))?;
    let (micros, id) = raw
        .split_once('|')
        .ok_or_else(|| ArborError::invalid_input("malformed cursor"))?;
    let micros: i64 = micros
        .parse()
        .map_err(|_| ArborError::invalid_input("malformed cursor"))?;
    let timestamp = DateTime::<Utc>::from_timestamp_micros(micros)
        .ok_or_else(|| ArborError::invalid_input("malformed cursor"))?;
    let id = Uuid::parse_str(id).map_err(|_| ArborError::invalid_input("malformed cursor"))?;
    Ok((timestamp, id))
}
