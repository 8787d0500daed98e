//! Per-Agent Circuit Breaker
//!
//! Sliding windows over negative event timestamps. A breach opens the
//! circuit and freezes the agent; the circuit then walks open -> half-open
//! -> closed on the configured schedule. Rollback breaches are the
//! exception: they report for tier demotion and never open the circuit.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::watch;

use arbor_core::{ArborError, BreakerConfig, Clock, SystemClock};

/// Event categories the breaker observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerCategory {
    RapidFailure,
    SecurityViolation,
    Rollback,
    TestFailure,
}

impl BreakerCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerCategory::RapidFailure => "rapid_failure",
            BreakerCategory::SecurityViolation => "security_violation",
            BreakerCategory::Rollback => "rollback",
            BreakerCategory::TestFailure => "test_failure",
        }
    }
}

/// Circuit state for one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Breached; operations blocked
    Open,
    /// Probation window before auto-close
    HalfOpen,
}

/// What a recorded event triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTrip {
    /// Threshold breached; the agent must be frozen
    Freeze(BreakerCategory),
    /// Rollback threshold breached; the agent's tier must be demoted
    Demote,
}

#[derive(Debug, Default)]
struct AgentCircuit {
    state: Option<CircuitState>,
    opened_at: Option<DateTime<Utc>>,
    half_opened_at: Option<DateTime<Utc>>,
    rapid_failures: VecDeque<DateTime<Utc>>,
    security_violations: VecDeque<DateTime<Utc>>,
    rollbacks: VecDeque<DateTime<Utc>>,
    test_failures: VecDeque<DateTime<Utc>>,
}

impl AgentCircuit {
    fn state(&self) -> CircuitState {
        self.state.unwrap_or(CircuitState::Closed)
    }

    fn window_mut(&mut self, category: BreakerCategory) -> &mut VecDeque<DateTime<Utc>> {
        match category {
            BreakerCategory::RapidFailure => &mut self.rapid_failures,
            BreakerCategory::SecurityViolation => &mut self.security_violations,
            BreakerCategory::Rollback => &mut self.rollbacks,
            BreakerCategory::TestFailure => &mut self.test_failures,
        }
    }

    fn prune_all(&mut self, cutoff: DateTime<Utc>) {
        for window in [
            &mut self.rapid_failures,
            &mut self.security_violations,
            &mut self.rollbacks,
            &mut self.test_failures,
        ] {
            while window.front().is_some_and(|t| *t < cutoff) {
                window.pop_front();
            }
        }
    }
}

/// Sliding-window circuit breaker over per-agent negative events.
#[derive(Clone)]
pub struct CircuitBreaker {
    circuits: Arc<RwLock<HashMap<String, AgentCircuit>>>,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default(), Arc::new(SystemClock))
    }
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            circuits: Arc::new(RwLock::new(HashMap::new())),
            config,
            clock,
        }
    }

    fn limits(&self, category: BreakerCategory) -> (usize, Duration) {
        match category {
            BreakerCategory::RapidFailure => (
                self.config.rapid_failure_threshold,
                Duration::seconds(self.config.rapid_failure_window_seconds),
            ),
            BreakerCategory::SecurityViolation => (
                self.config.security_violation_threshold,
                Duration::seconds(self.config.security_violation_window_seconds),
            ),
            BreakerCategory::Rollback => (
                self.config.rollback_threshold,
                Duration::seconds(self.config.rollback_window_seconds),
            ),
            BreakerCategory::TestFailure => (
                self.config.test_failure_threshold,
                Duration::seconds(self.config.test_failure_window_seconds),
            ),
        }
    }

    fn longest_window(&self) -> Duration {
        Duration::seconds(
            self.config
                .rapid_failure_window_seconds
                .max(self.config.security_violation_window_seconds)
                .max(self.config.rollback_window_seconds)
                .max(self.config.test_failure_window_seconds),
        )
    }

    /// Walk open -> half-open -> closed according to elapsed time.
    fn advance(&self, circuit: &mut AgentCircuit, now: DateTime<Utc>) {
        if circuit.state() == CircuitState::Open {
            if let Some(opened_at) = circuit.opened_at {
                if now - opened_at >= Duration::seconds(self.config.freeze_duration_seconds) {
                    circuit.state = Some(CircuitState::HalfOpen);
                    circuit.half_opened_at =
                        Some(opened_at + Duration::seconds(self.config.freeze_duration_seconds));
                }
            }
        }
        if circuit.state() == CircuitState::HalfOpen {
            if let Some(half_opened_at) = circuit.half_opened_at {
                if now - half_opened_at
                    >= Duration::seconds(self.config.half_open_duration_seconds)
                {
                    circuit.state = Some(CircuitState::Closed);
                    circuit.opened_at = None;
                    circuit.half_opened_at = None;
                }
            }
        }
    }

    /// Record an observed event. Returns the action the trust manager must
    /// take, if a threshold was breached.
    pub fn record(&self, agent_id: &str, category: BreakerCategory) -> Option<BreakerTrip> {
        let now = self.clock.now();
        let (threshold, window) = self.limits(category);
        let mut circuits = self.circuits.write();
        let circuit = circuits.entry(agent_id.to_string()).or_default();
        self.advance(circuit, now);

        let events = circuit.window_mut(category);
        events.push_back(now);
        let cutoff = now - window;
        while events.front().is_some_and(|t| *t < cutoff) {
            events.pop_front();
        }

        if events.len() < threshold {
            return None;
        }

        if category == BreakerCategory::Rollback {
            // Demotion path only; the circuit itself stays as it was.
            tracing::warn!(
                agent_id = %agent_id,
                count = events.len(),
                "Rollback threshold breached, demotion required"
            );
            return Some(BreakerTrip::Demote);
        }

        match circuit.state() {
            CircuitState::Open => None,
            CircuitState::Closed | CircuitState::HalfOpen => {
                circuit.state = Some(CircuitState::Open);
                circuit.opened_at = Some(now);
                circuit.half_opened_at = None;
                tracing::warn!(
                    agent_id = %agent_id,
                    category = category.as_str(),
                    "Circuit opened"
                );
                Some(BreakerTrip::Freeze(category))
            }
        }
    }

    /// `Ok` when the circuit is closed (including after an elapsed
    /// open/half-open cycle), `CircuitOpen` otherwise.
    pub fn check(&self, agent_id: &str) -> Result<(), ArborError> {
        let now = self.clock.now();
        let mut circuits = self.circuits.write();
        let Some(circuit) = circuits.get_mut(agent_id) else {
            return Ok(());
        };
        self.advance(circuit, now);
        match circuit.state() {
            CircuitState::Closed => Ok(()),
            CircuitState::Open | CircuitState::HalfOpen => Err(ArborError::CircuitOpen {
                agent_id: agent_id.to_string(),
            }),
        }
    }

    /// Current state, after applying time transitions.
    pub fn state(&self, agent_id: &str) -> CircuitState {
        let now = self.clock.now();
        let mut circuits = self.circuits.write();
        match circuits.get_mut(agent_id) {
            Some(circuit) => {
                self.advance(circuit, now);
                circuit.state()
            }
            None => CircuitState::Closed,
        }
    }

    /// Force a circuit closed and clear its windows.
    pub fn reset(&self, agent_id: &str) {
        let mut circuits = self.circuits.write();
        if let Some(circuit) = circuits.get_mut(agent_id) {
            *circuit = AgentCircuit::default();
            tracing::info!(agent_id = %agent_id, "Circuit reset");
        }
    }

    /// Prune event deques older than the longest configured window and drop
    /// idle closed circuits.
    pub fn cleanup(&self) {
        let cutoff = self.clock.now() - self.longest_window();
        let mut circuits = self.circuits.write();
        for circuit in circuits.values_mut() {
            circuit.prune_all(cutoff);
        }
        circuits.retain(|_, c| {
            c.state() != CircuitState::Closed
                || !c.rapid_failures.is_empty()
                || !c.security_violations.is_empty()
                || !c.rollbacks.is_empty()
                || !c.test_failures.is_empty()
        });
    }

    /// Background cleanup loop, stopped via the shutdown signal.
    pub fn spawn_cleanup(
        &self,
        interval: std::time::Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let breaker = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => breaker.cleanup(),
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
