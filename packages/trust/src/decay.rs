//! Inactivity Decay
//!
//! Idle agents slowly lose trust down to a configured floor. The arithmetic
//! lives in a pure helper; the scheduler drives the daily pass.

use std::sync::Arc;
use tokio::sync::watch;

use arbor_core::{Clock, DecayConfig};

use crate::manager::TrustManager;
use crate::profile::TrustProfile;

/// Compute the decayed score for a profile, if decay applies.
///
/// Returns `None` when the profile is within the grace period or the score
/// is already at or below the floor. Deterministic in its inputs.
pub fn apply_decay(
    profile: &TrustProfile,
    days_inactive: i64,
    config: &DecayConfig,
) -> Option<u32> {
    if days_inactive <= config.grace_period_days {
        return None;
    }
    let overdue = (days_inactive - config.grace_period_days) as f64;
    let loss = (config.decay_rate * overdue).round() as i64;
    let decayed = (profile.trust_score as i64 - loss).max(config.floor_score as i64) as u32;
    if decayed >= profile.trust_score {
        return None;
    }
    Some(decayed)
}

/// Daily decay pass driver.
///
/// Ticks hourly and runs the pass once per day at the configured hour. The
/// manager's `run_decay_check` does the per-profile work, so tests exercise
/// that directly with a manual clock.
pub struct DecayScheduler {
    manager: TrustManager,
    config: DecayConfig,
    clock: Arc<dyn Clock>,
}

impl DecayScheduler {
    pub fn new(manager: TrustManager, config: DecayConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            manager,
            config,
            clock,
        }
    }

    /// Spawn the scheduler loop, stopped via the shutdown signal.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if !self.config.enabled {
                return;
            }
            let mut last_run_date: Option<chrono::NaiveDate> = None;
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(3600));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = self.clock.now();
                        let due = {
                            use chrono::Timelike;
                            now.hour() as u8 >= self.config.run_hour
                                && last_run_date != Some(now.date_naive())
                        };
                        if due {
                            let decayed = self.manager.run_decay_check();
                            last_run_date = Some(now.date_naive());
                            tracing::info!(decayed, "Decay pass complete");
                        }
                    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{ArborConfig, ManualClock, TrustTier};
    use chrono::{TimeZone, Utc};

    fn profile_with_score(score: u32) -> TrustProfile {
        let mut p = TrustProfile::new("agent-1", Utc::now());
        p.trust_score = score;
        p
    }

    #[test]
    fn test_within_grace_period_no_decay() {
        let config = DecayConfig::default();
        let profile = profile_with_score(50);
        assert_eq!(apply_decay(&profile, 0, &config), None);
        assert_eq!(apply_decay(&profile, 7, &config), None);
    }

    #[test]
    fn test_decay_past_grace() {
        let config = DecayConfig::default();
        let profile = profile_with_score(50);
        // 20 days inactive, grace 7, rate 1: 50 - 13 = 37
        assert_eq!(apply_decay(&profile, 20, &config), Some(37));
        assert_eq!(apply_decay(&profile, 8, &config), Some(49));
    }

    #[test]
    fn test_decay_respects_floor() {
        let config = DecayConfig::default();
        let profile = profile_with_score(15);
        // Would drop to -85; floor holds at 10
        assert_eq!(apply_decay(&profile, 107, &config), Some(10));

        let at_floor = profile_with_score(10);
        assert_eq!(apply_decay(&at_floor, 107, &config), None);

        let below_floor = profile_with_score(5);
        assert_eq!(apply_decay(&below_floor, 107, &config), None);
    }

    #[test]
    fn test_decay_deterministic() {
        let config = DecayConfig::default();
        let profile = profile_with_score(80);
        let a = apply_decay(&profile, 30, &config);
        let b = apply_decay(&profile, 30, &config);
        assert_eq!(a, b);
        assert_eq!(a, Some(57));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_triggers_daily_pass() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 4, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let manager = TrustManager::new(&ArborConfig::default(), Arc::new(clock.clone()));
        manager.create_profile("idle").unwrap();
        manager.set_tier("idle", TrustTier::Trusted).unwrap();

        // 20 days idle, past the 03:00 run hour
        clock.advance(chrono::Duration::days(20));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler =
            DecayScheduler::new(manager.clone(), DecayConfig::default(), Arc::new(clock.clone()));
        let handle = scheduler.spawn(shutdown_rx);

        // Paused time: the hourly tick fires as soon as the task runs
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert_eq!(manager.get_profile("idle").unwrap().trust_score, 37);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn test_custom_rate_and_floor() {
        let config = DecayConfig {
            decay_rate: 2.5,
            floor_score: 20,
            ..Default::default()
        };
        let profile = profile_with_score(60);
        // 10 days past grace at 2.5/day: 60 - 25 = 35
        assert_eq!(apply_decay(&profile, 17, &config), Some(35));
        // Far past grace clamps at the configured floor
        assert_eq!(apply_decay(&profile, 1000, &config), Some(20));
    }
}
