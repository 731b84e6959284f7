//! RX-silence watchdog
//!
//! Pure decision logic driven by the reader loop: given the current time and
//! the last-RX time, decide between doing nothing, an EP0 keepalive ping, or
//! a full clean restart. Keepalives start after 2 s of silence and repeat at
//! most once per second; restarts start after 4 s and are spaced at least
//! 3 s apart. The caller escalates (hard reset / forced reopen) once the
//! attempt count reaches the configured maximum.

use common::WatchdogConfig;
use std::time::Instant;

/// What the reader loop should do right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogAction {
    None,
    /// Ping the device over EP0 even though bulk traffic is stalled
    Keepalive,
    /// Run the clean-restart sequence; `attempts` counts consecutive
    /// restarts without intervening success
    Restart { attempts: u32 },
}

/// Tracks keepalive/restart pacing against the configured thresholds
pub struct Watchdog {
    cfg: WatchdogConfig,
    last_keepalive: Option<Instant>,
    last_restart: Option<Instant>,
    attempts: u32,
}

impl Watchdog {
    pub fn new(cfg: WatchdogConfig) -> Self {
        Self {
            cfg,
            last_keepalive: None,
            last_restart: None,
            attempts: 0,
        }
    }

    /// Seed the pacing clocks at session start so a freshly opened session
    /// is not immediately restarted
    pub fn arm(&mut self, now: Instant) {
        self.last_keepalive = Some(now);
    }

    /// Pre-date the restart clock, for tests and reopened sessions
    pub fn set_last_restart(&mut self, at: Instant) {
        self.last_restart = Some(at);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Consecutive-restart limit was reached
    pub fn exhausted(&self) -> bool {
        self.attempts >= self.cfg.max_restarts
    }

    /// Clear the attempt counter (after a hard reset)
    pub fn reset_attempts(&mut self) {
        self.attempts = 0;
    }

    /// Decide the action for this loop iteration
    pub fn poll(&mut self, now: Instant, last_rx: Instant) -> WatchdogAction {
        let silence = now.saturating_duration_since(last_rx);

        if silence >= self.cfg.restart_after
            && self
                .last_restart
                .is_none_or(|t| now.saturating_duration_since(t) >= self.cfg.restart_interval)
        {
            self.last_restart = Some(now);
            // a restart includes its own EP0 status priming
            self.last_keepalive = Some(now);
            self.attempts += 1;
            return WatchdogAction::Restart {
                attempts: self.attempts,
            };
        }

        if silence >= self.cfg.keepalive_after
            && self
                .last_keepalive
                .is_none_or(|t| now.saturating_duration_since(t) >= self.cfg.keepalive_interval)
        {
            self.last_keepalive = Some(now);
            return WatchdogAction::Keepalive;
        }

        WatchdogAction::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ago(secs: f64) -> Instant {
        Instant::now() - Duration::from_secs_f64(secs)
    }

    #[test]
    fn test_quiet_link_no_action() {
        let mut wd = Watchdog::new(WatchdogConfig::default());
        let now = Instant::now();
        assert_eq!(wd.poll(now, ago(0.5)), WatchdogAction::None);
    }

    #[test]
    fn test_keepalive_after_two_seconds_rate_limited() {
        let mut wd = Watchdog::new(WatchdogConfig::default());
        let now = Instant::now();
        assert_eq!(wd.poll(now, ago(2.5)), WatchdogAction::Keepalive);
        // immediate re-poll is inside the 1 s spacing
        assert_eq!(wd.poll(now, ago(2.5)), WatchdogAction::None);
        let later = now + Duration::from_millis(1100);
        assert_eq!(wd.poll(later, ago(2.5)), WatchdogAction::Keepalive);
    }

    #[test]
    fn test_single_restart_then_rate_limited() {
        let mut wd = Watchdog::new(WatchdogConfig::default());
        wd.set_last_restart(ago(3.5));
        let now = Instant::now();

        // 4.5 s of silence, 3.5 s since the previous restart: exactly one
        // restart fires and the counter moves by one
        assert_eq!(wd.poll(now, ago(4.5)), WatchdogAction::Restart { attempts: 1 });
        assert_eq!(wd.attempts(), 1);

        // an immediate second check within the 3 s spacing is a no-op
        assert_eq!(wd.poll(now, ago(4.5)), WatchdogAction::None);
        assert_eq!(wd.attempts(), 1);
    }

    #[test]
    fn test_restart_takes_priority_over_keepalive() {
        let mut wd = Watchdog::new(WatchdogConfig::default());
        let now = Instant::now();
        assert!(matches!(
            wd.poll(now, ago(10.0)),
            WatchdogAction::Restart { .. }
        ));
    }

    #[test]
    fn test_exhaustion_after_three_restarts() {
        let mut wd = Watchdog::new(WatchdogConfig::default());
        let mut now = Instant::now();
        for expected in 1..=3 {
            assert_eq!(
                wd.poll(now, now - Duration::from_secs(10)),
                WatchdogAction::Restart { attempts: expected }
            );
            now += Duration::from_secs(4);
        }
        assert!(wd.exhausted());
        wd.reset_attempts();
        assert!(!wd.exhausted());
    }
}
