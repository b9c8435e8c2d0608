//! Heartbeat Watchdog - Detects radio link loss from the age of the last accepted frame
//!
//! **Purpose**: Motion must stop when the console goes quiet, whatever the last
//! received `can_move` flag said.
//!
//! The watchdog holds no timestamp of its own: the telemetry channel stamps
//! each committed frame and the snapshot carries that stamp, so the check is a
//! pure function of `(now, last_update)`.

use crate::clock::Clock;
use std::sync::Arc;
use std::time::Duration;

/// Default link-loss window
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(2);

/// Link-loss watchdog
#[derive(Debug, Clone)]
pub struct HeartbeatWatchdog {
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl HeartbeatWatchdog {
    /// Create a watchdog
    ///
    /// # Parameters
    /// - `timeout`: Maximum age of the last frame before motion is disabled
    /// - `clock`: The same clock the telemetry channel stamps frames with
    pub fn new(timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { timeout, clock }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Current time on the watchdog's clock
    ///
    /// Read this once per supervisory pass and feed it to the `*_at` checks so
    /// the expiry flag and the gated `can_move` agree at the window boundary.
    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Age of the last accepted frame, `None` if nothing was ever received
    pub fn age(&self, last_update: Option<Duration>) -> Option<Duration> {
        self.age_at(last_update, self.now())
    }

    pub fn age_at(&self, last_update: Option<Duration>, now: Duration) -> Option<Duration> {
        last_update.map(|t| now.saturating_sub(t))
    }

    /// True when `now - last_update > timeout`, or when no frame has arrived yet
    pub fn is_expired(&self, last_update: Option<Duration>) -> bool {
        self.is_expired_at(last_update, self.now())
    }

    pub fn is_expired_at(&self, last_update: Option<Duration>, now: Duration) -> bool {
        match self.age_at(last_update, now) {
            Some(age) => age > self.timeout,
            None => true,
        }
    }

    /// Field-reported flag gated by link freshness
    pub fn effective_can_move(&self, field_can_move: bool, last_update: Option<Duration>) -> bool {
        self.effective_can_move_at(field_can_move, last_update, self.now())
    }

    pub fn effective_can_move_at(&self, field_can_move: bool, last_update: Option<Duration>, now: Duration) -> bool {
        field_can_move && !self.is_expired_at(last_update, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn watchdog() -> (HeartbeatWatchdog, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (HeartbeatWatchdog::new(DEFAULT_HEARTBEAT_TIMEOUT, clock.clone()), clock)
    }

    #[test]
    fn test_never_received_is_expired() {
        let (wd, _clock) = watchdog();
        assert!(wd.is_expired(None));
        assert!(!wd.effective_can_move(true, None));
    }

    #[test]
    fn test_fresh_frame_passes_field_value_through() {
        let (wd, clock) = watchdog();
        let stamp = clock.now();
        clock.advance(Duration::from_millis(1999));
        assert!(wd.effective_can_move(true, Some(stamp)));
        assert!(!wd.effective_can_move(false, Some(stamp)));
    }

    #[test]
    fn test_stale_frame_forces_disable() {
        let (wd, clock) = watchdog();
        let stamp = clock.now();
        clock.advance(Duration::from_millis(2100));
        assert!(wd.is_expired(Some(stamp)));
        assert!(!wd.effective_can_move(true, Some(stamp)));
    }

    #[test]
    fn test_exact_window_is_not_expired() {
        let (wd, clock) = watchdog();
        let stamp = clock.now();
        clock.advance(DEFAULT_HEARTBEAT_TIMEOUT);
        assert!(!wd.is_expired(Some(stamp)));
        clock.advance(Duration::from_micros(1));
        assert!(wd.is_expired(Some(stamp)));
    }

    #[test]
    fn test_checks_at_fixed_instant_ignore_clock() {
        let (wd, clock) = watchdog();
        let stamp = clock.now();
        let boundary = stamp + DEFAULT_HEARTBEAT_TIMEOUT;

        // Clock is far past the window, the passed instant decides
        clock.advance(Duration::from_secs(10));
        assert!(!wd.is_expired_at(Some(stamp), boundary));
        assert!(wd.effective_can_move_at(true, Some(stamp), boundary));

        let past = boundary + Duration::from_micros(1);
        assert!(wd.is_expired_at(Some(stamp), past));
        assert!(!wd.effective_can_move_at(true, Some(stamp), past));
        assert_eq!(wd.age_at(Some(stamp), boundary), Some(DEFAULT_HEARTBEAT_TIMEOUT));
        assert_eq!(wd.now(), clock.now());
    }

    #[test]
    fn test_age_reports_elapsed() {
        let (wd, clock) = watchdog();
        let stamp = clock.now();
        clock.advance(Duration::from_millis(300));
        assert_eq!(wd.age(Some(stamp)), Some(Duration::from_millis(300)));
        assert_eq!(wd.age(None), None);
    }
}
