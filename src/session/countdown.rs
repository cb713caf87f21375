//! Wall-clock interview countdown, advanced by one-second ticks.

use std::time::Duration;

/// Remaining interview time.
///
/// Independent of network traffic: only `tick` moves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Countdown {
    remaining_secs: u64,
    armed: bool,
}

impl Countdown {
    /// Arms the countdown at `duration`, rounded down to whole seconds.
    pub fn arm(&mut self, duration: Duration) {
        self.remaining_secs = duration.as_secs();
        self.armed = true;
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Advances one second. Returns true exactly once, on the tick that
    /// reaches zero; the countdown disarms itself at that point.
    pub fn tick(&mut self) -> bool {
        if !self.armed {
            return false;
        }
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs == 0 {
            self.armed = false;
            return true;
        }
        false
    }

    pub fn remaining(&self) -> Duration {
        Duration::from_secs(self.remaining_secs)
    }

    /// `MM:SS`, with minutes allowed to exceed two digits.
    pub fn format_mmss(&self) -> String {
        format_mmss(self.remaining())
    }
}

pub fn format_mmss(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expires_after_configured_ticks() {
        let mut countdown = Countdown::default();
        countdown.arm(Duration::from_secs(900));
        assert_eq!(countdown.format_mmss(), "15:00");

        for _ in 0..899 {
            assert!(!countdown.tick());
        }
        assert_eq!(countdown.remaining(), Duration::from_secs(1));
        assert!(countdown.tick());
        assert!(!countdown.is_armed());
        assert!(!countdown.tick(), "expiry is reported once");
    }

    #[test]
    fn test_disarmed_countdown_ignores_ticks() {
        let mut countdown = Countdown::default();
        countdown.arm(Duration::from_secs(10));
        countdown.disarm();
        assert!(!countdown.tick());
        assert_eq!(countdown.remaining(), Duration::from_secs(10));
    }

    #[test]
    fn test_format_mmss() {
        assert_eq!(format_mmss(Duration::from_secs(0)), "00:00");
        assert_eq!(format_mmss(Duration::from_secs(65)), "01:05");
        assert_eq!(format_mmss(Duration::from_secs(20 * 60)), "20:00");
        assert_eq!(format_mmss(Duration::from_secs(100 * 60 + 1)), "100:01");
    }

    #[test]
    fn test_rearm_restarts_from_full_duration() {
        let mut countdown = Countdown::default();
        countdown.arm(Duration::from_secs(3));
        countdown.tick();
        countdown.arm(Duration::from_secs(3));
        assert_eq!(countdown.remaining(), Duration::from_secs(3));
        assert!(countdown.is_armed());
    }
}
