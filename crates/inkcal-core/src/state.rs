//! Boot-to-boot state carried across deep sleep.

/// Counters and timestamps preserved in RTC memory while the chip sleeps.
///
/// All fields are zero on a cold boot or when the retained copy fails its
/// magic check. Epochs are local time, matching the wall clock.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PersistedState {
    /// Number of boots since power-on, counting this one.
    pub boot_count: u32,
    /// Local epoch of the current boot, once the clock is known.
    pub last_boot_time: i64,
    /// Local epoch at which the previous deep sleep was entered.
    pub last_sleep_time: i64,
    /// Local epoch the previous cycle intended to wake at.
    pub target_wake_time: i64,
    /// Seconds between the intended wake time and the NTP-observed boot
    /// time. Diagnostic only.
    pub drift_secs: i64,
}

impl PersistedState {
    /// Bumps the boot counter; called exactly once, at boot entry.
    pub fn record_boot(&mut self) {
        self.boot_count = self.boot_count.wrapping_add(1);
    }

    /// Records the measured clock drift once an NTP-synced boot time is
    /// known. A zero target (first boot) yields no drift.
    pub fn record_drift(&mut self, ntp_boot_time: i64) {
        self.last_boot_time = ntp_boot_time;
        if self.target_wake_time != 0 {
            self.drift_secs = self.target_wake_time - ntp_boot_time;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_all_zero() {
        let s = PersistedState::default();
        assert_eq!(s.boot_count, 0);
        assert_eq!(s.target_wake_time, 0);
        assert_eq!(s.drift_secs, 0);
    }

    #[test]
    fn drift_is_relative_to_the_intended_wake() {
        let mut s = PersistedState {
            target_wake_time: 1_000,
            ..Default::default()
        };
        s.record_drift(995);
        assert_eq!(s.drift_secs, 5);
        assert_eq!(s.last_boot_time, 995);
    }

    #[test]
    fn first_boot_records_no_drift() {
        let mut s = PersistedState::default();
        s.record_drift(1_700_000_000);
        assert_eq!(s.drift_secs, 0);
        assert_eq!(s.last_boot_time, 1_700_000_000);
    }
}
