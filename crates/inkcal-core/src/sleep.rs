//! Sleep planning and the ordered shutdown contract.

/// Sleep applied when the wall clock is not trustworthy: long enough to
/// avoid a wake loop draining the battery, short enough to retry soon.
pub const FALLBACK_SLEEP_SECS: u64 = 120;

/// Longest single sleep ever scheduled.
pub const MAX_SLEEP_SECS: u64 = 24 * 60 * 60;

/// Degenerate durations beyond this are treated as clock corruption.
const SLEEP_SANITY_LIMIT_SECS: u64 = 48 * 60 * 60;

/// How the next wake was decided. One type for every sleep entry point, so
/// both scheduled wakes and fixed backoffs flow through the same clamp.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WakeDecision {
    /// Wake at a local epoch computed from the daily refresh time.
    AbsoluteEpoch(i64),
    /// Wake after a fixed number of seconds, clock state notwithstanding.
    RelativeSeconds(u64),
}

/// Converts a wake decision into a timer duration, clamped to sane bounds:
/// zero or negative spans fall back to [`FALLBACK_SLEEP_SECS`], spans past
/// the sanity limit collapse to [`MAX_SLEEP_SECS`].
pub fn plan_sleep(decision: WakeDecision, now: i64) -> u64 {
    let span = match decision {
        WakeDecision::AbsoluteEpoch(target) => {
            if target <= now {
                return FALLBACK_SLEEP_SECS;
            }
            (target - now) as u64
        }
        WakeDecision::RelativeSeconds(0) => return FALLBACK_SLEEP_SECS,
        WakeDecision::RelativeSeconds(secs) => secs,
    };

    if span > SLEEP_SANITY_LIMIT_SECS {
        MAX_SLEEP_SECS
    } else {
        span
    }
}

/// Board operations needed to enter deep sleep safely.
pub trait SleepControl {
    type Error;

    /// Arms the RTC wake timer for `seconds` from now.
    fn arm_wake_timer(&mut self, seconds: u64) -> Result<(), Self::Error>;
    /// Stops the radio and drops any open connections.
    fn shutdown_network(&mut self);
    /// Puts external storage and the panel into their low-power states.
    fn suspend_storage(&mut self);
}

/// Runs the shutdown sequence. The wake timer is armed before anything is
/// torn down; if arming fails the peripherals are left running so the
/// caller can retry or fall back rather than sleep unwakeably.
pub fn prepare_for_sleep<C: SleepControl>(ctl: &mut C, seconds: u64) -> Result<(), C::Error> {
    ctl.arm_wake_timer(seconds)?;
    ctl.shutdown_network();
    ctl.suspend_storage();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_target_becomes_a_span() {
        let d = WakeDecision::AbsoluteEpoch(1_000_100);
        assert_eq!(plan_sleep(d, 1_000_000), 100);
    }

    #[test]
    fn past_or_present_target_falls_back() {
        assert_eq!(
            plan_sleep(WakeDecision::AbsoluteEpoch(999), 1_000),
            FALLBACK_SLEEP_SECS
        );
        assert_eq!(
            plan_sleep(WakeDecision::AbsoluteEpoch(1_000), 1_000),
            FALLBACK_SLEEP_SECS
        );
    }

    #[test]
    fn zero_relative_span_falls_back() {
        assert_eq!(
            plan_sleep(WakeDecision::RelativeSeconds(0), 0),
            FALLBACK_SLEEP_SECS
        );
    }

    #[test]
    fn runaway_spans_clamp_to_a_day() {
        let d = WakeDecision::AbsoluteEpoch(1_000_000 + 60 * 60 * 72);
        assert_eq!(plan_sleep(d, 1_000_000), MAX_SLEEP_SECS);
        assert_eq!(
            plan_sleep(WakeDecision::RelativeSeconds(u64::MAX), 0),
            MAX_SLEEP_SECS
        );
    }

    #[test]
    fn spans_within_bounds_pass_through() {
        assert_eq!(plan_sleep(WakeDecision::RelativeSeconds(3_600), 0), 3_600);
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<&'static str>,
        fail_arm: bool,
    }

    impl SleepControl for Recorder {
        type Error = ();

        fn arm_wake_timer(&mut self, _seconds: u64) -> Result<(), ()> {
            if self.fail_arm {
                return Err(());
            }
            self.calls.push("arm");
            Ok(())
        }

        fn shutdown_network(&mut self) {
            self.calls.push("net");
        }

        fn suspend_storage(&mut self) {
            self.calls.push("storage");
        }
    }

    #[test]
    fn timer_is_armed_before_any_teardown() {
        let mut rec = Recorder::default();
        prepare_for_sleep(&mut rec, 60).unwrap();
        assert_eq!(rec.calls, vec!["arm", "net", "storage"]);
    }

    #[test]
    fn arming_failure_aborts_teardown() {
        let mut rec = Recorder {
            fail_arm: true,
            ..Default::default()
        };
        assert!(prepare_for_sleep(&mut rec, 60).is_err());
        assert!(rec.calls.is_empty());
    }
}
