//! Wall-clock tracking and daily wake-time math.
//!
//! The clock runs in local time: the GMT offset is applied once at NTP sync
//! so every epoch in the system (persisted state, wake targets, log
//! prefixes) is directly comparable with the configured refresh time.

use core::fmt::Write;

use crate::sleep::{FALLBACK_SLEEP_SECS, WakeDecision};

pub const SECS_PER_DAY: i64 = 86_400;

/// A clock-time of day, parsed from `HH:MM:SS`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl TimeOfDay {
    pub const fn new(hour: u8, minute: u8, second: u8) -> Self {
        Self {
            hour,
            minute,
            second,
        }
    }

    /// Parses `HH:MM:SS` with strict field ranges. Returns `None` on any
    /// malformed input rather than guessing.
    pub fn parse(s: &str) -> Option<Self> {
        let mut fields = s.split(':');
        let hour = parse_field(fields.next()?, 23)?;
        let minute = parse_field(fields.next()?, 59)?;
        let second = parse_field(fields.next()?, 59)?;
        if fields.next().is_some() {
            return None;
        }
        Some(Self {
            hour,
            minute,
            second,
        })
    }

    pub const fn seconds_into_day(&self) -> i64 {
        self.hour as i64 * 3_600 + self.minute as i64 * 60 + self.second as i64
    }
}

fn parse_field(s: &str, max: u8) -> Option<u8> {
    if s.is_empty() || s.len() > 2 {
        return None;
    }
    let v: u8 = s.parse().ok()?;
    if v > max { None } else { Some(v) }
}

/// Local wall clock anchored to a monotonic uptime reading.
///
/// Deep sleep resets uptime but not the RTC timer, so each boot re-seeds the
/// anchor: from the persisted wake target when the sleep timer fired, or
/// from SNTP once the network is up.
#[derive(Clone, Copy, Debug)]
pub struct WallClock {
    epoch_at_anchor: i64,
    anchor_uptime_secs: u64,
    valid: bool,
}

impl WallClock {
    /// A clock that knows nothing yet. `now` reports seconds since boot.
    pub const fn unset() -> Self {
        Self {
            epoch_at_anchor: 0,
            anchor_uptime_secs: 0,
            valid: false,
        }
    }

    /// Anchors the clock: at uptime `uptime_secs` the local epoch was
    /// `epoch`.
    pub fn set(&mut self, epoch: i64, uptime_secs: u64) {
        self.epoch_at_anchor = epoch;
        self.anchor_uptime_secs = uptime_secs;
        self.valid = true;
    }

    pub const fn is_set(&self) -> bool {
        self.valid
    }

    /// Current local epoch given the current uptime reading.
    pub fn now(&self, uptime_secs: u64) -> i64 {
        self.epoch_at_anchor + (uptime_secs - self.anchor_uptime_secs) as i64
    }
}

/// Picks the next wake-up for a daily refresh at `daily`.
///
/// With a valid clock the target is today at `daily`, rolled forward one
/// whole day when that instant has already passed (or is exactly now), so
/// the result always lands in `(now, now + 24 h]`. An unset clock yields a
/// short fixed sleep instead of a bogus absolute target.
pub fn compute_wake(now: i64, daily: TimeOfDay, clock_valid: bool) -> WakeDecision {
    if !clock_valid {
        return WakeDecision::RelativeSeconds(FALLBACK_SLEEP_SECS);
    }

    let midnight = now.div_euclid(SECS_PER_DAY) * SECS_PER_DAY;
    let mut target = midnight + daily.seconds_into_day();
    if target <= now {
        target += SECS_PER_DAY;
    }
    WakeDecision::AbsoluteEpoch(target)
}

/// Formats a local epoch as `DD-MM-YYYY HH:MM:SS` for log prefixes and
/// on-screen status.
pub fn fmt_timestamp(epoch: i64) -> heapless::String<20> {
    let days = epoch.div_euclid(SECS_PER_DAY);
    let secs = epoch.rem_euclid(SECS_PER_DAY);
    let (year, month, day) = civil_from_days(days);
    let (hour, minute, second) = (secs / 3_600, secs / 60 % 60, secs % 60);

    let mut out = heapless::String::new();
    // 19 chars always fit; a formatting error here is unreachable.
    let _ = write!(
        out,
        "{day:02}-{month:02}-{year:04} {hour:02}:{minute:02}:{second:02}"
    );
    out
}

// Civil-from-days conversion over the proleptic Gregorian calendar,
// using the standard era/year-of-era decomposition.
fn civil_from_days(z: i64) -> (i64, u8, u8) {
    let z = z + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };
    (year, month as u8, day as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-01-01 00:00:00 in whatever zone the clock runs in.
    const JAN_1_2024: i64 = 1_704_067_200;

    #[test]
    fn parses_well_formed_times() {
        assert_eq!(TimeOfDay::parse("09:00:00"), Some(TimeOfDay::new(9, 0, 0)));
        assert_eq!(
            TimeOfDay::parse("23:59:59"),
            Some(TimeOfDay::new(23, 59, 59))
        );
        assert_eq!(TimeOfDay::parse("0:5:9"), Some(TimeOfDay::new(0, 5, 9)));
    }

    #[test]
    fn rejects_malformed_times() {
        assert_eq!(TimeOfDay::parse(""), None);
        assert_eq!(TimeOfDay::parse("24:00:00"), None);
        assert_eq!(TimeOfDay::parse("12:60:00"), None);
        assert_eq!(TimeOfDay::parse("12:00"), None);
        assert_eq!(TimeOfDay::parse("12:00:00:00"), None);
        assert_eq!(TimeOfDay::parse("ab:cd:ef"), None);
    }

    #[test]
    fn clock_advances_with_uptime() {
        let mut clock = WallClock::unset();
        assert!(!clock.is_set());
        clock.set(JAN_1_2024, 10);
        assert!(clock.is_set());
        assert_eq!(clock.now(10), JAN_1_2024);
        assert_eq!(clock.now(73), JAN_1_2024 + 63);
    }

    #[test]
    fn wake_later_today_stays_today() {
        // 08:00, refresh at 09:00.
        let now = JAN_1_2024 + 8 * 3_600;
        let d = compute_wake(now, TimeOfDay::new(9, 0, 0), true);
        assert_eq!(d, WakeDecision::AbsoluteEpoch(JAN_1_2024 + 9 * 3_600));
    }

    #[test]
    fn wake_already_past_rolls_to_tomorrow() {
        // 10:00, refresh at 09:00.
        let now = JAN_1_2024 + 10 * 3_600;
        let d = compute_wake(now, TimeOfDay::new(9, 0, 0), true);
        assert_eq!(
            d,
            WakeDecision::AbsoluteEpoch(JAN_1_2024 + SECS_PER_DAY + 9 * 3_600)
        );
    }

    #[test]
    fn wake_exactly_now_rolls_to_tomorrow() {
        let now = JAN_1_2024 + 9 * 3_600;
        let d = compute_wake(now, TimeOfDay::new(9, 0, 0), true);
        assert_eq!(
            d,
            WakeDecision::AbsoluteEpoch(now + SECS_PER_DAY)
        );
    }

    #[test]
    fn unset_clock_gets_the_short_fallback() {
        let d = compute_wake(JAN_1_2024, TimeOfDay::new(9, 0, 0), false);
        assert_eq!(d, WakeDecision::RelativeSeconds(FALLBACK_SLEEP_SECS));
    }

    #[test]
    fn wake_target_is_always_within_a_day() {
        for hour in 0..24 {
            let now = JAN_1_2024 + hour * 3_600 + 17;
            match compute_wake(now, TimeOfDay::new(9, 0, 0), true) {
                WakeDecision::AbsoluteEpoch(t) => {
                    assert!(t > now);
                    assert!(t <= now + SECS_PER_DAY);
                }
                other => panic!("unexpected decision {other:?}"),
            }
        }
    }

    #[test]
    fn timestamps_format_as_day_month_year() {
        assert_eq!(fmt_timestamp(JAN_1_2024).as_str(), "01-01-2024 00:00:00");
        assert_eq!(
            fmt_timestamp(JAN_1_2024 + 9 * 3_600 + 5 * 60 + 7).as_str(),
            "01-01-2024 09:05:07"
        );
        // Leap day.
        assert_eq!(
            fmt_timestamp(JAN_1_2024 + 59 * SECS_PER_DAY).as_str(),
            "29-02-2024 00:00:00"
        );
        assert_eq!(fmt_timestamp(0).as_str(), "01-01-1970 00:00:00");
    }
}
