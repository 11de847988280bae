//! Watchdog timer values
//!
//! The module counts in 10-second units and accepts 1..=127 of them
//! (10 to 1270 seconds). Anything outside that range is replaced by a
//! 180-second default instead of being rejected, since the feeder must keep
//! running.

use std::fmt;

/// Seconds per internal timer unit
pub const UNIT_SECONDS: u32 = 10;

/// Timer value in the module's native 10-second units
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimerValue(u8);

/// Problem found while normalizing a requested timer value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerIssue {
    /// Under 10 seconds, replaced by the default
    BelowMinimum { requested_secs: i64 },
    /// Over 1270 seconds, replaced by the default
    AboveMaximum { requested_secs: i64 },
    /// Accepted, but shorter than a cautious boot time of 120 seconds
    Unwise { requested_secs: i64 },
}

/// Result of normalizing a requested timer value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSetting {
    pub value: TimerValue,
    pub issue: Option<TimerIssue>,
}

impl TimerValue {
    pub const MIN: TimerValue = TimerValue(1);
    pub const MAX: TimerValue = TimerValue(127);
    /// 180 seconds
    pub const DEFAULT: TimerValue = TimerValue(18);
    /// 120 seconds, armed right after connecting so an almost-expired timer
    /// cannot fire before the requested value is in place
    pub const SAFETY: TimerValue = TimerValue(12);
    /// Values below this are accepted but flagged
    pub const UNWISE_BELOW: TimerValue = TimerValue(12);

    /// Normalize a duration in seconds to internal units
    ///
    /// The seconds are divided by 10 rounding toward zero. Out-of-range
    /// results fall back to [`TimerValue::DEFAULT`].
    pub fn from_seconds(seconds: i64) -> TimerSetting {
        let units = seconds / i64::from(UNIT_SECONDS);

        if units < i64::from(Self::MIN.0) {
            return TimerSetting {
                value: Self::DEFAULT,
                issue: Some(TimerIssue::BelowMinimum {
                    requested_secs: seconds,
                }),
            };
        }
        if units > i64::from(Self::MAX.0) {
            return TimerSetting {
                value: Self::DEFAULT,
                issue: Some(TimerIssue::AboveMaximum {
                    requested_secs: seconds,
                }),
            };
        }

        // In range, so the cast cannot truncate
        let value = Self(units as u8);
        let issue = value.is_unwise().then_some(TimerIssue::Unwise {
            requested_secs: seconds,
        });

        TimerSetting { value, issue }
    }

    /// The byte sent on the wire to arm this timer
    pub fn command_byte(&self) -> u8 {
        self.0
    }

    pub fn units(&self) -> u8 {
        self.0
    }

    pub fn as_seconds(&self) -> u32 {
        u32::from(self.0) * UNIT_SECONDS
    }

    pub fn is_unwise(&self) -> bool {
        *self < Self::UNWISE_BELOW
    }
}

impl Default for TimerValue {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for TimerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} seconds", self.as_seconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_180_seconds() {
        let setting = TimerValue::from_seconds(180);
        assert_eq!(setting.value, TimerValue::DEFAULT);
        assert_eq!(setting.value.command_byte(), 0x12);
        assert_eq!(setting.issue, None);
    }

    #[test]
    fn test_rounds_down_to_ten_second_units() {
        assert_eq!(TimerValue::from_seconds(189).value.units(), 18);
        assert_eq!(TimerValue::from_seconds(10).value.units(), 1);
        assert_eq!(TimerValue::from_seconds(1279).value.units(), 127);
    }

    #[test]
    fn test_below_minimum_uses_default() {
        for secs in [-100, -5, 0, 5, 9] {
            let setting = TimerValue::from_seconds(secs);
            assert_eq!(setting.value, TimerValue::DEFAULT, "seconds = {}", secs);
            assert_eq!(
                setting.issue,
                Some(TimerIssue::BelowMinimum {
                    requested_secs: secs
                })
            );
        }
    }

    #[test]
    fn test_above_maximum_uses_default() {
        let setting = TimerValue::from_seconds(2000);
        assert_eq!(setting.value, TimerValue::DEFAULT);
        assert_eq!(
            setting.issue,
            Some(TimerIssue::AboveMaximum {
                requested_secs: 2000
            })
        );
        assert!(matches!(
            TimerValue::from_seconds(1280).issue,
            Some(TimerIssue::AboveMaximum { .. })
        ));
    }

    #[test]
    fn test_short_timer_is_unwise_but_kept() {
        let setting = TimerValue::from_seconds(90);
        assert_eq!(setting.value.units(), 9);
        assert!(setting.value.is_unwise());
        assert_eq!(
            setting.issue,
            Some(TimerIssue::Unwise { requested_secs: 90 })
        );

        let setting = TimerValue::from_seconds(120);
        assert_eq!(setting.value.units(), 12);
        assert_eq!(setting.issue, None);
    }

    #[test]
    fn test_safety_value() {
        assert_eq!(TimerValue::SAFETY.command_byte(), 0x0C);
        assert_eq!(TimerValue::SAFETY.as_seconds(), 120);
    }

    #[test]
    fn test_display() {
        assert_eq!(TimerValue::DEFAULT.to_string(), "180 seconds");
        assert_eq!(TimerValue::MAX.to_string(), "1270 seconds");
    }
}
