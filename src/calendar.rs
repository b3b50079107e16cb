use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::engine::EngineError;

/// A date stripped of its time-of-day component.
///
/// Two days are equal iff year, month and day all match; ordering is
/// lexicographic over (year, month, day), which the derived `Ord` gives us
/// from the field order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct CalendarDay {
    pub year: i32,
    pub month: u8,
    pub day: u8,
}

impl CalendarDay {
    /// Validated construction. Month must be 1–12, day must exist in that
    /// month (leap years respected).
    pub fn new(year: i32, month: u8, day: u8) -> Result<Self, EngineError> {
        if !(1..=12).contains(&month) {
            return Err(EngineError::InvalidArgument(format!("bad month: {month}")));
        }
        if day < 1 || day > days_in_month(year, month) {
            return Err(EngineError::InvalidArgument(format!(
                "bad day {day} for {year}-{month:02}"
            )));
        }
        Ok(Self { year, month, day })
    }

    /// Normalize a unix-ms timestamp to the calendar day it falls on in the
    /// deployment's local calendar, given the UTC offset in minutes.
    ///
    /// The local calendar matters: normalizing via UTC shifts bookings near
    /// midnight onto the wrong day.
    pub fn from_unix_ms(ms: i64, utc_offset_minutes: i32) -> Self {
        let local_ms = ms + i64::from(utc_offset_minutes) * 60_000;
        let days = local_ms.div_euclid(86_400_000);
        civil_from_days(days)
    }
}

impl fmt::Display for CalendarDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

impl FromStr for CalendarDay {
    type Err = EngineError;

    /// Parse `YYYY-MM-DD`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || EngineError::InvalidArgument(format!("bad date: {s:?} (want YYYY-MM-DD)"));
        let mut parts = s.splitn(3, '-');
        let year: i32 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
        let month: u8 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
        let day: u8 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
        Self::new(year, month, day)
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: i32, month: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

/// Days-since-epoch to civil date (Howard Hinnant's algorithm).
fn civil_from_days(z: i64) -> CalendarDay {
    let z = z + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097); // [0, 146096]
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365; // [0, 399]
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100); // [0, 365]
    let mp = (5 * doy + 2) / 153; // [0, 11]
    let d = doy - (153 * mp + 2) / 5 + 1; // [1, 31]
    let m = if mp < 10 { mp + 3 } else { mp - 9 }; // [1, 12]
    CalendarDay {
        year: (if m <= 2 { y + 1 } else { y }) as i32,
        month: m as u8,
        day: d as u8,
    }
}
