//! Time source and calendar-month arithmetic for billing
//!
//! Month boundaries are evaluated in a fixed offset from UTC (the server's
//! configured billing timezone). Nothing here reads the system clock except
//! [`SystemClock`], so every month cut-over is reproducible in tests.

use super::shared::{DomainError, Result};
use chrono::{
    DateTime, Datelike, Duration, FixedOffset, Months, NaiveDate, NaiveTime, Offset, TimeZone, Utc,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

/// Supplies "now"
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and simulations
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// A calendar month, the granularity of the monthly singleton
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BillingMonth {
    first_day: NaiveDate,
}

impl BillingMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|first_day| Self { first_day })
    }

    fn containing(date: NaiveDate) -> Self {
        Self {
            first_day: date - Duration::days(i64::from(date.day0())),
        }
    }

    pub fn year(&self) -> i32 {
        self.first_day.year()
    }

    pub fn month(&self) -> u32 {
        self.first_day.month()
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first_day
    }

    /// `None` at the lower edge of the supported calendar
    pub fn previous(&self) -> Option<Self> {
        self.first_day
            .checked_sub_months(Months::new(1))
            .map(|first_day| Self { first_day })
    }

    /// `None` at the upper edge of the supported calendar
    pub fn next(&self) -> Option<Self> {
        self.first_day
            .checked_add_months(Months::new(1))
            .map(|first_day| Self { first_day })
    }

    /// Short label such as `Oct-2026`
    pub fn label(&self) -> String {
        self.first_day.format("%b-%Y").to_string()
    }
}

impl fmt::Display for BillingMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}

impl FromStr for BillingMonth {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        NaiveDate::parse_from_str(&format!("{}-01", s.trim()), "%Y-%m-%d")
            .map(|first_day| Self { first_day })
            .map_err(|_| DomainError::ValidationError(format!("Invalid month '{}', expected YYYY-MM", s)))
    }
}

impl TryFrom<String> for BillingMonth {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<BillingMonth> for String {
    fn from(month: BillingMonth) -> Self {
        month.to_string()
    }
}

/// Half-open instant range `[start, end)` in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

/// Maps instants to billing months in the configured offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingCalendar {
    offset: FixedOffset,
}

impl Default for BillingCalendar {
    fn default() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }
}

impl BillingCalendar {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Build from a `+HH:MM` / `-HH:MM` / `Z` string
    pub fn from_offset_str(raw: &str) -> Result<Self> {
        parse_utc_offset(raw).map(Self::new)
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn month_of(&self, at: DateTime<Utc>) -> BillingMonth {
        BillingMonth::containing(at.with_timezone(&self.offset).date_naive())
    }

    /// Local midnight of `day`, in UTC
    pub fn start_of_day(&self, day: NaiveDate) -> Result<DateTime<Utc>> {
        day.and_time(NaiveTime::MIN)
            .checked_sub_signed(Duration::seconds(i64::from(self.offset.local_minus_utc())))
            .map(|utc| Utc.from_utc_datetime(&utc))
            .ok_or_else(|| out_of_range(day))
    }

    /// First instant of the month, in UTC
    pub fn start_of(&self, month: BillingMonth) -> Result<DateTime<Utc>> {
        self.start_of_day(month.first_day())
    }

    /// Calendar days `from..=to` as an instant window
    pub fn days(&self, from: NaiveDate, to: NaiveDate) -> Result<TimeWindow> {
        let after = to.succ_opt().ok_or_else(|| out_of_range(to))?;
        Ok(TimeWindow {
            start: self.start_of_day(from)?,
            end: self.start_of_day(after)?,
        })
    }

    pub fn start_of_month(&self, at: DateTime<Utc>) -> Result<DateTime<Utc>> {
        self.start_of(self.month_of(at))
    }

    /// The whole month as `[start, start of next month)`
    pub fn window(&self, month: BillingMonth) -> Result<TimeWindow> {
        let next = month.next().ok_or_else(|| out_of_range(month.first_day()))?;
        Ok(TimeWindow {
            start: self.start_of(month)?,
            end: self.start_of(next)?,
        })
    }

    /// The part of the current month that has already elapsed: `[startOfMonth(now), now]`
    pub fn elapsed_this_month(&self, now: DateTime<Utc>) -> Result<TimeWindow> {
        // Stored instants keep microseconds, so `now` must stay inside after truncation
        let end = now
            .checked_add_signed(Duration::microseconds(1))
            .ok_or_else(|| out_of_range(now.date_naive()))?;
        Ok(TimeWindow {
            start: self.start_of_month(now)?,
            end,
        })
    }

    pub fn is_same_month(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        self.month_of(a) == self.month_of(b)
    }
}

fn parse_utc_offset(raw: &str) -> Result<FixedOffset> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
        return Ok(Utc.fix());
    }
    trimmed
        .parse::<FixedOffset>()
        .map_err(|e| DomainError::ValidationError(format!("Invalid UTC offset '{}': {}", raw, e)))
}

fn out_of_range(day: NaiveDate) -> DomainError {
    DomainError::ValidationError(format!("Date {} is outside the supported calendar", day))
}
