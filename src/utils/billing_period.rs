use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use time::{Date, Duration, Month, OffsetDateTime, UtcOffset};

/// A UTC calendar month; identifies one usage counter row per organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BillingPeriod {
    start: Date,
}

impl BillingPeriod {
    pub fn containing(at: OffsetDateTime) -> Self {
        let date = at.to_offset(UtcOffset::UTC).date();
        let start = date - Duration::days(i64::from(date.day()) - 1);
        Self { start }
    }

    pub fn current() -> Self {
        Self::containing(OffsetDateTime::now_utc())
    }

    pub fn year(&self) -> i32 {
        self.start.year()
    }

    pub fn month(&self) -> Month {
        self.start.month()
    }

    pub fn starts_at(&self) -> OffsetDateTime {
        self.start.midnight().assume_utc()
    }

    pub fn next(&self) -> Self {
        // Day 1 plus 31 days always lands inside the following month.
        let within_next = self.start + Duration::days(31);
        Self {
            start: within_next - Duration::days(i64::from(within_next.day()) - 1),
        }
    }

    /// Instant at which this period's counter stops accepting debits.
    pub fn resets_at(&self) -> OffsetDateTime {
        self.next().starts_at()
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.start.year(), u8::from(self.start.month()))
    }
}

impl Serialize for BillingPeriod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid billing period `{0}`, expected YYYY-MM")]
pub struct InvalidBillingPeriod(pub String);

impl FromStr for BillingPeriod {
    type Err = InvalidBillingPeriod;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidBillingPeriod(raw.to_string());
        let (year, month) = raw.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u8 = month.parse().map_err(|_| invalid())?;
        let month = Month::try_from(month).map_err(|_| invalid())?;
        let start = Date::from_calendar_date(year, month, 1).map_err(|_| invalid())?;
        Ok(Self { start })
    }
}
