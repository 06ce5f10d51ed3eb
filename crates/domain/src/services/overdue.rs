//! Overdue payment rules used by the auto-lock sweep.

use chrono::{DateTime, FixedOffset, Local, NaiveDate, Utc};

use crate::models::{Device, EmiDetails};

/// Timezone in which "today" is evaluated for due-date comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockZone {
    /// The server's local timezone.
    Local,
    /// A fixed offset from UTC.
    Fixed(FixedOffset),
}

impl ClockZone {
    /// Builds a zone from an optional UTC offset in minutes; `None` means local time.
    pub fn from_offset_minutes(offset: Option<i32>) -> Result<Self, String> {
        match offset {
            None => Ok(ClockZone::Local),
            Some(minutes) => FixedOffset::east_opt(minutes * 60)
                .map(ClockZone::Fixed)
                .ok_or_else(|| format!("Invalid UTC offset: {} minutes", minutes)),
        }
    }

    /// The calendar date containing `instant` in this zone.
    pub fn date_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        match self {
            ClockZone::Local => instant.with_timezone(&Local).date_naive(),
            ClockZone::Fixed(offset) => instant.with_timezone(offset).date_naive(),
        }
    }

    /// Today's date, i.e. the current instant truncated to midnight.
    pub fn today(&self) -> NaiveDate {
        self.date_of(Utc::now())
    }
}

impl EmiDetails {
    /// A loan is settled once every installment has been paid.
    pub fn is_settled(&self) -> bool {
        self.paid_emis >= self.tenure
    }

    pub fn remaining_emis(&self) -> i32 {
        (self.tenure - self.paid_emis).max(0)
    }
}

impl Device {
    /// True when the sweep should auto-lock this device.
    ///
    /// The comparison is strict: a device due exactly `today` is not overdue.
    /// Settled loans are never overdue whatever their due date says.
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        !self.is_locked
            && self.emi_details.next_due_date < today
            && !self.emi_details.is_settled()
    }
}
