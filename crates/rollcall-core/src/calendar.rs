//! Turns recorded marks, holidays and dates into the status reported for
//! a day.

use crate::records::AttendanceStatus;
use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holiday {
    pub date: NaiveDate,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceCalendar {
    /// Days before this date are never marked.
    #[serde(default)]
    pub session_start: Option<NaiveDate>,
    #[serde(default)]
    pub holidays: Vec<Holiday>,
}

impl AttendanceCalendar {
    pub fn holiday(&self, date: NaiveDate) -> Option<&Holiday> {
        self.holidays.iter().find(|h| h.date == date)
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        date.weekday() == Weekday::Sun || self.holiday(date).is_some()
    }

    /// Reported status for a day.
    ///
    /// Order: before session start, Sunday, listed holiday, recorded mark,
    /// future day, and finally absent for an unmarked past or current day.
    pub fn resolve(
        &self,
        recorded: Option<AttendanceStatus>,
        date: NaiveDate,
        today: NaiveDate,
    ) -> AttendanceStatus {
        if self.session_start.is_some_and(|start| date < start) {
            return AttendanceStatus::NotMarked;
        }
        if self.is_holiday(date) {
            return AttendanceStatus::Holiday;
        }
        if let Some(status) = recorded {
            return status;
        }
        if date > today {
            AttendanceStatus::NotMarked
        } else {
            AttendanceStatus::Absent
        }
    }
}
