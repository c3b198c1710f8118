//! Year-month arithmetic for monthly archive grids
//!
//! Archives are published per calendar month, so the grid must step exactly
//! one calendar month at a time. A fixed 30/31-day increment drifts and can
//! skip or repeat a month inside a year.

use chrono::{Datelike, NaiveDate};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Calendar parsing and construction errors
#[derive(Debug, Error, PartialEq)]
pub enum CalendarError {
    #[error("month out of range: {month} (expected 1-12)")]
    MonthOutOfRange { month: u32 },

    #[error("invalid year-month: {input} (expected YYYY-MM)")]
    InvalidFormat { input: String },
}

/// One calendar month, the publication unit of Vision archives
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self, CalendarError> {
        if !(1..=12).contains(&month) {
            return Err(CalendarError::MonthOutOfRange { month });
        }
        Ok(Self { year, month })
    }

    /// The month a calendar date falls in
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// The month immediately after this one
    pub fn succ(self) -> YearMonth {
        if self.month == 12 {
            YearMonth {
                year: self.year + 1,
                month: 1,
            }
        } else {
            YearMonth {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Every month from `start` through `end`, in order
    ///
    /// Empty when `start > end`.
    pub fn range_inclusive(start: YearMonth, end: YearMonth) -> MonthRange {
        MonthRange {
            next: Some(start),
            end,
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = CalendarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CalendarError::InvalidFormat {
            input: s.to_string(),
        };
        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        YearMonth::new(year, month)
    }
}

/// Iterator over an inclusive month range
#[derive(Debug, Clone)]
pub struct MonthRange {
    next: Option<YearMonth>,
    end: YearMonth,
}

impl Iterator for MonthRange {
    type Item = YearMonth;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        if current > self.end {
            self.next = None;
            return None;
        }
        self.next = Some(current.succ());
        Some(current)
    }
}
