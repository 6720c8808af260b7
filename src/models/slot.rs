use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AvailableSlot {
    #[serde(rename = "_id")]
    pub id: String,
    pub tour_id: String,
    pub date: NaiveDate,
    /// `HH:MM`, 24-hour.
    pub time: String,
    pub available_spots: i32,
    pub max_spots: i32,
    /// Overrides the tour's base price when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

pub const DEFAULT_RANGE_DAYS: u64 = 30;
/// Longest span a single availability request may cover.
pub const MAX_RANGE_DAYS: i64 = 366;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RangeError {
    #[error("end must not be before start")]
    Reversed,
    #[error("date range may cover at most {} days", MAX_RANGE_DAYS)]
    TooLong,
    #[error("start is too far in the future")]
    OutOfBounds,
}

#[derive(Debug, Default, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    /// Missing bounds default to `today` and a month after the start.
    pub fn resolve(&self, today: NaiveDate) -> Result<(NaiveDate, NaiveDate), RangeError> {
        let start = self.start.unwrap_or(today);
        let end = match self.end {
            Some(end) => end,
            None => start
                .checked_add_days(Days::new(DEFAULT_RANGE_DAYS))
                .ok_or(RangeError::OutOfBounds)?,
        };
        if end < start {
            return Err(RangeError::Reversed);
        }
        if (end - start).num_days() >= MAX_RANGE_DAYS {
            return Err(RangeError::TooLong);
        }
        Ok((start, end))
    }
}
