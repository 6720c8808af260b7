use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use thiserror::Error;

use crate::models::slot::AvailableSlot;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SelectionError {
    #[error("Please select a date first")]
    NoDateSelected,
    #[error("No available times on {0}")]
    DateUnavailable(NaiveDate),
    #[error("{0} is not available")]
    TimeUnavailable(String),
}

/// Accepts `HH:MM` (24h) and `h:MM AM/PM`.
pub fn parse_time_of_day(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(&value.to_uppercase(), "%I:%M %p"))
        .ok()
}

/// A slot can be picked when it has spots left and has not started yet.
/// Only slots on `now`'s own day are judged by time of day; one whose time
/// cannot be read is treated as already past on that day.
pub fn is_slot_selectable(slot: &AvailableSlot, now: NaiveDateTime) -> bool {
    if slot.available_spots <= 0 {
        return false;
    }
    let today = now.date();
    if slot.date != today {
        return slot.date > today;
    }
    parse_time_of_day(&slot.time).map_or(false, |time| time > now.time())
}

/// Selectable slots on `date`, earliest first.
pub fn selectable_slots<'a>(slots: &'a [AvailableSlot], date: NaiveDate, now: NaiveDateTime) -> Vec<&'a AvailableSlot> {
    let mut selectable: Vec<&AvailableSlot> = slots
        .iter()
        .filter(|slot| slot.date == date && is_slot_selectable(slot, now))
        .collect();
    selectable.sort_by_key(|slot| parse_time_of_day(&slot.time));
    selectable
}

pub fn is_date_selectable(slots: &[AvailableSlot], date: NaiveDate, now: NaiveDateTime) -> bool {
    slots
        .iter()
        .any(|slot| slot.date == date && is_slot_selectable(slot, now))
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub selectable: bool,
    pub open_slots: usize,
    pub available_spots: i32,
    pub times: Vec<String>,
}

/// One entry per day from `start` to `end` inclusive.
pub fn availability_calendar(
    slots: &[AvailableSlot],
    start: NaiveDate,
    end: NaiveDate,
    now: NaiveDateTime,
) -> Vec<DayAvailability> {
    start
        .iter_days()
        .take_while(|date| *date <= end)
        .map(|date| {
            let open = selectable_slots(slots, date, now);
            DayAvailability {
                date,
                selectable: !open.is_empty(),
                open_slots: open.len(),
                available_spots: open.iter().map(|slot| slot.available_spots).sum(),
                times: open.iter().map(|slot| slot.time.clone()).collect(),
            }
        })
        .collect()
}

/// Date then time. Picking a date always drops the picked slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotSelection {
    date: Option<NaiveDate>,
    slot: Option<AvailableSlot>,
}

impl SlotSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    pub fn slot(&self) -> Option<&AvailableSlot> {
        self.slot.as_ref()
    }

    pub fn select_date(
        &mut self,
        slots: &[AvailableSlot],
        date: NaiveDate,
        now: NaiveDateTime,
    ) -> Result<(), SelectionError> {
        self.slot = None;
        if !is_date_selectable(slots, date, now) {
            self.date = None;
            return Err(SelectionError::DateUnavailable(date));
        }
        self.date = Some(date);
        Ok(())
    }

    pub fn select_time(
        &mut self,
        slots: &[AvailableSlot],
        time: &str,
        now: NaiveDateTime,
    ) -> Result<&AvailableSlot, SelectionError> {
        let date = self.date.ok_or(SelectionError::NoDateSelected)?;
        let wanted = parse_time_of_day(time).ok_or_else(|| SelectionError::TimeUnavailable(time.to_string()))?;

        let slot = selectable_slots(slots, date, now)
            .into_iter()
            .find(|slot| parse_time_of_day(&slot.time) == Some(wanted))
            .ok_or_else(|| SelectionError::TimeUnavailable(time.to_string()))?;

        Ok(self.slot.insert(slot.clone()))
    }

    pub fn clear(&mut self) {
        self.date = None;
        self.slot = None;
    }
}
