use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookingStats {
    pub total_bookings: usize,
    pub total_revenue: f64,
    pub average_rating: Option<f64>,
    /// Up to five tour names, most booked first.
    pub popular_tours: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SlotStats {
    pub total_slots: usize,
    pub open_slots: usize,
    pub full_slots: usize,
    pub available_spots: i64,
    pub capacity: i64,
    /// Share of capacity already booked, 0 to 1.
    pub utilization: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub tour_id: Option<String>,
}
