use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tour {
    #[serde(rename = "_id")]
    pub id: String,
    pub company: String,
    pub location: String,
    pub description: String,
    #[serde(default)]
    pub highlights: Vec<String>,
    pub rating: f64,
    /// Minutes.
    pub duration: i32,
    pub price: f64,
    pub max_attendees: i32,
    #[serde(default)]
    pub available_slots: i32,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub popular: bool,
    #[serde(default)]
    pub trending: bool,
    #[serde(default = "default_true")]
    pub active: bool,
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

impl Tour {
    /// Case-insensitive substring match over company, description and highlights.
    pub fn mentions(&self, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return true;
        }
        self.company.to_lowercase().contains(&term)
            || self.description.to_lowercase().contains(&term)
            || self
                .highlights
                .iter()
                .any(|highlight| highlight.to_lowercase().contains(&term))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TourFilter {
    pub company: Option<String>,
    pub active: Option<bool>,
    pub popular: Option<bool>,
    pub max_price: Option<f64>,
}

/// Position after the last tour of a page ordered by rating desc, id asc.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TourCursor {
    pub rating: f64,
    pub id: String,
}

impl TourCursor {
    pub fn after(tour: &Tour) -> Self {
        Self {
            rating: tour.rating,
            id: tour.id.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub page_size: Option<usize>,
    pub after_rating: Option<f64>,
    pub after_id: Option<String>,
}

impl PageQuery {
    pub fn cursor(&self) -> Option<TourCursor> {
        match (self.after_rating, &self.after_id) {
            (Some(rating), Some(id)) => Some(TourCursor {
                rating,
                id: id.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TourPage {
    pub tours: Vec<Tour>,
    pub next_cursor: Option<TourCursor>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
}
