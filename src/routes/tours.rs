use actix_web::{web, HttpResponse, Responder};
use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::error::ErrorResponse;
use crate::models::slot::{DateRange, RangeError};
use crate::models::tour::{PageQuery, SearchQuery, Tour, TourFilter, TourPage};
use crate::routes::booking_error;
use crate::services::booking_service::DEFAULT_PAGE_SIZE;
use crate::services::booking_wizard::BookingWizard;
use crate::services::slot_selection::availability_calendar;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UniqueQuery {
    pub company: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UniqueTours {
    pub tours: Vec<Tour>,
    /// Set when `company` names one of the tours.
    pub preselected: Option<Tour>,
}

fn range_error(err: RangeError) -> HttpResponse {
    HttpResponse::BadRequest().json(ErrorResponse::new(err))
}

fn tour_not_found(id: &str) -> HttpResponse {
    HttpResponse::NotFound().json(ErrorResponse::new(format!("Tour {} not found", id)))
}

pub async fn list(state: web::Data<AppState>, filter: web::Query<TourFilter>) -> impl Responder {
    match state.bookings.list_tours(&filter).await {
        Ok(tours) => HttpResponse::Ok().json(tours),
        Err(err) => booking_error(&err),
    }
}

/// Active tours, one per company, for the first wizard step.
pub async fn unique(state: web::Data<AppState>, query: web::Query<UniqueQuery>) -> impl Responder {
    let filter = TourFilter {
        active: Some(true),
        ..TourFilter::default()
    };
    let tours = match state.bookings.list_unique_tours_by_company(&filter).await {
        Ok(tours) => tours,
        Err(err) => return booking_error(&err),
    };

    let preselected = query.company.as_deref().and_then(|company| {
        BookingWizard::with_preselected_company(company)
            .preselected(&tours)
            .cloned()
    });
    HttpResponse::Ok().json(UniqueTours { tours, preselected })
}

pub async fn page(state: web::Data<AppState>, query: web::Query<PageQuery>) -> impl Responder {
    let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    match state.bookings.list_tours_page(page_size, query.cursor()).await {
        Ok((tours, next_cursor)) => HttpResponse::Ok().json(TourPage { tours, next_cursor }),
        Err(err) => booking_error(&err),
    }
}

pub async fn search(state: web::Data<AppState>, query: web::Query<SearchQuery>) -> impl Responder {
    match state.bookings.search_tours(&query.q).await {
        Ok(tours) => HttpResponse::Ok().json(tours),
        Err(err) => booking_error(&err),
    }
}

pub async fn get_by_id(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let id = path.into_inner();
    match state.bookings.get_tour(&id).await {
        Ok(Some(tour)) => HttpResponse::Ok().json(tour),
        Ok(None) => tour_not_found(&id),
        Err(err) => booking_error(&err),
    }
}

pub async fn slots(
    state: web::Data<AppState>,
    path: web::Path<String>,
    range: web::Query<DateRange>,
) -> impl Responder {
    let id = path.into_inner();
    let (start, end) = match range.resolve(Local::now().date_naive()) {
        Ok(bounds) => bounds,
        Err(err) => return range_error(err),
    };
    match state.bookings.fetch_available_slots(&id, start, end).await {
        Ok(slots) => HttpResponse::Ok().json(slots),
        Err(err) => booking_error(&err),
    }
}

/// Per-day availability with past and sold-out slots already removed.
pub async fn calendar(
    state: web::Data<AppState>,
    path: web::Path<String>,
    range: web::Query<DateRange>,
) -> impl Responder {
    let id = path.into_inner();
    let now = Local::now().naive_local();
    let (start, end) = match range.resolve(now.date()) {
        Ok(bounds) => bounds,
        Err(err) => return range_error(err),
    };

    match state.bookings.fetch_available_slots(&id, start, end).await {
        Ok(slots) => HttpResponse::Ok().json(availability_calendar(&slots, start, end, now)),
        Err(err) => booking_error(&err),
    }
}
