use actix_web::{web, HttpResponse, Responder};

use crate::error::ErrorResponse;
use crate::middleware::auth_context::AdminUser;
use crate::models::stats::StatsQuery;
use crate::routes::booking_error;
use crate::state::AppState;

fn invalid_range() -> HttpResponse {
    HttpResponse::BadRequest().json(ErrorResponse::new("end must not be before start"))
}

/// Revenue across every customer, so admins only.
pub async fn bookings(
    state: web::Data<AppState>,
    _admin: AdminUser,
    query: web::Query<StatsQuery>,
) -> impl Responder {
    if query.end < query.start {
        return invalid_range();
    }
    match state.bookings.booking_stats(query.start, query.end).await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(err) => booking_error(&err),
    }
}

pub async fn slots(
    state: web::Data<AppState>,
    _admin: AdminUser,
    query: web::Query<StatsQuery>,
) -> impl Responder {
    if query.end < query.start {
        return invalid_range();
    }
    match state
        .bookings
        .slot_stats(query.tour_id.as_deref(), query.start, query.end)
        .await
    {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(err) => booking_error(&err),
    }
}
