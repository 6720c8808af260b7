use actix_web::{web, HttpResponse, Responder};
use chrono::Local;
use log::error;
use serde_json::json;

use crate::db::store::StoreError;
use crate::error::ErrorResponse;
use crate::state::AppState;

fn store_error(action: &str, err: StoreError) -> HttpResponse {
    error!("Debug {} failed: {}", action, err);
    HttpResponse::InternalServerError().json(ErrorResponse::retryable(format!("Failed to {}: {}", action, err)))
}

/// Seeds only when there are no tours yet.
pub async fn seed(state: web::Data<AppState>) -> impl Responder {
    match state.seeder.check_and_seed(Local::now().date_naive()).await {
        Ok(Some(report)) => HttpResponse::Created().json(report),
        Ok(None) => HttpResponse::Ok().json(json!({ "seeded": false, "message": "Database already has data" })),
        Err(err) => store_error("seed database", err),
    }
}

pub async fn reseed_unique(state: web::Data<AppState>) -> impl Responder {
    match state.seeder.reseed_unique(Local::now().date_naive()).await {
        Ok(report) => HttpResponse::Created().json(report),
        Err(err) => store_error("reseed database", err),
    }
}

pub async fn inspect(state: web::Data<AppState>) -> impl Responder {
    match state.seeder.inspect().await {
        Ok(summary) => HttpResponse::Ok().json(summary),
        Err(err) => store_error("inspect database", err),
    }
}

pub async fn ensure_indexes(state: web::Data<AppState>) -> impl Responder {
    match state.seeder.ensure_indexes().await {
        Ok(count) => HttpResponse::Ok().json(json!({ "indexes": count })),
        Err(err) => store_error("create indexes", err),
    }
}
