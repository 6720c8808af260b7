use std::collections::HashMap;
use std::env;

use actix_web::{web, HttpResponse, Responder};
use log::error;
use serde::Serialize;

use crate::config::ConfigNotice;
use crate::db::store::collections;
use crate::state::AppState;

#[derive(Serialize)]
struct HealthStatus {
    status: String,
    services: HashMap<String, ServiceStatus>,
    environment: String,
    version: String,
}

#[derive(Serialize, Clone)]
struct ServiceStatus {
    status: String,
    details: Option<String>,
}

pub async fn health_check(state: web::Data<AppState>) -> impl Responder {
    let mut health = HealthStatus {
        status: "ok".to_string(),
        services: HashMap::new(),
        environment: env::var("RUST_ENV").unwrap_or("development".to_string()),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let store = check_store(&state).await;
    if store.status != "ok" {
        health.status = "degraded".to_string();
    }
    health.services.insert("store".to_string(), store);

    HttpResponse::Ok().json(health)
}

async fn check_store(state: &AppState) -> ServiceStatus {
    match state.bookings.store().count(collections::TOURS).await {
        Ok(tours) => ServiceStatus {
            status: "ok".to_string(),
            details: Some(format!("Store reachable, {} tours", tours)),
        },
        Err(e) => {
            error!("Store health check failed: {}", e);
            ServiceStatus {
                status: "error".to_string(),
                details: Some(format!("Failed to reach store: {}", e)),
            }
        }
    }
}

pub async fn configuration_notice(notice: web::Data<ConfigNotice>) -> HttpResponse {
    HttpResponse::ServiceUnavailable().json(notice.get_ref())
}
