#![allow(dead_code)]

use std::sync::Arc;

use actix_web::{web, App};
use async_trait::async_trait;
use chrono::{Duration, Local, NaiveDate};

use campus_tours_api::db::memory::MemoryStore;
use campus_tours_api::db::store::{collections, to_document, DocumentStore};
use campus_tours_api::models::slot::AvailableSlot;
use campus_tours_api::models::tour::Tour;
use campus_tours_api::routes;
use campus_tours_api::services::identity_service::{
    AuthError, FederatedIdentity, FederatedProvider, FederatedVerifier, IdentityService, LogMailer,
};
use campus_tours_api::state::AppState;

pub const JWT_SECRET: &str = "integration-secret";
pub const ADMIN_EMAIL: &str = "ops@example.com";

/// Accepts the token "valid-google-token" and nothing else.
pub struct StaticVerifier;

#[async_trait]
impl FederatedVerifier for StaticVerifier {
    async fn verify(&self, _: FederatedProvider, id_token: &str) -> Result<FederatedIdentity, AuthError> {
        if id_token == "valid-google-token" {
            Ok(FederatedIdentity {
                subject: "google-sub".to_string(),
                email: "visitor@example.com".to_string(),
                email_verified: true,
                name: Some("Grace Hopper".to_string()),
            })
        } else {
            Err(AuthError::InvalidCredential)
        }
    }
}

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub state: AppState,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    pub fn with_store(store: MemoryStore) -> Self {
        let store = Arc::new(store);
        let identity = IdentityService::new(
            store.clone(),
            JWT_SECRET,
            Arc::new(StaticVerifier),
            Arc::new(LogMailer),
        )
        .with_hash_cost(4);
        let state = AppState::new(store.clone(), identity).with_admins(vec![ADMIN_EMAIL.to_string()]);
        Self { store, state }
    }

    pub fn create_app(
        &self,
    ) -> App<
        impl actix_web::dev::ServiceFactory<
            actix_web::dev::ServiceRequest,
            Config = (),
            Response = actix_web::dev::ServiceResponse,
            Error = actix_web::Error,
            InitError = (),
        >,
    > {
        App::new()
            .app_data(web::Data::new(self.state.clone()))
            .configure(|cfg| routes::configure(cfg, true))
    }

    pub async fn insert_tour(&self, tour: &Tour) {
        self.store
            .insert(collections::TOURS, &tour.id, to_document(tour).unwrap())
            .await
            .unwrap();
    }

    pub async fn insert_slot(&self, slot: &AvailableSlot) {
        self.store
            .insert(collections::SLOTS, &slot.id, to_document(slot).unwrap())
            .await
            .unwrap();
    }
}

pub fn tomorrow() -> NaiveDate {
    Local::now().date_naive() + Duration::days(1)
}

pub fn tour(id: &str, company: &str, price: f64, rating: f64, popular: bool) -> Tour {
    Tour {
        id: id.to_string(),
        company: company.to_string(),
        location: format!("{} HQ", company),
        description: format!("A walk around the {} campus", company),
        highlights: vec!["Campus Walk".to_string()],
        rating,
        duration: 120,
        price,
        max_attendees: 20,
        available_slots: 10,
        image: String::new(),
        popular,
        trending: false,
        active: true,
        created_at: None,
        updated_at: None,
    }
}

pub fn slot(id: &str, tour_id: &str, date: NaiveDate, time: &str, spots: i32) -> AvailableSlot {
    AvailableSlot {
        id: id.to_string(),
        tour_id: tour_id.to_string(),
        date,
        time: time.to_string(),
        available_spots: spots,
        max_spots: 20,
        price: None,
        created_at: None,
        updated_at: None,
    }
}
