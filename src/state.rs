use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::store::DocumentStore;
use crate::services::booking_service::BookingService;
use crate::services::identity_service::{IdentityService, JwksVerifier, LogMailer};
use crate::services::seed_service::SeedService;

/// Shared by every worker through `web::Data`.
#[derive(Clone)]
pub struct AppState {
    pub bookings: BookingService,
    pub identity: IdentityService,
    pub seeder: SeedService,
    pub admin_emails: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(store: Arc<dyn DocumentStore>, identity: IdentityService) -> Self {
        Self {
            bookings: BookingService::new(store.clone()),
            seeder: SeedService::new(store),
            identity,
            admin_emails: Arc::default(),
        }
    }

    pub fn with_admins(mut self, emails: Vec<String>) -> Self {
        self.admin_emails = Arc::new(emails);
        self
    }

    pub fn is_admin(&self, email: &str) -> bool {
        self.admin_emails
            .iter()
            .any(|admin| admin.eq_ignore_ascii_case(email))
    }

    pub fn from_config(store: Arc<dyn DocumentStore>, config: &AppConfig) -> Self {
        let verifier = JwksVerifier::new(config.google_client_id.clone(), config.apple_client_id.clone());
        let identity = IdentityService::new(
            store.clone(),
            config.jwt_secret.clone(),
            Arc::new(verifier),
            Arc::new(LogMailer),
        );
        Self::new(store, identity).with_admins(config.admin_emails.clone())
    }
}
