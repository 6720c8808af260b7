use actix_web::{web, HttpResponse, Responder};

use crate::error::FieldErrors;
use crate::middleware::auth_context::AuthenticatedUser;
use crate::models::user::PreferencesUpdate;
use crate::routes::{booking_state, state_error, validation_error};
use crate::state::AppState;

/// Creates the profile from the account on first visit.
pub async fn get_profile(state: web::Data<AppState>, user: AuthenticatedUser) -> impl Responder {
    let mut bookings = booking_state(&state, user.to_auth_user());
    match bookings.fetch_user_profile().await {
        Ok(profile) => HttpResponse::Ok().json(profile),
        Err(err) => state_error(&err),
    }
}

pub async fn update_preferences(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    input: web::Json<PreferencesUpdate>,
) -> impl Responder {
    let update = input.into_inner();
    if update.is_empty() {
        let mut fields = FieldErrors::new();
        fields.add("preferences", "Nothing to update");
        return validation_error(fields);
    }
    if update.max_price.map_or(false, |price| price < 0.0) {
        let mut fields = FieldErrors::new();
        fields.add("maxPrice", "Maximum price cannot be negative");
        return validation_error(fields);
    }

    let mut bookings = booking_state(&state, user.to_auth_user());
    match bookings.update_user_preferences(&update).await {
        Ok(profile) => HttpResponse::Ok().json(profile),
        Err(err) => state_error(&err),
    }
}
