use actix_web::{web, HttpResponse};

use crate::config::ConfigNotice;
use crate::error::{ErrorResponse, FieldErrors};
use crate::middleware::auth::AuthMiddleware;
use crate::models::user::AuthUser;
use crate::services::booking_service::BookingError;
use crate::services::booking_state::{BookingState, StateError};
use crate::services::session::Session;
use crate::state::AppState;

pub mod auth;
pub mod bookings;
pub mod debug;
pub mod health;
pub mod profile;
pub mod stats;
pub mod tours;

/// Store-backed failures: the caller may simply try again.
pub(crate) fn booking_error(err: &BookingError) -> HttpResponse {
    HttpResponse::InternalServerError().json(ErrorResponse::retryable(err))
}

pub(crate) fn state_error(err: &StateError) -> HttpResponse {
    match err {
        StateError::Unauthenticated => HttpResponse::Unauthorized().json(ErrorResponse::new(err)),
        StateError::Booking(err) => booking_error(err),
    }
}

pub(crate) fn validation_error(fields: FieldErrors) -> HttpResponse {
    HttpResponse::UnprocessableEntity().json(ErrorResponse::validation(fields))
}

/// A `BookingState` for `user`, scoped to one request.
pub(crate) fn booking_state(state: &AppState, user: AuthUser) -> BookingState {
    let session = Session::signed_in(user);
    BookingState::new(state.bookings.clone(), session.subscribe())
}

pub fn configure(cfg: &mut web::ServiceConfig, enable_debug_routes: bool) {
    cfg.route("/health", web::get().to(health::health_check));

    let mut api = web::scope("/api")
        .service(
            web::scope("/auth")
                .route("/signup", web::post().to(auth::signup))
                .route("/signin", web::post().to(auth::signin))
                .route("/federated", web::post().to(auth::federated))
                .route("/password-reset", web::post().to(auth::password_reset))
                .route("/password-reset/confirm", web::post().to(auth::password_reset_confirm))
                .service(
                    web::scope("")
                        .wrap(AuthMiddleware)
                        .route("/session", web::get().to(auth::user_session))
                        .route("/signout", web::post().to(auth::signout))
                        .route("/profile", web::put().to(auth::update_profile)),
                ),
        )
        .service(
            web::scope("/tours")
                .route("", web::get().to(tours::list))
                .route("/unique", web::get().to(tours::unique))
                .route("/page", web::get().to(tours::page))
                .route("/search", web::get().to(tours::search))
                .route("/{id}", web::get().to(tours::get_by_id))
                .route("/{id}/slots", web::get().to(tours::slots))
                .route("/{id}/calendar", web::get().to(tours::calendar)),
        )
        .service(
            web::scope("/bookings")
                .wrap(AuthMiddleware)
                .route("", web::get().to(bookings::list))
                .route("/checkout", web::post().to(bookings::checkout))
                .route("/{id}/status", web::put().to(bookings::update_status)),
        )
        .service(
            web::scope("/profile")
                .wrap(AuthMiddleware)
                .route("", web::get().to(profile::get_profile))
                .route("/preferences", web::put().to(profile::update_preferences)),
        )
        .service(
            web::scope("/stats")
                .wrap(AuthMiddleware)
                .route("/bookings", web::get().to(stats::bookings))
                .route("/slots", web::get().to(stats::slots)),
        );

    if enable_debug_routes {
        api = api.service(
            web::scope("/debug")
                .route("/seed", web::post().to(debug::seed))
                .route("/reseed-unique", web::post().to(debug::reseed_unique))
                .route("/inspect", web::get().to(debug::inspect))
                .route("/indexes", web::post().to(debug::ensure_indexes)),
        );
    }

    cfg.service(api);
}

/// Every route answers 503 with the notice until the service is configured.
pub fn configure_notice(cfg: &mut web::ServiceConfig, notice: ConfigNotice) {
    cfg.app_data(web::Data::new(notice))
        .default_service(web::to(health::configuration_notice));
}
