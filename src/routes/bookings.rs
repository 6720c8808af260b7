use actix_web::{web, HttpResponse, Responder};
use chrono::{Local, NaiveDate};
use log::warn;
use serde::Deserialize;
use serde_json::json;

use crate::error::{ErrorResponse, FieldErrors};
use crate::middleware::auth_context::AuthenticatedUser;
use crate::models::bookings::{StatusQuery, StatusUpdate};
use crate::routes::{booking_error, booking_state, state_error, validation_error};
use crate::services::booking_wizard::{BookingWizard, PaymentDetails, StepInput, WizardError};
use crate::services::payment_validation::GuestDetails;
use crate::services::slot_selection::SelectionError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub tour_id: String,
    pub date: NaiveDate,
    pub time: String,
    pub guest: GuestDetails,
    pub payment: PaymentDetails,
}

fn wizard_error(err: WizardError) -> HttpResponse {
    match err {
        WizardError::Invalid(fields) => validation_error(fields),
        WizardError::Selection(selection) => {
            let field = match selection {
                SelectionError::NoDateSelected | SelectionError::DateUnavailable(_) => "date",
                SelectionError::TimeUnavailable(_) => "time",
            };
            let mut fields = FieldErrors::new();
            fields.add(field, selection.to_string());
            validation_error(fields)
        }
        WizardError::TourInactive => HttpResponse::UnprocessableEntity().json(ErrorResponse::new(err)),
        WizardError::OutOfOrder { .. } => HttpResponse::Conflict().json(ErrorResponse::new(err)),
        WizardError::Unauthenticated => HttpResponse::Unauthorized().json(ErrorResponse::new(err)),
        WizardError::BookingFailed => HttpResponse::InternalServerError().json(ErrorResponse::retryable(err)),
    }
}

pub async fn list(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    query: web::Query<StatusQuery>,
) -> impl Responder {
    let mut bookings = booking_state(&state, user.to_auth_user());
    match bookings.fetch_user_bookings(query.status).await {
        Ok(list) => HttpResponse::Ok().json(list),
        Err(err) => state_error(&err),
    }
}

/// Runs the whole wizard for one request: tour, schedule, guests, payment.
pub async fn checkout(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    input: web::Json<CheckoutRequest>,
) -> impl Responder {
    let input = input.into_inner();
    let tour = match state.bookings.get_tour(&input.tour_id).await {
        Ok(Some(tour)) => tour,
        Ok(None) => {
            return HttpResponse::NotFound()
                .json(ErrorResponse::new(format!("Tour {} not found", input.tour_id)))
        }
        Err(err) => return booking_error(&err),
    };

    let now = Local::now().naive_local();
    let slots = match state
        .bookings
        .fetch_available_slots(&tour.id, input.date, input.date)
        .await
    {
        Ok(slots) => slots,
        Err(err) => return booking_error(&err),
    };

    let mut wizard = BookingWizard::new();
    let steps = [
        StepInput::Tour { tour, slots },
        StepInput::Schedule {
            date: input.date,
            time: input.time,
        },
        StepInput::Guests(input.guest),
    ];
    for step in steps {
        if let Err(err) = wizard.apply(step, now) {
            return wizard_error(err);
        }
    }

    let mut bookings = booking_state(&state, user.to_auth_user());
    match wizard.submit_payment(&mut bookings, input.payment, now.date()).await {
        Ok(confirmation) => HttpResponse::Created().json(confirmation),
        Err(err) => {
            warn!("Checkout for user {} stopped at {:?}: {}", user.user_id, wizard.step(), err);
            wizard_error(err)
        }
    }
}

pub async fn update_status(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<String>,
    input: web::Json<StatusUpdate>,
) -> impl Responder {
    let id = path.into_inner();
    match state.bookings.get_booking(&id).await {
        Ok(Some(booking)) if booking.user_id != user.user_id => {
            return HttpResponse::Forbidden().json(ErrorResponse::new("Forbidden"));
        }
        Ok(Some(_)) => {}
        Ok(None) => {
            return HttpResponse::NotFound().json(ErrorResponse::new(format!("Booking {} not found", id)));
        }
        Err(err) => return booking_error(&err),
    }

    let mut bookings = booking_state(&state, user.to_auth_user());
    if let Err(err) = bookings.update_booking_status(&id, input.status).await {
        return state_error(&err);
    }
    match bookings.bookings.data.iter().find(|booking| booking.id == id) {
        Some(booking) => HttpResponse::Ok().json(booking),
        None => HttpResponse::Ok().json(json!({ "id": id, "status": input.status })),
    }
}
