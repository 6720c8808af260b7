use actix_web::{http::StatusCode, web, HttpResponse, Responder};
use log::info;

use crate::middleware::auth_context::AuthenticatedUser;
use crate::models::account::{
    AuthResponse, DisplayNameInput, FederatedInput, PasswordResetConfirmInput, PasswordResetInput,
    SignInInput, SignUpInput,
};
use crate::models::user::AuthUser;
use crate::services::identity_service::AuthError;
use crate::state::AppState;

pub fn auth_status(err: &AuthError) -> StatusCode {
    match err {
        AuthError::InvalidEmail
        | AuthError::WeakPassword
        | AuthError::PopupClosedByUser
        | AuthError::PopupBlocked => StatusCode::BAD_REQUEST,
        AuthError::UserNotFound | AuthError::WrongPassword | AuthError::InvalidCredential => {
            StatusCode::UNAUTHORIZED
        }
        AuthError::UserDisabled | AuthError::OperationNotAllowed => StatusCode::FORBIDDEN,
        AuthError::EmailAlreadyInUse => StatusCode::CONFLICT,
        AuthError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
        AuthError::NetworkRequestFailed => StatusCode::SERVICE_UNAVAILABLE,
        AuthError::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure(err: AuthError) -> HttpResponse {
    info!("Auth request failed with {}", err.code());
    HttpResponse::build(auth_status(&err)).json(AuthResponse {
        success: false,
        user: None,
        token: None,
        error: Some(err.to_string()),
    })
}

/// Signed-in responses carry a fresh session token.
fn signed_in(state: &AppState, result: Result<AuthUser, AuthError>) -> HttpResponse {
    let user = match result {
        Ok(user) => user,
        Err(err) => return failure(err),
    };
    match state.identity.issue_token(&user) {
        Ok(token) => HttpResponse::Ok().json(AuthResponse {
            success: true,
            user: Some(user),
            token: Some(token),
            error: None,
        }),
        Err(err) => failure(err),
    }
}

pub async fn signup(state: web::Data<AppState>, input: web::Json<SignUpInput>) -> impl Responder {
    let input = input.into_inner();
    let result = state
        .identity
        .sign_up(&input.email, &input.password, input.display_name.as_deref())
        .await;
    signed_in(&state, result)
}

pub async fn signin(state: web::Data<AppState>, input: web::Json<SignInInput>) -> impl Responder {
    let result = state.identity.sign_in(&input.email, &input.password).await;
    signed_in(&state, result)
}

pub async fn federated(state: web::Data<AppState>, input: web::Json<FederatedInput>) -> impl Responder {
    let result = state
        .identity
        .sign_in_federated(
            &input.provider,
            input.id_token.as_deref(),
            input.client_error.as_deref(),
        )
        .await;
    signed_in(&state, result)
}

pub async fn password_reset(
    state: web::Data<AppState>,
    input: web::Json<PasswordResetInput>,
) -> impl Responder {
    match state.identity.send_password_reset(&input.email).await {
        Ok(()) => HttpResponse::Ok().json(AuthResponse {
            success: true,
            user: None,
            token: None,
            error: None,
        }),
        Err(err) => failure(err),
    }
}

pub async fn password_reset_confirm(
    state: web::Data<AppState>,
    input: web::Json<PasswordResetConfirmInput>,
) -> impl Responder {
    let result = state
        .identity
        .confirm_password_reset(&input.token, &input.password)
        .await;
    signed_in(&state, result)
}

pub async fn user_session(state: web::Data<AppState>, user: AuthenticatedUser) -> impl Responder {
    match state.identity.current_user(&user.user_id).await {
        Ok(user) => HttpResponse::Ok().json(AuthResponse {
            success: true,
            user: Some(user),
            token: None,
            error: None,
        }),
        Err(err) => failure(err),
    }
}

pub async fn signout(state: web::Data<AppState>, user: AuthenticatedUser) -> impl Responder {
    match state.identity.sign_out(&user.user_id).await {
        Ok(()) => HttpResponse::Ok().json(AuthResponse {
            success: true,
            user: None,
            token: None,
            error: None,
        }),
        Err(err) => failure(err),
    }
}

/// The token embeds the display name, so a new one is issued.
pub async fn update_profile(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    input: web::Json<DisplayNameInput>,
) -> impl Responder {
    let result = state
        .identity
        .update_display_name(&user.user_id, &input.display_name)
        .await;
    signed_in(&state, result)
}
