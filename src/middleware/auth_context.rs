use std::future::{ready, Ready};

use actix_web::{
    dev::Payload,
    error::{ErrorForbidden, ErrorInternalServerError, ErrorUnauthorized},
    web, Error, FromRequest, HttpMessage, HttpRequest,
};
use log::info;

use crate::middleware::auth::Claims;
use crate::models::user::AuthUser;
use crate::state::AppState;

/// The caller behind a route wrapped in `AuthMiddleware`.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub email: String,
    pub display_name: Option<String>,
}

impl AuthenticatedUser {
    /// Provider details are not carried in the token.
    pub fn to_auth_user(&self) -> AuthUser {
        AuthUser {
            uid: self.user_id.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            providers: Vec::new(),
        }
    }
}

impl FromRequest for AuthenticatedUser {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        if let Some(claims) = req.extensions().get::<Claims>() {
            ready(Ok(AuthenticatedUser {
                user_id: claims.user_id.clone(),
                email: claims.sub.clone(),
                display_name: claims.name.clone(),
            }))
        } else {
            ready(Err(ErrorUnauthorized("User not authenticated")))
        }
    }
}

/// An authenticated caller listed in `ADMIN_EMAILS`.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthenticatedUser);

impl FromRequest for AdminUser {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        let user = match AuthenticatedUser::from_request(req, payload).into_inner() {
            Ok(user) => user,
            Err(err) => return ready(Err(err)),
        };
        let Some(state) = req.app_data::<web::Data<AppState>>() else {
            return ready(Err(ErrorInternalServerError("Application state missing")));
        };
        if state.is_admin(&user.email) {
            ready(Ok(AdminUser(user)))
        } else {
            info!("User {} denied admin route {}", user.user_id, req.path());
            ready(Err(ErrorForbidden("Admin access required")))
        }
    }
}
