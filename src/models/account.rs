use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::user::AuthUser;

pub const PASSWORD_PROVIDER: &str = "password";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(rename = "_id")]
    pub id: String,
    /// Always stored lowercased.
    pub email: String,
    /// bcrypt hash; absent for accounts that only use federated sign-in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub providers: Vec<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub failed_signins: i32,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_signin_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn to_auth_user(&self) -> AuthUser {
        AuthUser {
            uid: self.id.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            providers: self.providers.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PasswordReset {
    /// The reset token itself.
    #[serde(rename = "_id")]
    pub id: String,
    pub account_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub used: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpInput {
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SignInInput {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederatedInput {
    pub provider: String,
    pub id_token: Option<String>,
    /// Error code reported by the client-side sign-in flow, for example
    /// `auth/popup-closed-by-user`.
    pub client_error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetInput {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetConfirmInput {
    pub token: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayNameInput {
    pub display_name: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<AuthUser>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
