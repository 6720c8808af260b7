use std::sync::Arc;

use async_trait::async_trait;
use bson::doc;
use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, decode_header, encode, jwk::JwkSet, Algorithm, DecodingKey, EncodingKey, Header,
    Validation,
};
use log::{debug, error, info, warn};
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use uuid::Uuid;

use crate::db::store::{
    collections, from_document, from_documents, new_id, to_document, DocumentStore, Query,
    StoreError, WriteBatch,
};
use crate::middleware::auth::Claims;
use crate::models::account::{Account, PasswordReset, PASSWORD_PROVIDER};
use crate::models::user::AuthUser;
use crate::services::payment_validation::is_valid_email;

pub const MIN_PASSWORD_LENGTH: usize = 6;
pub const MAX_FAILED_SIGNINS: i32 = 5;
pub const TOKEN_LIFETIME_HOURS: i64 = 24;
pub const RESET_LIFETIME_HOURS: i64 = 1;

const GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const APPLE_JWKS_URL: &str = "https://appleid.apple.com/auth/keys";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthError {
    #[error("Network error. Please check your internet connection and try again.")]
    NetworkRequestFailed,
    #[error("No account found with this email address.")]
    UserNotFound,
    #[error("Incorrect password. Please try again.")]
    WrongPassword,
    #[error("An account with this email already exists. Please sign in instead.")]
    EmailAlreadyInUse,
    #[error("Password is too weak. Please choose a stronger password.")]
    WeakPassword,
    #[error("Please enter a valid email address.")]
    InvalidEmail,
    #[error("Too many failed attempts. Please try again later.")]
    TooManyRequests,
    #[error("This account has been disabled. Please contact support.")]
    UserDisabled,
    #[error("This sign-in method is not enabled. Please contact support.")]
    OperationNotAllowed,
    #[error("Sign-in was cancelled. Please try again.")]
    PopupClosedByUser,
    #[error("Pop-up was blocked. Please allow pop-ups and try again.")]
    PopupBlocked,
    #[error("An error occurred. Please try again.")]
    InvalidCredential,
    #[error("An error occurred. Please try again.")]
    Unknown,
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::NetworkRequestFailed => "auth/network-request-failed",
            AuthError::UserNotFound => "auth/user-not-found",
            AuthError::WrongPassword => "auth/wrong-password",
            AuthError::EmailAlreadyInUse => "auth/email-already-in-use",
            AuthError::WeakPassword => "auth/weak-password",
            AuthError::InvalidEmail => "auth/invalid-email",
            AuthError::TooManyRequests => "auth/too-many-requests",
            AuthError::UserDisabled => "auth/user-disabled",
            AuthError::OperationNotAllowed => "auth/operation-not-allowed",
            AuthError::PopupClosedByUser => "auth/popup-closed-by-user",
            AuthError::PopupBlocked => "auth/popup-blocked",
            AuthError::InvalidCredential => "auth/invalid-credential",
            AuthError::Unknown => "auth/internal-error",
        }
    }

    /// Unrecognised codes map to `Unknown`.
    pub fn from_code(code: &str) -> Self {
        match code {
            "auth/network-request-failed" => AuthError::NetworkRequestFailed,
            "auth/user-not-found" => AuthError::UserNotFound,
            "auth/wrong-password" => AuthError::WrongPassword,
            "auth/email-already-in-use" => AuthError::EmailAlreadyInUse,
            "auth/weak-password" => AuthError::WeakPassword,
            "auth/invalid-email" => AuthError::InvalidEmail,
            "auth/too-many-requests" => AuthError::TooManyRequests,
            "auth/user-disabled" => AuthError::UserDisabled,
            "auth/operation-not-allowed" => AuthError::OperationNotAllowed,
            "auth/popup-closed-by-user" => AuthError::PopupClosedByUser,
            "auth/popup-blocked" => AuthError::PopupBlocked,
            "auth/invalid-credential" => AuthError::InvalidCredential,
            _ => AuthError::Unknown,
        }
    }
}

fn store_failure(err: StoreError) -> AuthError {
    error!("Identity store error: {}", err);
    match err {
        StoreError::Backend(_) => AuthError::NetworkRequestFailed,
        _ => AuthError::Unknown,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FederatedProvider {
    Google,
    Apple,
}

impl FederatedProvider {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "google" | "google.com" => Some(FederatedProvider::Google),
            "apple" | "apple.com" => Some(FederatedProvider::Apple),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FederatedProvider::Google => "google.com",
            FederatedProvider::Apple => "apple.com",
        }
    }

    fn jwks_url(self) -> &'static str {
        match self {
            FederatedProvider::Google => GOOGLE_JWKS_URL,
            FederatedProvider::Apple => APPLE_JWKS_URL,
        }
    }

    fn issuers(self) -> &'static [&'static str] {
        match self {
            FederatedProvider::Google => &["accounts.google.com", "https://accounts.google.com"],
            FederatedProvider::Apple => &["https://appleid.apple.com"],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FederatedIdentity {
    pub subject: String,
    pub email: String,
    /// Whether the provider vouches that `email` belongs to the subject.
    pub email_verified: bool,
    pub name: Option<String>,
}

#[async_trait]
pub trait FederatedVerifier: Send + Sync {
    async fn verify(&self, provider: FederatedProvider, id_token: &str) -> Result<FederatedIdentity, AuthError>;
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_password_reset(&self, email: &str, token: &str) -> Result<(), AuthError>;
}

/// Stand-in for real email delivery.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_password_reset(&self, email: &str, token: &str) -> Result<(), AuthError> {
        info!("Password reset requested for {}", email);
        debug!("Password reset token for {}: {}", email, token);
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BoolOrString {
    Bool(bool),
    Text(String),
}

/// Google sends `email_verified` as a bool, Apple sometimes as `"true"`.
fn bool_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match BoolOrString::deserialize(deserializer)? {
        BoolOrString::Bool(value) => value,
        BoolOrString::Text(value) => value.trim().eq_ignore_ascii_case("true"),
    })
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    email: Option<String>,
    #[serde(default, deserialize_with = "bool_or_string")]
    email_verified: bool,
    name: Option<String>,
}

/// Verifies provider id tokens (RS256) against the provider's published keys.
pub struct JwksVerifier {
    http: reqwest::Client,
    google_client_id: Option<String>,
    apple_client_id: Option<String>,
}

impl JwksVerifier {
    pub fn new(google_client_id: Option<String>, apple_client_id: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            google_client_id,
            apple_client_id,
        }
    }

    fn audience(&self, provider: FederatedProvider) -> Option<&str> {
        match provider {
            FederatedProvider::Google => self.google_client_id.as_deref(),
            FederatedProvider::Apple => self.apple_client_id.as_deref(),
        }
    }

    async fn fetch_keys(&self, provider: FederatedProvider) -> Result<JwkSet, AuthError> {
        let response = self
            .http
            .get(provider.jwks_url())
            .send()
            .await
            .map_err(|e| {
                warn!("Failed to fetch {} keys: {}", provider.as_str(), e);
                AuthError::NetworkRequestFailed
            })?;
        response.json::<JwkSet>().await.map_err(|e| {
            warn!("Failed to parse {} keys: {}", provider.as_str(), e);
            AuthError::NetworkRequestFailed
        })
    }
}

#[async_trait]
impl FederatedVerifier for JwksVerifier {
    async fn verify(&self, provider: FederatedProvider, id_token: &str) -> Result<FederatedIdentity, AuthError> {
        let audience = self.audience(provider).ok_or(AuthError::OperationNotAllowed)?;
        let header = decode_header(id_token).map_err(|_| AuthError::InvalidCredential)?;
        let kid = header.kid.ok_or(AuthError::InvalidCredential)?;

        let keys = self.fetch_keys(provider).await?;
        let jwk = keys.find(&kid).ok_or(AuthError::InvalidCredential)?;
        let key = DecodingKey::from_jwk(jwk).map_err(|_| AuthError::InvalidCredential)?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[audience]);
        validation.set_issuer(provider.issuers());

        let token = decode::<IdTokenClaims>(id_token, &key, &validation).map_err(|e| {
            warn!("Rejected {} id token: {}", provider.as_str(), e);
            AuthError::InvalidCredential
        })?;
        let email = token.claims.email.ok_or(AuthError::InvalidCredential)?;

        Ok(FederatedIdentity {
            subject: token.claims.sub,
            email,
            email_verified: token.claims.email_verified,
            name: token.claims.name,
        })
    }
}

pub fn issue_token(secret: &str, user: &AuthUser) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let claims = Claims {
        sub: user.email.clone(),
        iat: now.timestamp() as usize,
        exp: (now + Duration::hours(TOKEN_LIFETIME_HOURS)).timestamp() as usize,
        user_id: user.uid.clone(),
        name: user.display_name.clone(),
    };

    let header = Header::new(Algorithm::HS256);
    encode(&header, &claims, &EncodingKey::from_secret(secret.as_ref()))
}

fn normalize_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    if is_valid_email(&email) {
        Ok(email)
    } else {
        Err(AuthError::InvalidEmail)
    }
}

/// Password and federated accounts, password resets and session tokens.
#[derive(Clone)]
pub struct IdentityService {
    store: Arc<dyn DocumentStore>,
    jwt_secret: String,
    verifier: Arc<dyn FederatedVerifier>,
    mailer: Arc<dyn Mailer>,
    hash_cost: u32,
}

impl IdentityService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        jwt_secret: impl Into<String>,
        verifier: Arc<dyn FederatedVerifier>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            store,
            jwt_secret: jwt_secret.into(),
            verifier,
            mailer,
            hash_cost: bcrypt::DEFAULT_COST,
        }
    }

    pub fn with_hash_cost(mut self, cost: u32) -> Self {
        self.hash_cost = cost;
        self
    }

    pub fn jwt_secret(&self) -> &str {
        &self.jwt_secret
    }

    pub fn issue_token(&self, user: &AuthUser) -> Result<String, AuthError> {
        issue_token(&self.jwt_secret, user).map_err(|e| {
            error!("Token generation failed: {}", e);
            AuthError::Unknown
        })
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AuthError> {
        let query = Query::collection(collections::ACCOUNTS)
            .where_eq("email", email)
            .limit(1);
        let documents = self.store.query(&query).await.map_err(store_failure)?;
        let accounts: Vec<Account> = from_documents(documents).map_err(store_failure)?;
        Ok(accounts.into_iter().next())
    }

    async fn find_by_id(&self, user_id: &str) -> Result<Account, AuthError> {
        let document = self
            .store
            .get(collections::ACCOUNTS, user_id)
            .await
            .map_err(store_failure)?
            .ok_or(AuthError::UserNotFound)?;
        from_document(document).map_err(store_failure)
    }

    fn hash(&self, password: &str) -> Result<String, AuthError> {
        bcrypt::hash(password, self.hash_cost).map_err(|e| {
            error!("Password hashing failed: {}", e);
            AuthError::Unknown
        })
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<AuthUser, AuthError> {
        let email = normalize_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AuthError::WeakPassword);
        }
        if self.find_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailAlreadyInUse);
        }

        let account = Account {
            id: new_id(),
            email,
            password_hash: Some(self.hash(password)?),
            display_name: display_name
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string),
            providers: vec![PASSWORD_PROVIDER.to_string()],
            disabled: false,
            failed_signins: 0,
            last_signin_at: Some(Utc::now()),
            created_at: None,
            updated_at: None,
        };
        let document = to_document(&account).map_err(store_failure)?;
        self.store
            .insert(collections::ACCOUNTS, &account.id, document)
            .await
            .map_err(store_failure)?;

        info!("Created account {}", account.id);
        Ok(account.to_auth_user())
    }

    /// Five wrong passwords in a row lock the account until its password is reset.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        let email = normalize_email(email)?;
        let account = self
            .find_by_email(&email)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if account.disabled {
            return Err(AuthError::UserDisabled);
        }
        if account.failed_signins >= MAX_FAILED_SIGNINS {
            return Err(AuthError::TooManyRequests);
        }

        let verified = account
            .password_hash
            .as_deref()
            .map_or(false, |hash| bcrypt::verify(password, hash).unwrap_or(false));

        if !verified {
            let failed_signins = account.failed_signins + 1;
            self.store
                .update(
                    collections::ACCOUNTS,
                    &account.id,
                    doc! { "failedSignins": failed_signins },
                )
                .await
                .map_err(store_failure)?;
            return Err(AuthError::WrongPassword);
        }

        self.store
            .update(
                collections::ACCOUNTS,
                &account.id,
                doc! { "failedSignins": 0, "lastSigninAt": Utc::now().timestamp_millis() },
            )
            .await
            .map_err(store_failure)?;
        Ok(account.to_auth_user())
    }

    /// `client_error` carries a failure reported by the provider's client
    /// flow (closed or blocked popup) and wins over any token.
    pub async fn sign_in_federated(
        &self,
        provider: &str,
        id_token: Option<&str>,
        client_error: Option<&str>,
    ) -> Result<AuthUser, AuthError> {
        if let Some(code) = client_error {
            return Err(AuthError::from_code(code));
        }
        let provider = FederatedProvider::parse(provider).ok_or(AuthError::OperationNotAllowed)?;
        let id_token = id_token.ok_or(AuthError::InvalidCredential)?;

        let identity = self.verifier.verify(provider, id_token).await?;
        // Linking by email is only safe when the provider owns the address.
        if !identity.email_verified {
            warn!("Rejected {} sign-in with an unverified email", provider.as_str());
            return Err(AuthError::InvalidCredential);
        }
        let email = normalize_email(&identity.email)?;

        match self.find_by_email(&email).await? {
            Some(mut account) => {
                if account.disabled {
                    return Err(AuthError::UserDisabled);
                }
                if !account.providers.iter().any(|p| p == provider.as_str()) {
                    account.providers.push(provider.as_str().to_string());
                }
                if account.display_name.is_none() {
                    account.display_name = identity.name;
                }
                let mut fields = doc! {
                    "providers": account.providers.clone(),
                    "lastSigninAt": Utc::now().timestamp_millis(),
                };
                if let Some(name) = &account.display_name {
                    fields.insert("displayName", name.clone());
                }
                self.store
                    .update(collections::ACCOUNTS, &account.id, fields)
                    .await
                    .map_err(store_failure)?;
                Ok(account.to_auth_user())
            }
            None => {
                let account = Account {
                    id: new_id(),
                    email,
                    password_hash: None,
                    display_name: identity.name,
                    providers: vec![provider.as_str().to_string()],
                    disabled: false,
                    failed_signins: 0,
                    last_signin_at: Some(Utc::now()),
                    created_at: None,
                    updated_at: None,
                };
                let document = to_document(&account).map_err(store_failure)?;
                self.store
                    .insert(collections::ACCOUNTS, &account.id, document)
                    .await
                    .map_err(store_failure)?;
                info!("Created {} account {}", provider.as_str(), account.id);
                Ok(account.to_auth_user())
            }
        }
    }

    /// Tokens are stateless; signing out only has to be acknowledged.
    pub async fn sign_out(&self, user_id: &str) -> Result<(), AuthError> {
        info!("User {} signed out", user_id);
        Ok(())
    }

    pub async fn send_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let email = normalize_email(email)?;
        let account = self
            .find_by_email(&email)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let reset = PasswordReset {
            id: Uuid::new_v4().to_string(),
            account_id: account.id,
            expires_at: Utc::now() + Duration::hours(RESET_LIFETIME_HOURS),
            used: false,
        };
        let document = to_document(&reset).map_err(store_failure)?;
        self.store
            .insert(collections::PASSWORD_RESETS, &reset.id, document)
            .await
            .map_err(store_failure)?;

        self.mailer.send_password_reset(&email, &reset.id).await
    }

    /// Sets the new password, unlocks the account and burns the token.
    pub async fn confirm_password_reset(&self, token: &str, password: &str) -> Result<AuthUser, AuthError> {
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AuthError::WeakPassword);
        }
        let document = self
            .store
            .get(collections::PASSWORD_RESETS, token)
            .await
            .map_err(store_failure)?
            .ok_or(AuthError::InvalidCredential)?;
        let reset: PasswordReset = from_document(document).map_err(store_failure)?;
        if reset.used || reset.expires_at <= Utc::now() {
            return Err(AuthError::InvalidCredential);
        }

        let mut account = self.find_by_id(&reset.account_id).await?;
        if !account.providers.iter().any(|p| p == PASSWORD_PROVIDER) {
            account.providers.push(PASSWORD_PROVIDER.to_string());
        }

        let mut batch = WriteBatch::new();
        batch
            .set(
                collections::ACCOUNTS,
                &account.id,
                doc! {
                    "passwordHash": self.hash(password)?,
                    "failedSignins": 0,
                    "providers": account.providers.clone(),
                },
            )
            .set(collections::PASSWORD_RESETS, &reset.id, doc! { "used": true });
        self.store.commit(batch).await.map_err(store_failure)?;

        Ok(account.to_auth_user())
    }

    pub async fn update_display_name(&self, user_id: &str, display_name: &str) -> Result<AuthUser, AuthError> {
        let mut account = self.find_by_id(user_id).await?;
        let name = display_name.trim();
        account.display_name = (!name.is_empty()).then(|| name.to_string());

        let value = account
            .display_name
            .clone()
            .map_or(bson::Bson::Null, bson::Bson::String);
        self.store
            .update(collections::ACCOUNTS, user_id, doc! { "displayName": value })
            .await
            .map_err(store_failure)?;
        Ok(account.to_auth_user())
    }

    pub async fn current_user(&self, user_id: &str) -> Result<AuthUser, AuthError> {
        let account = self.find_by_id(user_id).await?;
        if account.disabled {
            return Err(AuthError::UserDisabled);
        }
        Ok(account.to_auth_user())
    }
}
