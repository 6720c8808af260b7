use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_DATABASE: &str = "campus_tours";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Mongo,
    Memory,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: StoreBackend,
    pub mongodb_uri: Option<String>,
    pub mongodb_database: String,
    pub jwt_secret: String,
    /// Compound reads fail instead of scanning when their index is missing.
    pub require_composite_indexes: bool,
    pub google_client_id: Option<String>,
    pub apple_client_id: Option<String>,
    pub enable_debug_routes: bool,
    pub seed_on_startup: bool,
    /// Lowercased; only these accounts may read the stats routes.
    pub admin_emails: Vec<String>,
}

fn flag(value: Option<String>) -> bool {
    value.map_or(false, |value| {
        matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
    })
}

fn email_list(value: Option<String>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(|email| email.trim().to_lowercase())
        .filter(|email| !email.is_empty())
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads every setting through `lookup` and reports all missing
    /// variables at once.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend = match non_empty(lookup("STORE_BACKEND")) {
            None => StoreBackend::Mongo,
            Some(value) => match value.trim().to_lowercase().as_str() {
                "mongo" | "mongodb" => StoreBackend::Mongo,
                "memory" => StoreBackend::Memory,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "STORE_BACKEND",
                        value,
                    })
                }
            },
        };

        let port = match non_empty(lookup("PORT")) {
            None => DEFAULT_PORT,
            Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
                name: "PORT",
                value: value.clone(),
            })?,
        };

        let mongodb_uri = non_empty(lookup("MONGODB_URI"));
        let jwt_secret = non_empty(lookup("JWT_SECRET"));

        let mut missing = Vec::new();
        if backend == StoreBackend::Mongo && mongodb_uri.is_none() {
            missing.push("MONGODB_URI");
        }
        if jwt_secret.is_none() {
            missing.push("JWT_SECRET");
        }
        let Some(jwt_secret) = jwt_secret.filter(|_| missing.is_empty()) else {
            return Err(ConfigError::Missing(missing));
        };

        Ok(Self {
            host: non_empty(lookup("HOST")).unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            backend,
            mongodb_uri,
            mongodb_database: non_empty(lookup("MONGODB_DATABASE"))
                .unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            jwt_secret,
            require_composite_indexes: flag(lookup("REQUIRE_COMPOSITE_INDEXES")),
            google_client_id: non_empty(lookup("GOOGLE_CLIENT_ID")),
            apple_client_id: non_empty(lookup("APPLE_CLIENT_ID")),
            enable_debug_routes: flag(lookup("ENABLE_DEBUG_ROUTES")),
            seed_on_startup: flag(lookup("SEED_ON_STARTUP")),
            admin_emails: email_list(lookup("ADMIN_EMAILS")),
        })
    }

    pub fn bind_address(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}

/// What an unconfigured server tells every caller.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConfigNotice {
    pub status: &'static str,
    pub error: String,
    pub missing: Vec<String>,
}

impl ConfigNotice {
    /// Configured, but the backend could not be reached at startup.
    pub fn unavailable(reason: impl std::fmt::Display) -> Self {
        Self {
            status: "unavailable",
            error: format!("The service is not available: {}", reason),
            missing: Vec::new(),
        }
    }
}

impl From<&ConfigError> for ConfigNotice {
    fn from(err: &ConfigError) -> Self {
        let missing = match err {
            ConfigError::Missing(names) => names.iter().map(|name| name.to_string()).collect(),
            ConfigError::Invalid { name, .. } => vec![name.to_string()],
        };
        Self {
            status: "unconfigured",
            error: format!("The service is not configured: {}", err),
            missing,
        }
    }
}
