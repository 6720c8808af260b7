use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use chrono::Local;
use env_logger::Env;
use log::{error, info, warn};

use campus_tours_api::config::{AppConfig, ConfigNotice, StoreBackend, DEFAULT_HOST, DEFAULT_PORT};
use campus_tours_api::db::memory::MemoryStore;
use campus_tours_api::db::mongo::{create_mongo_client, MongoStore};
use campus_tours_api::db::store::{DocumentStore, StoreError};
use campus_tours_api::routes;
use campus_tours_api::state::AppState;

async fn open_store(config: &AppConfig) -> Result<Arc<dyn DocumentStore>, StoreError> {
    match config.backend {
        StoreBackend::Memory => {
            warn!("Using the in-memory store; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Mongo => {
            let uri = config.mongodb_uri.as_deref().unwrap_or_default();
            info!("Got MongoDB URI, attempting connection...");
            let client = create_mongo_client(uri).await?;
            info!("MongoDB connection established");
            Ok(Arc::new(MongoStore::new(
                client,
                config.mongodb_database.clone(),
                config.require_composite_indexes,
            )))
        }
    }
}

fn cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allow_any_method()
        .allow_any_header()
        .max_age(3600)
}

/// Keeps the process up and answers every request with 503 and `notice`.
async fn serve_notice(host: String, port: u16, notice: ConfigNotice) -> std::io::Result<()> {
    error!("{}", notice.error);
    HttpServer::new(move || {
        App::new()
            .wrap(cors())
            .wrap(Logger::default())
            .configure(|cfg| routes::configure_notice(cfg, notice.clone()))
    })
    .bind((host, port))?
    .run()
    .await
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    if cfg!(debug_assertions) {
        dotenv::dotenv().ok();
    }

    env_logger::init_from_env(Env::default().default_filter_or("info"));
    info!("Application starting...");

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            let host = std::env::var("HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
            let port = std::env::var("PORT")
                .ok()
                .and_then(|port| port.parse().ok())
                .unwrap_or(DEFAULT_PORT);
            return serve_notice(host, port, ConfigNotice::from(&err)).await;
        }
    };
    let (host, port) = config.bind_address();

    let store = match open_store(&config).await {
        Ok(store) => store,
        Err(err) => return serve_notice(host, port, ConfigNotice::unavailable(err)).await,
    };
    let state = AppState::from_config(store, &config);

    if config.seed_on_startup {
        if let Err(err) = state.seeder.ensure_indexes().await {
            warn!("Failed to create indexes: {}", err);
        }
        if let Err(err) = state.seeder.check_and_seed(Local::now().date_naive()).await {
            error!("Failed to seed database: {}", err);
        }
    }

    info!("Starting HTTP server on {}:{}", host, port);
    let enable_debug_routes = config.enable_debug_routes;
    if enable_debug_routes {
        warn!("Debug routes are enabled");
    }

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(cors())
            .wrap(Logger::default())
            .configure(|cfg| routes::configure(cfg, enable_debug_routes))
    })
    .bind((host, port))?
    .run()
    .await
}
