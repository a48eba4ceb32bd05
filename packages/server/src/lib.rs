#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for the paddle mirror.
//!
//! Exposes the ingestion pipeline over HTTP: start a run, list or clear
//! the mirrored users, cancel the active run, and follow run progress
//! through a server-push (`text/event-stream`) status stream.

mod handlers;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use paddle_mirror_database::UserStore;
use paddle_mirror_ingest::{IngestionController, MirrorConfig, StatusChannel};

/// Shared application state.
pub struct AppState {
    /// Local record store.
    pub store: Arc<UserStore>,
    /// Ingestion controller (single-flight).
    pub controller: Arc<IngestionController>,
    /// Relay feeding the status stream.
    pub channel: Arc<StatusChannel>,
}

impl AppState {
    /// Wires a controller around `store`, `fetcher`, and a fresh status
    /// channel.
    #[must_use]
    pub fn new(
        store: Arc<UserStore>,
        fetcher: Arc<dyn paddle_mirror_source::PageFetcher>,
        config: &MirrorConfig,
    ) -> Self {
        let channel = Arc::new(StatusChannel::new());
        let controller = IngestionController::new(store.clone(), fetcher, channel.clone())
            .with_page_delay(config.page_delay());

        Self {
            store,
            controller: Arc::new(controller),
            channel,
        }
    }
}

/// Registers the `/api` routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/users", web::post().to(handlers::start_ingestion))
            .route("/users", web::get().to(handlers::list_users))
            .route("/users", web::delete().to(handlers::delete_users))
            .route("/users/status", web::get().to(handlers::status_stream))
            .route("/users/cancel", web::post().to(handlers::cancel_ingestion)),
    );
}

/// Starts the paddle mirror API server.
///
/// Loads [`MirrorConfig`], opens the store, builds the page fetcher, and
/// serves until shutdown, then closes the store. This is a regular async
/// function; the caller provides the runtime (e.g. via
/// `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if configuration, the store, or the
/// HTTP client cannot be initialized, or if the server fails to bind.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let config = MirrorConfig::load().map_err(std::io::Error::other)?;

    log::info!("Opening store...");
    let store = Arc::new(
        UserStore::open(&config.db_path)
            .await
            .map_err(std::io::Error::other)?,
    );

    let fetcher = Arc::new(config.build_fetcher().map_err(std::io::Error::other)?);
    let state = web::Data::new(AppState::new(store.clone(), fetcher, &config));

    let bind_addr = config.bind_addr.clone();
    let port = config.port;

    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure_routes)
    })
    .bind((bind_addr, port))?
    .run()
    .await?;

    match Arc::try_unwrap(store) {
        Ok(store) => store.close(),
        Err(_) => log::warn!("Store still shared at shutdown; leaving it to drop"),
    }

    Ok(())
}
