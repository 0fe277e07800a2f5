pub mod api;
pub mod dtos;
pub mod error;
pub mod extractors;
pub mod services;
pub mod utils;

pub use error::{AppResult, Error};
pub use services::RelayServices;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::{
    Extension, Router,
    extract::Request,
    http::{HeaderName, HeaderValue, header},
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use once_cell::sync::Lazy;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::normalize_path::NormalizePathLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::AppConfig;
use crate::server::api::catalogue_controller::CatalogueController;
use crate::server::api::health_controller::health_endpoint;
use crate::server::api::stream_controller::StreamController;

static SERVER_START: Lazy<Instant> = Lazy::new(Instant::now);

pub fn get_app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn get_uptime_seconds() -> u64 {
    SERVER_START.elapsed().as_secs()
}

// cheap hardening on every response, the proxy serves media to whatever
// player the subscriber points at it
async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("no-referrer"),
    );
    headers.insert(
        HeaderName::from_static("cross-origin-resource-policy"),
        HeaderValue::from_static("same-site"),
    );
    response
}

async fn not_found() -> Error {
    Error::NotFound
}

fn build_cors(origin: &str) -> anyhow::Result<CorsLayer> {
    if origin.trim() == "*" {
        return Ok(CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any));
    }

    let origins = origin
        .split(',')
        .map(|o| o.trim().parse::<HeaderValue>())
        .collect::<Result<Vec<_>, _>>()
        .context("invalid cors origin list")?;

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any))
}

pub struct RelayApplicationServer;

impl RelayApplicationServer {
    pub async fn serve(config: Arc<AppConfig>) -> anyhow::Result<()> {
        // pin the uptime clock to actual startup, not the first health probe
        Lazy::force(&SERVER_START);

        let services = RelayServices::new(config.clone())?;
        services.spawn_maintenance();

        let cors = build_cors(&config.cors_origin)?;

        let app = Router::new()
            .route("/health", get(health_endpoint))
            .merge(CatalogueController::app())
            .nest("/stream", StreamController::app())
            .fallback(not_found)
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(NormalizePathLayer::trim_trailing_slash())
                    .layer(cors)
                    .layer(middleware::from_fn(security_headers))
                    .layer(Extension(services)),
            );

        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;

        info!("relay listening on {}", addr);

        // connect info feeds the ip guard when no forwarding headers are present
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .context("server run failed")?;

        Ok(())
    }
}
