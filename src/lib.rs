//! FocusFlow sync core.
//!
//! Offline-first storage for user-owned records: an embedded SQLite store that
//! works without connectivity, a REST backend used when online, a selector
//! that routes each call to one of them, and a synchronizer that replays
//! offline changes once the device reconnects.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod hierarchy;
pub mod local;
pub mod models;
pub mod remote;
pub mod selector;
pub mod store;
pub mod sync;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use db::Repository;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub config: Arc<Config>,
}

/// Create the backend router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Clone PSK for the auth layer
    let psk = state.config.api_psk.clone();

    // One set of routes serves every entity kind
    let api_routes = Router::new()
        .route("/{kind}", get(api::list_records).post(api::create_record))
        .route(
            "/{kind}/{id}",
            get(api::get_record)
                .put(api::update_record)
                .delete(api::delete_record),
        )
        // Apply PSK auth middleware
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod testing;
