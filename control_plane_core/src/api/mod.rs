//! REST API.
//!
//! Routes are nested under `/api`; every response body is an envelope
//! `{success, output?, error?}`, possibly with extra report fields.

pub mod error;
pub mod handlers;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use error::{ApiError, ApiResult};
pub use state::ApiState;

pub fn router(state: ApiState) -> Router {
    let api = Router::new()
        .route("/status", get(handlers::get_status))
        .route("/start/:server_type", post(handlers::start_server))
        .route("/stop/:server_type", post(handlers::stop_server))
        .route("/settings", get(handlers::get_settings))
        .route("/config", get(handlers::get_config).post(handlers::save_config))
        .route("/ansible/playbook/:name", post(handlers::run_playbook))
        .route("/setup", post(handlers::setup))
        .route("/validate/credentials", post(handlers::validate_credentials));

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
