pub mod client;
pub mod config;
pub mod db_types;
pub mod error;
pub mod handlers;
pub mod openai_types;
pub mod rate_limit;
pub mod signature;
pub mod store;
pub mod tasks;
pub mod token;
pub mod twilio_types;
pub mod types;
pub mod utils;
pub mod vault;

use crate::config::AppConfig;
use crate::types::AppState;

use axum::{
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Browser origins allowed to call the token endpoint. Outside local mode the allow-list is
/// mandatory, which `AppConfig` enforces at load time.
pub fn cors_layer(config: &AppConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);
    if config.cors_allowed_origins.is_empty() {
        info!("CORS_ALLOWED_ORIGINS not set, allowing any origin in local mode");
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

pub fn router(app_state: Arc<AppState>) -> Router {
    let cors = cors_layer(&app_state.config);
    Router::new()
        .route(handlers::VOICE_PATH, post(handlers::twiml_voice))
        .route(handlers::STATUS_PATH, post(handlers::status_callback))
        .route(handlers::RECORDING_PATH, post(handlers::recording_callback))
        .route(handlers::TRANSCRIPTION_PATH, post(handlers::transcription_callback))
        .route(handlers::TOKEN_PATH, get(handlers::voice_token))
        .route("/", get(handlers::health))
        .with_state(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
