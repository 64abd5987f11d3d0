pub mod bridge;
pub mod broker;
pub mod config;
pub mod identity;
pub mod state;
pub mod transport;
pub mod ws;

pub use state::AppState;

use axum::http::HeaderValue;
use axum::{Router, routing::get};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::CorsConfig;

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors);
    Router::new()
        .route("/", get(health::hello))
        .route("/healthz", get(health::healthz))
        .route("/ws", get(ws::ws_chat_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wildcard origins can't carry credentials, so they get a plain `Any`
/// layer; an explicit origin list mirrors the request and may allow them.
pub fn cors_layer(cfg: &CorsConfig) -> CorsLayer {
    if cfg.is_wildcard() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let origins: Vec<HeaderValue> = cfg
        .allow_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(cfg.allow_credentials)
}

mod health {
    use axum::Json;
    use axum::response::IntoResponse;
    use serde_json::json;

    pub async fn hello() -> impl IntoResponse {
        Json(json!({ "msg": "hello world" }))
    }

    pub async fn healthz() -> impl IntoResponse {
        "ok"
    }
}
