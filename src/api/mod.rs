//! HTTP surface: visualization CRUD and the viewer WebSocket endpoint

pub mod error;
pub mod visualizations;

use std::sync::Arc;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::service::VisualizationService;

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<VisualizationService>,
}

impl AppState {
    pub fn new(service: Arc<VisualizationService>) -> Self {
        Self { service }
    }
}

/// Build the application router
pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route(
            "/api/visualizations",
            get(visualizations::list_visualizations),
        )
        .route(
            "/api/visualizations/sankey",
            post(visualizations::create_sankey),
        )
        .route(
            "/api/visualizations/test/connection",
            get(visualizations::test_connection),
        )
        .route(
            "/api/visualizations/:id",
            get(visualizations::get_visualization)
                .put(visualizations::update_visualization)
                .delete(visualizations::delete_visualization),
        )
        .route(
            "/api/visualizations/:id/stream",
            get(visualizations::stream_info),
        )
        .route("/ws", get(visualizations::ws_upgrade))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(allowed_origins))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static("x-requested-with"),
        ])
        .allow_credentials(true)
}
