//! /api/visualizations handlers and the /ws upgrade

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::ApiError;
use super::AppState;
use crate::broadcast::socket::serve_connection;
use crate::sankey::{GraphDocument, Theme, DEFAULT_THEME};
use crate::service::{CreateVisualization, UpdateVisualization};
use crate::store::{DataQuery, Visualization, VisualizationKind, VisualizationSummary};
use crate::upstream::ConnectionCheck;

const TITLE_MAX: usize = 100;
const SUBTITLE_MAX: usize = 200;
const TAKE_MAX: u32 = 1000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSankeyRequest {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub theme: Option<String>,
    pub data_query: Option<DataQuery>,
}

impl CreateSankeyRequest {
    pub fn validate(self) -> Result<CreateVisualization, ApiError> {
        let title = self
            .title
            .ok_or_else(|| ApiError::Validation("\"title\" is required".into()))?;
        check_title(&title)?;
        let subtitle = self.subtitle.unwrap_or_default();
        check_subtitle(&subtitle)?;
        let theme = self.theme.unwrap_or_else(|| DEFAULT_THEME.to_string());
        check_theme(&theme)?;

        let data_query = self.data_query.unwrap_or_default();
        if !(1..=TAKE_MAX).contains(&data_query.take) {
            return Err(ApiError::Validation(format!(
                "\"dataQuery.take\" must be between 1 and {TAKE_MAX}"
            )));
        }

        Ok(CreateVisualization {
            title,
            subtitle,
            theme,
            data_query,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateRequest {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub theme: Option<String>,
}

impl UpdateRequest {
    pub fn validate(self) -> Result<UpdateVisualization, ApiError> {
        if let Some(title) = &self.title {
            check_title(title)?;
        }
        if let Some(subtitle) = &self.subtitle {
            check_subtitle(subtitle)?;
        }
        if let Some(theme) = &self.theme {
            check_theme(theme)?;
        }
        Ok(UpdateVisualization {
            title: self.title,
            subtitle: self.subtitle,
            theme: self.theme,
        })
    }
}

fn check_title(title: &str) -> Result<(), ApiError> {
    match title.chars().count() {
        0 => Err(ApiError::Validation(
            "\"title\" is not allowed to be empty".into(),
        )),
        n if n > TITLE_MAX => Err(ApiError::Validation(format!(
            "\"title\" length must be less than or equal to {TITLE_MAX} characters long"
        ))),
        _ => Ok(()),
    }
}

fn check_subtitle(subtitle: &str) -> Result<(), ApiError> {
    if subtitle.chars().count() > SUBTITLE_MAX {
        return Err(ApiError::Validation(format!(
            "\"subtitle\" length must be less than or equal to {SUBTITLE_MAX} characters long"
        )));
    }
    Ok(())
}

fn check_theme(theme: &str) -> Result<(), ApiError> {
    Theme::from_name(theme).map(|_| ()).ok_or_else(|| {
        ApiError::Validation("\"theme\" must be one of [targetprocess, default]".into())
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: VisualizationKind,
    pub title: String,
    pub subtitle: String,
    pub theme: String,
    pub status: &'static str,
    pub created_at: DateTime<Utc>,
    pub data: GraphDocument,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub visualizations: Vec<VisualizationSummary>,
    pub total: usize,
    pub timestamp: DateTime<Utc>,
}

/// POST /api/visualizations/sankey
pub async fn create_sankey(
    State(state): State<AppState>,
    body: Result<Json<CreateSankeyRequest>, JsonRejection>,
) -> Result<Json<CreatedResponse>, ApiError> {
    let Json(request) = body?;
    let request = request.validate()?;
    let visualization = state.service.create(request).await?;

    Ok(Json(CreatedResponse {
        id: visualization.id.clone(),
        kind: visualization.kind,
        title: visualization.title.clone(),
        subtitle: visualization.subtitle.clone(),
        theme: visualization.theme.clone(),
        status: "created",
        created_at: visualization.created_at,
        data: visualization.data.clone(),
    }))
}

/// GET /api/visualizations
pub async fn list_visualizations(State(state): State<AppState>) -> Json<ListResponse> {
    let visualizations = state.service.list();
    Json(ListResponse {
        total: visualizations.len(),
        visualizations,
        timestamp: Utc::now(),
    })
}

/// GET /api/visualizations/:id
pub async fn get_visualization(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Visualization>, ApiError> {
    let visualization = state.service.get(&id).await?;
    Ok(Json(visualization.as_ref().clone()))
}

/// PUT /api/visualizations/:id; re-fetches and pushes to subscribers
pub async fn update_visualization(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<UpdateRequest>, JsonRejection>,
) -> Result<Json<Visualization>, ApiError> {
    let Json(request) = body?;
    let changes = request.validate()?;
    let refreshed = state.service.refresh(&id, changes).await?;
    Ok(Json(refreshed.visualization.as_ref().clone()))
}

/// DELETE /api/visualizations/:id
pub async fn delete_visualization(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.service.delete(&id).await?;
    Ok(Json(json!({"message": "Visualization deleted successfully"})))
}

/// GET /api/visualizations/:id/stream; how to subscribe over /ws
pub async fn stream_info(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.service.get(&id).await?;
    Ok(Json(json!({
        "message": "WebSocket stream available",
        "visualizationId": id,
        "endpoint": "/ws",
        "instructions": format!(
            "Connect to WebSocket and send: {{\"type\": \"subscribe\", \"visualizationId\": \"{id}\"}}"
        ),
    })))
}

/// GET /api/visualizations/test/connection
pub async fn test_connection(State(state): State<AppState>) -> Json<ConnectionCheck> {
    Json(state.service.test_connection().await)
}

/// GET /ws
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let broadcaster = state.service.broadcaster().clone();
    ws.on_upgrade(move |socket| serve_connection(socket, broadcaster))
}
