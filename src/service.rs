//! Visualization lifecycle: fetch → transform → store (→ broadcast)
//!
//! Explicitly constructed and shared by reference; owns no global state.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use crate::broadcast::{Broadcaster, DeliveryReport};
use crate::error::ServiceError;
use crate::sankey::{transform, TransformOptions, DEFAULT_THEME};
use crate::store::{
    DataQuery, NewVisualization, Visualization, VisualizationStore, VisualizationSummary,
};
use crate::upstream::{ConnectionCheck, FlowSource};

/// Parameters for a new visualization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateVisualization {
    pub title: String,
    pub subtitle: String,
    pub theme: String,
    /// Stored with the record; the fetch itself is not shaped by it
    pub data_query: DataQuery,
}

impl CreateVisualization {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            subtitle: String::new(),
            theme: DEFAULT_THEME.to_string(),
            data_query: DataQuery::default(),
        }
    }
}

/// Header changes applied on refresh; `None` keeps the current value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateVisualization {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub theme: Option<String>,
}

/// Result of a refresh: the new record and how the push to viewers went
#[derive(Debug, Clone)]
pub struct Refreshed {
    pub visualization: Arc<Visualization>,
    pub delivery: DeliveryReport,
}

pub struct VisualizationService {
    source: Arc<dyn FlowSource>,
    store: VisualizationStore,
    broadcaster: Arc<Broadcaster>,
}

impl VisualizationService {
    pub fn new(
        source: Arc<dyn FlowSource>,
        store: VisualizationStore,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            source,
            store,
            broadcaster,
        }
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn store(&self) -> &VisualizationStore {
        &self.store
    }

    /// Fetch fresh data, build the graph and store it under a new id
    pub async fn create(
        &self,
        request: CreateVisualization,
    ) -> Result<Arc<Visualization>, ServiceError> {
        info!("Creating Sankey visualization: {}", request.title);

        let flow = self.source.flow_data().await.inspect_err(|e| {
            error!("Error creating visualization '{}': {}", request.title, e);
        })?;
        let options = TransformOptions {
            title: request.title.clone(),
            subtitle: request.subtitle.clone(),
            theme: request.theme.clone(),
        };
        let document = transform(&flow, &options);

        let visualization = self
            .store
            .create(NewVisualization {
                title: request.title,
                subtitle: request.subtitle,
                theme: request.theme,
                data: document,
                data_query: request.data_query,
            })
            .await;

        info!(
            "Sankey visualization created: {} ({} nodes, {} links)",
            visualization.id,
            visualization.data.node_count(),
            visualization.data.link_count()
        );
        Ok(visualization)
    }

    pub async fn get(&self, id: &str) -> Result<Arc<Visualization>, ServiceError> {
        self.store
            .get(id)
            .await
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))
    }

    /// Re-fetch, re-transform, replace in place and push to subscribers
    pub async fn refresh(
        &self,
        id: &str,
        changes: UpdateVisualization,
    ) -> Result<Refreshed, ServiceError> {
        let current = self.get(id).await?;
        info!("Refreshing visualization: {}", id);

        let flow = self.source.flow_data().await.inspect_err(|e| {
            error!("Error refreshing visualization {}: {}", id, e);
        })?;
        let options = TransformOptions {
            title: changes.title.unwrap_or_else(|| current.title.clone()),
            subtitle: changes.subtitle.unwrap_or_else(|| current.subtitle.clone()),
            theme: changes.theme.unwrap_or_else(|| current.theme.clone()),
        };
        let document = transform(&flow, &options);

        let updated = Visualization {
            id: current.id.clone(),
            kind: current.kind,
            title: options.title,
            subtitle: options.subtitle,
            theme: options.theme,
            data: document,
            data_query: current.data_query.clone(),
            created_at: current.created_at,
            updated_at: Utc::now(),
        };
        let visualization = self.store.set(updated).await;
        let delivery = self
            .broadcaster
            .broadcast(&visualization.id, &visualization.data)
            .await;

        info!("Visualization updated: {}", id);
        Ok(Refreshed {
            visualization,
            delivery,
        })
    }

    pub async fn delete(&self, id: &str) -> Result<(), ServiceError> {
        if self.store.delete(id).await {
            info!("Visualization deleted: {}", id);
            Ok(())
        } else {
            Err(ServiceError::NotFound(id.to_string()))
        }
    }

    pub fn list(&self) -> Vec<VisualizationSummary> {
        self.store.list_all()
    }

    pub async fn test_connection(&self) -> ConnectionCheck {
        self.source.check_connection().await
    }
}
