//! In-memory visualization cache using moka
//!
//! Records expire a fixed time after their last write. Expired entries are
//! never returned; physical eviction happens in the background.
//! Concurrent writers to the same id are not serialized: last write wins.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::sankey::GraphDocument;

/// Default record lifetime (five minutes)
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

const MAX_VISUALIZATIONS: u64 = 10_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualizationKind {
    #[default]
    Sankey,
}

/// Parameters the visualization's data was requested with
///
/// Recorded on the visualization for provenance only. The flow fetch always
/// runs its fixed per-type queries and does not read these values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataQuery {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub include: Vec<String>,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<String>,
    pub take: u32,
}

impl Default for DataQuery {
    fn default() -> Self {
        Self {
            entity_type: "Portfolio".to_string(),
            include: vec![
                "Epics".to_string(),
                "UserStories".to_string(),
                "Teams".to_string(),
            ],
            where_clause: None,
            take: 100,
        }
    }
}

/// A stored visualization: header fields, the graph document and its timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visualization {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: VisualizationKind,
    pub title: String,
    pub subtitle: String,
    pub theme: String,
    pub data: GraphDocument,
    pub data_query: DataQuery,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Visualization {
    pub fn summary(&self) -> VisualizationSummary {
        VisualizationSummary {
            id: self.id.clone(),
            kind: self.kind,
            title: self.title.clone(),
            subtitle: self.subtitle.clone(),
            theme: self.theme.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Listing entry: everything except the graph document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizationSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: VisualizationKind,
    pub title: String,
    pub subtitle: String,
    pub theme: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when creating a visualization
#[derive(Debug, Clone)]
pub struct NewVisualization {
    pub title: String,
    pub subtitle: String,
    pub theme: String,
    pub data: GraphDocument,
    pub data_query: DataQuery,
}

/// Visualization id → record, with time-to-live expiry
#[derive(Debug, Clone)]
pub struct VisualizationStore {
    inner: Cache<String, Arc<Visualization>>,
}

impl VisualizationStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(MAX_VISUALIZATIONS)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Store a new record under a fresh id
    pub async fn create(&self, new: NewVisualization) -> Arc<Visualization> {
        let now = Utc::now();
        let visualization = Arc::new(Visualization {
            id: Uuid::new_v4().to_string(),
            kind: VisualizationKind::Sankey,
            title: new.title,
            subtitle: new.subtitle,
            theme: new.theme,
            data: new.data,
            data_query: new.data_query,
            created_at: now,
            updated_at: now,
        });
        self.inner
            .insert(visualization.id.clone(), visualization.clone())
            .await;
        debug!("Stored visualization {}", visualization.id);
        visualization
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Visualization>> {
        self.inner.get(id).await
    }

    /// Replace a record, restarting its lifetime. Inserts when absent.
    pub async fn set(&self, visualization: Visualization) -> Arc<Visualization> {
        let visualization = Arc::new(visualization);
        self.inner
            .insert(visualization.id.clone(), visualization.clone())
            .await;
        visualization
    }

    /// `true` when a live record was removed
    pub async fn delete(&self, id: &str) -> bool {
        let removed = self.inner.get(id).await.is_some();
        self.inner.invalidate(id).await;
        if removed {
            debug!("Deleted visualization {}", id);
        }
        removed
    }

    /// Summaries of every live record, oldest first
    pub fn list_all(&self) -> Vec<VisualizationSummary> {
        let mut summaries: Vec<VisualizationSummary> =
            self.inner.iter().map(|(_, v)| v.summary()).collect();
        summaries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        summaries
    }

    /// Approximate; pending maintenance may lag behind recent writes
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

impl Default for VisualizationStore {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
