//! TargetProcess entity records
//!
//! The REST API returns loosely structured JSON. These records keep only the
//! fields the flow graph needs, every one of them optional except `Id`, and
//! expose the defaulting rules as methods so the transformer never sees a gap.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Reference to a parent or related entity (`{"Id": 10, "Name": "..."}`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EntityRef {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EntityState {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Portfolio {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub budget: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Epic {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub portfolio: Option<EntityRef>,
}

/// A user story; the unit of effort that flows through the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WorkItem {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub story_points: Option<f64>,
    #[serde(default)]
    pub epic: Option<EntityRef>,
    #[serde(default)]
    pub team: Option<EntityRef>,
    #[serde(default)]
    pub entity_state: Option<EntityState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Team {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub hourly_rate: Option<f64>,
    #[serde(default)]
    pub capacity: Option<f64>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Team capacity assumed when the record has none (or zero)
pub const DEFAULT_TEAM_CAPACITY: f64 = 100.0;

/// Zero and NaN count as "not set", matching how the API leaves fields blank
fn non_zero(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v != 0.0 && !v.is_nan())
}

impl WorkItem {
    /// Story points for flow values; unestimated items count as one point
    pub fn effort(&self) -> f64 {
        non_zero(self.story_points).unwrap_or(1.0)
    }

    /// Story points for totals; unestimated items contribute nothing
    pub fn estimated_points(&self) -> f64 {
        self.story_points.filter(|v| !v.is_nan()).unwrap_or(0.0)
    }

    pub fn epic_id(&self) -> Option<i64> {
        self.epic.as_ref().map(|e| e.id)
    }

    pub fn team_id(&self) -> Option<i64> {
        self.team.as_ref().map(|t| t.id)
    }

    pub fn is_done(&self) -> bool {
        self.entity_state
            .as_ref()
            .and_then(|s| s.name.as_deref())
            .is_some_and(|name| name == "Done")
    }
}

impl Team {
    pub fn rate(&self) -> f64 {
        non_zero(self.hourly_rate).unwrap_or(0.0)
    }

    pub fn capacity_or_default(&self) -> f64 {
        non_zero(self.capacity).unwrap_or(DEFAULT_TEAM_CAPACITY)
    }

    /// Teams count as active unless explicitly flagged otherwise
    pub fn is_active(&self) -> bool {
        self.is_active != Some(false)
    }
}

impl Epic {
    pub fn portfolio_id(&self) -> Option<i64> {
        self.portfolio.as_ref().map(|p| p.id)
    }
}

/// The four collections the flow graph is built from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowData {
    #[serde(default)]
    pub portfolios: Vec<Portfolio>,
    #[serde(default)]
    pub epics: Vec<Epic>,
    #[serde(default, rename = "userStories", alias = "workItems")]
    pub work_items: Vec<WorkItem>,
    #[serde(default)]
    pub teams: Vec<Team>,
}

impl FlowData {
    pub fn is_empty(&self) -> bool {
        self.portfolios.is_empty()
            && self.epics.is_empty()
            && self.work_items.is_empty()
            && self.teams.is_empty()
    }
}

/// A collection response: `{"Items": [...]}` or a bare array
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Collection {
    Wrapped {
        #[serde(rename = "Items")]
        items: Vec<Value>,
    },
    Bare(Vec<Value>),
}

impl Collection {
    pub fn into_items(self) -> Vec<Value> {
        match self {
            Collection::Wrapped { items } | Collection::Bare(items) => items,
        }
    }

    /// Normalize an arbitrary JSON body; `None` when it is neither shape
    pub fn from_value(value: Value) -> Option<Vec<Value>> {
        serde_json::from_value::<Collection>(value)
            .ok()
            .map(Collection::into_items)
    }
}

/// Decode raw items into typed records, skipping (and logging) the ones that don't fit
pub fn decode_records<T>(entity_type: &str, items: Vec<Value>) -> Vec<T>
where
    T: serde::de::DeserializeOwned,
{
    let total = items.len();
    let records: Vec<T> = items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| match serde_json::from_value::<T>(item) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping {} record {}: {}", entity_type, i, e);
                None
            }
        })
        .collect();
    if records.len() < total {
        warn!(
            "Decoded {} of {} {} records",
            records.len(),
            total,
            entity_type
        );
    }
    records
}
