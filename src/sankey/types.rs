//! Graph document types for the portfolio flow view
//!
//! These types define the JSON document consumed by the Sankey renderer.
//! Field names follow the renderer contract (`data.nodes`, `entityType`, `type`).

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A complete graph document: metadata, the graph itself and presentation hints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    pub metadata: Metadata,
    pub data: GraphData,
    pub styling: Styling,
}

impl GraphDocument {
    pub fn node_count(&self) -> usize {
        self.data.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.data.links.len()
    }

    /// Nodes on one level, in insertion order
    pub fn nodes_of(&self, kind: EntityKind) -> impl Iterator<Item = &GraphNode> {
        self.data.nodes.iter().filter(move |n| n.entity_kind == kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub title: String,
    pub subtitle: String,
    pub stats: Vec<StatEntry>,
    /// Theme name as requested, even when it fell back to default styling
    pub theme: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatEntry {
    pub label: String,
    pub value: String,
}

impl StatEntry {
    pub fn new(label: impl Into<String>, value: impl fmt::Display) -> Self {
        Self {
            label: label.into(),
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphData {
    pub nodes: Vec<GraphNode>,
    pub links: Vec<GraphLink>,
}

/// One node; its index in `GraphData::nodes` is what links refer to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub name: String,
    pub level: u8,
    #[serde(rename = "type")]
    pub category: NodeCategory,
    pub value: f64,
    /// Upstream entity id, or the sequential id of a synthesized allocation
    pub id: i64,
    #[serde(rename = "entityType")]
    pub entity_kind: EntityKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GraphLink {
    pub source: usize,
    pub target: usize,
    pub value: f64,
}

/// The four node levels, left to right
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Portfolio,
    Epic,
    WorkAllocation,
    Team,
}

impl EntityKind {
    pub fn level(self) -> u8 {
        match self {
            EntityKind::Portfolio => 0,
            EntityKind::Epic => 1,
            EntityKind::WorkAllocation => 2,
            EntityKind::Team => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Portfolio => "Portfolio",
            EntityKind::Epic => "Epic",
            EntityKind::WorkAllocation => "WorkAllocation",
            EntityKind::Team => "Team",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category tag driving node color; serialized as the renderer's `type` string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    PortfolioAi,
    PortfolioTransform,
    PortfolioCloud,
    PortfolioDefault,
    EpicAi,
    EpicTransform,
    EpicCloud,
    EpicTest,
    EpicDefault,
    WorkAi,
    WorkTransform,
    WorkInfra,
    WorkTest,
    WorkDefault,
    TeamPremium,
    TeamHigh,
    TeamMid,
    TeamStandard,
}

impl NodeCategory {
    pub const ALL: [NodeCategory; 18] = [
        NodeCategory::PortfolioAi,
        NodeCategory::PortfolioTransform,
        NodeCategory::PortfolioCloud,
        NodeCategory::PortfolioDefault,
        NodeCategory::EpicAi,
        NodeCategory::EpicTransform,
        NodeCategory::EpicCloud,
        NodeCategory::EpicTest,
        NodeCategory::EpicDefault,
        NodeCategory::WorkAi,
        NodeCategory::WorkTransform,
        NodeCategory::WorkInfra,
        NodeCategory::WorkTest,
        NodeCategory::WorkDefault,
        NodeCategory::TeamPremium,
        NodeCategory::TeamHigh,
        NodeCategory::TeamMid,
        NodeCategory::TeamStandard,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeCategory::PortfolioAi => "portfolio_ai",
            NodeCategory::PortfolioTransform => "portfolio_transform",
            NodeCategory::PortfolioCloud => "portfolio_cloud",
            NodeCategory::PortfolioDefault => "portfolio_default",
            NodeCategory::EpicAi => "epic_ai",
            NodeCategory::EpicTransform => "epic_transform",
            NodeCategory::EpicCloud => "epic_cloud",
            NodeCategory::EpicTest => "epic_test",
            NodeCategory::EpicDefault => "epic_default",
            NodeCategory::WorkAi => "work_ai",
            NodeCategory::WorkTransform => "work_transform",
            NodeCategory::WorkInfra => "work_infra",
            NodeCategory::WorkTest => "work_test",
            NodeCategory::WorkDefault => "work_default",
            NodeCategory::TeamPremium => "team_premium",
            NodeCategory::TeamHigh => "team_high",
            NodeCategory::TeamMid => "team_mid",
            NodeCategory::TeamStandard => "team_standard",
        }
    }
}

impl fmt::Display for NodeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Colors keyed by category (or generic slot names for the default theme)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Styling {
    pub colors: BTreeMap<String, String>,
    pub legend: Legend,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Legend {
    pub sections: Vec<LegendSection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegendSection {
    pub title: String,
    pub items: Vec<LegendItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegendItem {
    pub color: String,
    pub label: String,
}

/// Headline numbers for a flow data set
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    pub active_portfolios: usize,
    pub portfolio_epics: usize,
    pub user_stories: usize,
    pub active_teams: usize,
    pub total_story_points: f64,
    pub completed_stories: usize,
    pub total_budget: f64,
}

impl StatsSummary {
    /// Label/value pairs shown in the document header, in display order
    pub fn entries(&self) -> Vec<StatEntry> {
        vec![
            StatEntry::new("Active Portfolios", self.active_portfolios),
            StatEntry::new("Portfolio Epics", self.portfolio_epics),
            StatEntry::new("User Stories", self.user_stories),
            StatEntry::new("Active Teams", self.active_teams),
            StatEntry::new("Total Story Points", self.total_story_points),
            StatEntry::new("Completed Stories", self.completed_stories),
        ]
    }
}
