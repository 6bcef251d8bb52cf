//! Flow data → Sankey graph document
//!
//! Builds four node levels (portfolio, epic, work allocation, team) and the
//! links between adjacent levels. Work allocations are synthesized: one per
//! distinct (team, epic) pair among the work items.
//!
//! Every node value is the summed effort of the work items beneath it, scaled
//! down by ten and floored at one so thin flows stay visible.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use super::theme::{Theme, DEFAULT_THEME};
use super::types::{
    EntityKind, GraphData, GraphDocument, GraphLink, GraphNode, Metadata, NodeCategory,
    StatsSummary,
};
use crate::error::TransformError;
use crate::upstream::types::{
    decode_records, Collection, Epic, FlowData, Portfolio, Team, WorkItem, DEFAULT_TEAM_CAPACITY,
};

const NAME_WRAP_LEN: usize = 15;
const ALLOCATION_TEAM_LEN: usize = 12;
const ALLOCATION_EPIC_LEN: usize = 15;
const VALUE_SCALE: f64 = 10.0;

/// Document header options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOptions {
    pub title: String,
    pub subtitle: String,
    pub theme: String,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            title: "Portfolio Flow".to_string(),
            subtitle: String::new(),
            theme: DEFAULT_THEME.to_string(),
        }
    }
}

/// Synthesized node aggregating the work one team does for one epic
#[derive(Debug, Clone, PartialEq)]
pub struct WorkAllocation {
    /// Sequential from 1, in first-seen order
    pub id: i64,
    pub team_id: i64,
    pub epic_id: i64,
    pub team_name: String,
    pub epic_name: String,
    pub points: f64,
    pub item_count: usize,
    /// Share of the team's capacity, 0..=100
    pub percentage: u8,
}

impl WorkAllocation {
    pub fn value(&self) -> f64 {
        scaled(self.points)
    }

    pub fn name(&self) -> String {
        format!(
            "{} ({}%)\n{}",
            truncate(&self.team_name, ALLOCATION_TEAM_LEN),
            self.percentage,
            truncate(&self.epic_name, ALLOCATION_EPIC_LEN)
        )
    }

    pub fn category(&self) -> NodeCategory {
        classify_allocation(&self.epic_name)
    }
}

/// Transform typed flow data, stamped with the current time
pub fn transform(data: &FlowData, options: &TransformOptions) -> GraphDocument {
    transform_at(data, options, Utc::now())
}

/// Transform raw JSON (`{portfolios, epics, userStories, teams}`, each an array
/// or an `{"Items": [...]}` envelope). Missing collections are empty.
pub fn transform_value(
    raw: &Value,
    options: &TransformOptions,
) -> Result<GraphDocument, TransformError> {
    let object = raw.as_object().ok_or(TransformError::NotAnObject)?;
    let data = FlowData {
        portfolios: collection(object, &["portfolios"], "Portfolio")?,
        epics: collection(object, &["epics"], "Epic")?,
        work_items: collection(object, &["userStories", "workItems"], "UserStory")?,
        teams: collection(object, &["teams"], "Team")?,
    };
    Ok(transform(&data, options))
}

/// Deterministic core: identical input and timestamp give an identical document
pub fn transform_at(
    data: &FlowData,
    options: &TransformOptions,
    timestamp: DateTime<Utc>,
) -> GraphDocument {
    debug!(
        "Transforming data: {} portfolios, {} epics, {} stories, {} teams",
        data.portfolios.len(),
        data.epics.len(),
        data.work_items.len(),
        data.teams.len()
    );

    let effort = EffortIndex::build(data);
    let allocations = allocate(&data.work_items, &data.teams);

    let mut builder = GraphBuilder::default();
    for portfolio in &data.portfolios {
        builder.push(GraphNode {
            name: format_node_name(display_name(&portfolio.name, "Unnamed Portfolio")),
            level: EntityKind::Portfolio.level(),
            category: classify_portfolio(portfolio),
            value: scaled(effort.portfolio_points(portfolio.id, &data.epics)),
            id: portfolio.id,
            entity_kind: EntityKind::Portfolio,
        });
    }
    for epic in &data.epics {
        builder.push(GraphNode {
            name: format_node_name(display_name(&epic.name, "Unnamed Epic")),
            level: EntityKind::Epic.level(),
            category: classify_epic(epic),
            value: scaled(effort.epic_points(epic.id)),
            id: epic.id,
            entity_kind: EntityKind::Epic,
        });
    }
    for allocation in &allocations {
        builder.push(GraphNode {
            name: allocation.name(),
            level: EntityKind::WorkAllocation.level(),
            category: allocation.category(),
            value: allocation.value(),
            id: allocation.id,
            entity_kind: EntityKind::WorkAllocation,
        });
    }
    for team in &data.teams {
        builder.push(GraphNode {
            name: format_node_name(display_name(&team.name, "Unnamed Team")),
            level: EntityKind::Team.level(),
            category: classify_team(team),
            value: scaled(effort.team_points(team.id)),
            id: team.id,
            entity_kind: EntityKind::Team,
        });
    }

    for epic in &data.epics {
        if let Some(portfolio_id) = epic.portfolio_id() {
            builder.link(
                (EntityKind::Portfolio, portfolio_id),
                (EntityKind::Epic, epic.id),
                scaled(effort.epic_points(epic.id)),
            );
        }
    }
    for allocation in &allocations {
        builder.link(
            (EntityKind::Epic, allocation.epic_id),
            (EntityKind::WorkAllocation, allocation.id),
            allocation.value(),
        );
    }
    for allocation in &allocations {
        builder.link(
            (EntityKind::WorkAllocation, allocation.id),
            (EntityKind::Team, allocation.team_id),
            allocation.value(),
        );
    }

    let graph = builder.finish();
    debug!(
        "Generated Sankey data: {} nodes, {} links",
        graph.nodes.len(),
        graph.links.len()
    );

    GraphDocument {
        metadata: Metadata {
            title: options.title.clone(),
            subtitle: options.subtitle.clone(),
            stats: summarize(data).entries(),
            theme: options.theme.clone(),
            timestamp,
        },
        data: graph,
        styling: Theme::parse(&options.theme).styling(),
    }
}

/// Group work items by (team, epic). Items missing either reference are skipped.
pub fn allocate(work_items: &[WorkItem], teams: &[Team]) -> Vec<WorkAllocation> {
    let mut allocations: Vec<WorkAllocation> = Vec::new();
    let mut by_pair: HashMap<(i64, i64), usize> = HashMap::new();

    for item in work_items {
        let (Some(team), Some(epic)) = (&item.team, &item.epic) else {
            continue;
        };
        let slot = *by_pair.entry((team.id, epic.id)).or_insert_with(|| {
            allocations.push(WorkAllocation {
                id: allocations.len() as i64 + 1,
                team_id: team.id,
                epic_id: epic.id,
                team_name: display_name(&team.name, "Unknown Team").to_string(),
                epic_name: display_name(&epic.name, "Unknown Epic").to_string(),
                points: 0.0,
                item_count: 0,
                percentage: 0,
            });
            allocations.len() - 1
        });
        let allocation = &mut allocations[slot];
        allocation.points += item.effort();
        allocation.item_count += 1;
    }

    for allocation in &mut allocations {
        let capacity = teams
            .iter()
            .find(|t| t.id == allocation.team_id)
            .map_or(DEFAULT_TEAM_CAPACITY, Team::capacity_or_default);
        allocation.percentage = percentage_of(allocation.points, capacity);
    }

    allocations
}

/// Header statistics for a flow data set
pub fn summarize(data: &FlowData) -> StatsSummary {
    StatsSummary {
        active_portfolios: data.portfolios.len(),
        portfolio_epics: data.epics.len(),
        user_stories: data.work_items.len(),
        active_teams: data.teams.iter().filter(|t| t.is_active()).count(),
        total_story_points: data.work_items.iter().map(WorkItem::estimated_points).sum(),
        completed_stories: data.work_items.iter().filter(|w| w.is_done()).count(),
        total_budget: data
            .portfolios
            .iter()
            .filter_map(|p| p.budget)
            .filter(|b| !b.is_nan())
            .sum(),
    }
}

pub fn classify_portfolio(portfolio: &Portfolio) -> NodeCategory {
    let name = lowercase_name(&portfolio.name);
    if name.contains("ai") || name.contains("artificial") {
        NodeCategory::PortfolioAi
    } else if name.contains("transform") {
        NodeCategory::PortfolioTransform
    } else if name.contains("cloud") {
        NodeCategory::PortfolioCloud
    } else {
        NodeCategory::PortfolioDefault
    }
}

pub fn classify_epic(epic: &Epic) -> NodeCategory {
    let name = lowercase_name(&epic.name);
    if name.contains("ai") || name.contains("artificial") {
        NodeCategory::EpicAi
    } else if name.contains("transform") {
        NodeCategory::EpicTransform
    } else if name.contains("cloud") || name.contains("migration") {
        NodeCategory::EpicCloud
    } else if name.contains("test") {
        NodeCategory::EpicTest
    } else {
        NodeCategory::EpicDefault
    }
}

pub fn classify_allocation(epic_name: &str) -> NodeCategory {
    let name = epic_name.to_lowercase();
    if name.contains("ai") {
        NodeCategory::WorkAi
    } else if name.contains("transform") {
        NodeCategory::WorkTransform
    } else if name.contains("cloud") || name.contains("infra") {
        NodeCategory::WorkInfra
    } else if name.contains("test") {
        NodeCategory::WorkTest
    } else {
        NodeCategory::WorkDefault
    }
}

/// Cost tier by hourly rate
pub fn classify_team(team: &Team) -> NodeCategory {
    match team.rate() {
        r if r >= 600.0 => NodeCategory::TeamPremium,
        r if r >= 400.0 => NodeCategory::TeamHigh,
        r if r >= 200.0 => NodeCategory::TeamMid,
        _ => NodeCategory::TeamStandard,
    }
}

/// Long multi-word names wrap onto two lines; a long single word is truncated
pub fn format_node_name(name: &str) -> String {
    if name.chars().count() <= NAME_WRAP_LEN {
        return name.to_string();
    }
    let words: Vec<&str> = name.split(' ').collect();
    if words.len() > 1 {
        let midpoint = words.len().div_ceil(2);
        format!(
            "{}\n{}",
            words[..midpoint].join(" "),
            words[midpoint..].join(" ")
        )
    } else {
        truncate(name, NAME_WRAP_LEN)
    }
}

fn truncate(name: &str, max_chars: usize) -> String {
    if name.chars().count() > max_chars {
        let head: String = name.chars().take(max_chars).collect();
        format!("{head}...")
    } else {
        name.to_string()
    }
}

fn display_name<'a>(name: &'a Option<String>, fallback: &'a str) -> &'a str {
    name.as_deref().filter(|n| !n.is_empty()).unwrap_or(fallback)
}

fn lowercase_name(name: &Option<String>) -> String {
    name.as_deref().unwrap_or_default().to_lowercase()
}

fn scaled(points: f64) -> f64 {
    (points / VALUE_SCALE).max(1.0)
}

fn percentage_of(points: f64, capacity: f64) -> u8 {
    (points / capacity * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Raw effort per epic and per team
struct EffortIndex {
    by_epic: HashMap<i64, f64>,
    by_team: HashMap<i64, f64>,
}

impl EffortIndex {
    fn build(data: &FlowData) -> Self {
        let mut by_epic = HashMap::new();
        let mut by_team = HashMap::new();
        for item in &data.work_items {
            if let Some(epic_id) = item.epic_id() {
                *by_epic.entry(epic_id).or_insert(0.0) += item.effort();
            }
            if let Some(team_id) = item.team_id() {
                *by_team.entry(team_id).or_insert(0.0) += item.effort();
            }
        }
        Self { by_epic, by_team }
    }

    fn epic_points(&self, epic_id: i64) -> f64 {
        self.by_epic.get(&epic_id).copied().unwrap_or(0.0)
    }

    fn team_points(&self, team_id: i64) -> f64 {
        self.by_team.get(&team_id).copied().unwrap_or(0.0)
    }

    /// Items under any epic referencing the portfolio; each epic id counted once
    fn portfolio_points(&self, portfolio_id: i64, epics: &[Epic]) -> f64 {
        epics
            .iter()
            .filter(|e| e.portfolio_id() == Some(portfolio_id))
            .map(|e| e.id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|epic_id| self.epic_points(epic_id))
            .sum()
    }
}

/// Accumulates nodes and resolves link endpoints by (kind, id)
#[derive(Default)]
struct GraphBuilder {
    nodes: Vec<GraphNode>,
    links: Vec<GraphLink>,
    index: BTreeMap<(EntityKind, i64), usize>,
}

impl GraphBuilder {
    /// A repeated (kind, id) keeps both nodes; links resolve to the later one
    fn push(&mut self, node: GraphNode) {
        self.index
            .insert((node.entity_kind, node.id), self.nodes.len());
        self.nodes.push(node);
    }

    /// Unresolved endpoints drop the link silently
    fn link(&mut self, source: (EntityKind, i64), target: (EntityKind, i64), value: f64) {
        if let (Some(&source), Some(&target)) = (self.index.get(&source), self.index.get(&target))
        {
            self.links.push(GraphLink {
                source,
                target,
                value,
            });
        }
    }

    fn finish(self) -> GraphData {
        GraphData {
            nodes: self.nodes,
            links: self.links,
        }
    }
}

fn collection<T: serde::de::DeserializeOwned>(
    object: &Map<String, Value>,
    keys: &[&str],
    entity_type: &str,
) -> Result<Vec<T>, TransformError> {
    let Some((key, value)) = keys
        .iter()
        .find_map(|k| object.get(*k).map(|v| (*k, v)))
    else {
        return Ok(Vec::new());
    };
    if value.is_null() {
        return Ok(Vec::new());
    }
    let items = Collection::from_value(value.clone()).ok_or_else(|| {
        TransformError::MalformedCollection {
            collection: key.to_string(),
        }
    })?;
    Ok(decode_records(entity_type, items))
}
