//! End-to-end graph projection scenarios and structural properties

use std::collections::HashSet;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use serde_json::json;

use portfolio_flow::sankey::{
    allocate, transform_at, transform_value, EntityKind, NodeCategory, TransformOptions,
};
use portfolio_flow::upstream::{EntityRef, Epic, FlowData, Portfolio, Team, WorkItem};

fn single_flow() -> FlowData {
    serde_json::from_value(json!({
        "portfolios": [{"Id": 1, "Name": "Cloud"}],
        "epics": [{"Id": 10, "Name": "Migration", "Portfolio": {"Id": 1}}],
        "userStories": [
            {"Id": 100, "Epic": {"Id": 10, "Name": "Migration"}, "Team": {"Id": 50, "Name": "Alpha"}, "StoryPoints": 20}
        ],
        "teams": [{"Id": 50, "Name": "Alpha", "HourlyRate": 250, "Capacity": 100}]
    }))
    .unwrap()
}

#[test]
fn test_single_chain_produces_four_levels() {
    let timestamp = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let doc = transform_at(&single_flow(), &TransformOptions::default(), timestamp);

    assert_eq!(doc.node_count(), 4);
    assert_eq!(doc.link_count(), 3);

    let levels: Vec<u8> = doc.data.nodes.iter().map(|n| n.level).collect();
    assert_eq!(levels, vec![0, 1, 2, 3]);

    let allocation = doc.nodes_of(EntityKind::WorkAllocation).next().unwrap();
    assert_eq!(allocation.name, "Alpha (20%)\nMigration");
    assert_eq!(allocation.value, 2.0);

    let team = doc.nodes_of(EntityKind::Team).next().unwrap();
    assert_eq!(team.category, NodeCategory::TeamMid);

    let links: Vec<(usize, usize)> = doc.data.links.iter().map(|l| (l.source, l.target)).collect();
    assert_eq!(links, vec![(0, 1), (1, 2), (2, 3)]);

    let wire = serde_json::to_value(&doc).unwrap();
    assert_eq!(wire["data"]["nodes"][3]["type"], "team_mid");
    assert_eq!(wire["data"]["nodes"][2]["entityType"], "WorkAllocation");
    assert_eq!(wire["metadata"]["theme"], "targetprocess");
    assert_eq!(wire["metadata"]["stats"].as_array().unwrap().len(), 6);
}

#[test]
fn test_work_item_without_epic_is_not_allocated() {
    let mut flow = single_flow();
    flow.work_items.push(WorkItem {
        id: 101,
        name: Some("Orphan".into()),
        story_points: Some(5.0),
        epic: None,
        team: Some(EntityRef {
            id: 50,
            name: Some("Alpha".into()),
        }),
        entity_state: None,
    });

    let doc = transform_at(&flow, &TransformOptions::default(), Utc::now());
    assert_eq!(doc.nodes_of(EntityKind::WorkAllocation).count(), 1);
    assert_eq!(doc.link_count(), 3);

    // the team still carries the orphan's effort
    let team = doc.nodes_of(EntityKind::Team).next().unwrap();
    assert_eq!(team.value, 2.5);
}

#[test]
fn test_same_input_and_timestamp_give_identical_documents() {
    let timestamp = Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap();
    let options = TransformOptions {
        title: "Quarterly".into(),
        subtitle: "H1".into(),
        theme: "default".into(),
    };
    let first = transform_at(&single_flow(), &options, timestamp);
    let second = transform_at(&single_flow(), &options, timestamp);

    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn test_raw_payload_with_item_envelopes() {
    let raw = json!({
        "portfolios": {"Items": [{"Id": 1, "Name": "Cloud"}]},
        "epics": [{"Id": 10, "Name": "Migration", "Portfolio": {"Id": 1}}],
        "workItems": [{"Id": 100, "Epic": {"Id": 10}, "Team": {"Id": 50}}],
        "teams": null
    });
    let doc = transform_value(&raw, &TransformOptions::default()).unwrap();

    // allocation exists but its team node does not, so that link is dropped
    assert_eq!(doc.node_count(), 3);
    assert_eq!(doc.link_count(), 2);
}

fn flow_strategy() -> impl Strategy<Value = FlowData> {
    let portfolios = prop::collection::vec((1i64..5, any::<bool>()), 0..5).prop_map(|v| {
        v.into_iter()
            .map(|(id, named)| Portfolio {
                id,
                name: named.then(|| format!("Portfolio {id}")),
                budget: None,
            })
            .collect::<Vec<_>>()
    });
    let epics = prop::collection::vec((1i64..8, prop::option::of(1i64..6)), 0..8).prop_map(|v| {
        v.into_iter()
            .map(|(id, portfolio)| Epic {
                id,
                name: Some(format!("Epic {id}")),
                portfolio: portfolio.map(|id| EntityRef { id, name: None }),
            })
            .collect::<Vec<_>>()
    });
    let items = prop::collection::vec(
        (
            prop::option::of(1i64..8),
            prop::option::of(1i64..5),
            prop::option::of(0.0f64..80.0),
        ),
        0..20,
    )
    .prop_map(|v| {
        v.into_iter()
            .enumerate()
            .map(|(i, (epic, team, points))| WorkItem {
                id: i as i64 + 1000,
                name: None,
                story_points: points,
                epic: epic.map(|id| EntityRef { id, name: None }),
                team: team.map(|id| EntityRef { id, name: None }),
                entity_state: None,
            })
            .collect::<Vec<_>>()
    });
    let teams = prop::collection::vec((1i64..5, 0.0f64..800.0, 0.0f64..50.0), 0..5).prop_map(|v| {
        v.into_iter()
            .map(|(id, rate, capacity)| Team {
                id,
                name: Some(format!("Team {id}")),
                hourly_rate: Some(rate),
                capacity: Some(capacity),
                is_active: None,
            })
            .collect::<Vec<_>>()
    });

    (portfolios, epics, items, teams).prop_map(|(portfolios, epics, work_items, teams)| FlowData {
        portfolios,
        epics,
        work_items,
        teams,
    })
}

proptest! {
    #[test]
    fn links_join_adjacent_levels(flow in flow_strategy()) {
        let doc = transform_at(&flow, &TransformOptions::default(), Utc::now());
        let nodes = &doc.data.nodes;
        for link in &doc.data.links {
            prop_assert!(link.source < nodes.len());
            prop_assert!(link.target < nodes.len());
            prop_assert_eq!(nodes[link.source].level + 1, nodes[link.target].level);
            prop_assert!(link.value >= 1.0);
        }
        for node in nodes {
            prop_assert!(node.value >= 1.0);
        }
    }

    #[test]
    fn allocations_are_unique_per_team_and_epic(flow in flow_strategy()) {
        let allocations = allocate(&flow.work_items, &flow.teams);
        let pairs: HashSet<(i64, i64)> =
            allocations.iter().map(|a| (a.team_id, a.epic_id)).collect();
        prop_assert_eq!(pairs.len(), allocations.len());

        for (i, allocation) in allocations.iter().enumerate() {
            prop_assert_eq!(allocation.id, i as i64 + 1);
            prop_assert!(allocation.percentage <= 100);
            prop_assert!(allocation.item_count >= 1);
        }

        let allocated: usize = allocations.iter().map(|a| a.item_count).sum();
        let eligible = flow
            .work_items
            .iter()
            .filter(|w| w.epic.is_some() && w.team.is_some())
            .count();
        prop_assert_eq!(allocated, eligible);
    }
}
