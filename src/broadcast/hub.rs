//! Connection ↔ visualization subscription index

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::Serialize;
use uuid::Uuid;

/// Identifier assigned to a viewer connection when it opens
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn generate() -> Self {
        Self(format!("client_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bidirectional many-to-many map. Both directions are updated together, and
/// an emptied entry is removed from its side of the map.
#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    by_client: HashMap<ClientId, BTreeSet<String>>,
    by_visualization: HashMap<String, BTreeSet<ClientId>>,
}

impl SubscriptionIndex {
    /// `false` when the pair already existed
    pub fn insert(&mut self, client: &ClientId, visualization_id: &str) -> bool {
        let added = self
            .by_client
            .entry(client.clone())
            .or_default()
            .insert(visualization_id.to_string());
        self.by_visualization
            .entry(visualization_id.to_string())
            .or_default()
            .insert(client.clone());
        added
    }

    /// `false` when the pair was not present
    pub fn remove(&mut self, client: &ClientId, visualization_id: &str) -> bool {
        let removed = remove_from(&mut self.by_client, client, visualization_id);
        remove_from(&mut self.by_visualization, visualization_id, client);
        removed
    }

    /// Drop every subscription of `client`; returns the visualizations it left
    pub fn remove_client(&mut self, client: &ClientId) -> Vec<String> {
        let visualizations = self.by_client.remove(client).unwrap_or_default();
        for visualization_id in &visualizations {
            remove_from(&mut self.by_visualization, visualization_id.as_str(), client);
        }
        visualizations.into_iter().collect()
    }

    pub fn subscribers(&self, visualization_id: &str) -> Vec<ClientId> {
        self.by_visualization
            .get(visualization_id)
            .map(|clients| clients.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscriptions_of(&self, client: &ClientId) -> Vec<String> {
        self.by_client
            .get(client)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Visualizations with at least one subscriber
    pub fn visualization_count(&self) -> usize {
        self.by_visualization.len()
    }

    /// Number of (client, visualization) pairs
    pub fn pair_count(&self) -> usize {
        self.by_visualization.values().map(BTreeSet::len).sum()
    }

    pub fn clear(&mut self) {
        self.by_client.clear();
        self.by_visualization.clear();
    }
}

fn remove_from<K, Q, V, W>(map: &mut HashMap<K, BTreeSet<V>>, key: &Q, value: &W) -> bool
where
    K: std::borrow::Borrow<Q> + std::hash::Hash + Eq,
    Q: std::hash::Hash + Eq + ?Sized,
    V: std::borrow::Borrow<W> + Ord,
    W: Ord + ?Sized,
{
    let Some(set) = map.get_mut(key) else {
        return false;
    };
    let removed = set.remove(value);
    if set.is_empty() {
        map.remove(key);
    }
    removed
}
