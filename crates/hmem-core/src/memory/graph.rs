//! Association Graph
//!
//! Undirected weighted waypoints between active memories of the same user.
//! Edges are keyed by the ordered id pair and decay with the same law as
//! salience, reinforced by each co-access.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

use crate::config::AssociationConfig;
use crate::memory::DecayEngine;
use crate::utils::{Clock, days_between};
use crate::{HmemError, HmemResult};

/// Accesses remembered per user for co-access detection
const RECENT_PER_USER: usize = 64;

/// An undirected edge between two memory ids, `a < b`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub a: String,
    pub b: String,
    pub user_id: String,
    /// Weight as of `last_coaccess_at`
    pub weight: f64,
    pub coaccess_count: u32,
    pub last_coaccess_at: DateTime<Utc>,
}

impl Waypoint {
    fn other(&self, id: &str) -> &str {
        if self.a == id { &self.b } else { &self.a }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GraphSnapshot {
    waypoints: Vec<Waypoint>,
}

type EdgeKey = (String, String);

fn edge_key(x: &str, y: &str) -> EdgeKey {
    if x < y {
        (x.to_string(), y.to_string())
    } else {
        (y.to_string(), x.to_string())
    }
}

#[derive(Default)]
struct GraphState {
    edges: HashMap<EdgeKey, Waypoint>,
    adjacency: HashMap<String, HashSet<String>>,
    recent: HashMap<String, VecDeque<(String, DateTime<Utc>)>>,
}

impl GraphState {
    fn insert(&mut self, waypoint: Waypoint) {
        self.adjacency
            .entry(waypoint.a.clone())
            .or_default()
            .insert(waypoint.b.clone());
        self.adjacency
            .entry(waypoint.b.clone())
            .or_default()
            .insert(waypoint.a.clone());
        self.edges
            .insert(edge_key(&waypoint.a, &waypoint.b), waypoint);
    }
}

/// Waypoint graph over active memories
pub struct AssociationGraph {
    state: RwLock<GraphState>,
    config: AssociationConfig,
    decay: DecayEngine,
    clock: Arc<dyn Clock>,
}

impl AssociationGraph {
    pub fn new(config: AssociationConfig, decay: DecayEngine, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(GraphState::default()),
            config,
            decay,
            clock,
        }
    }

    /// Weight of an edge decayed to `now`
    fn effective_weight(&self, edge: &Waypoint, now: DateTime<Utc>) -> f64 {
        let elapsed = days_between(edge.last_coaccess_at, now);
        edge.weight * self.decay.retention_raw(elapsed, edge.coaccess_count)
    }

    /// Strengthen the edge between two memories of `user_id`.
    ///
    /// Returns the new weight.
    pub fn record_coaccess(&self, id_a: &str, id_b: &str, user_id: &str) -> HmemResult<f64> {
        let now = self.clock.now();
        let mut state = self.state.write();
        self.reinforce(&mut state, id_a, id_b, user_id, now)
    }

    fn reinforce(
        &self,
        state: &mut GraphState,
        id_a: &str,
        id_b: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> HmemResult<f64> {
        if id_a == id_b {
            return Err(HmemError::invalid_operation(format!(
                "self-edge rejected for {}",
                id_a
            )));
        }

        let key = edge_key(id_a, id_b);
        let weight = match state.edges.get_mut(&key) {
            Some(edge) => {
                if edge.user_id != user_id {
                    return Err(HmemError::not_authorized(
                        user_id,
                        format!("{}-{}", key.0, key.1),
                    ));
                }
                let decayed = self.effective_weight(edge, now);
                edge.weight = (decayed + self.config.increment).min(1.0);
                edge.coaccess_count += 1;
                edge.last_coaccess_at = now;
                edge.weight
            }
            None => {
                let weight = self.config.increment.min(1.0);
                state.insert(Waypoint {
                    a: key.0.clone(),
                    b: key.1.clone(),
                    user_id: user_id.to_string(),
                    weight,
                    coaccess_count: 1,
                    last_coaccess_at: now,
                });
                weight
            }
        };

        tracing::debug!(a = %key.0, b = %key.1, weight, "Recorded co-access");
        Ok(weight)
    }

    /// Note an access and link it to the user's other accesses inside the window.
    ///
    /// Partners are read and linked under one write lock, so a concurrent
    /// [`Self::remove_node`] either hides the partner or removes the new edge.
    /// Returns the ids that were linked.
    pub fn observe_access(&self, id: &str, user_id: &str) -> HmemResult<Vec<String>> {
        let now = self.clock.now();
        let window = Duration::seconds(self.config.window_secs as i64);
        let mut state = self.state.write();

        let recent = state.recent.entry(user_id.to_string()).or_default();
        recent.retain(|(other, at)| other != id && now - *at <= window);
        let partners: Vec<String> = recent
            .iter()
            .rev()
            .take(self.config.max_links)
            .map(|(other, _)| other.clone())
            .collect();
        recent.push_back((id.to_string(), now));
        while recent.len() > RECENT_PER_USER {
            recent.pop_front();
        }

        for other in &partners {
            self.reinforce(&mut state, id, other, user_id, now)?;
        }
        Ok(partners)
    }

    /// The `k` strongest live edges of `id`, ties broken by more recent co-access
    pub fn neighbors(&self, id: &str, k: usize) -> Vec<(String, f64)> {
        let now = self.clock.now();
        let state = self.state.read();
        let Some(adjacent) = state.adjacency.get(id) else {
            return Vec::new();
        };

        let mut live: Vec<(&Waypoint, f64)> = adjacent
            .iter()
            .filter_map(|other| state.edges.get(&edge_key(id, other)))
            .map(|edge| (edge, self.effective_weight(edge, now)))
            .filter(|(_, weight)| *weight >= self.config.min_weight)
            .collect();

        live.sort_by(|(ea, wa), (eb, wb)| {
            wb.total_cmp(wa)
                .then_with(|| eb.last_coaccess_at.cmp(&ea.last_coaccess_at))
        });

        live.into_iter()
            .take(k)
            .map(|(edge, weight)| (edge.other(id).to_string(), weight))
            .collect()
    }

    /// Drop every edge incident to `id`; returns how many were removed
    pub fn remove_node(&self, id: &str) -> usize {
        let mut state = self.state.write();
        let Some(adjacent) = state.adjacency.remove(id) else {
            for recent in state.recent.values_mut() {
                recent.retain(|(other, _)| other != id);
            }
            return 0;
        };

        for other in &adjacent {
            state.edges.remove(&edge_key(id, other));
            if let Some(set) = state.adjacency.get_mut(other) {
                set.remove(id);
                if set.is_empty() {
                    state.adjacency.remove(other);
                }
            }
        }
        for recent in state.recent.values_mut() {
            recent.retain(|(other, _)| other != id);
        }
        adjacent.len()
    }

    /// Remove edges whose decayed weight fell below the live threshold
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let dead: Vec<EdgeKey> = {
            let state = self.state.read();
            state
                .edges
                .iter()
                .filter(|(_, edge)| self.effective_weight(edge, now) < self.config.min_weight)
                .map(|(key, _)| key.clone())
                .collect()
        };

        let mut state = self.state.write();
        for (a, b) in &dead {
            state.edges.remove(&(a.clone(), b.clone()));
            for (from, to) in [(a, b), (b, a)] {
                if let Some(set) = state.adjacency.get_mut(from) {
                    set.remove(to);
                    if set.is_empty() {
                        state.adjacency.remove(from);
                    }
                }
            }
        }
        dead.len()
    }

    /// Every id with at least one edge
    pub fn nodes(&self) -> Vec<String> {
        self.state.read().adjacency.keys().cloned().collect()
    }

    pub fn edge_count(&self) -> usize {
        self.state.read().edges.len()
    }

    /// Persist all edges as JSON
    pub fn save(&self, path: &Path) -> HmemResult<()> {
        let snapshot = GraphSnapshot {
            waypoints: self.state.read().edges.values().cloned().collect(),
        };
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(&snapshot)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load edges from a snapshot; a missing file is an empty graph
    pub fn load(&self, path: &Path) -> HmemResult<usize> {
        if !path.exists() {
            return Ok(0);
        }
        let snapshot: GraphSnapshot = serde_json::from_slice(&std::fs::read(path)?)?;
        let count = snapshot.waypoints.len();

        let mut state = self.state.write();
        for waypoint in snapshot.waypoints {
            state.insert(waypoint);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;

    fn graph() -> (AssociationGraph, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let graph = AssociationGraph::new(
            AssociationConfig::default(),
            DecayEngine::default(),
            clock.clone(),
        );
        (graph, clock)
    }

    #[test]
    fn test_edges_are_symmetric() {
        let (graph, _) = graph();
        graph.record_coaccess("a", "b", "u1").unwrap();
        graph.record_coaccess("b", "a", "u1").unwrap();

        assert_eq!(graph.edge_count(), 1);
        let from_a = graph.neighbors("a", 5);
        let from_b = graph.neighbors("b", 5);
        assert_eq!(from_a[0].0, "b");
        assert_eq!(from_b[0].0, "a");
        assert_eq!(from_a[0].1, from_b[0].1);
        assert!((from_a[0].1 - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_self_edges_rejected() {
        let (graph, _) = graph();
        let err = graph.record_coaccess("a", "a", "u1").unwrap_err();
        assert!(matches!(err, HmemError::InvalidOperation { .. }));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_cross_user_edge_rejected() {
        let (graph, _) = graph();
        graph.record_coaccess("a", "b", "u1").unwrap();
        assert!(graph.record_coaccess("a", "b", "u2").unwrap_err().is_not_authorized());
    }

    #[test]
    fn test_neighbors_order_and_ties() {
        let (graph, clock) = graph();
        graph.record_coaccess("a", "b", "u1").unwrap();
        clock.advance(Duration::seconds(1));
        graph.record_coaccess("a", "c", "u1").unwrap();
        graph.record_coaccess("a", "d", "u1").unwrap();
        graph.record_coaccess("a", "d", "u1").unwrap();

        let neighbors = graph.neighbors("a", 3);
        let ids: Vec<&str> = neighbors.iter().map(|(id, _)| id.as_str()).collect();
        // d was reinforced twice; b has decayed one second longer than c
        assert_eq!(ids[0], "d");
        assert_eq!(ids[1], "c");
        assert_eq!(ids[2], "b");

        assert_eq!(graph.neighbors("a", 1).len(), 1);
    }

    #[test]
    fn test_weights_decay_and_prune() {
        let (graph, clock) = graph();
        graph.record_coaccess("a", "b", "u1").unwrap();
        let fresh = graph.neighbors("a", 1)[0].1;

        clock.advance(Duration::days(2));
        let older = graph.neighbors("a", 1)[0].1;
        assert!(older < fresh);

        clock.advance(Duration::days(200));
        assert!(graph.neighbors("a", 1).is_empty());
        assert_eq!(graph.prune(), 1);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_observe_access_links_within_window() {
        let (graph, clock) = graph();
        assert!(graph.observe_access("a", "u1").unwrap().is_empty());
        clock.advance(Duration::minutes(10));
        assert_eq!(graph.observe_access("b", "u1").unwrap(), vec!["a".to_string()]);
        // other users never link
        assert!(graph.observe_access("x", "u2").unwrap().is_empty());

        clock.advance(Duration::hours(2));
        assert!(graph.observe_access("c", "u1").unwrap().is_empty());
    }

    #[test]
    fn test_remove_node_drops_incident_edges() {
        let (graph, _) = graph();
        graph.record_coaccess("a", "b", "u1").unwrap();
        graph.record_coaccess("a", "c", "u1").unwrap();
        graph.record_coaccess("b", "c", "u1").unwrap();

        assert_eq!(graph.remove_node("a"), 2);
        assert_eq!(graph.edge_count(), 1);
        assert!(graph.neighbors("a", 5).is_empty());
        assert_eq!(graph.neighbors("b", 5)[0].0, "c");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("waypoints.json");
        let (graph, clock) = graph();
        graph.record_coaccess("a", "b", "u1").unwrap();
        graph.save(&path).unwrap();

        let restored = AssociationGraph::new(
            AssociationConfig::default(),
            DecayEngine::default(),
            clock,
        );
        assert_eq!(restored.load(&path).unwrap(), 1);
        assert_eq!(restored.neighbors("b", 1)[0].0, "a");
    }

    #[test]
    fn test_removed_partner_is_not_relinked() {
        let (graph, clock) = graph();
        graph.observe_access("p", "u1").unwrap();
        graph.remove_node("p");

        clock.advance(Duration::seconds(5));
        assert!(graph.observe_access("x", "u1").unwrap().is_empty());
        assert!(graph.neighbors("x", 5).is_empty());
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_nodes_lists_edge_endpoints() {
        let (graph, _) = graph();
        assert!(graph.nodes().is_empty());
        graph.record_coaccess("a", "b", "u1").unwrap();
        graph.record_coaccess("b", "c", "u1").unwrap();

        let mut nodes = graph.nodes();
        nodes.sort();
        assert_eq!(nodes, vec!["a", "b", "c"]);
    }
}
