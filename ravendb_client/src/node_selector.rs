//! Chooses which node of the topology serves a request.
//!
//! The selector keeps, for the topology it currently holds:
//! * a failure counter per node, parallel to the node list
//! * the speed test records used to elect the fastest node
//!
//! Replacing the topology resets all of that state.
use std::time::{Duration, Instant};

use crate::{server_node::ServerNode, topology::Topology};

/// Wins a node needs in speed test races before it is elected fastest.
const FASTEST_RECORDS_TO_ELECT: u32 = 10;

/// Index of a node in the current topology, together with the node itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentIndexAndNode {
    pub current_index: usize,
    pub current_node: ServerNode,
}

#[derive(Debug)]
struct NodeSelectorState {
    topology: Topology,
    failures: Vec<u32>,
    fastest_records: Vec<u32>,
    fastest: Option<usize>,
    /// 0 when not testing, otherwise 1 + the number of races recorded in this phase.
    speed_test_mode: u32,
    fastest_elected_at: Option<Instant>,
}

impl NodeSelectorState {
    fn new(topology: Topology) -> Self {
        let len = topology.nodes.len();
        Self {
            topology,
            failures: vec![0; len],
            fastest_records: vec![0; len],
            fastest: None,
            speed_test_mode: 0,
            fastest_elected_at: None,
        }
    }
}

#[derive(Debug)]
pub struct NodeSelector {
    state: NodeSelectorState,
    /// How long a fastest node election stays valid before another speed test is run.
    speed_test_interval: Duration,
}

impl NodeSelector {
    pub fn new(topology: Topology) -> Self {
        Self::with_speed_test_interval(topology, Duration::from_secs(60))
    }

    pub fn with_speed_test_interval(topology: Topology, speed_test_interval: Duration) -> Self {
        Self {
            state: NodeSelectorState::new(topology),
            speed_test_interval,
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.state.topology
    }

    pub fn nodes(&self) -> &[ServerNode] {
        &self.state.topology.nodes
    }

    /// Replaces the topology if the new one is newer, or if `force_update` is set.
    ///
    /// Returns `true` if the topology was replaced. All failure and speed test state is reset on
    /// replacement.
    pub fn on_update_topology(&mut self, topology: Topology, force_update: bool) -> bool {
        if self.state.topology.etag >= topology.etag && !force_update {
            tracing::trace!(
                current = self.state.topology.etag,
                offered = topology.etag,
                "Ignoring topology that is not newer than the current one"
            );
            return false;
        }

        self.state = NodeSelectorState::new(topology);
        true
    }

    /// Returns the first healthy node in topology order. If every node is marked failed, the first
    /// node is returned anyway since a request has to go somewhere.
    pub fn get_preferred_node(&self) -> Option<CurrentIndexAndNode> {
        let nodes = &self.state.topology.nodes;
        let failures = &self.state.failures;
        let len = nodes.len().min(failures.len());

        (0..len)
            .find(|&i| failures[i] == 0 && nodes[i].can_serve_requests())
            .map(|i| self.index_and_node(i))
            .or_else(|| self.unlikely_everyone_faulted_choice())
    }

    /// Keeps requests carrying the same session id on the same node while it stays healthy.
    pub fn get_node_by_session_id(&self, session_id: i64) -> Option<CurrentIndexAndNode> {
        let nodes = &self.state.topology.nodes;
        if nodes.is_empty() {
            return None;
        }

        let len = nodes.len().min(self.state.failures.len());
        let start = (session_id.unsigned_abs() % nodes.len() as u64) as usize;

        (start..len)
            .chain(0..start)
            .find(|&i| self.state.failures[i] == 0 && nodes[i].can_serve_requests())
            .map(|i| self.index_and_node(i))
            .or_else(|| self.get_preferred_node())
    }

    /// Returns the node elected by the last speed test. If no node was elected yet, or the elected
    /// node is currently failing, a new speed test is scheduled and the preferred node is used in
    /// the meantime.
    pub fn get_fastest_node(&mut self) -> Option<CurrentIndexAndNode> {
        if let Some(fastest) = self.state.fastest {
            let healthy = self.state.failures.get(fastest) == Some(&0)
                && self.state.topology.nodes[fastest].can_serve_requests();
            if healthy {
                return Some(self.index_and_node(fastest));
            }
        }

        self.switch_to_speed_test_phase();
        self.get_preferred_node()
    }

    /// Returns the node with the given cluster tag, if it exists in the topology.
    pub fn get_requested_node(&self, tag: &str) -> Option<CurrentIndexAndNode> {
        self.state
            .topology
            .nodes
            .iter()
            .position(|n| n.cluster_tag.eq_ignore_ascii_case(tag))
            .map(|i| self.index_and_node(i))
    }

    pub fn on_failed_request(&mut self, node_index: usize) {
        if let Some(failures) = self.state.failures.get_mut(node_index) {
            *failures += 1;
        }
    }

    pub fn restore_node_index(&mut self, node_index: usize) {
        if let Some(failures) = self.state.failures.get_mut(node_index) {
            *failures = 0;
        }
    }

    pub fn is_failed(&self, node_index: usize) -> bool {
        self.state
            .failures
            .get(node_index)
            .map(|f| *f > 0)
            .unwrap_or(false)
    }

    pub fn schedule_speed_test(&mut self) {
        self.switch_to_speed_test_phase();
    }

    /// Whether reads should currently be raced against every node. Re-enters the speed test phase
    /// once the last election is older than the speed test interval.
    pub fn in_speed_test_phase(&mut self) -> bool {
        if self.state.speed_test_mode == 0 {
            let expired = self
                .state
                .fastest_elected_at
                .map(|at| at.elapsed() >= self.speed_test_interval)
                .unwrap_or(false);
            if expired {
                self.switch_to_speed_test_phase();
            }
        }
        self.state.speed_test_mode > 0
    }

    /// Records that `node` answered a speed test race first.
    ///
    /// Once a node collects enough wins it is elected. If too many races run without a clear
    /// winner, the node with most wins so far is elected instead.
    pub fn record_fastest(&mut self, node_index: usize, node: &ServerNode) {
        if self.state.topology.nodes.get(node_index) != Some(node) {
            // The topology changed while the race was running.
            return;
        }
        if self.state.speed_test_mode == 0 {
            return;
        }

        self.state.fastest_records[node_index] += 1;
        if self.state.fastest_records[node_index] >= FASTEST_RECORDS_TO_ELECT {
            self.select_fastest(node_index);
            return;
        }

        self.state.speed_test_mode += 1;
        let max_races = self.state.topology.nodes.len() as u32 * FASTEST_RECORDS_TO_ELECT;
        if self.state.speed_test_mode <= max_races {
            return;
        }

        let best = self
            .state
            .fastest_records
            .iter()
            .enumerate()
            .max_by_key(|(_, records)| **records)
            .map(|(i, _)| i)
            .unwrap_or(0);
        self.select_fastest(best);
    }

    fn select_fastest(&mut self, node_index: usize) {
        tracing::debug!(
            node = %self.state.topology.nodes[node_index].url,
            "Elected fastest node"
        );
        self.state.fastest = Some(node_index);
        self.state.speed_test_mode = 0;
        self.state.fastest_elected_at = Some(Instant::now());
    }

    /// Wins collected so far are kept while a speed test is already running.
    fn switch_to_speed_test_phase(&mut self) {
        if self.state.speed_test_mode == 0 {
            self.state.speed_test_mode = 1;
            self.state.fastest_records.iter_mut().for_each(|r| *r = 0);
        }
    }

    fn unlikely_everyone_faulted_choice(&self) -> Option<CurrentIndexAndNode> {
        if self.state.topology.nodes.is_empty() {
            None
        } else {
            Some(self.index_and_node(0))
        }
    }

    fn index_and_node(&self, index: usize) -> CurrentIndexAndNode {
        CurrentIndexAndNode {
            current_index: index,
            current_node: self.state.topology.nodes[index].clone(),
        }
    }
}
