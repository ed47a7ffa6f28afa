use std::collections::HashMap;

use reqwest::Url;
use serde::Deserialize;

/// Response of `GET /cluster/topology`.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct ClusterTopologyInfo {
    pub topology: ClusterTopology,
    pub etag: i64,
    pub leader: String,
    pub node_tag: String,
    pub current_state: String,
    pub status: HashMap<String, NodeStatusReport>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct ClusterTopology {
    pub topology_id: String,
    pub all_nodes: HashMap<String, Url>,
    pub members: HashMap<String, Url>,
    pub promotables: HashMap<String, Url>,
    pub watchers: HashMap<String, Url>,
    pub last_node_id: String,
    pub etag: i64,
}

/// Connectivity report the leader keeps about every other cluster node.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct NodeStatusReport {
    pub name: Option<String>,
    pub connected: bool,
    pub error_details: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    #[default]
    Undefined,
    Passive,
    Candidate,
    Follower,
    #[serde(rename = "Leader-Elect")]
    LeaderElect,
    Leader,
}
