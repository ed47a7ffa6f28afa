use std::hash::{Hash, Hasher};

use reqwest::Url;
use serde::Deserialize;

use crate::cluster_topology::ClusterTopology;

/// A single member of the cluster, as seen by one database.
///
/// Two nodes are considered the same node when both the url and the database match. Cluster tag
/// and role are descriptive only and may change between topology versions.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerNode {
    pub url: Url,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub cluster_tag: String,
    #[serde(default)]
    pub server_role: ServerRole,
}

impl ServerNode {
    pub fn new(url: Url, database: String) -> Self {
        Self {
            url,
            database,
            cluster_tag: String::default(),
            server_role: ServerRole::default(),
        }
    }

    pub fn with_cluster_tag(mut self, cluster_tag: &str) -> Self {
        self.cluster_tag = cluster_tag.to_string();
        self
    }

    pub fn with_server_role(mut self, server_role: ServerRole) -> Self {
        self.server_role = server_role;
        self
    }

    /// Returns the node url without a trailing slash, ready to have a path appended.
    pub fn base_url(&self) -> &str {
        self.url.as_str().trim_end_matches('/')
    }

    /// Whether this node is allowed to serve requests. Promotables and nodes in rehab are still
    /// catching up and should only be used as a last resort.
    pub fn can_serve_requests(&self) -> bool {
        matches!(self.server_role, ServerRole::Member | ServerRole::None)
    }
}

impl PartialEq for ServerNode {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url && self.database == other.database
    }
}

impl Eq for ServerNode {}

impl Hash for ServerNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
        self.database.hash(state);
    }
}

/// Builds the node list for a cluster-wide executor. Members come first, sorted by tag, then
/// watchers. Promotables are left out since they can't serve cluster requests yet.
pub fn create_server_nodes_from_cluster_topology(topology: &ClusterTopology) -> Vec<ServerNode> {
    let mut members = topology.members.iter().collect::<Vec<_>>();
    members.sort_by(|a, b| a.0.cmp(b.0));
    let mut watchers = topology.watchers.iter().collect::<Vec<_>>();
    watchers.sort_by(|a, b| a.0.cmp(b.0));

    members
        .into_iter()
        .chain(watchers)
        .map(|(tag, url)| {
            ServerNode::new(url.clone(), String::default())
                .with_cluster_tag(tag)
                .with_server_role(ServerRole::Member)
        })
        .collect()
}

#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Hash, Deserialize)]
pub enum ServerRole {
    #[default]
    None,
    Promotable,
    Member,
    Rehab,
}
