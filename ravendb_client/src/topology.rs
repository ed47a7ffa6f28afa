use crate::server_node::ServerNode;

/// Topology etag of a single static node. Such a topology is never refreshed from the server.
pub const SINGLE_NODE_TOPOLOGY_ETAG: i64 = -1;

/// Topology etag meaning no remote refresh should be attempted at all.
pub const NO_REFRESH_TOPOLOGY_ETAG: i64 = -2;

/// A versioned, ordered list of the nodes serving a database. A higher etag always supersedes a
/// lower one. The order matters: index 0 is the server's preferred node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    pub etag: i64,
    pub nodes: Vec<ServerNode>,
}

impl Topology {
    pub fn new(etag: i64, nodes: Vec<ServerNode>) -> Self {
        Self { etag, nodes }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}
