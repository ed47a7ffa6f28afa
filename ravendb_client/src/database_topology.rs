use serde::Deserialize;

use crate::{server_node::ServerNode, topology::Topology};

/// Response of `GET /topology?name={database}`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DatabaseTopology {
    /// Represents the latest version of the topology
    pub etag: i64,
    /// Holds the nodes, in the server's preferred order.
    pub nodes: Vec<ServerNode>,
}

impl From<DatabaseTopology> for Topology {
    fn from(value: DatabaseTopology) -> Self {
        Topology::new(value.etag, value.nodes)
    }
}
