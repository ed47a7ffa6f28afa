mod request_executor_actor;
mod request_executor_error;
mod request_executor_execute;
mod request_executor_handle;
mod request_executor_topology;

pub use request_executor_error::{NodeFailure, RequestExecutorError};
pub use request_executor_execute::{ExecuteOptions, SessionInfo};
pub use request_executor_handle::{
    AggressiveCachingGuard, ClusterRequestExecutor, RequestExecutor, TopologySource,
};
pub use request_executor_topology::UpdateTopologyParameters;

use crate::server_node::ServerNode;

/// Messages handled by the background actor that owns the executor timers.
#[derive(Debug)]
pub(crate) enum RequestExecutorMessage {
    /// A request to the node failed. Starts a health check unless one is already running.
    NodeFailed { node_index: usize, node: ServerNode },
    /// The health check of a node finished, either restoring it or giving up on it.
    NodeStatusFinished { node: ServerNode, status_id: u64 },
    /// The topology was replaced. Running health checks refer to stale indexes.
    ClearNodeStatuses,
    /// The server flagged our topology as outdated.
    RefreshTopology { node: ServerNode },
    /// The server flagged our client configuration as outdated.
    RefreshClientConfiguration { node: ServerNode },
}

pub(crate) mod headers {
    pub const CLIENT_VERSION: &str = "Raven-Client-Version";
    pub const IF_NONE_MATCH: &str = "If-None-Match";
    pub const ETAG: &str = "ETag";
    pub const TOPOLOGY_ETAG: &str = "Topology-Etag";
    pub const CLIENT_CONFIGURATION_ETAG: &str = "Client-Configuration-Etag";
    pub const LAST_KNOWN_CLUSTER_TRANSACTION_INDEX: &str = "Known-Raft-Index";
    pub const REFRESH_TOPOLOGY: &str = "Refresh-Topology";
    pub const REFRESH_CLIENT_CONFIGURATION: &str = "Refresh-Client-Configuration";
    pub const DATABASE_MISSING: &str = "Database-Missing";
}

pub(crate) const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");
