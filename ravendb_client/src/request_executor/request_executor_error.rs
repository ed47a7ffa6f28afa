use std::{sync::Arc, time::Duration};

use crate::{error_chain_fmt, ravendb_error::RavenDbError, server_node::ServerNode};

#[derive(thiserror::Error)]
pub enum RequestExecutorError {
    #[error(
        "Tried to send `{command}` request to all configured nodes in the topology, none of the attempts succeeded.{}",
        format_failures(.failures)
    )]
    AllTopologyNodesDown {
        command: String,
        failures: Vec<NodeFailure>,
    },
    #[error("There are no nodes in the topology")]
    EmptyTopology,
    #[error("Node with cluster tag `{0}` is not part of the topology")]
    RequestedNodeNotFound(String),
    #[error("Request to `{url}` timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
    #[error("Unable to reach `{url}`")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Server at `{url}` is unavailable, status code {status}")]
    ServiceUnavailable { url: String, status: u16 },
    #[error("`{url}` is no longer served by the node it was sent to")]
    Gone { url: String },
    #[error("Unable to retrieve the first topology. {0}")]
    FirstTopologyUpdateFailed(String),
    /// The shared first topology update failed. Every caller waiting on it receives the same error.
    #[error(transparent)]
    FirstTopologyUpdate(Arc<RequestExecutorError>),
    #[error("The request executor was disposed")]
    Disposed,
    #[error(transparent)]
    Server(#[from] RavenDbError),
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}
impl std::fmt::Debug for RequestExecutorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl RequestExecutorError {
    /// Whether the failure says something about the node rather than the request, making it
    /// worth trying another node.
    pub fn is_server_down(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Transport { .. } | Self::ServiceUnavailable { .. }
        )
    }
}

/// The error one node returned during a failed execution.
#[derive(Debug)]
pub struct NodeFailure {
    pub node: ServerNode,
    pub error: RequestExecutorError,
}

fn format_failures(failures: &[NodeFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("\n{} -> {}", f.node.url, f.error))
        .collect()
}
