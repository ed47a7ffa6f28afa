//! The raven commands are the only way to directly interact with the server.
//!
//! A command describes one REST call: how to build the request for a given node, and how to turn
//! the response into a typed result. Commands are handed to a
//! [`RequestExecutor`](crate::request_executor::RequestExecutor), which decides which node they run
//! against and handles caching, retries and failover.
//!
//! Commands are never mutated by the executor. Retry state lives in the executor, so one command
//! value can be executed any number of times.
use reqwest::Method;
use url::Url;

use crate::server_node::ServerNode;

mod get_client_configuration;
mod get_cluster_topology;
mod get_database_topology;
mod get_documents;
mod get_statistics;
mod get_tcp_info;

pub use get_client_configuration::GetClientConfigurationCommand;
pub use get_cluster_topology::GetClusterTopologyCommand;
pub use get_database_topology::GetDatabaseTopologyCommand;
pub use get_documents::{GetDocumentsCommand, GetDocumentsResult};
pub use get_statistics::{DatabaseStatistics, GetStatisticsCommand};
pub use get_tcp_info::{GetTcpInfoCommand, TcpConnectionInfo};

/// How the body of a successful response is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    /// The body is ignored.
    Empty,
    /// A single json object. The only kind of response that is ever cached.
    Object,
    /// Raw bytes, handed to the command as is.
    Raw,
}

/// The parts of an http request a command decides on. The executor adds headers and sends it.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub method: Method,
    pub url: Url,
    pub body: Option<String>,
}

impl CommandRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            body: None,
        }
    }

    pub fn with_body(mut self, method: Method, body: String) -> Self {
        self.method = method;
        self.body = Some(body);
        self
    }
}

pub trait RavenCommand: Send + Sync {
    type Output: Send;

    /// Reads may be spread over nodes and may be cached. Everything else goes to the preferred
    /// node.
    fn is_read_request(&self) -> bool;

    fn can_cache(&self) -> bool {
        true
    }

    fn can_cache_aggressively(&self) -> bool {
        true
    }

    fn response_type(&self) -> ResponseType {
        ResponseType::Object
    }

    /// Pins the command to the node with this cluster tag, bypassing the read balance behavior.
    fn selected_node_tag(&self) -> Option<&str> {
        None
    }

    /// Short name used in logs and error messages.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
            .rsplit("::")
            .next()
            .unwrap_or("RavenCommand")
    }

    fn create_request(&self, node: &ServerNode) -> anyhow::Result<CommandRequest>;

    /// Turns a response body into the command result.
    ///
    /// `response` is `None` when the server answered `404` or the response type is
    /// [`ResponseType::Empty`]. `from_cache` is set when the body came out of the http cache
    /// rather than the network.
    fn set_response(&self, response: Option<&str>, from_cache: bool)
        -> anyhow::Result<Self::Output>;

    /// Only called for [`ResponseType::Raw`] commands.
    fn set_response_raw(&self, _response: &[u8]) -> anyhow::Result<Self::Output> {
        Err(anyhow::anyhow!(
            "Command `{}` does not accept raw responses",
            self.name()
        ))
    }
}

/// Appends `path` to the node url. `path` must start with a `/` and may contain a query string.
pub(crate) fn node_url(node: &ServerNode, path: &str) -> anyhow::Result<Url> {
    Ok(Url::parse(&format!("{}{}", node.base_url(), path))?)
}

/// Appends `/databases/{database}` and `path` to the node url.
pub(crate) fn database_url(node: &ServerNode, path: &str) -> anyhow::Result<Url> {
    let mut url = node_url(node, "/databases")?;
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("Node url `{}` cannot be a base", node.url))?
        .push(&node.database);
    let url = Url::parse(&format!("{}{}", url.as_str(), path))?;
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> ServerNode {
        ServerNode::new(
            Url::parse("http://a.example.com:8080/").unwrap(),
            "North wind".to_string(),
        )
    }

    #[test]
    fn database_url_escapes_database_name() {
        let url = database_url(&node(), "/docs?id=users%2F1").unwrap();

        assert_eq!(
            url.as_str(),
            "http://a.example.com:8080/databases/North%20wind/docs?id=users%2F1"
        );
    }

    #[test]
    fn node_url_does_not_double_slashes() {
        let url = node_url(&node(), "/cluster/topology").unwrap();

        assert_eq!(url.as_str(), "http://a.example.com:8080/cluster/topology");
    }
}
