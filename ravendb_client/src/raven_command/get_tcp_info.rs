use serde::Deserialize;
use url::Url;

use crate::server_node::ServerNode;

use super::{database_url, node_url, CommandRequest, RavenCommand};

/// Where to open raw tcp connections to a node.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TcpConnectionInfo {
    pub url: Url,
    #[serde(default)]
    pub certificate: Option<String>,
    #[serde(default)]
    pub node_tag: Option<String>,
}

/// Asks a node for its tcp endpoint. The cluster executor uses it as its health check.
#[derive(Debug, Clone)]
pub struct GetTcpInfoCommand {
    tag: String,
    database: Option<String>,
}

impl GetTcpInfoCommand {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            database: None,
        }
    }

    pub fn for_database(tag: &str, database: &str) -> Self {
        Self {
            tag: tag.to_string(),
            database: Some(database.to_string()),
        }
    }
}

impl RavenCommand for GetTcpInfoCommand {
    type Output = TcpConnectionInfo;

    fn is_read_request(&self) -> bool {
        true
    }

    fn can_cache(&self) -> bool {
        false
    }

    fn create_request(&self, node: &ServerNode) -> anyhow::Result<CommandRequest> {
        let mut url = match &self.database {
            Some(_) => database_url(node, "/info/tcp")?,
            None => node_url(node, "/info/tcp")?,
        };
        url.query_pairs_mut().append_pair("tag", &self.tag);
        Ok(CommandRequest::get(url))
    }

    fn set_response(
        &self,
        response: Option<&str>,
        _from_cache: bool,
    ) -> anyhow::Result<TcpConnectionInfo> {
        let response = response.ok_or_else(|| anyhow::anyhow!("Tcp info not found"))?;
        Ok(serde_json::from_str(response)?)
    }
}
