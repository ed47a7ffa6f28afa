use serde::Deserialize;

use crate::server_node::ServerNode;

use super::{database_url, CommandRequest, RavenCommand};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DatabaseStatistics {
    pub count_of_documents: i64,
    pub count_of_indexes: i64,
    pub database_change_vector: Option<String>,
    pub database_id: Option<String>,
}

/// Fetches database statistics. The executor also uses it as the health check of failed nodes,
/// tagging the request with `failure=check` so the server can tell it apart.
#[derive(Debug, Clone, Default)]
pub struct GetStatisticsCommand {
    debug_tag: Option<String>,
}

impl GetStatisticsCommand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_failure_check() -> Self {
        Self {
            debug_tag: Some("failure=check".to_string()),
        }
    }
}

impl RavenCommand for GetStatisticsCommand {
    type Output = DatabaseStatistics;

    fn is_read_request(&self) -> bool {
        true
    }

    fn can_cache(&self) -> bool {
        false
    }

    fn create_request(&self, node: &ServerNode) -> anyhow::Result<CommandRequest> {
        let path = match &self.debug_tag {
            Some(tag) => format!("/stats?{}", tag),
            None => "/stats".to_string(),
        };
        Ok(CommandRequest::get(database_url(node, &path)?))
    }

    fn set_response(
        &self,
        response: Option<&str>,
        _from_cache: bool,
    ) -> anyhow::Result<DatabaseStatistics> {
        let response = response.ok_or_else(|| anyhow::anyhow!("Statistics not found"))?;
        Ok(serde_json::from_str(response)?)
    }
}
