use crate::{client_configuration::ClientConfigurationResponse, server_node::ServerNode};

use super::{database_url, CommandRequest, RavenCommand};

/// Fetches the client configuration an administrator set for the database.
#[derive(Debug, Clone, Default)]
pub struct GetClientConfigurationCommand;

impl RavenCommand for GetClientConfigurationCommand {
    type Output = Option<ClientConfigurationResponse>;

    fn is_read_request(&self) -> bool {
        false
    }

    fn can_cache(&self) -> bool {
        false
    }

    fn create_request(&self, node: &ServerNode) -> anyhow::Result<CommandRequest> {
        Ok(CommandRequest::get(database_url(node, "/configuration/client")?))
    }

    fn set_response(
        &self,
        response: Option<&str>,
        _from_cache: bool,
    ) -> anyhow::Result<Self::Output> {
        response
            .map(serde_json::from_str::<ClientConfigurationResponse>)
            .transpose()
            .map_err(Into::into)
    }
}
