use uuid::Uuid;

use crate::{database_topology::DatabaseTopology, server_node::ServerNode, topology::Topology};

use super::{node_url, CommandRequest, RavenCommand};

/// Fetches the topology of a database from one node.
#[derive(Debug, Clone)]
pub struct GetDatabaseTopologyCommand {
    database: String,
    application_identifier: Option<Uuid>,
    debug_tag: Option<String>,
}

impl GetDatabaseTopologyCommand {
    pub fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            application_identifier: None,
            debug_tag: None,
        }
    }

    /// Lets the server warn when the same application recreates its document store too often.
    pub fn with_application_identifier(mut self, application_identifier: Uuid) -> Self {
        self.application_identifier = Some(application_identifier);
        self
    }

    pub fn with_debug_tag(mut self, debug_tag: &str) -> Self {
        self.debug_tag = Some(debug_tag.to_string());
        self
    }
}

impl RavenCommand for GetDatabaseTopologyCommand {
    type Output = Topology;

    fn is_read_request(&self) -> bool {
        true
    }

    fn can_cache(&self) -> bool {
        false
    }

    fn create_request(&self, node: &ServerNode) -> anyhow::Result<CommandRequest> {
        let mut url = node_url(node, "/topology")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("name", &self.database);
            if let Some(tag) = &self.debug_tag {
                query.append_pair("debugTag", tag);
            }
            if let Some(id) = &self.application_identifier {
                query.append_pair("applicationIdentifier", &id.to_string());
            }
        }
        Ok(CommandRequest::get(url))
    }

    fn set_response(&self, response: Option<&str>, _from_cache: bool) -> anyhow::Result<Topology> {
        let response = response
            .ok_or_else(|| anyhow::anyhow!("Database `{}` has no topology", self.database))?;
        let topology = serde_json::from_str::<DatabaseTopology>(response)?;
        Ok(topology.into())
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;

    #[test]
    fn request_carries_database_name_and_application_identifier() {
        let node = ServerNode::new(Url::parse("http://a:8080").unwrap(), String::default());
        let id = Uuid::new_v4();
        let command = GetDatabaseTopologyCommand::new("Northwind").with_application_identifier(id);

        let request = command.create_request(&node).unwrap();

        assert_eq!(request.url.path(), "/topology");
        assert_eq!(
            request.url.query(),
            Some(format!("name=Northwind&applicationIdentifier={}", id).as_str())
        );
    }

    #[test]
    fn response_is_parsed_into_topology() {
        let command = GetDatabaseTopologyCommand::new("Northwind");
        let body = r#"{"Etag":12,"Nodes":[{"Url":"http://a:8080","Database":"Northwind","ClusterTag":"A","ServerRole":"Member"}]}"#;

        let topology = command.set_response(Some(body), false).unwrap();

        assert_eq!(topology.etag, 12);
        assert_eq!(topology.nodes[0].cluster_tag, "A");
    }
}
