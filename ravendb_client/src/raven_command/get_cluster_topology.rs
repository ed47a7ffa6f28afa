use crate::{
    cluster_topology::ClusterTopologyInfo,
    server_node::{create_server_nodes_from_cluster_topology, ServerNode},
    topology::Topology,
};

use super::{node_url, CommandRequest, RavenCommand};

/// Fetches the cluster membership from one node.
#[derive(Debug, Clone, Default)]
pub struct GetClusterTopologyCommand {
    debug_tag: Option<String>,
}

impl GetClusterTopologyCommand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debug_tag(mut self, debug_tag: &str) -> Self {
        self.debug_tag = Some(debug_tag.to_string());
        self
    }
}

impl RavenCommand for GetClusterTopologyCommand {
    type Output = (ClusterTopologyInfo, Topology);

    fn is_read_request(&self) -> bool {
        true
    }

    fn can_cache(&self) -> bool {
        false
    }

    fn create_request(&self, node: &ServerNode) -> anyhow::Result<CommandRequest> {
        let mut url = node_url(node, "/cluster/topology")?;
        if let Some(tag) = &self.debug_tag {
            url.query_pairs_mut().append_pair("debugTag", tag);
        }
        Ok(CommandRequest::get(url))
    }

    fn set_response(
        &self,
        response: Option<&str>,
        _from_cache: bool,
    ) -> anyhow::Result<Self::Output> {
        let response = response.ok_or_else(|| anyhow::anyhow!("Cluster topology not found"))?;
        let info = serde_json::from_str::<ClusterTopologyInfo>(response)?;
        let nodes = create_server_nodes_from_cluster_topology(&info.topology);
        let topology = Topology::new(info.etag, nodes);
        Ok((info, topology))
    }
}
