use std::{
    sync::{atomic::Ordering, PoisonError},
    time::Duration,
};

use futures::future::{BoxFuture, FutureExt};
use tracing::instrument;
use url::Url;

use crate::{
    document_conventions::ReadBalanceBehavior,
    events::RequestEvent,
    node_selector::NodeSelector,
    node_status::NodeStatus,
    raven_command::{
        GetClientConfigurationCommand, GetClusterTopologyCommand, GetDatabaseTopologyCommand,
        GetStatisticsCommand, GetTcpInfoCommand,
    },
    ravendb_error::RavenDbError,
    server_node::ServerNode,
    topology::{Topology, SINGLE_NODE_TOPOLOGY_ETAG},
};

use super::{
    ExecuteOptions, RequestExecutor, RequestExecutorError, RequestExecutorMessage, TopologySource,
};

/// Cluster tag given to nodes built straight from the initial urls when no server could be
/// asked for the real topology.
const UNKNOWN_CLUSTER_TAG: &str = "!";

#[derive(Debug, Clone)]
pub struct UpdateTopologyParameters {
    /// The node asked for the topology.
    pub node: ServerNode,
    /// How long to wait for an update already in flight. `None` waits as long as it takes,
    /// [`Duration::ZERO`] gives up right away.
    pub timeout: Option<Duration>,
    /// Replace the topology even if the fetched etag is not newer.
    pub force_update: bool,
    /// Sent along with the request so the server can tell why the client asked.
    pub debug_tag: Option<String>,
}

impl UpdateTopologyParameters {
    pub fn new(node: ServerNode) -> Self {
        Self {
            node,
            timeout: None,
            force_update: false,
            debug_tag: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_force_update(mut self, force_update: bool) -> Self {
        self.force_update = force_update;
        self
    }

    pub fn with_debug_tag(mut self, debug_tag: &str) -> Self {
        self.debug_tag = Some(debug_tag.to_string());
        self
    }
}

impl RequestExecutor {
    /// Fetches the topology from `parameters.node` and installs it when it is newer than the
    /// current one, or unconditionally when `force_update` is set.
    ///
    /// Only one update runs at a time. Returns `Ok(false)` without fetching when the executor is
    /// disposed, topology updates are disabled, or the wait for a running update timed out.
    pub fn update_topology(
        &self,
        parameters: UpdateTopologyParameters,
    ) -> BoxFuture<'_, Result<bool, RequestExecutorError>> {
        async move {
            if self.is_disposed() || self.state.disable_topology_updates {
                return Ok(false);
            }

            let semaphore = self.state.update_topology_semaphore.clone();
            let permit = match parameters.timeout {
                Some(timeout) => {
                    match tokio::time::timeout(timeout, semaphore.acquire_owned()).await {
                        Ok(Ok(permit)) => permit,
                        Ok(Err(_)) => return Ok(false),
                        Err(_) => {
                            tracing::debug!("Another topology update is running, skipping");
                            return Ok(false);
                        }
                    }
                }
                None => match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return Ok(false),
                },
            };

            if self.is_disposed() {
                return Ok(false);
            }

            let topology = self.fetch_topology(&parameters).await?;
            if self.install_topology(topology, parameters.force_update) {
                *self
                    .state
                    .topology_taken_from_node
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(parameters.node.clone());
            }
            drop(permit);
            Ok(true)
        }
        .boxed()
    }

    async fn fetch_topology(
        &self,
        parameters: &UpdateTopologyParameters,
    ) -> Result<Topology, RequestExecutorError> {
        let options = ExecuteOptions::new(parameters.node.clone()).without_retry();

        match &self.state.topology_source {
            TopologySource::Database(database) => {
                let mut command = GetDatabaseTopologyCommand::new(database);
                if self.state.conventions().send_application_identifier() {
                    command = command.with_application_identifier(self.state.application_id);
                }
                if let Some(debug_tag) = &parameters.debug_tag {
                    command = command.with_debug_tag(debug_tag);
                }
                self.execute_with_options(&command, options, None).await
            }
            TopologySource::Cluster => {
                let mut command = GetClusterTopologyCommand::new();
                if let Some(debug_tag) = &parameters.debug_tag {
                    command = command.with_debug_tag(debug_tag);
                }
                let (info, topology) = self.execute_with_options(&command, options, None).await?;
                tracing::debug!(
                    "Cluster topology fetched, leader is `{}`, {} nodes",
                    info.leader,
                    topology.len()
                );
                Ok(topology)
            }
        }
    }

    /// Hands the topology to the node selector, creating one if needed. Returns `true` when the
    /// topology was replaced.
    pub(crate) fn install_topology(&self, topology: Topology, force_update: bool) -> bool {
        let (speed_test, speed_test_interval) = {
            let conventions = self.state.conventions();
            (
                conventions.read_balance_behavior() == ReadBalanceBehavior::FastestNode,
                conventions.speed_test_interval(),
            )
        };

        let replaced = {
            let mut guard = self.state.node_selector();
            match guard.as_mut() {
                Some(selector) => {
                    let replaced = selector.on_update_topology(topology.clone(), force_update);
                    if replaced && speed_test {
                        selector.schedule_speed_test();
                    }
                    replaced
                }
                None => {
                    let mut selector =
                        NodeSelector::with_speed_test_interval(topology.clone(), speed_test_interval);
                    if speed_test {
                        selector.schedule_speed_test();
                    }
                    *guard = Some(selector);
                    true
                }
            }
        };

        if replaced {
            tracing::info!(
                "Topology updated to etag {} with {} nodes",
                topology.etag,
                topology.len()
            );
            self.state.send(RequestExecutorMessage::ClearNodeStatuses);
            self.state
                .events
                .notify(&RequestEvent::TopologyUpdated { topology });
        }
        replaced
    }

    /// Asks each initial url for the topology, in order, until one answers.
    ///
    /// When none does, the executor falls back to a topology made of the initial urls and the
    /// call succeeds anyway. Only a missing database is reported as a failure.
    #[instrument(level = "debug", skip(self))]
    pub(crate) async fn first_topology_update(
        &self,
        initial_urls: Vec<Url>,
    ) -> Result<(), RequestExecutorError> {
        let database = self
            .state
            .topology_source
            .database()
            .unwrap_or_default()
            .to_string();

        *self
            .state
            .last_known_urls
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = initial_urls.clone();

        let mut errors = Vec::new();
        for url in &initial_urls {
            let node = ServerNode::new(url.clone(), database.clone());
            let parameters = UpdateTopologyParameters::new(node).with_debug_tag("first-topology-update");
            match self.update_topology(parameters).await {
                Ok(true) => {
                    tracing::info!("Initial topology update complete");
                    return Ok(());
                }
                // Updates are disabled or the executor is shutting down.
                Ok(false) => break,
                Err(RequestExecutorError::Server(RavenDbError::DatabaseDoesNotExist(message))) => {
                    return Err(RavenDbError::DatabaseDoesNotExist(message).into());
                }
                Err(e) => {
                    tracing::warn!("Unable to fetch the topology from `{}`: {}", url, e);
                    errors.push(format!("{} -> {}", url, e));
                }
            }
        }

        if initial_urls.is_empty() {
            return Err(RequestExecutorError::FirstTopologyUpdateFailed(
                "No urls were provided".to_string(),
            ));
        }

        self.ensure_not_disposed()?;

        let nodes = self
            .get_topology_nodes()
            .filter(|nodes| !nodes.is_empty())
            .unwrap_or_else(|| {
                initial_urls
                    .iter()
                    .map(|url| {
                        ServerNode::new(url.clone(), database.clone())
                            .with_cluster_tag(UNKNOWN_CLUSTER_TAG)
                    })
                    .collect()
            });

        if errors.is_empty() {
            tracing::debug!("Topology updates are disabled, using {} node(s) as is", nodes.len());
        } else {
            tracing::warn!(
                "Failed to retrieve the topology from all known nodes, using {} node(s) as is. Errors: {}",
                nodes.len(),
                errors.join("; ")
            );
        }
        self.install_topology(Topology::new(SINGLE_NODE_TOPOLOGY_ETAG, nodes), true);
        Ok(())
    }

    /// Fetches the client configuration from `node` and applies it to the conventions.
    ///
    /// A refresh already in flight makes this call return `Ok(false)` immediately. Cluster
    /// executors have no client configuration and always return `Ok(false)`.
    #[instrument(level = "debug", skip(self), fields(node = %node.url))]
    pub async fn update_client_configuration(
        &self,
        node: ServerNode,
    ) -> Result<bool, RequestExecutorError> {
        if self.is_disposed()
            || self.state.disable_client_configuration_updates
            || self.state.topology_source == TopologySource::Cluster
        {
            return Ok(false);
        }

        let _permit = match self
            .state
            .update_client_configuration_semaphore
            .clone()
            .try_acquire_owned()
        {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!("Client configuration update already in flight");
                return Ok(false);
            }
        };

        let mut options = ExecuteOptions::new(node).without_retry();
        options.node_index = self.index_of(&options.chosen_node);

        let response = match self
            .execute_with_options(&GetClientConfigurationCommand, options, None)
            .await?
        {
            Some(response) => response,
            None => return Ok(false),
        };

        if let Some(configuration) = &response.configuration {
            self.state.conventions_mut().update_from(configuration);
        }
        self.state
            .client_configuration_etag
            .store(response.etag, Ordering::SeqCst);
        tracing::debug!("Client configuration updated to etag {}", response.etag);
        Ok(true)
    }

    /// Returns the node to refresh the topology from when the periodic timer fires, if a
    /// refresh is due.
    pub(crate) fn topology_refresh_due(&self) -> Option<ServerNode> {
        if self.is_disposed() || self.state.disable_topology_updates {
            return None;
        }
        let interval = self.state.conventions().topology_refresh_interval();
        if self.state.since_last_returned_response() < interval {
            return None;
        }
        self.get_preferred_node().map(|p| p.current_node)
    }

    /// Health checks the node tracked by `status`. Returns `Ok(false)` when the topology changed
    /// underneath and the node no longer sits at the tracked index.
    pub(crate) async fn check_node_status(
        &self,
        status: &NodeStatus,
    ) -> Result<bool, RequestExecutorError> {
        let current = self
            .get_topology_nodes()
            .and_then(|nodes| nodes.get(status.node_index).cloned());
        if current.as_ref() != Some(&status.node) {
            return Ok(false);
        }

        self.perform_health_check(&status.node, status.node_index)
            .await?;

        if let Some(selector) = self.state.node_selector().as_mut() {
            if selector.nodes().get(status.node_index) == Some(&status.node) {
                selector.restore_node_index(status.node_index);
            }
        }
        Ok(true)
    }

    async fn perform_health_check(
        &self,
        node: &ServerNode,
        node_index: usize,
    ) -> Result<(), RequestExecutorError> {
        let options = ExecuteOptions::new(node.clone())
            .with_node_index(node_index)
            .without_retry();

        match &self.state.topology_source {
            TopologySource::Database(_) => self
                .execute_with_options(&GetStatisticsCommand::for_failure_check(), options, None)
                .await
                .map(|_| ()),
            TopologySource::Cluster => self
                .execute_with_options(&GetTcpInfoCommand::new("health-check"), options, None)
                .await
                .map(|_| ()),
        }
    }

    fn index_of(&self, node: &ServerNode) -> Option<usize> {
        self.state
            .node_selector()
            .as_ref()
            .and_then(|s| s.nodes().iter().position(|n| n == node))
    }
}
