use std::sync::PoisonError;

use futures::stream::{FuturesUnordered, StreamExt};
use reqwest::{header::HeaderMap, Method, StatusCode};
use tracing::instrument;

use crate::{
    document_conventions::ReadBalanceBehavior,
    events::RequestEvent,
    exception_dispatcher::throw_error,
    http_cache::ReleaseCacheItem,
    node_selector::CurrentIndexAndNode,
    raven_command::{CommandRequest, RavenCommand, ResponseType},
    ravendb_error::RavenDbError,
    server_node::ServerNode,
};

use super::{
    headers, NodeFailure, RequestExecutor, RequestExecutorError, RequestExecutorMessage,
    UpdateTopologyParameters, CLIENT_VERSION,
};

/// Per-session information that influences node selection and caching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInfo {
    /// Round robin read balancing keeps every request of a session on the same node.
    pub session_id: i64,
    pub last_cluster_transaction_index: Option<i64>,
    /// Bypasses the http cache for every request of the session.
    pub no_caching: bool,
}

impl SessionInfo {
    pub fn new(session_id: i64) -> Self {
        Self {
            session_id,
            ..Default::default()
        }
    }

    pub fn random() -> Self {
        Self::new(i64::from(rand::random::<u32>()))
    }
}

/// Sends a command to an explicit node instead of letting the executor choose one.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub chosen_node: ServerNode,
    /// Index of `chosen_node` in the current topology. Failures of nodes without an index are not
    /// recorded by the node selector.
    pub node_index: Option<usize>,
    /// When false the command is attempted exactly once and the raw error is returned.
    pub should_retry: bool,
}

impl ExecuteOptions {
    pub fn new(chosen_node: ServerNode) -> Self {
        Self {
            chosen_node,
            node_index: None,
            should_retry: true,
        }
    }

    pub fn with_node_index(mut self, node_index: usize) -> Self {
        self.node_index = Some(node_index);
        self
    }

    pub fn without_retry(mut self) -> Self {
        self.should_retry = false;
        self
    }
}

/// Failures collected over the attempts of one execution.
struct RetryContext {
    failed_nodes: Vec<NodeFailure>,
    /// Whether the caller allowed moving to another node. When it did not, errors are returned as
    /// they are instead of being aggregated.
    failover_allowed: bool,
}

impl RetryContext {
    fn new(failover_allowed: bool) -> Self {
        Self {
            failed_nodes: Vec::new(),
            failover_allowed,
        }
    }

    fn has_failed(&self, node: &ServerNode) -> bool {
        self.failed_nodes.iter().any(|f| &f.node == node)
    }

    fn record(&mut self, node: ServerNode, error: RequestExecutorError) {
        self.failed_nodes.retain(|f| f.node != node);
        self.failed_nodes.push(NodeFailure { node, error });
    }

    fn all_nodes_down(&mut self, command: &str) -> RequestExecutorError {
        RequestExecutorError::AllTopologyNodesDown {
            command: command.to_string(),
            failures: std::mem::take(&mut self.failed_nodes),
        }
    }
}

/// The node that answered first during a speed test race.
struct RaceWinner {
    index: usize,
    node: ServerNode,
    url: String,
    response: reqwest::Response,
}

/// What came back from sending one attempt.
struct Attempt {
    node_index: Option<usize>,
    node: ServerNode,
    url: String,
    cached: Option<ReleaseCacheItem>,
    result: Result<reqwest::Response, RequestExecutorError>,
}

impl RequestExecutor {
    /// Executes `command` on the node chosen by the current topology and read balance behavior,
    /// failing over to another node at most once when the first one is down.
    #[instrument(
        level = "debug",
        name = "RequestExecutor - Execute",
        skip(self, command, session_info),
        fields(command = command.name())
    )]
    pub async fn execute<C: RavenCommand>(
        &self,
        command: &C,
        session_info: Option<&SessionInfo>,
    ) -> Result<C::Output, RequestExecutorError> {
        self.ensure_not_disposed()?;
        self.wait_for_first_topology_update().await?;

        let chosen = self.choose_node_for_request(command, session_info)?;
        self.execute_with_retry(
            command,
            Some(chosen.current_index),
            chosen.current_node,
            true,
            session_info,
        )
        .await
    }

    /// Executes `command` on the node named in `options`.
    #[instrument(
        level = "debug",
        name = "RequestExecutor - Execute On Node",
        skip(self, command, options, session_info),
        fields(command = command.name(), node = %options.chosen_node.url)
    )]
    pub async fn execute_with_options<C: RavenCommand>(
        &self,
        command: &C,
        options: ExecuteOptions,
        session_info: Option<&SessionInfo>,
    ) -> Result<C::Output, RequestExecutorError> {
        self.ensure_not_disposed()?;
        self.execute_with_retry(
            command,
            options.node_index,
            options.chosen_node,
            options.should_retry,
            session_info,
        )
        .await
    }

    /// Picks the node a command runs on. An explicit node tag wins, writes go to the preferred
    /// node and reads follow the read balance behavior.
    pub fn choose_node_for_request<C: RavenCommand>(
        &self,
        command: &C,
        session_info: Option<&SessionInfo>,
    ) -> Result<CurrentIndexAndNode, RequestExecutorError> {
        let behavior = self.state.conventions().read_balance_behavior();
        let mut guard = self.state.node_selector();
        let selector = guard.as_mut().ok_or(RequestExecutorError::EmptyTopology)?;

        if let Some(tag) = command.selected_node_tag() {
            return selector
                .get_requested_node(tag)
                .ok_or_else(|| RequestExecutorError::RequestedNodeNotFound(tag.to_string()));
        }

        let chosen = if !command.is_read_request() {
            selector.get_preferred_node()
        } else {
            match behavior {
                ReadBalanceBehavior::None => selector.get_preferred_node(),
                ReadBalanceBehavior::RoundRobin => {
                    selector.get_node_by_session_id(session_info.map_or(0, |s| s.session_id))
                }
                ReadBalanceBehavior::FastestNode => selector.get_fastest_node(),
            }
        };
        chosen.ok_or(RequestExecutorError::EmptyTopology)
    }

    /// Waits for the first topology update to finish. A failed update is forgotten so the next
    /// call starts a new one from the last known urls.
    pub async fn wait_for_first_topology_update(&self) -> Result<(), RequestExecutorError> {
        let pending = self
            .state
            .first_topology_update
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let update = match pending {
            Some(update) => update,
            None if self.state.node_selector().is_some() => return Ok(()),
            None => {
                let urls = self
                    .state
                    .last_known_urls
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                if urls.is_empty() {
                    return Err(RequestExecutorError::FirstTopologyUpdateFailed(
                        "No known topology and no previously known urls".to_string(),
                    ));
                }
                self.start_first_topology_update(urls)
            }
        };

        let timeout = self.state.conventions().first_topology_update_timeout();
        let result = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, update)
                .await
                .map_err(|_| RequestExecutorError::Timeout {
                    url: "first topology update".to_string(),
                    timeout,
                })?,
            None => update.await,
        };

        if let Err(e) = result {
            let mut slot = self
                .state
                .first_topology_update
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if slot
                .as_ref()
                .and_then(|u| u.peek())
                .map_or(false, |r| r.is_err())
            {
                *slot = None;
            }
            return Err(RequestExecutorError::FirstTopologyUpdate(e));
        }
        Ok(())
    }

    /// Runs the attempts of one execution: the chosen node first, then at most one other node
    /// when the first is down or no longer serves the request.
    async fn execute_with_retry<C: RavenCommand>(
        &self,
        command: &C,
        mut node_index: Option<usize>,
        mut node: ServerNode,
        mut should_retry: bool,
        session_info: Option<&SessionInfo>,
    ) -> Result<C::Output, RequestExecutorError> {
        let mut retry = RetryContext::new(should_retry);
        let no_caching = session_info.map_or(false, |s| s.no_caching);
        let cacheable = !no_caching
            && command.can_cache()
            && command.is_read_request()
            && command.response_type() == ResponseType::Object;

        loop {
            self.ensure_not_disposed()?;
            let request = command.create_request(&node)?;
            let url = request.url.to_string();

            let cached = if cacheable {
                Some(self.state.cache.get(&url)).filter(|item| item.is_hit())
            } else {
                None
            };

            if let Some(item) = &cached {
                if self.can_serve_aggressively(command, item) {
                    tracing::trace!("Serving `{}` from the aggressive cache", url);
                    let body = if item.is_not_found() {
                        None
                    } else {
                        item.response()
                    };
                    return Ok(command.set_response(body, true)?);
                }
            }

            let winner = match node_index {
                Some(_) if should_retry && self.should_execute_on_all(command) => {
                    self.execute_on_all_to_figure_out_the_fastest(command, session_info)
                        .await
                }
                _ => None,
            };

            let attempt = match winner {
                Some(winner) => Attempt {
                    node_index: Some(winner.index),
                    node: winner.node,
                    url: winner.url,
                    cached: None,
                    result: Ok(winner.response),
                },
                None => {
                    let change_vector = cached.as_ref().and_then(|c| c.change_vector());
                    let http_request =
                        self.create_http_request(&request, change_vector, session_info)?;
                    let result = self.send(http_request, &url).await;
                    Attempt {
                        node_index,
                        node: node.clone(),
                        url,
                        cached,
                        result,
                    }
                }
            };
            let Attempt {
                node_index: sent_index,
                node: sent_node,
                url,
                cached,
                result,
            } = attempt;

            let response = match result {
                Ok(response) => response,
                Err(error) => {
                    let next = self.handle_server_down(
                        &mut retry,
                        should_retry,
                        sent_index,
                        &sent_node,
                        &url,
                        error,
                        command.name(),
                    )?;
                    node_index = Some(next.current_index);
                    node = next.current_node;
                    should_retry = false;
                    continue;
                }
            };

            let status = response.status();
            tracing::trace!("`{}` answered {}", url, status);
            match status {
                StatusCode::NOT_MODIFIED => {
                    let item = cached.ok_or_else(|| {
                        anyhow::anyhow!("Server answered 304 to `{}` but nothing was cached", url)
                    })?;
                    item.not_modified();
                    self.on_succeeded_request(&sent_node, &url, status, response.headers());
                    let body = if item.is_not_found() {
                        None
                    } else {
                        item.response()
                    };
                    return Ok(command.set_response(body, true)?);
                }
                StatusCode::NOT_FOUND => {
                    if cacheable {
                        self.state.cache.set_not_found(&url);
                    }
                    self.on_succeeded_request(&sent_node, &url, status, response.headers());
                    return Ok(command.set_response(None, false)?);
                }
                StatusCode::GONE => {
                    if !should_retry {
                        return Err(RequestExecutorError::Gone { url });
                    }
                    let parameters = UpdateTopologyParameters::new(sent_node)
                        .with_force_update(true)
                        .with_debug_tag("handle-unsuccessful-response");
                    if let Err(e) = self.update_topology(parameters).await {
                        tracing::warn!("Unable to refresh the topology after `410 Gone`: {}", e);
                    }
                    let next = self
                        .get_preferred_node()
                        .ok_or(RequestExecutorError::EmptyTopology)?;
                    node_index = Some(next.current_index);
                    node = next.current_node;
                    should_retry = false;
                    continue;
                }
                StatusCode::REQUEST_TIMEOUT
                | StatusCode::BAD_GATEWAY
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT => {
                    if status == StatusCode::SERVICE_UNAVAILABLE
                        && response.headers().contains_key(headers::DATABASE_MISSING)
                    {
                        let database = self
                            .state
                            .topology_source
                            .database()
                            .unwrap_or_default()
                            .to_string();
                        return Err(RavenDbError::DatabaseDoesNotExist(database).into());
                    }
                    let error = RequestExecutorError::ServiceUnavailable {
                        url: url.clone(),
                        status: status.as_u16(),
                    };
                    let next = self.handle_server_down(
                        &mut retry,
                        should_retry,
                        sent_index,
                        &sent_node,
                        &url,
                        error,
                        command.name(),
                    )?;
                    node_index = Some(next.current_index);
                    node = next.current_node;
                    should_retry = false;
                    continue;
                }
                _ => {}
            }

            // The request timeout keeps running while the body is read, so a node that stalls
            // mid-body is treated like any other node that went down.
            let response_headers = response.headers().clone();
            let body = match self.read_body(response, &url).await {
                Ok(body) => body,
                Err(error) => {
                    let next = self.handle_server_down(
                        &mut retry,
                        should_retry,
                        sent_index,
                        &sent_node,
                        &url,
                        error,
                        command.name(),
                    )?;
                    node_index = Some(next.current_index);
                    node = next.current_node;
                    should_retry = false;
                    continue;
                }
            };

            if status == StatusCode::FORBIDDEN {
                let body = String::from_utf8_lossy(&body);
                let message = match throw_error(status, &body) {
                    RavenDbError::BadAuthorization(message) => message,
                    _ if body.trim().is_empty() => format!("Forbidden access to `{}`", url),
                    _ => body.into_owned(),
                };
                return Err(RavenDbError::BadAuthorization(message).into());
            }
            if status.as_u16() >= 400 {
                return Err(throw_error(status, &String::from_utf8_lossy(&body)).into());
            }

            self.on_succeeded_request(&sent_node, &url, status, &response_headers);
            let change_vector = etag_header(&response_headers);
            let result =
                self.process_body(command, &url, cacheable, change_vector.as_deref(), &body)?;
            if request.method != Method::GET {
                self.state.cache.notify_possible_modification();
            }
            return Ok(result);
        }
    }

    fn can_serve_aggressively<C: RavenCommand>(&self, command: &C, item: &ReleaseCacheItem) -> bool {
        let duration = *self
            .state
            .aggressive_caching
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match duration {
            Some(duration) => {
                command.can_cache_aggressively()
                    && item.age() < duration
                    && !item.might_have_been_modified()
            }
            None => false,
        }
    }

    fn create_http_request(
        &self,
        request: &CommandRequest,
        change_vector: Option<&str>,
        session_info: Option<&SessionInfo>,
    ) -> Result<reqwest::Request, RequestExecutorError> {
        let mut builder = self
            .state
            .http_client
            .request(request.method.clone(), request.url.clone())
            .header(headers::CLIENT_VERSION, CLIENT_VERSION);

        // Covers the body as well as the headers.
        if let Some(timeout) = self.state.conventions().request_timeout() {
            builder = builder.timeout(timeout);
        }

        if let Some(change_vector) = change_vector {
            builder = builder.header(headers::IF_NONE_MATCH, format!("\"{}\"", change_vector));
        }

        if let Some(etag) = self.topology_etag().filter(|etag| *etag >= 0) {
            builder = builder.header(headers::TOPOLOGY_ETAG, format!("\"{}\"", etag));
        }

        let client_configuration_etag = self.client_configuration_etag();
        if client_configuration_etag > 0 {
            builder = builder.header(
                headers::CLIENT_CONFIGURATION_ETAG,
                format!("\"{}\"", client_configuration_etag),
            );
        }

        if let Some(index) = session_info.and_then(|s| s.last_cluster_transaction_index) {
            builder = builder.header(headers::LAST_KNOWN_CLUSTER_TRANSACTION_INDEX, index);
        }

        if let Some(body) = &request.body {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        Ok(builder.build().map_err(anyhow::Error::from)?)
    }

    async fn send(
        &self,
        request: reqwest::Request,
        url: &str,
    ) -> Result<reqwest::Response, RequestExecutorError> {
        self.state
            .http_client
            .execute(request)
            .await
            .map_err(|source| self.transport_error(url, source))
    }

    /// Records a node failure and decides where to go next. Returns the node for the single
    /// retry, or the error to hand back to the caller.
    #[allow(clippy::too_many_arguments)]
    fn handle_server_down(
        &self,
        retry: &mut RetryContext,
        should_retry: bool,
        node_index: Option<usize>,
        node: &ServerNode,
        url: &str,
        error: RequestExecutorError,
        command_name: &str,
    ) -> Result<CurrentIndexAndNode, RequestExecutorError> {
        if !retry.failover_allowed || !error.is_server_down() {
            return Err(error);
        }

        tracing::warn!("Request to `{}` failed: {}", url, error);
        self.state.events.notify(&RequestEvent::FailedRequest {
            url: url.to_string(),
            error: error.to_string(),
        });
        retry.record(node.clone(), error);

        let node_index = match node_index {
            Some(node_index) => node_index,
            None => return Err(retry.all_nodes_down(command_name)),
        };
        self.on_failed_request(node_index, node);

        if should_retry {
            if let Some(next) = self.get_preferred_node() {
                if !retry.has_failed(&next.current_node) {
                    tracing::debug!("Retrying on `{}`", next.current_node.url);
                    return Ok(next);
                }
            }
        }
        Err(retry.all_nodes_down(command_name))
    }

    /// Marks the node as failed and asks the actor to health check it. Topologies with a single
    /// node are left alone since there is nowhere else to go.
    fn on_failed_request(&self, node_index: usize, node: &ServerNode) {
        let spawn_health_check = {
            let mut guard = self.state.node_selector();
            match guard.as_mut() {
                Some(selector) if selector.nodes().get(node_index) == Some(node) => {
                    selector.on_failed_request(node_index);
                    selector.nodes().len() > 1
                }
                _ => false,
            }
        };

        if spawn_health_check {
            self.state.send(RequestExecutorMessage::NodeFailed {
                node_index,
                node: node.clone(),
            });
        }
    }

    fn on_succeeded_request(
        &self,
        node: &ServerNode,
        url: &str,
        status: StatusCode,
        response_headers: &HeaderMap,
    ) {
        self.state.touch_last_returned_response();

        if header_is_true(response_headers, headers::REFRESH_TOPOLOGY) {
            self.state.send(RequestExecutorMessage::RefreshTopology { node: node.clone() });
        }
        if header_is_true(response_headers, headers::REFRESH_CLIENT_CONFIGURATION) {
            self.state
                .send(RequestExecutorMessage::RefreshClientConfiguration { node: node.clone() });
        }

        self.state.events.notify(&RequestEvent::SucceedRequest {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    /// Reads the whole body. Runs under the timeout set on the request.
    async fn read_body(
        &self,
        response: reqwest::Response,
        url: &str,
    ) -> Result<Vec<u8>, RequestExecutorError> {
        match response.bytes().await {
            Ok(bytes) => Ok(bytes.to_vec()),
            Err(source) => Err(self.transport_error(url, source)),
        }
    }

    fn process_body<C: RavenCommand>(
        &self,
        command: &C,
        url: &str,
        cacheable: bool,
        change_vector: Option<&str>,
        body: &[u8],
    ) -> Result<C::Output, RequestExecutorError> {
        match command.response_type() {
            ResponseType::Empty => Ok(command.set_response(None, false)?),
            ResponseType::Raw => Ok(command.set_response_raw(body)?),
            ResponseType::Object => {
                let body = std::str::from_utf8(body).map_err(|e| {
                    anyhow::anyhow!("Response from `{}` is not valid utf-8: {}", url, e)
                })?;
                if cacheable {
                    if let Some(change_vector) = change_vector {
                        self.state.cache.set(url, change_vector, body.to_string());
                    }
                }
                Ok(command.set_response(Some(body), false)?)
            }
        }
    }

    /// Timeouts reported by the http client become [`RequestExecutorError::Timeout`].
    fn transport_error(&self, url: &str, source: reqwest::Error) -> RequestExecutorError {
        match self.state.conventions().request_timeout() {
            Some(timeout) if source.is_timeout() => RequestExecutorError::Timeout {
                url: url.to_string(),
                timeout,
            },
            _ => RequestExecutorError::Transport {
                url: url.to_string(),
                source,
            },
        }
    }

    fn should_execute_on_all<C: RavenCommand>(&self, command: &C) -> bool {
        if !command.is_read_request()
            || command.response_type() != ResponseType::Object
            || self.state.conventions().read_balance_behavior() != ReadBalanceBehavior::FastestNode
        {
            return false;
        }

        let mut guard = self.state.node_selector();
        match guard.as_mut() {
            Some(selector) => selector.nodes().len() > 1 && selector.in_speed_test_phase(),
            None => false,
        }
    }

    /// Races the command against every node. The first node to answer successfully gets a win
    /// recorded in the speed test and its response is used. Returns `None` when every node
    /// failed.
    async fn execute_on_all_to_figure_out_the_fastest<C: RavenCommand>(
        &self,
        command: &C,
        session_info: Option<&SessionInfo>,
    ) -> Option<RaceWinner> {
        let nodes = self.get_topology_nodes()?;

        let mut races = nodes
            .into_iter()
            .enumerate()
            .map(|(index, node)| async move {
                let request = command.create_request(&node)?;
                let url = request.url.to_string();
                let http_request = self.create_http_request(&request, None, session_info)?;
                let response = self.send(http_request, &url).await?;
                let status = response.status();
                if status.as_u16() >= 400 && status != StatusCode::NOT_FOUND {
                    return Err(RequestExecutorError::ServiceUnavailable {
                        url,
                        status: status.as_u16(),
                    });
                }
                Ok::<_, RequestExecutorError>(RaceWinner {
                    index,
                    node,
                    url,
                    response,
                })
            })
            .collect::<FuturesUnordered<_>>();

        while let Some(result) = races.next().await {
            match result {
                Ok(winner) => {
                    if let Some(selector) = self.state.node_selector().as_mut() {
                        selector.record_fastest(winner.index, &winner.node);
                    }
                    return Some(winner);
                }
                Err(e) => tracing::debug!("Speed test attempt failed: {}", e),
            }
        }
        tracing::debug!("Every node failed the speed test race");
        None
    }
}

fn header_is_true(response_headers: &HeaderMap, name: &str) -> bool {
    response_headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v.eq_ignore_ascii_case("true"))
}

/// Change vector from the `ETag` header, without its quotes.
fn etag_header(response_headers: &HeaderMap) -> Option<String> {
    response_headers
        .get(headers::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_matches('"').to_string())
}
