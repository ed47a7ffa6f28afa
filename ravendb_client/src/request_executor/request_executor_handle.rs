use std::{
    ops::Deref,
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
    time::{Duration, Instant},
};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::instrument;
use url::Url;
use uuid::Uuid;

use crate::{
    document_conventions::DocumentConventions,
    events::{EventListeners, RequestEvent},
    http_cache::HttpCache,
    node_selector::{CurrentIndexAndNode, NodeSelector},
    server_node::ServerNode,
    topology::{Topology, SINGLE_NODE_TOPOLOGY_ETAG},
};

use super::{
    request_executor_actor::{run_request_executor_actor, RequestExecutorActor},
    RequestExecutorError, RequestExecutorMessage,
};

/// Where an executor gets its topology from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologySource {
    /// The nodes hosting one database, fetched from `/topology`.
    Database(String),
    /// Every node of the cluster, fetched from `/cluster/topology`.
    Cluster,
}

impl TopologySource {
    pub fn database(&self) -> Option<&str> {
        match self {
            TopologySource::Database(database) => Some(database),
            TopologySource::Cluster => None,
        }
    }
}

pub(crate) type FirstTopologyUpdate =
    Shared<BoxFuture<'static, Result<(), Arc<RequestExecutorError>>>>;

/// State shared by every clone of a [`RequestExecutor`] and by its background tasks.
///
/// Std locks are only ever held for short synchronous sections, never across an await.
pub(crate) struct ExecutorState {
    pub(crate) application_id: Uuid,
    pub(crate) topology_source: TopologySource,
    pub(crate) http_client: reqwest::Client,
    pub(crate) cache: HttpCache,
    pub(crate) conventions: RwLock<DocumentConventions>,
    pub(crate) node_selector: Mutex<Option<NodeSelector>>,
    pub(crate) client_configuration_etag: AtomicI64,
    pub(crate) last_known_urls: Mutex<Vec<Url>>,
    pub(crate) topology_taken_from_node: Mutex<Option<ServerNode>>,
    pub(crate) last_returned_response: Mutex<Instant>,
    pub(crate) first_topology_update: Mutex<Option<FirstTopologyUpdate>>,
    pub(crate) aggressive_caching: Mutex<Option<Duration>>,
    pub(crate) disable_topology_updates: bool,
    pub(crate) disable_client_configuration_updates: bool,
    pub(crate) disposed: AtomicBool,
    pub(crate) update_topology_semaphore: Arc<Semaphore>,
    pub(crate) update_client_configuration_semaphore: Arc<Semaphore>,
    pub(crate) sender: mpsc::UnboundedSender<RequestExecutorMessage>,
    pub(crate) shutdown: watch::Sender<bool>,
    pub(crate) events: EventListeners<RequestEvent>,
}

impl ExecutorState {
    pub(crate) fn node_selector(&self) -> MutexGuard<'_, Option<NodeSelector>> {
        self.node_selector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn conventions(&self) -> RwLockReadGuard<'_, DocumentConventions> {
        self.conventions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn conventions_mut(&self) -> RwLockWriteGuard<'_, DocumentConventions> {
        self.conventions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn touch_last_returned_response(&self) {
        *self
            .last_returned_response
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub(crate) fn since_last_returned_response(&self) -> Duration {
        self.last_returned_response
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    /// Queues a message for the actor. Messages sent after disposal are dropped.
    pub(crate) fn send(&self, msg: RequestExecutorMessage) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.sender.send(msg) {
            tracing::debug!("Request executor actor is gone, dropping message {:?}", e.0);
        }
    }
}

/// Sends [`RavenCommand`](crate::raven_command::RavenCommand)s to the nodes of a topology.
///
/// The handle is cheap to clone. All clones share one http client, one cache and one
/// topology, and a background task keeps the topology fresh and health checks failed
/// nodes until [`dispose`](RequestExecutor::dispose) is called or the last clone is dropped.
#[derive(Clone)]
pub struct RequestExecutor {
    pub(crate) state: Arc<ExecutorState>,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("topology_source", &self.state.topology_source)
            .field("topology_etag", &self.topology_etag())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// Constructors
impl RequestExecutor {
    /// Creates an executor for `database` and starts fetching its topology from
    /// `initial_urls` in the background.
    ///
    /// Must be called from within a tokio runtime.
    #[instrument(level = "debug", skip(conventions, http_client))]
    pub fn create(
        initial_urls: Vec<Url>,
        database: &str,
        conventions: DocumentConventions,
        http_client: reqwest::Client,
    ) -> Result<Self, RequestExecutorError> {
        Self::create_with_source(
            initial_urls,
            TopologySource::Database(database.to_string()),
            conventions,
            http_client,
        )
    }

    /// Creates an executor that only ever talks to `url`. The topology is never refreshed but
    /// the client configuration follows the server.
    pub fn create_for_single_node_with_configuration_updates(
        url: Url,
        database: &str,
        conventions: DocumentConventions,
        http_client: reqwest::Client,
    ) -> Self {
        Self::single_node(
            url,
            TopologySource::Database(database.to_string()),
            conventions,
            http_client,
            false,
        )
    }

    /// Creates an executor that only ever talks to `url` and never asks the server for
    /// topology or client configuration.
    pub fn create_for_single_node_without_configuration_updates(
        url: Url,
        database: &str,
        conventions: DocumentConventions,
        http_client: reqwest::Client,
    ) -> Self {
        Self::single_node(
            url,
            TopologySource::Database(database.to_string()),
            conventions,
            http_client,
            true,
        )
    }

    fn create_with_source(
        initial_urls: Vec<Url>,
        source: TopologySource,
        conventions: DocumentConventions,
        http_client: reqwest::Client,
    ) -> Result<Self, RequestExecutorError> {
        if initial_urls.is_empty() {
            return Err(RequestExecutorError::FirstTopologyUpdateFailed(
                "No urls were provided".to_string(),
            ));
        }

        let disable_topology_updates = conventions.disable_topology_updates();
        let executor = Self::new(source, conventions, http_client, disable_topology_updates, false);
        *executor
            .state
            .last_known_urls
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = initial_urls.clone();
        executor.start_first_topology_update(initial_urls);
        Ok(executor)
    }

    fn single_node(
        url: Url,
        source: TopologySource,
        conventions: DocumentConventions,
        http_client: reqwest::Client,
        disable_client_configuration_updates: bool,
    ) -> Self {
        let database = source.database().unwrap_or_default().to_string();
        let node = ServerNode::new(url.clone(), database);
        let topology = Topology::new(SINGLE_NODE_TOPOLOGY_ETAG, vec![node.clone()]);

        let executor = Self::new(
            source,
            conventions,
            http_client,
            true,
            disable_client_configuration_updates,
        );
        *executor.state.node_selector() = Some(NodeSelector::new(topology));
        *executor
            .state
            .topology_taken_from_node
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(node);
        *executor
            .state
            .last_known_urls
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = vec![url];
        executor
    }

    fn new(
        topology_source: TopologySource,
        conventions: DocumentConventions,
        http_client: reqwest::Client,
        disable_topology_updates: bool,
        disable_client_configuration_updates: bool,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (shutdown, shutdown_receiver) = watch::channel(false);
        let topology_refresh_interval = conventions.topology_refresh_interval();

        let state = Arc::new(ExecutorState {
            application_id: Uuid::new_v4(),
            topology_source,
            http_client,
            cache: HttpCache::new(conventions.max_http_cache_size()),
            conventions: RwLock::new(conventions),
            node_selector: Mutex::new(None),
            client_configuration_etag: AtomicI64::new(0),
            last_known_urls: Mutex::new(Vec::new()),
            topology_taken_from_node: Mutex::new(None),
            last_returned_response: Mutex::new(Instant::now()),
            first_topology_update: Mutex::new(None),
            aggressive_caching: Mutex::new(None),
            disable_topology_updates,
            disable_client_configuration_updates,
            disposed: AtomicBool::new(false),
            update_topology_semaphore: Arc::new(Semaphore::new(1)),
            update_client_configuration_semaphore: Arc::new(Semaphore::new(1)),
            sender,
            shutdown,
            events: EventListeners::default(),
        });

        let actor = RequestExecutorActor::new(
            Arc::downgrade(&state),
            receiver,
            shutdown_receiver,
            topology_refresh_interval,
        );
        tokio::spawn(run_request_executor_actor(actor));

        Self { state }
    }

    /// Stores a shared first topology update future and starts driving it right away, so the
    /// topology is usually known before the first command is executed.
    pub(crate) fn start_first_topology_update(&self, urls: Vec<Url>) -> FirstTopologyUpdate {
        let weak = Arc::downgrade(&self.state);
        let update = async move {
            let state = weak
                .upgrade()
                .ok_or_else(|| Arc::new(RequestExecutorError::Disposed))?;
            RequestExecutor { state }
                .first_topology_update(urls)
                .await
                .map_err(Arc::new)
        }
        .boxed()
        .shared();

        *self
            .state
            .first_topology_update
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(update.clone());
        tokio::spawn(update.clone());
        update
    }
}

// Getters
impl RequestExecutor {
    pub fn topology_source(&self) -> &TopologySource {
        &self.state.topology_source
    }

    /// Identifies this executor to the server, which uses it to warn about clients that keep
    /// recreating their stores.
    pub fn application_id(&self) -> Uuid {
        self.state.application_id
    }

    pub fn cache(&self) -> &HttpCache {
        &self.state.cache
    }

    pub fn events(&self) -> &EventListeners<RequestEvent> {
        &self.state.events
    }

    pub fn conventions(&self) -> DocumentConventions {
        self.state.conventions().clone()
    }

    pub fn client_configuration_etag(&self) -> i64 {
        self.state.client_configuration_etag.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.state.disposed.load(Ordering::SeqCst)
    }

    pub fn get_topology(&self) -> Option<Topology> {
        self.state
            .node_selector()
            .as_ref()
            .map(|s| s.topology().clone())
    }

    pub fn get_topology_nodes(&self) -> Option<Vec<ServerNode>> {
        self.state
            .node_selector()
            .as_ref()
            .map(|s| s.nodes().to_vec())
    }

    /// Etag of the current topology, `None` before one is known.
    pub fn topology_etag(&self) -> Option<i64> {
        self.state
            .node_selector()
            .as_ref()
            .map(|s| s.topology().etag)
    }

    /// The node the current topology was fetched from.
    pub fn topology_taken_from_node(&self) -> Option<ServerNode> {
        self.state
            .topology_taken_from_node
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Url of the preferred node, falling back to the urls the executor was created with.
    pub fn get_url(&self) -> Option<Url> {
        match self.get_preferred_node() {
            Some(preferred) => Some(preferred.current_node.url),
            None => self
                .state
                .last_known_urls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .first()
                .cloned(),
        }
    }

    pub fn get_preferred_node(&self) -> Option<CurrentIndexAndNode> {
        self.state
            .node_selector()
            .as_ref()
            .and_then(|s| s.get_preferred_node())
    }

    pub fn get_node_by_session_id(&self, session_id: i64) -> Option<CurrentIndexAndNode> {
        self.state
            .node_selector()
            .as_ref()
            .and_then(|s| s.get_node_by_session_id(session_id))
    }

    pub fn get_fastest_node(&self) -> Option<CurrentIndexAndNode> {
        self.state
            .node_selector()
            .as_mut()
            .and_then(|s| s.get_fastest_node())
    }

    pub fn get_requested_node(&self, cluster_tag: &str) -> Option<CurrentIndexAndNode> {
        self.state
            .node_selector()
            .as_ref()
            .and_then(|s| s.get_requested_node(cluster_tag))
    }
}

// Mutators
impl RequestExecutor {
    /// Serves cached responses younger than `duration` without contacting the server, until
    /// the returned guard is dropped.
    pub fn aggressively_cache_for(&self, duration: Duration) -> AggressiveCachingGuard {
        let previous = self
            .state
            .aggressive_caching
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(duration);
        AggressiveCachingGuard {
            state: self.state.clone(),
            previous,
        }
    }

    /// Stops background work, fails pending and future executions with
    /// [`RequestExecutorError::Disposed`] and empties the cache. Calling it again does nothing.
    #[instrument(level = "debug", skip(self), fields(source = ?self.state.topology_source))]
    pub fn dispose(&self) {
        if self.state.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("Disposing request executor");
        self.state.update_topology_semaphore.close();
        self.state.update_client_configuration_semaphore.close();
        self.state.cache.clear();
        self.state.shutdown.send_replace(true);
    }

    pub(crate) fn ensure_not_disposed(&self) -> Result<(), RequestExecutorError> {
        if self.is_disposed() {
            return Err(RequestExecutorError::Disposed);
        }
        Ok(())
    }
}

/// Restores the previous aggressive caching duration when dropped.
pub struct AggressiveCachingGuard {
    state: Arc<ExecutorState>,
    previous: Option<Duration>,
}

impl Drop for AggressiveCachingGuard {
    fn drop(&mut self) {
        *self
            .state
            .aggressive_caching
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = self.previous.take();
    }
}

/// A [`RequestExecutor`] whose topology is the whole cluster rather than one database.
///
/// Cluster executors never refresh client configuration, and health check failed nodes with a
/// tcp info request instead of database statistics.
#[derive(Clone, Debug)]
pub struct ClusterRequestExecutor(RequestExecutor);

impl ClusterRequestExecutor {
    pub fn create(
        initial_urls: Vec<Url>,
        conventions: DocumentConventions,
        http_client: reqwest::Client,
    ) -> Result<Self, RequestExecutorError> {
        RequestExecutor::create_with_source(
            initial_urls,
            TopologySource::Cluster,
            conventions,
            http_client,
        )
        .map(Self)
    }

    pub fn create_for_single_node(
        url: Url,
        conventions: DocumentConventions,
        http_client: reqwest::Client,
    ) -> Self {
        Self(RequestExecutor::single_node(
            url,
            TopologySource::Cluster,
            conventions,
            http_client,
            true,
        ))
    }
}

impl Deref for ClusterRequestExecutor {
    type Target = RequestExecutor;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
