use std::{
    collections::HashMap,
    sync::Weak,
    time::Duration,
};

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{instrument, Span};
use uuid::Uuid;

use crate::{node_status::NodeStatus, server_node::ServerNode};

use super::{
    request_executor_handle::ExecutorState, RequestExecutor, RequestExecutorMessage,
    UpdateTopologyParameters,
};

/// Owns the timers of a [`RequestExecutor`]: the periodic topology refresh and one health check
/// task per failed node.
///
/// The actor only holds a weak reference to the executor, so dropping every handle stops it.
pub(crate) struct RequestExecutorActor {
    executor: Weak<ExecutorState>,
    receiver: mpsc::UnboundedReceiver<RequestExecutorMessage>,
    shutdown: watch::Receiver<bool>,
    topology_refresh_interval: Duration,
    /// Running health checks, keyed by node, with the id they were started under.
    node_statuses: HashMap<ServerNode, (u64, JoinHandle<()>)>,
    next_status_id: u64,
}

impl RequestExecutorActor {
    pub(crate) fn new(
        executor: Weak<ExecutorState>,
        receiver: mpsc::UnboundedReceiver<RequestExecutorMessage>,
        shutdown: watch::Receiver<bool>,
        topology_refresh_interval: Duration,
    ) -> Self {
        Self {
            executor,
            receiver,
            shutdown,
            topology_refresh_interval,
            node_statuses: HashMap::default(),
            next_status_id: 0,
        }
    }

    fn executor(&self) -> Option<RequestExecutor> {
        self.executor
            .upgrade()
            .map(|state| RequestExecutor { state })
    }

    /// Message handler for the RequestExecutorActor
    #[instrument(
        level = "debug",
        name = "RequestExecutor Actor - Handle Message",
        skip(self),
        fields(correlation_id)
    )]
    fn handle_message(&mut self, msg: RequestExecutorMessage) {
        // Apply a correlation id to all child spans of this message handler
        Span::current().record("correlation_id", Uuid::new_v4().to_string());
        match msg {
            RequestExecutorMessage::NodeFailed { node_index, node } => {
                self.spawn_health_check(node_index, node);
            }
            RequestExecutorMessage::NodeStatusFinished { node, status_id } => {
                if matches!(self.node_statuses.get(&node), Some((id, _)) if *id == status_id) {
                    self.node_statuses.remove(&node);
                }
            }
            RequestExecutorMessage::ClearNodeStatuses => self.clear_node_statuses(),
            RequestExecutorMessage::RefreshTopology { node } => {
                if let Some(executor) = self.executor() {
                    tokio::spawn(async move {
                        let parameters = UpdateTopologyParameters::new(node)
                            .with_timeout(Duration::ZERO)
                            .with_debug_tag("refresh-topology-header");
                        if let Err(e) = executor.update_topology(parameters).await {
                            tracing::warn!("Unable to refresh the topology. Caused by: {}", e);
                        }
                    });
                }
            }
            RequestExecutorMessage::RefreshClientConfiguration { node } => {
                if let Some(executor) = self.executor() {
                    tokio::spawn(async move {
                        if let Err(e) = executor.update_client_configuration(node).await {
                            tracing::warn!(
                                "Unable to refresh the client configuration. Caused by: {}",
                                e
                            );
                        }
                    });
                }
            }
        }
    }

    fn spawn_health_check(&mut self, node_index: usize, node: ServerNode) {
        if let Some((_, handle)) = self.node_statuses.get(&node) {
            if !handle.is_finished() {
                tracing::trace!("Node `{}` is already being health checked", node.url);
                return;
            }
        }

        let status_id = self.next_status_id;
        self.next_status_id += 1;
        let status = NodeStatus::new(node_index, node.clone());
        let handle = tokio::spawn(run_node_status(self.executor.clone(), status, status_id));
        self.node_statuses.insert(node, (status_id, handle));
    }

    fn clear_node_statuses(&mut self) {
        for (_, (_, handle)) in self.node_statuses.drain() {
            handle.abort();
        }
    }

    fn on_topology_timer(&self) {
        let executor = match self.executor() {
            Some(executor) => executor,
            None => return,
        };
        if let Some(node) = executor.topology_refresh_due() {
            tracing::debug!("Updating topology via timer.");
            tokio::spawn(async move {
                let parameters = UpdateTopologyParameters::new(node)
                    .with_timeout(Duration::ZERO)
                    .with_debug_tag("timer-callback");
                if let Err(e) = executor.update_topology(parameters).await {
                    tracing::warn!("Periodic topology update failed. Caused by: {}", e);
                }
            });
        }
    }
}

/// Health checks a failed node until it answers, backing off a little more after every failed
/// check. Gives up when the executor is gone or the node left the topology.
#[instrument(level = "debug", name = "Node Status", skip(executor, status), fields(node = %status.node.url))]
async fn run_node_status(executor: Weak<ExecutorState>, mut status: NodeStatus, status_id: u64) {
    loop {
        tokio::time::sleep(status.timer_period()).await;

        let executor = match executor.upgrade() {
            Some(state) => RequestExecutor { state },
            None => return,
        };
        if executor.is_disposed() {
            return;
        }

        match executor.check_node_status(&status).await {
            Ok(restored) => {
                if restored {
                    tracing::info!("Node `{}` is reachable again", status.node.url);
                } else {
                    tracing::debug!("Node `{}` left the topology", status.node.url);
                }
                executor.state.send(RequestExecutorMessage::NodeStatusFinished {
                    node: status.node.clone(),
                    status_id,
                });
                return;
            }
            Err(e) => {
                tracing::debug!("Health check of `{}` failed: {}", status.node.url, e);
                status.on_failed_check();
            }
        }
    }
}

#[instrument(level = "debug", name = "Running Request Executor Actor", skip(actor))]
pub(crate) async fn run_request_executor_actor(mut actor: RequestExecutorActor) {
    let period = actor.topology_refresh_interval;
    let mut topology_update_timer =
        tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = topology_update_timer.tick() => actor.on_topology_timer(),
            changed = actor.shutdown.changed() => {
                if changed.is_err() || *actor.shutdown.borrow() {
                    break;
                }
            },
            opt_msg = actor.receiver.recv() => {
                let msg = match opt_msg {
                    Some(msg) => msg,
                    None => break,
                };
                actor.handle_message(msg);
            },
        }
    }
    actor.clear_node_statuses();
    tracing::debug!("Request executor actor stopped");
}
