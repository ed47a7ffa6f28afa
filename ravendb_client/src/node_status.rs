use std::time::Duration;

use crate::server_node::ServerNode;

const INITIAL_TIMER_PERIOD: Duration = Duration::from_millis(100);
const TIMER_PERIOD_STEP: Duration = Duration::from_millis(100);
const MAX_TIMER_PERIOD: Duration = Duration::from_millis(5000);

/// Tracks a node that failed a request until a health check brings it back.
///
/// The check interval starts at 100ms and grows by 100ms after every failed check, capped at 5s.
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub node_index: usize,
    pub node: ServerNode,
    timer_period: Duration,
}

impl NodeStatus {
    pub fn new(node_index: usize, node: ServerNode) -> Self {
        Self {
            node_index,
            node,
            timer_period: INITIAL_TIMER_PERIOD,
        }
    }

    /// Delay before the next health check.
    pub fn timer_period(&self) -> Duration {
        self.timer_period
    }

    /// Called after a failed health check.
    pub fn on_failed_check(&mut self) {
        self.timer_period = (self.timer_period + TIMER_PERIOD_STEP).min(MAX_TIMER_PERIOD);
    }
}
