use std::time::Duration;

use serde::Deserialize;

use crate::{client_configuration::ClientConfiguration, http_cache::DEFAULT_MAX_HTTP_CACHE_SIZE};

/// How read requests are spread over the nodes of a topology. Writes always go to the preferred
/// node regardless of this setting.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ReadBalanceBehavior {
    /// Every request goes to the preferred node.
    #[default]
    None,
    /// Requests are spread by session id, sticking to one node per session.
    RoundRobin,
    /// Reads go to the node that won the last speed test.
    FastestNode,
}

#[derive(Debug, Clone)]
pub struct DocumentConventions {
    disable_topology_updates: bool,
    send_application_identifier: bool,
    read_balance_behavior: ReadBalanceBehavior,
    max_number_of_requests_per_session: u32,
    max_http_cache_size: usize,
    request_timeout: Option<Duration>,
    first_topology_update_timeout: Option<Duration>,
    topology_refresh_interval: Duration,
    speed_test_interval: Duration,
    /// Snapshot taken before the first server-pushed configuration was applied.
    original_configuration: Option<Box<DocumentConventions>>,
}

impl Default for DocumentConventions {
    fn default() -> Self {
        Self {
            disable_topology_updates: false,
            send_application_identifier: true,
            read_balance_behavior: ReadBalanceBehavior::default(),
            max_number_of_requests_per_session: 30,
            max_http_cache_size: DEFAULT_MAX_HTTP_CACHE_SIZE,
            request_timeout: None,
            first_topology_update_timeout: None,
            topology_refresh_interval: Duration::from_secs(60),
            speed_test_interval: Duration::from_secs(60),
            original_configuration: None,
        }
    }
}

// Mutators
impl DocumentConventions {
    pub fn default_for_single_server() -> Self {
        Self {
            send_application_identifier: false,
            ..Default::default()
        }
    }

    pub fn set_disable_topology_updates(mut self, disable: bool) -> Self {
        self.disable_topology_updates = disable;
        self
    }

    pub fn set_send_application_identifier(mut self, send: bool) -> Self {
        self.send_application_identifier = send;
        self
    }

    pub fn set_read_balance_behavior(mut self, behavior: ReadBalanceBehavior) -> Self {
        self.read_balance_behavior = behavior;
        self
    }

    pub fn set_max_http_cache_size(mut self, size: usize) -> Self {
        self.max_http_cache_size = size;
        self
    }

    pub fn set_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn set_first_topology_update_timeout(mut self, timeout: Duration) -> Self {
        self.first_topology_update_timeout = Some(timeout);
        self
    }

    pub fn set_topology_refresh_interval(mut self, interval: Duration) -> Self {
        self.topology_refresh_interval = interval;
        self
    }

    pub fn set_speed_test_interval(mut self, interval: Duration) -> Self {
        self.speed_test_interval = interval;
        self
    }

    /// Applies a configuration pushed by the server. A disabled configuration restores whatever
    /// the client was configured with before the first update.
    pub fn update_from(&mut self, configuration: &ClientConfiguration) {
        if configuration.disabled {
            if let Some(original) = self.original_configuration.take() {
                self.read_balance_behavior = original.read_balance_behavior;
                self.max_number_of_requests_per_session =
                    original.max_number_of_requests_per_session;
            }
            return;
        }

        if self.original_configuration.is_none() {
            self.original_configuration = Some(Box::new(self.clone()));
        }

        if let Some(behavior) = configuration.read_balance_behavior {
            self.read_balance_behavior = behavior;
        }
        if let Some(max) = configuration.max_number_of_requests_per_session {
            self.max_number_of_requests_per_session = max;
        }
    }
}

// Getters
impl DocumentConventions {
    pub fn disable_topology_updates(&self) -> bool {
        self.disable_topology_updates
    }

    pub fn send_application_identifier(&self) -> bool {
        self.send_application_identifier
    }

    pub fn read_balance_behavior(&self) -> ReadBalanceBehavior {
        self.read_balance_behavior
    }

    pub fn max_number_of_requests_per_session(&self) -> u32 {
        self.max_number_of_requests_per_session
    }

    pub fn max_http_cache_size(&self) -> usize {
        self.max_http_cache_size
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    pub fn first_topology_update_timeout(&self) -> Option<Duration> {
        self.first_topology_update_timeout
    }

    pub fn topology_refresh_interval(&self) -> Duration {
        self.topology_refresh_interval
    }

    pub fn speed_test_interval(&self) -> Duration {
        self.speed_test_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_from_applies_server_configuration() {
        let mut conventions = DocumentConventions::default();
        let configuration = ClientConfiguration {
            read_balance_behavior: Some(ReadBalanceBehavior::RoundRobin),
            max_number_of_requests_per_session: Some(100),
            ..Default::default()
        };

        conventions.update_from(&configuration);

        assert_eq!(
            conventions.read_balance_behavior(),
            ReadBalanceBehavior::RoundRobin
        );
        assert_eq!(conventions.max_number_of_requests_per_session(), 100);
    }

    #[test]
    fn disabled_configuration_restores_client_settings() {
        // Arrange
        let mut conventions =
            DocumentConventions::default().set_read_balance_behavior(ReadBalanceBehavior::FastestNode);
        conventions.update_from(&ClientConfiguration {
            read_balance_behavior: Some(ReadBalanceBehavior::RoundRobin),
            ..Default::default()
        });

        // Act
        conventions.update_from(&ClientConfiguration {
            disabled: true,
            ..Default::default()
        });

        // Assert
        assert_eq!(
            conventions.read_balance_behavior(),
            ReadBalanceBehavior::FastestNode
        );
    }
}
