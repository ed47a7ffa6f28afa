use serde::Deserialize;

use crate::document_conventions::ReadBalanceBehavior;

/// Client settings an administrator can push from the server.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", default)]
pub struct ClientConfiguration {
    pub etag: i64,
    pub disabled: bool,
    pub max_number_of_requests_per_session: Option<u32>,
    pub read_balance_behavior: Option<ReadBalanceBehavior>,
}

/// Response of `GET /databases/{database}/configuration/client`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ClientConfigurationResponse {
    pub etag: i64,
    pub configuration: Option<ClientConfiguration>,
}
