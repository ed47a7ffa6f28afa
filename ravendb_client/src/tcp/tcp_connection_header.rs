use serde::{Deserialize, Serialize};

/// Sent in place of a version to tell the server none of its proposals can be used.
pub const OUT_OF_RANGE_STATUS: i32 = -1;
/// Version the server answers with when it drops the connection.
pub const DROP_STATUS: i32 = -2;

pub const NONE_BASE_LINE: i32 = -1;
pub const PING_BASE_LINE: i32 = -1;
pub const DROP_BASE_LINE: i32 = -2;
pub const HEARTBEATS_BASE_LINE: i32 = 20;
pub const HEARTBEATS_41200: i32 = 41_200;
pub const HEARTBEATS_42000: i32 = 42_000;
pub const SUBSCRIPTION_BASE_LINE: i32 = 40;
pub const SUBSCRIPTION_INCLUDES: i32 = 41_400;
pub const SUBSCRIPTION_COUNTER_INCLUDES: i32 = 50_000;
pub const SUBSCRIPTION_TIME_SERIES_INCLUDES: i32 = 51_000;
pub const TCP_CONNECTIONS_WITH_COMPRESSION: i32 = 53_000;
pub const TEST_CONNECTION_BASE_LINE: i32 = 50;

const NONE_VERSIONS: &[i32] = &[NONE_BASE_LINE];
const PING_VERSIONS: &[i32] = &[PING_BASE_LINE];
const DROP_VERSIONS: &[i32] = &[DROP_BASE_LINE];
const HEARTBEATS_VERSIONS: &[i32] = &[HEARTBEATS_42000, HEARTBEATS_41200, HEARTBEATS_BASE_LINE];
const SUBSCRIPTION_VERSIONS: &[i32] = &[
    TCP_CONNECTIONS_WITH_COMPRESSION,
    SUBSCRIPTION_TIME_SERIES_INCLUDES,
    SUBSCRIPTION_COUNTER_INCLUDES,
    SUBSCRIPTION_INCLUDES,
    SUBSCRIPTION_BASE_LINE,
];
const TEST_CONNECTION_VERSIONS: &[i32] = &[TEST_CONNECTION_BASE_LINE];

/// What a tcp connection is opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    None,
    Drop,
    Subscription,
    Heartbeats,
    Ping,
    TestConnection,
}

impl OperationType {
    /// Every protocol version this client speaks for the operation, newest first.
    pub fn supported_versions(&self) -> &'static [i32] {
        match self {
            OperationType::None => NONE_VERSIONS,
            OperationType::Drop => DROP_VERSIONS,
            OperationType::Subscription => SUBSCRIPTION_VERSIONS,
            OperationType::Heartbeats => HEARTBEATS_VERSIONS,
            OperationType::Ping => PING_VERSIONS,
            OperationType::TestConnection => TEST_CONNECTION_VERSIONS,
        }
    }

    /// The newest version, proposed first.
    pub fn current_version(&self) -> i32 {
        self.supported_versions()[0]
    }
}

/// Outcome of checking a version proposed by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportedStatus {
    /// The exact version is supported.
    Supported(i32),
    /// Not supported, but this lower version is and should be proposed next.
    NotSupported(i32),
    /// Lower than anything this client speaks.
    OutOfRange,
}

/// Checks `version` against the versions known for `operation`.
pub fn operation_version_supported(operation: OperationType, version: i32) -> SupportedStatus {
    for &supported in operation.supported_versions() {
        if supported == version {
            return SupportedStatus::Supported(supported);
        }
        if supported < version {
            return SupportedStatus::NotSupported(supported);
        }
    }
    SupportedStatus::OutOfRange
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionFeatures {
    pub includes: bool,
    pub counter_includes: bool,
    pub time_series_includes: bool,
    pub compression: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatsFeatures {
    pub send_changes_only: bool,
    pub include_server_info: bool,
}

/// What both sides can do once a version has been agreed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportedFeatures {
    pub operation: OperationType,
    pub protocol_version: i32,
    pub subscription: Option<SubscriptionFeatures>,
    pub heartbeats: Option<HeartbeatsFeatures>,
}

impl SupportedFeatures {
    pub fn for_version(operation: OperationType, protocol_version: i32) -> Self {
        let subscription = (operation == OperationType::Subscription).then(|| {
            SubscriptionFeatures {
                includes: protocol_version >= SUBSCRIPTION_INCLUDES,
                counter_includes: protocol_version >= SUBSCRIPTION_COUNTER_INCLUDES,
                time_series_includes: protocol_version >= SUBSCRIPTION_TIME_SERIES_INCLUDES,
                compression: protocol_version >= TCP_CONNECTIONS_WITH_COMPRESSION,
            }
        });
        let heartbeats = (operation == OperationType::Heartbeats).then(|| HeartbeatsFeatures {
            send_changes_only: protocol_version >= HEARTBEATS_41200,
            include_server_info: protocol_version >= HEARTBEATS_42000,
        });

        Self {
            operation,
            protocol_version,
            subscription,
            heartbeats,
        }
    }
}

/// First message on a fresh connection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TcpConnectionHeaderMessage {
    pub database_name: Option<String>,
    pub source_node_tag: Option<String>,
    pub operation: OperationType,
    pub operation_version: i32,
    pub info: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TcpConnectionStatus {
    Ok,
    AuthorizationFailed,
    TcpVersionMismatch,
    InvalidNetworkTopology,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TcpConnectionHeaderResponse {
    pub status: TcpConnectionStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub version: i32,
}
