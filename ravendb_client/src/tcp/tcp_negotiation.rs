use serde::de::DeserializeOwned;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufStream},
    net::TcpStream,
};
use tracing::instrument;

use crate::{error_chain_fmt, raven_command::TcpConnectionInfo};

use super::{
    operation_version_supported, OperationType, SupportedFeatures, SupportedStatus,
    TcpConnectionHeaderMessage, TcpConnectionHeaderResponse, TcpConnectionStatus, DROP_STATUS,
    OUT_OF_RANGE_STATUS,
};

#[derive(thiserror::Error)]
pub enum TcpNegotiationError {
    #[error("The {operation:?} version {version} is out of range, our lowest version is {lowest}")]
    OutOfRange {
        operation: OperationType,
        version: i32,
        lowest: i32,
    },
    #[error("Negotiation of the {0:?} protocol did not converge")]
    DidNotConverge(OperationType),
    #[error("Connection to `{url}` failed authorization: {message}")]
    AuthorizationFailed { url: String, message: String },
    #[error("Protocol version mismatch with `{url}`: {message}")]
    VersionMismatch { url: String, message: String },
    #[error("`{url}` rejected the connection because of the network topology: {message}")]
    InvalidNetworkTopology { url: String, message: String },
    #[error("The connection was closed during negotiation")]
    ConnectionClosed,
    #[error("Invalid tcp url `{0}`")]
    InvalidUrl(String),
    #[error("Unable to read the negotiation response")]
    MalformedResponse(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}
impl std::fmt::Debug for TcpNegotiationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// Describes the connection being negotiated.
#[derive(Debug, Clone)]
pub struct TcpNegotiateParameters {
    pub operation: OperationType,
    /// First version proposed, usually [`OperationType::current_version`].
    pub version: i32,
    pub database: Option<String>,
    pub source_node_tag: Option<String>,
    /// Used in error messages.
    pub destination_url: String,
}

impl TcpNegotiateParameters {
    pub fn new(operation: OperationType, destination_url: &str) -> Self {
        Self {
            operation,
            version: operation.current_version(),
            database: None,
            source_node_tag: None,
            destination_url: destination_url.to_string(),
        }
    }

    pub fn with_database(mut self, database: &str) -> Self {
        self.database = Some(database.to_string());
        self
    }
}

/// Agrees on a protocol version with the server on the other end of `stream`.
///
/// The client proposes a version, and the server either accepts it or answers with the version
/// it would rather use. A lower version this client also speaks is proposed next. A version below
/// everything this client speaks ends the negotiation with an out of range message. Each
/// supported version is proposed at most once, so a misbehaving server cannot keep the loop
/// going.
#[instrument(level = "debug", skip(stream), fields(operation = ?parameters.operation))]
pub async fn negotiate_protocol_version<S>(
    stream: &mut S,
    parameters: &TcpNegotiateParameters,
) -> Result<SupportedFeatures, TcpNegotiationError>
where
    S: AsyncBufRead + AsyncWrite + Unpin,
{
    let operation = parameters.operation;
    let mut current = parameters.version;

    for _ in 0..=operation.supported_versions().len() {
        send_tcp_version_info(stream, parameters, current).await?;
        let version = read_response_version(stream, &parameters.destination_url).await?;
        tracing::debug!("Proposed version {}, server answered {}", current, version);

        if version == current {
            return Ok(SupportedFeatures::for_version(operation, current));
        }

        if version == DROP_STATUS {
            return Ok(SupportedFeatures::for_version(
                OperationType::Drop,
                DROP_STATUS,
            ));
        }

        match operation_version_supported(operation, version) {
            SupportedStatus::Supported(next) | SupportedStatus::NotSupported(next) => {
                current = next;
            }
            SupportedStatus::OutOfRange => {
                send_tcp_version_info(stream, parameters, OUT_OF_RANGE_STATUS).await?;
                let lowest = operation
                    .supported_versions()
                    .last()
                    .copied()
                    .unwrap_or(OUT_OF_RANGE_STATUS);
                return Err(TcpNegotiationError::OutOfRange {
                    operation,
                    version,
                    lowest,
                });
            }
        }
    }

    Err(TcpNegotiationError::DidNotConverge(operation))
}

async fn send_tcp_version_info<S>(
    stream: &mut S,
    parameters: &TcpNegotiateParameters,
    version: i32,
) -> Result<(), TcpNegotiationError>
where
    S: AsyncWrite + Unpin,
{
    let header = TcpConnectionHeaderMessage {
        database_name: parameters.database.clone(),
        source_node_tag: parameters.source_node_tag.clone(),
        operation: parameters.operation,
        operation_version: version,
        info: None,
    };
    tracing::trace!("Sending tcp header {:?}", header);
    stream.write_all(&serde_json::to_vec(&header)?).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_response_version<S>(stream: &mut S, url: &str) -> Result<i32, TcpNegotiationError>
where
    S: AsyncBufRead + Unpin,
{
    let response = read_json::<_, TcpConnectionHeaderResponse>(stream).await?;
    let message = || response.message.clone().unwrap_or_default();

    match response.status {
        TcpConnectionStatus::Ok => Ok(response.version),
        TcpConnectionStatus::AuthorizationFailed => Err(TcpNegotiationError::AuthorizationFailed {
            url: url.to_string(),
            message: message(),
        }),
        TcpConnectionStatus::TcpVersionMismatch if response.version != OUT_OF_RANGE_STATUS => {
            Ok(response.version)
        }
        TcpConnectionStatus::TcpVersionMismatch => Err(TcpNegotiationError::VersionMismatch {
            url: url.to_string(),
            message: message(),
        }),
        TcpConnectionStatus::InvalidNetworkTopology => {
            Err(TcpNegotiationError::InvalidNetworkTopology {
                url: url.to_string(),
                message: message(),
            })
        }
    }
}

/// Reads exactly one json value from `stream`. Bytes after the value are left in the stream.
async fn read_json<S, T>(stream: &mut S) -> Result<T, TcpNegotiationError>
where
    S: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut pending = Vec::new();
    loop {
        let available = stream.fill_buf().await?;
        if available.is_empty() {
            return Err(TcpNegotiationError::ConnectionClosed);
        }
        let previous = pending.len();
        let read = available.len();
        pending.extend_from_slice(available);

        let parsed = {
            let mut values = serde_json::Deserializer::from_slice(&pending).into_iter::<T>();
            match values.next() {
                Some(Ok(value)) => Some(Ok((value, values.byte_offset()))),
                Some(Err(e)) if e.is_eof() => None,
                Some(Err(e)) => Some(Err(e)),
                None => None,
            }
        };

        match parsed {
            Some(Ok((value, offset))) => {
                stream.consume(offset.saturating_sub(previous));
                return Ok(value);
            }
            Some(Err(e)) => return Err(e.into()),
            None => stream.consume(read),
        }
    }
}

/// Opens a plain tcp connection to the `tcp://host:port` url a node advertises.
#[instrument(level = "debug", fields(url = %info.url))]
pub async fn connect_tcp(
    info: &TcpConnectionInfo,
) -> Result<BufStream<TcpStream>, TcpNegotiationError> {
    let host = info
        .url
        .host_str()
        .ok_or_else(|| TcpNegotiationError::InvalidUrl(info.url.to_string()))?;
    let port = info
        .url
        .port()
        .ok_or_else(|| TcpNegotiationError::InvalidUrl(info.url.to_string()))?;

    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;
    Ok(BufStream::new(stream))
}
