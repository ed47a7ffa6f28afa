use std::fmt;

use crate::error_chain_fmt;

/// Errors the server reported about a request.
#[derive(thiserror::Error)]
pub enum RavenDbError {
    #[error("Invalid authorization, ensure valid certificate supplied. {0}")]
    BadAuthorization(String),
    #[error("Database `{0}` does not exist")]
    DatabaseDoesNotExist(String),
    #[error("Document conflict: {message}")]
    DocumentConflict {
        message: String,
        document_id: Option<String>,
    },
    #[error("Concurrency violation: {message}")]
    Concurrency { message: String },
    #[error("{kind}: {message}")]
    Server {
        kind: ServerErrorKind,
        message: String,
        /// Full server-side error, usually including the server stack trace.
        details: String,
    },
    #[error("Unable to parse server response with status code {status}. Response: {body}")]
    UnparsableResponse {
        status: u16,
        body: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}
impl std::fmt::Debug for RavenDbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// Local counterpart of the exception types the server reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerErrorKind {
    BadRequest,
    BadResponse,
    DatabaseDisabled,
    DatabaseLoadFailure,
    DatabaseNotRelevant,
    DocumentDoesNotExist,
    IndexCompilation,
    IndexDoesNotExist,
    InvalidQuery,
    NodeIsPassive,
    NotSupported,
    SubscriptionDoesNotExist,
    Timeout,
    /// Any exception type this client has no mapping for, by its short name.
    Unknown(String),
}

impl ServerErrorKind {
    /// Maps the short type name (the segment after the last `.`) to a kind.
    pub fn from_type_name(name: &str) -> Self {
        match name {
            "BadRequestException" => Self::BadRequest,
            "BadResponseException" => Self::BadResponse,
            "DatabaseDisabledException" => Self::DatabaseDisabled,
            "DatabaseLoadFailureException" => Self::DatabaseLoadFailure,
            "DatabaseNotRelevantException" => Self::DatabaseNotRelevant,
            "DocumentDoesNotExistException" => Self::DocumentDoesNotExist,
            "IndexCompilationException" => Self::IndexCompilation,
            "IndexDoesNotExistException" => Self::IndexDoesNotExist,
            "InvalidQueryException" => Self::InvalidQuery,
            "NodeIsPassiveException" => Self::NodeIsPassive,
            "NotSupportedException" => Self::NotSupported,
            "SubscriptionDoesNotExistException" => Self::SubscriptionDoesNotExist,
            "TimeoutException" => Self::Timeout,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for ServerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(name) if name.is_empty() => write!(f, "RavenException"),
            Self::Unknown(name) => write!(f, "{}", name),
            other => write!(f, "{:?}Exception", other),
        }
    }
}
