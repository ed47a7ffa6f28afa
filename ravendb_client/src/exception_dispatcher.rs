//! Translates error responses into [`RavenDbError`]s.
use reqwest::StatusCode;
use serde::Deserialize;

use crate::ravendb_error::{RavenDbError, ServerErrorKind};

/// Shape of the body the server sends along with error status codes.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ExceptionSchema {
    pub url: Option<String>,
    pub r#type: String,
    pub message: String,
    pub error: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ConflictSchema {
    #[serde(rename = "DocId")]
    doc_id: Option<String>,
}

/// Returns the short exception name: `Raven.Client.Exceptions.ConcurrencyException` becomes
/// `ConcurrencyException`.
pub fn short_type_name(type_name: &str) -> &str {
    type_name.rsplit('.').next().unwrap_or(type_name)
}

/// Builds the error for a `>= 400` response. Never fails: bodies that can't be read as an
/// [`ExceptionSchema`] become [`RavenDbError::UnparsableResponse`] carrying the raw body.
pub fn throw_error(status: StatusCode, body: &str) -> RavenDbError {
    if body.trim().is_empty() {
        return RavenDbError::Server {
            kind: ServerErrorKind::Unknown(String::default()),
            message: format!("Unexpected response status code: {}", status.as_u16()),
            details: String::default(),
        };
    }

    let schema = match serde_json::from_str::<ExceptionSchema>(body) {
        Ok(schema) => schema,
        Err(source) => {
            return RavenDbError::UnparsableResponse {
                status: status.as_u16(),
                body: body.to_string(),
                source,
            }
        }
    };

    if status == StatusCode::CONFLICT {
        return throw_conflict(schema, body);
    }

    match short_type_name(&schema.r#type) {
        "DatabaseDoesNotExistException" => RavenDbError::DatabaseDoesNotExist(schema.message),
        "AuthorizationException" => RavenDbError::BadAuthorization(schema.message),
        "ConcurrencyException" => RavenDbError::Concurrency {
            message: schema.message,
        },
        "DocumentConflictException" => throw_conflict(schema, body),
        name => RavenDbError::Server {
            kind: ServerErrorKind::from_type_name(name),
            message: schema.message,
            details: schema.error,
        },
    }
}

fn throw_conflict(schema: ExceptionSchema, body: &str) -> RavenDbError {
    if schema.r#type.contains("DocumentConflictException") {
        let document_id = serde_json::from_str::<ConflictSchema>(body)
            .ok()
            .and_then(|c| c.doc_id);
        return RavenDbError::DocumentConflict {
            message: schema.message,
            document_id,
        };
    }

    RavenDbError::Concurrency {
        message: schema.message,
    }
}
