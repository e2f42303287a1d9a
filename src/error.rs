//! Typed errors and HTTP mapping.

use crate::config::ValueKind;
use crate::store::StorageError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Fatal schema configuration problems, raised once at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("entity name '{name}' registered twice (namespaces '{first}' and '{second}')")]
    DuplicateEntity {
        name: String,
        first: String,
        second: String,
    },
    #[error("entity '{entity}' declares attribute '{attribute}' more than once")]
    DuplicateAttribute { entity: String, attribute: String },
    #[error("entity '{entity}' has an invalid identity attribute: {reason}")]
    InvalidIdentity { entity: String, reason: String },
    #[error("blob attribute '{entity}.{attribute}' needs a text attribute named '{sidecar}'")]
    MissingSidecar {
        entity: String,
        attribute: String,
        sidecar: String,
    },
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("unknown entity set: {0}")]
    UnknownEntity(String),
    #[error("entity {entity} has no property {path}")]
    UnresolvableAttribute { entity: String, path: String },
    #[error("malformed filter: {message} near '{fragment}'")]
    MalformedFilter { message: String, fragment: String },
    #[error("malformed order: {message} near '{fragment}'")]
    MalformedOrder { message: String, fragment: String },
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("type mismatch: '{value}' is not a valid {expected} value for {attribute}")]
    TypeMismatch {
        attribute: String,
        expected: ValueKind,
        value: String,
    },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("storage failure: {0}")]
    Storage(StorageError),
}

impl AppError {
    pub(crate) fn malformed_filter(message: impl Into<String>, fragment: impl Into<String>) -> Self {
        AppError::MalformedFilter {
            message: message.into(),
            fragment: fragment.into(),
        }
    }

    pub(crate) fn malformed_order(message: impl Into<String>, fragment: impl Into<String>) -> Self {
        AppError::MalformedOrder {
            message: message.into(),
            fragment: fragment.into(),
        }
    }

    pub(crate) fn type_mismatch(attribute: &str, expected: ValueKind, value: &str) -> Self {
        AppError::TypeMismatch {
            attribute: attribute.to_string(),
            expected,
            value: value.to_string(),
        }
    }

    /// Stable machine-readable code used in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::UnknownEntity(_) => "unknown_entity",
            AppError::UnresolvableAttribute { .. } => "unresolvable_attribute",
            AppError::MalformedFilter { .. } => "malformed_filter",
            AppError::MalformedOrder { .. } => "malformed_order",
            AppError::MalformedRequest(_) => "malformed_request",
            AppError::TypeMismatch { .. } => "type_mismatch",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Unsupported(_) => "unsupported",
            AppError::Storage(_) => "storage_failure",
        }
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::MissingRecord { entity, id } => {
                AppError::NotFound(format!("no {} with Id {}", entity, id))
            }
            other => AppError::Storage(other),
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Config(_) | AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::UnknownEntity(_) | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unsupported(_) => StatusCode::FORBIDDEN,
            AppError::UnresolvableAttribute { .. }
            | AppError::MalformedFilter { .. }
            | AppError::MalformedOrder { .. }
            | AppError::MalformedRequest(_)
            | AppError::TypeMismatch { .. }
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }
        let details = match &self {
            AppError::MalformedFilter { fragment, .. } | AppError::MalformedOrder { fragment, .. } => {
                Some(serde_json::json!({ "fragment": fragment }))
            }
            AppError::UnresolvableAttribute { entity, path } => {
                Some(serde_json::json!({ "entity": entity, "property": path }))
            }
            _ => None,
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
                details,
            },
        };
        (status, Json(body)).into_response()
    }
}
