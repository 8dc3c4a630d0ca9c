//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// SQLSTATE for unique_violation.
const UNIQUE_VIOLATION: &str = "23505";
/// SQLSTATE for foreign_key_violation.
const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("duplicate {kind}: {name}")]
    Duplicate { kind: &'static str, name: String },
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("no data was passed on update")]
    NoUpdateData,
    #[error("invalid date format: {0}")]
    InvalidDateFormat(String),
    #[error("unknown filter operator `{0}`")]
    UnknownOperator(String),
    #[error("incorrect path `{path}`: {entity} has no such relationship")]
    NoSuchRelationship { path: String, entity: String },
    #[error("incorrect field `{field}` for {entity}")]
    UnknownField { field: String, entity: String },
    #[error("{resource}: state transition from `{from}` to `{to}` not permitted")]
    TransitionNotPermitted {
        resource: String,
        from: String,
        to: String,
    },
    #[error("{resource}: {message}")]
    Rule { resource: String, message: String },
    #[error("relationship `{relation}` is not in the load plan")]
    NotLoaded { relation: String },
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
}

impl AppError {
    /// Business-rule rejection raised from a hook.
    pub fn rule(resource: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Rule {
            resource: resource.into(),
            message: message.into(),
        }
    }

    fn sqlstate(&self) -> Option<String> {
        match self {
            AppError::Db(sqlx::Error::Database(e)) => e.code().map(|c| c.into_owned()),
            _ => None,
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        self.sqlstate().as_deref() == Some(UNIQUE_VIOLATION)
    }

    pub fn is_foreign_key_violation(&self) -> bool {
        self.sqlstate().as_deref() == Some(FOREIGN_KEY_VIOLATION)
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::NoUpdateData => (StatusCode::BAD_REQUEST, "no_update_data"),
            AppError::InvalidDateFormat(_) => (StatusCode::BAD_REQUEST, "invalid_date_format"),
            AppError::UnknownOperator(_)
            | AppError::NoSuchRelationship { .. }
            | AppError::UnknownField { .. } => (StatusCode::BAD_REQUEST, "invalid_filter"),
            AppError::TransitionNotPermitted { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "transition_not_permitted")
            }
            AppError::Rule { .. } => (StatusCode::BAD_REQUEST, "rule_violation"),
            AppError::NotLoaded { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "not_loaded"),
            AppError::Db(sqlx::Error::RowNotFound) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Db(_) if self.is_unique_violation() => (StatusCode::CONFLICT, "conflict"),
            AppError::Db(_) if self.is_foreign_key_violation() => {
                (StatusCode::CONFLICT, "foreign_key_violation")
            }
            AppError::Db(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::Rule { resource, .. } | AppError::TransitionNotPermitted { resource, .. } => {
                Some(serde_json::json!({ "resource": resource }))
            }
            _ => None,
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
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
                details: self.details(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_errors_map_to_bad_request() {
        assert_eq!(AppError::NoUpdateData.status_and_code().0, StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::UnknownOperator("nope".into()).status_and_code(),
            (StatusCode::BAD_REQUEST, "invalid_filter")
        );
        assert_eq!(
            AppError::InvalidDateFormat("x".into()).status_and_code().1,
            "invalid_date_format"
        );
    }

    #[test]
    fn rule_carries_resource_in_details() {
        let err = AppError::rule("partners", "Partner with such details already exists");
        assert_eq!(err.to_string(), "partners: Partner with such details already exists");
        assert_eq!(err.details(), Some(serde_json::json!({ "resource": "partners" })));
    }

    #[test]
    fn row_not_found_is_not_found() {
        let err = AppError::Db(sqlx::Error::RowNotFound);
        assert_eq!(err.status_and_code().0, StatusCode::NOT_FOUND);
        assert!(!err.is_unique_violation());
    }
}
