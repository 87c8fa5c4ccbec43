//! Error handling for the POS back-office
//!
//! Every failure a handler can produce maps to one JSON error body:
//! `{"error": {"code", "message", "field"?, "details"?}}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Authentication errors
    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Permission denied: requires {required}")]
    InsufficientPermissions { required: String },

    // Validation errors
    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    #[error("Validation failed on {} field(s)", .0.len())]
    ValidationErrors(Vec<FieldError>),

    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    #[error("Referenced record missing: {0}")]
    ForeignKeyViolation(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Conflict: {message}")]
    Conflict { resource: String, message: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Business rule errors
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Insufficient quantity: {0}")]
    InsufficientQuantity(String),

    // Upload errors
    #[error("Storage error: {0}")]
    StorageError(String),

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(sqlx::Error),

    // Internal errors
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

/// One failed form field
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

impl ErrorDetail {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            field: None,
            details: None,
        }
    }

    fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

/// SQLSTATE classes the API reports with a specific message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorKind {
    UniqueViolation,
    ForeignKeyViolation,
    InvalidValue,
    Other,
}

/// Classify a PostgreSQL SQLSTATE code
pub fn classify_sqlstate(code: &str) -> DbErrorKind {
    match code {
        "23505" => DbErrorKind::UniqueViolation,
        "23503" => DbErrorKind::ForeignKeyViolation,
        // invalid_text_representation, numeric_value_out_of_range,
        // invalid_datetime_format, check_violation
        "22P02" | "22003" | "22007" | "23514" => DbErrorKind::InvalidValue,
        _ => DbErrorKind::Other,
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            let constraint = db_err.constraint().unwrap_or("record").to_string();
            let kind = db_err
                .code()
                .map(|code| classify_sqlstate(&code))
                .unwrap_or(DbErrorKind::Other);
            match kind {
                DbErrorKind::UniqueViolation => return AppError::DuplicateEntry(constraint),
                DbErrorKind::ForeignKeyViolation => {
                    return AppError::ForeignKeyViolation(constraint)
                }
                DbErrorKind::InvalidValue => {
                    return AppError::InvalidValue(db_err.message().to_string())
                }
                DbErrorKind::Other => {}
            }
        }
        AppError::DatabaseError(err)
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<FieldError> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| {
                    let message = e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("{} is invalid ({})", field, e.code));
                    FieldError::new(field, message)
                })
            })
            .collect();
        fields.sort_by(|a, b| a.field.cmp(&b.field));
        AppError::ValidationErrors(fields)
    }
}

impl AppError {
    /// Single-field validation failure
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    fn status_and_detail(&self) -> (StatusCode, ErrorDetail) {
        match self {
            AppError::TokenExpired => (
                StatusCode::UNAUTHORIZED,
                ErrorDetail::new("TOKEN_EXPIRED", "Token has expired"),
            ),
            AppError::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                ErrorDetail::new("INVALID_TOKEN", "Invalid token"),
            ),
            AppError::Unauthorized(message) => (
                StatusCode::UNAUTHORIZED,
                ErrorDetail::new("UNAUTHORIZED", message.clone()),
            ),
            AppError::InsufficientPermissions { required } => (
                StatusCode::FORBIDDEN,
                ErrorDetail::new(
                    "PERMISSION_DENIED",
                    format!("You do not have permission to perform this action ({})", required),
                ),
            ),
            AppError::Validation { field, message } => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("VALIDATION_ERROR", message.clone()).with_field(field.clone()),
            ),
            AppError::ValidationErrors(errors) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail {
                    code: "VALIDATION_ERROR".to_string(),
                    message: "One or more fields are invalid".to_string(),
                    field: None,
                    details: Some(errors.clone()),
                },
            ),
            AppError::DuplicateEntry(constraint) => (
                StatusCode::CONFLICT,
                ErrorDetail::new("DUPLICATE_ENTRY", "A record with these values already exists")
                    .with_field(constraint.clone()),
            ),
            AppError::ForeignKeyViolation(constraint) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorDetail::new("REFERENCE_NOT_FOUND", "A referenced record does not exist")
                    .with_field(constraint.clone()),
            ),
            AppError::InvalidValue(_) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("INVALID_VALUE", "A submitted value has the wrong type or is out of range"),
            ),
            AppError::Conflict { resource, message } => (
                StatusCode::CONFLICT,
                ErrorDetail::new("CONFLICT", message.clone()).with_field(resource.clone()),
            ),
            AppError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                ErrorDetail::new("NOT_FOUND", format!("{} not found", resource)),
            ),
            AppError::InvalidStateTransition(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorDetail::new("INVALID_STATE_TRANSITION", msg.clone()),
            ),
            AppError::InsufficientQuantity(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorDetail::new("INSUFFICIENT_QUANTITY", msg.clone()),
            ),
            AppError::StorageError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("STORAGE_ERROR", "The uploaded file could not be stored"),
            ),
            AppError::DatabaseError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("DATABASE_ERROR", "A database error occurred"),
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("INTERNAL_ERROR", msg.clone()),
            ),
            AppError::InternalError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("INTERNAL_ERROR", "An internal server error occurred"),
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_detail) = self.status_and_detail();

        if status.is_server_error() {
            tracing::error!("Error: {:?}", self);
        } else {
            tracing::warn!("Request rejected: {}", self);
        }

        (status, Json(ErrorResponse { error: error_detail })).into_response()
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;

/// Collects field failures for a form and turns them into one error
#[derive(Debug, Default)]
pub struct ValidationCollector {
    errors: Vec<FieldError>,
}

impl ValidationCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of a shared validation check
    pub fn check(&mut self, field: &str, result: Result<(), &'static str>) {
        if let Err(message) = result {
            self.errors.push(FieldError::new(field, message));
        }
    }

    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    /// Merge rule failures reported by `validator`
    pub fn absorb(&mut self, result: Result<(), validator::ValidationErrors>) {
        if let Err(errors) = result {
            if let AppError::ValidationErrors(fields) = AppError::from(errors) {
                self.errors.extend(fields);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn finish(self) -> AppResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::ValidationErrors(self.errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_sqlstate() {
        assert_eq!(classify_sqlstate("23505"), DbErrorKind::UniqueViolation);
        assert_eq!(classify_sqlstate("23503"), DbErrorKind::ForeignKeyViolation);
        assert_eq!(classify_sqlstate("22P02"), DbErrorKind::InvalidValue);
        assert_eq!(classify_sqlstate("23514"), DbErrorKind::InvalidValue);
        assert_eq!(classify_sqlstate("40001"), DbErrorKind::Other);
    }

    #[test]
    fn test_collector_gathers_every_failure() {
        let mut collector = ValidationCollector::new();
        collector.check("quantity", Err("Quantity must be greater than 0"));
        collector.check("unit_cost", Ok(()));
        collector.push("expiry_date", "Expiry date must be in the future");

        match collector.finish() {
            Err(AppError::ValidationErrors(errors)) => {
                assert_eq!(errors.len(), 2);
                assert_eq!(errors[0].field, "quantity");
                assert_eq!(errors[1].field, "expiry_date");
            }
            other => panic!("expected validation errors, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_collector_passes() {
        assert!(ValidationCollector::new().finish().is_ok());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::NotFound("Batch".into()).status_and_detail().0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::InsufficientPermissions {
                required: "manage_expiry_tracker".into()
            }
            .status_and_detail()
            .0,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::DuplicateEntry("uq_sale".into()).status_and_detail().0,
            StatusCode::CONFLICT
        );
    }
}
