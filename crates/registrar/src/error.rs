use crate::access::AccessDenied;
use crate::catalog::CatalogImportError;
use crate::config::ConfigError;
use crate::domain::{EnrollmentId, EnrollmentStatus};
use crate::storage::RepositoryError;
use crate::telemetry::TelemetryError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

/// Failure returned by catalog, enrollment, and account operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistrarError {
    #[error("unauthorized: {0}")]
    Unauthorized(#[from] AccessDenied),
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("invalid reference: {entity} {id} does not exist")]
    InvalidReference { entity: &'static str, id: i64 },
    #[error("invalid reference: {0}")]
    DanglingReference(String),
    #[error("subject {subject_id} cannot require {prerequisite_id}: prerequisite chain would loop")]
    PrerequisiteCycle {
        subject_id: i64,
        prerequisite_id: i64,
    },
    #[error("enrollment {id} is already {from}; cannot move to {to}")]
    InvalidStateTransition {
        id: EnrollmentId,
        from: EnrollmentStatus,
        to: EnrollmentStatus,
    },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RegistrarError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistrarError::Unauthorized(
                AccessDenied::MissingIdentity | AccessDenied::InvalidCredentials,
            ) => StatusCode::UNAUTHORIZED,
            RegistrarError::Unauthorized(_) => StatusCode::FORBIDDEN,
            RegistrarError::DuplicateKey(_) | RegistrarError::InvalidStateTransition { .. } => {
                StatusCode::CONFLICT
            }
            RegistrarError::NotFound { .. } => StatusCode::NOT_FOUND,
            RegistrarError::InvalidReference { .. }
            | RegistrarError::DanglingReference(_)
            | RegistrarError::PrerequisiteCycle { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            RegistrarError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RegistrarError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RegistrarError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<RepositoryError> for RegistrarError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::DuplicateKey(detail) => Self::DuplicateKey(detail),
            RepositoryError::NotFound { entity, id } => Self::NotFound { entity, id },
            RepositoryError::InvalidReference { entity, id } => {
                Self::InvalidReference { entity, id }
            }
            RepositoryError::PrerequisiteCycle {
                subject_id,
                prerequisite_id,
            } => Self::PrerequisiteCycle {
                subject_id,
                prerequisite_id,
            },
            RepositoryError::StatusConflict {
                id,
                actual,
                requested,
            } => Self::InvalidStateTransition {
                id,
                from: actual,
                to: requested,
            },
            RepositoryError::DanglingReference(detail) => Self::DanglingReference(detail),
            RepositoryError::ConstraintViolation(detail) => Self::Internal(detail),
            RepositoryError::Unavailable(detail) => Self::StorageUnavailable(detail),
        }
    }
}

impl IntoResponse for RegistrarError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Server(axum::Error),
    Storage(RepositoryError),
    Import(CatalogImportError),
    Registrar(RegistrarError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Server(err) => write!(f, "server error: {}", err),
            AppError::Storage(err) => write!(f, "storage error: {}", err),
            AppError::Import(err) => write!(f, "catalog import error: {}", err),
            AppError::Registrar(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Server(err) => Some(err),
            AppError::Storage(err) => Some(err),
            AppError::Import(err) => Some(err),
            AppError::Registrar(err) => Some(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Registrar(err) => err.status_code(),
            AppError::Import(_) => StatusCode::BAD_REQUEST,
            AppError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<axum::Error> for AppError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}

impl From<RepositoryError> for AppError {
    fn from(value: RepositoryError) -> Self {
        Self::Storage(value)
    }
}

impl From<CatalogImportError> for AppError {
    fn from(value: CatalogImportError) -> Self {
        Self::Import(value)
    }
}

impl From<RegistrarError> for AppError {
    fn from(value: RegistrarError) -> Self {
        Self::Registrar(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Role;

    #[test]
    fn anonymous_callers_get_401_and_wrong_roles_403() {
        let anonymous = RegistrarError::from(AccessDenied::MissingIdentity);
        assert_eq!(anonymous.status_code(), StatusCode::UNAUTHORIZED);

        let mismatch = RegistrarError::from(AccessDenied::RoleMismatch {
            required: Role::Admin,
            actual: Role::Student,
        });
        assert_eq!(mismatch.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn only_unique_violations_are_conflicts() {
        let duplicate = RegistrarError::from(RepositoryError::DuplicateKey("code".into()));
        assert_eq!(duplicate.status_code(), StatusCode::CONFLICT);

        let dangling = RegistrarError::from(RepositoryError::DanglingReference("fk".into()));
        assert_eq!(dangling.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let check = RegistrarError::from(RepositoryError::ConstraintViolation("check".into()));
        assert_eq!(check.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn stale_status_maps_to_invalid_transition() {
        let err = RegistrarError::from(RepositoryError::StatusConflict {
            id: EnrollmentId(4),
            actual: EnrollmentStatus::Approved,
            requested: EnrollmentStatus::Rejected,
        });
        assert!(matches!(
            err,
            RegistrarError::InvalidStateTransition {
                from: EnrollmentStatus::Approved,
                to: EnrollmentStatus::Rejected,
                ..
            }
        ));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }
}
