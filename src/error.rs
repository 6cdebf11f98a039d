//! Unified error taxonomy for the node service.
//!
//! Every error that can cross the storage-adapter boundary is one of the
//! kinds below. The HTTP surface maps each kind to a status code and an
//! `instance` tag (see `http_status`/`instance_tag`); nothing else is
//! allowed to leak past the service layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("path error: {0}")]
    PathError(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("parent not found: {0}")]
    ParentNotFound(String),

    #[error("path already exists: {0}")]
    PathDuplicated(String),

    #[error("data type error: {0}")]
    DataTypeError(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("authentication failure: {0}")]
    AuthFailure(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("provisioning failed after {1} attempts: {0}")]
    NodeCreationError(String, u32),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Maps an error kind to the HTTP status code from spec §6/§7.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::PathError(_)
            | AppError::PathDuplicated(_)
            | AppError::DataTypeError(_)
            | AppError::InvalidInput(_) => 400,
            AppError::NodeNotFound(_) | AppError::ParentNotFound(_) => 404,
            AppError::AuthFailure(_) => 403,
            AppError::Cancelled => 499,
            AppError::NodeCreationError(..) | AppError::Internal(_) => 500,
        }
    }

    /// Stable kind tag recorded in the `instance` field of the error envelope.
    pub fn instance_tag(&self) -> &'static str {
        match self {
            AppError::PathError(_) => "PathError",
            AppError::NodeNotFound(_) => "NodeNotFound",
            AppError::ParentNotFound(_) => "ParentNotFound",
            AppError::PathDuplicated(_) => "PathDuplicated",
            AppError::DataTypeError(_) => "DataTypeError",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::AuthFailure(_) => "AuthFailure",
            AppError::Cancelled => "Cancelled",
            AppError::NodeCreationError(..) => "NodeCreationError",
            AppError::Internal(_) => "Internal",
        }
    }

    /// Short machine-readable label for the `error` field of the envelope.
    pub fn short(&self) -> &'static str {
        match self {
            AppError::PathError(_) => "path_error",
            AppError::NodeNotFound(_) => "not_found",
            AppError::ParentNotFound(_) => "parent_not_found",
            AppError::PathDuplicated(_) => "already_exists",
            AppError::DataTypeError(_) => "data_type_error",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::AuthFailure(_) => "auth_failure",
            AppError::Cancelled => "cancelled",
            AppError::NodeCreationError(..) => "node_creation_error",
            AppError::Internal(_) => "internal_error",
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
