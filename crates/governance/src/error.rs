//! Error types for the governance core

use governance_trait::CollaboratorError;
use serde_json::{json, Value};
use thiserror::Error;

use crate::rate_limit::RateLimitRejection;

/// Error type for governance operations
#[derive(Error, Debug)]
pub enum GovernanceError {
    /// No actor identity on the request
    #[error("Unauthorized: missing actor identity")]
    Unauthorized,

    /// Identity present but lacking the required role
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Malformed request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Item count outside the accepted range
    #[error("Batch must contain between 1 and {max} items, got {count}")]
    InvalidBatchSize { count: usize, max: usize },

    /// Unknown batch operation name
    #[error("Unsupported batch operation: {0}")]
    InvalidBatchOperation(String),

    /// A single item failed validation
    #[error("Invalid batch item {index}: {message}")]
    InvalidBatchItem { index: usize, message: String },

    /// A referenced VM does not exist
    #[error("VM not found: {vm_id}")]
    VmNotFound { index: usize, vm_id: String },

    /// A target namespace is outside the caller's environments
    #[error("Namespace {namespace} is not permitted for the caller's environments")]
    NamespaceEnvForbidden { index: usize, namespace: String },

    /// Unknown batch, or a batch the caller may not see
    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    /// A submission limit was hit
    #[error("Batch rate limited: {0}")]
    RateLimited(Box<RateLimitRejection>),

    /// Database connection or operation error
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Collaborator failure that was not handled per item
    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    /// Generic error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Result type alias for governance operations
pub type Result<T> = std::result::Result<T, GovernanceError>;

/// Store-backed collaborators report governance failures as collaborator errors
impl From<GovernanceError> for CollaboratorError {
    fn from(err: GovernanceError) -> Self {
        match err {
            GovernanceError::Collaborator(inner) => inner,
            other => CollaboratorError::Other(anyhow::Error::new(other)),
        }
    }
}

impl GovernanceError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(anyhow::anyhow!(message.into()))
    }

    pub fn rate_limited(rejection: RateLimitRejection) -> Self {
        Self::RateLimited(Box::new(rejection))
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::InvalidBatchSize { .. } => "INVALID_BATCH_SIZE",
            Self::InvalidBatchOperation(_) => "INVALID_BATCH_OPERATION",
            Self::InvalidBatchItem { .. } => "INVALID_BATCH_ITEM",
            Self::VmNotFound { .. } => "VM_NOT_FOUND",
            Self::NamespaceEnvForbidden { .. } => "NAMESPACE_ENV_FORBIDDEN",
            Self::BatchNotFound(_) => "BATCH_NOT_FOUND",
            Self::RateLimited(_) => "BATCH_RATE_LIMITED",
            Self::Database(_)
            | Self::Serialization(_)
            | Self::Collaborator(_)
            | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status the error maps to
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::Forbidden(_) | Self::NamespaceEnvForbidden { .. } => 403,
            Self::InvalidRequest(_)
            | Self::InvalidBatchSize { .. }
            | Self::InvalidBatchOperation(_)
            | Self::InvalidBatchItem { .. }
            | Self::VmNotFound { .. } => 400,
            Self::BatchNotFound(_) => 404,
            Self::RateLimited(_) => 429,
            Self::Database(_)
            | Self::Serialization(_)
            | Self::Collaborator(_)
            | Self::Internal(_) => 500,
        }
    }

    pub fn is_internal(&self) -> bool {
        self.http_status() == 500
    }

    /// Seconds a client should wait before retrying, when meaningful
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::RateLimited(rejection) => Some(rejection.retry_after_seconds),
            _ => None,
        }
    }

    /// Message safe to return to callers; internal details stay in the logs
    pub fn public_message(&self) -> String {
        if self.is_internal() {
            "internal error".to_string()
        } else {
            self.to_string()
        }
    }

    /// Diagnostic parameters attached to the error body
    pub fn params(&self) -> Option<Value> {
        match self {
            Self::RateLimited(rejection) => Some(rejection.params()),
            Self::InvalidBatchItem { index, .. } => Some(json!({ "index": index })),
            Self::VmNotFound { index, vm_id } => Some(json!({ "index": index, "vm_id": vm_id })),
            Self::NamespaceEnvForbidden { index, namespace } => {
                Some(json!({ "index": index, "namespace": namespace }))
            }
            Self::InvalidBatchSize { count, max } => Some(json!({ "count": count, "max": max })),
            _ => None,
        }
    }
}
