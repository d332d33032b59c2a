//! Business outcomes are values: every operation returns `OrderError`
//! variants callers pattern-match, never exceptions used for control flow.

use thiserror::Error;

use certpilot_core::ServiceError;
use certpilot_kv::KvError;
use certpilot_pki::PkiError;
use certpilot_vendors::VendorError;

use crate::validator::ValidationReport;

#[derive(Error, Debug)]
pub enum OrderError {
    /// Field-level validation failure; nothing was submitted anywhere.
    #[error("Invalid parameters")]
    Validation(ValidationReport),

    /// Business rejection with a caller-facing message (bad state, CSR
    /// reuse, insufficient balance, vendor-sourced rejections).
    #[error("{message}")]
    Rejected {
        message: String,
        errors: Option<serde_json::Value>,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    /// Same action + same parameters submitted again inside the
    /// suppression window.
    #[error("Duplicate submission, retry in {retry_after}s")]
    Duplicate { retry_after: i64 },

    #[error(transparent)]
    Vendor(#[from] VendorError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrderError {
    pub fn rejected(message: impl Into<String>) -> Self {
        OrderError::Rejected {
            message: message.into(),
            errors: None,
        }
    }

    /// Failures worth an automatic retry by the queue. Everything else is
    /// a final business outcome for this attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            OrderError::Vendor(e) => e.is_transient(),
            OrderError::Database(_) => true,
            _ => false,
        }
    }
}

impl From<sea_orm::DbErr> for OrderError {
    fn from(err: sea_orm::DbErr) -> Self {
        OrderError::Database(err.to_string())
    }
}

impl From<PkiError> for OrderError {
    fn from(err: PkiError) -> Self {
        OrderError::rejected(err.to_string())
    }
}

impl From<KvError> for OrderError {
    fn from(err: KvError) -> Self {
        OrderError::Internal(err.to_string())
    }
}

impl From<ServiceError> for OrderError {
    fn from(err: ServiceError) -> Self {
        OrderError::Internal(err.to_string())
    }
}
