use thiserror::Error;

#[derive(Error, Debug)]
pub enum VendorError {
    /// Missing or incomplete credentials for a vendor endpoint.
    #[error("CA endpoint configuration error: {0}")]
    Configuration(String),

    /// Transport-level failure (timeout, connect error, 5xx). Retryable by
    /// the task queue.
    #[error("CA endpoint connection failed: {0}")]
    Connection(String),

    /// The vendor accepted the call but rejected the request. Not retried
    /// automatically; the message is surfaced to the caller.
    #[error("{message}")]
    Rejected {
        message: String,
        errors: Option<serde_json::Value>,
    },

    /// The adapter does not implement this operation.
    #[error("Operation not supported by this vendor: {0}")]
    UnsupportedOperation(String),

    /// The vendor response could not be decoded.
    #[error("CA response parse error: {0}")]
    Parse(String),
}

impl VendorError {
    pub fn rejected(message: impl Into<String>) -> Self {
        VendorError::Rejected {
            message: message.into(),
            errors: None,
        }
    }

    /// Transient failures the queue should retry; everything else is a
    /// business outcome.
    pub fn is_transient(&self) -> bool {
        matches!(self, VendorError::Connection(_))
    }
}

impl From<reqwest::Error> for VendorError {
    fn from(err: reqwest::Error) -> Self {
        VendorError::Connection(err.to_string())
    }
}
