//! Email provider trait definitions

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::EmailError;

/// A rendered HTML message ready for delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub body_html: String,
}

#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError>;
}
