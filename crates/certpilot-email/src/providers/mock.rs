//! Mock email provider for testing

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::errors::EmailError;
use crate::providers::{EmailMessage, EmailProvider};

/// Records every message instead of delivering it.
#[derive(Debug, Clone, Default)]
pub struct MockEmailProvider {
    pub sent: Arc<Mutex<Vec<EmailMessage>>>,
    pub should_fail: bool,
}

impl MockEmailProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_send_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    pub fn sent_messages(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailProvider for MockEmailProvider {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        if self.should_fail {
            return Err(EmailError::Send("mock send failure".to_string()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}
