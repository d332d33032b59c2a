//! Vendor call audit trail. Every outbound call and its raw response is
//! appended here; failures to log never fail the call itself.

use async_trait::async_trait;
use sea_orm::{ActiveValue::Set, EntityTrait};
use std::sync::{Arc, Mutex};
use tracing::warn;

use certpilot_database::DbConnection;
use certpilot_entities::ca_logs;

#[derive(Debug, Clone)]
pub struct CaLogEntry {
    pub url: String,
    pub api: String,
    pub params: serde_json::Value,
    pub response: serde_json::Value,
    pub status_code: i32,
    pub success: bool,
}

#[async_trait]
pub trait CaLogStore: Send + Sync {
    async fn append(&self, entry: CaLogEntry);
}

pub struct SeaOrmCaLogStore {
    db: Arc<DbConnection>,
}

impl SeaOrmCaLogStore {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CaLogStore for SeaOrmCaLogStore {
    async fn append(&self, entry: CaLogEntry) {
        let model = ca_logs::ActiveModel {
            url: Set(entry.url),
            api: Set(entry.api),
            params: Set(Some(entry.params)),
            response: Set(Some(entry.response)),
            status_code: Set(entry.status_code),
            status: Set(if entry.success { 1 } else { 0 }),
            ..Default::default()
        };

        if let Err(e) = ca_logs::Entity::insert(model).exec(self.db.as_ref()).await {
            warn!("failed to append ca_log entry: {}", e);
        }
    }
}

/// Collects entries in memory for assertions.
#[derive(Default)]
pub struct MemoryCaLogStore {
    pub entries: Mutex<Vec<CaLogEntry>>,
}

impl MemoryCaLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<CaLogEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl CaLogStore for MemoryCaLogStore {
    async fn append(&self, entry: CaLogEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}
