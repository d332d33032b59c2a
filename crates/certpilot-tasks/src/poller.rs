//! Scheduled validation poller. Runs once per minute (single instance)
//! over every order whose current cert awaits domain validation, checks
//! published DCV material through the external helper on an escalating
//! minute schedule, and enqueues `revalidate`/`sync` tasks.

use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter,
};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use certpilot_core::{CertStatus, Dcv, DomainValidation, TaskAction, TaskScheduler};
use certpilot_database::DbConnection;
use certpilot_entities::{certs, domain_validation_records, orders};
use certpilot_orders::{VerifyClient, VerifyOutcome};

use crate::errors::TaskError;

/// Minutes after record creation at which a check may run. The next check
/// is always the smallest node strictly greater than the elapsed time.
pub const TIME_NODES: [i64; 19] = [
    3, 6, 10, 20, 30, 45, 60, 120, 180, 240, 360, 540, 720, 1080, 1440, 1800, 2160, 2520, 2880,
];

/// Polling stops once a record is older than this.
const MAX_POLL_HOURS: i64 = 48;

/// Smallest configured node strictly greater than `elapsed_minutes`, or
/// `None` once the schedule is exhausted.
pub fn next_time_node(elapsed_minutes: i64) -> Option<i64> {
    TIME_NODES.iter().copied().find(|&node| node > elapsed_minutes)
}

pub struct ValidationPoller {
    db: Arc<DbConnection>,
    tasks: Arc<dyn TaskScheduler>,
    verify: Arc<dyn VerifyClient>,
}

impl ValidationPoller {
    pub fn new(
        db: Arc<DbConnection>,
        tasks: Arc<dyn TaskScheduler>,
        verify: Arc<dyn VerifyClient>,
    ) -> Self {
        Self { db, tasks, verify }
    }

    /// Drive `run_once` on a fixed one-minute tick.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            if let Err(e) = self.run_once().await {
                warn!("validation poller pass failed: {}", e);
            }
        }
    }

    pub async fn run_once(&self) -> Result<(), TaskError> {
        // Current certs awaiting validation with a DCV method set.
        let candidates = certs::Entity::find()
            .filter(certs::Column::Status.is_in([
                CertStatus::Processing.as_str(),
                CertStatus::Approving.as_str(),
            ]))
            .filter(certs::Column::Dcv.is_not_null())
            .find_also_related(orders::Entity)
            .all(self.db.as_ref())
            .await?;

        info!("validation poller: {} candidate order(s)", candidates.len());

        for (cert, order) in candidates {
            let Some(order) = order else { continue };
            // Only the order's current cert is polled.
            if order.latest_cert_id != Some(cert.id) {
                continue;
            }

            if let Err(e) = self.poll_order(&order, &cert).await {
                warn!("order {}: validation poll error: {}", order.id, e);
            }
        }

        Ok(())
    }

    async fn poll_order(&self, order: &orders::Model, cert: &certs::Model) -> Result<(), TaskError> {
        let now = Utc::now();

        let record = match domain_validation_records::Entity::find()
            .filter(domain_validation_records::Column::OrderId.eq(order.id))
            .one(self.db.as_ref())
            .await?
        {
            Some(record) => record,
            None => {
                // First sighting: the first check runs in a minute.
                domain_validation_records::ActiveModel {
                    order_id: Set(order.id),
                    last_check_at: Set(now),
                    next_check_at: Set(now + Duration::minutes(1)),
                    ..Default::default()
                }
                .insert(self.db.as_ref())
                .await?
            }
        };

        let elapsed_hours = (now - record.created_at).num_hours();
        if elapsed_hours >= MAX_POLL_HOURS {
            info!("order {}: validation window expired, polling stopped", order.id);
            return Ok(());
        }

        if record.next_check_at > now {
            return Ok(());
        }

        let dcv: Option<Dcv> = cert
            .dcv
            .clone()
            .and_then(|value| serde_json::from_value(value).ok());
        let method_is_checkable = dcv
            .map(|dcv| dcv.method.is_dns() || dcv.method.is_file())
            .unwrap_or(false);

        if CertStatus::from_str(&cert.status) == Ok(CertStatus::Processing) && method_is_checkable {
            let validation: Vec<DomainValidation> = cert
                .validation
                .clone()
                .and_then(|value| serde_json::from_value(value).ok())
                .unwrap_or_default();

            match self.verify.verify_validation(&validation).await {
                VerifyOutcome::Passed => {
                    info!("order {}: published records verified, scheduling revalidate", order.id);
                    self.tasks
                        .create_task(&[order.id], TaskAction::Revalidate, 0)
                        .await
                        .map_err(|e| TaskError::Database(e.to_string()))?;
                }
                VerifyOutcome::Failed { msg, .. } => {
                    info!("order {}: records not yet valid: {}", order.id, msg);
                }
                VerifyOutcome::Unknown => {
                    warn!("order {}: validation helpers unreachable", order.id);
                }
            }
        } else {
            // Vendor-side processing: just pull the state forward.
            self.tasks
                .create_task(&[order.id], TaskAction::Sync, 0)
                .await
                .map_err(|e| TaskError::Database(e.to_string()))?;
        }

        self.set_next_check(record, now).await
    }

    /// Recompute the next absolute check time from the record's creation
    /// instant and the node table.
    async fn set_next_check(
        &self,
        record: domain_validation_records::Model,
        now: certpilot_core::UtcDateTime,
    ) -> Result<(), TaskError> {
        let elapsed_minutes = (now - record.created_at).num_minutes();

        if let Some(node) = next_time_node(elapsed_minutes) {
            let next_check_at = record.created_at + Duration::minutes(node);
            let order_id = record.order_id;

            let mut update: domain_validation_records::ActiveModel = record.into();
            update.last_check_at = Set(now);
            update.next_check_at = Set(next_check_at);
            update.update(self.db.as_ref()).await?;

            info!(
                "order {}: next validation check at node {}m",
                order_id, node
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_node_is_strictly_greater() {
        assert_eq!(next_time_node(0), Some(3));
        assert_eq!(next_time_node(5), Some(6));
        assert_eq!(next_time_node(6), Some(10));
        assert_eq!(next_time_node(45), Some(60));
        assert_eq!(next_time_node(2879), Some(2880));
        assert_eq!(next_time_node(2880), None);
        assert_eq!(next_time_node(10_000), None);
    }
}
