//! Worker loop: claims due task rows under a row lock, dispatches the
//! action against the orchestrator and records the outcome. Business
//! results - success or rejection - finalize the task; only unexpected
//! infrastructure failures retry with backoff, and exhausting the retries
//! escalates to the operator mailbox.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, QuerySelect,
    TransactionTrait,
};
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use certpilot_core::{AppSettings, Job, TaskAction, TaskStatus};
use certpilot_database::{supports_row_locks, DbConnection};
use certpilot_email::{task_failure_notice, EmailProvider, TaskFailureContext};
use certpilot_entities::tasks;
use certpilot_orders::{Actor, OrderError, OrderService};

use crate::errors::TaskError;
use crate::service::TaskService;

const MAX_ATTEMPTS: i32 = 3;

pub struct TaskWorker {
    db: Arc<DbConnection>,
    orders: Arc<OrderService>,
    service: Arc<TaskService>,
    mailer: Arc<dyn EmailProvider>,
    settings: AppSettings,
}

impl TaskWorker {
    pub fn new(
        db: Arc<DbConnection>,
        orders: Arc<OrderService>,
        service: Arc<TaskService>,
        mailer: Arc<dyn EmailProvider>,
        settings: AppSettings,
    ) -> Self {
        Self {
            db,
            orders,
            service,
            mailer,
            settings,
        }
    }

    /// Drain the queue channel until it closes.
    pub async fn run(&self, mut receiver: mpsc::Receiver<Job>) {
        while let Some(job) = receiver.recv().await {
            match job {
                Job::ExecuteTask(job) => {
                    if let Err(e) = self.execute(job.task_row_id).await {
                        error!("task {} execution error: {}", job.task_row_id, e);
                    }
                }
            }
        }
        info!("task queue channel closed, worker stopping");
    }

    /// Execute one task row. Claiming happens under a row lock so a row
    /// is picked up by exactly one worker; a row that is not due or not
    /// executing any more is left alone.
    pub async fn execute(&self, task_row_id: i64) -> Result<(), TaskError> {
        let Some(task) = self.claim(task_row_id).await? else {
            return Ok(());
        };

        let action = TaskAction::from_str(&task.action)
            .map_err(|_| TaskError::UnknownAction(task.action.clone()))?;

        let outcome = self.dispatch(action, task.task_id).await;
        let attempts = task.attempts + 1;

        let mut exhausted = false;
        let (status, result) = match &outcome {
            Ok(()) => (TaskStatus::Successful, json!({ "code": 1 })),
            Err(e) if !e.is_transient() => (
                // A handled business failure is a final outcome for this
                // task, not something to retry.
                TaskStatus::Failed,
                json!({ "code": 0, "msg": e.to_string() }),
            ),
            Err(e) => {
                if attempts < MAX_ATTEMPTS {
                    (
                        TaskStatus::Executing,
                        json!({ "code": 0, "msg": e.to_string(), "retrying": true }),
                    )
                } else {
                    exhausted = true;
                    (
                        TaskStatus::Failed,
                        json!({ "code": 0, "msg": e.to_string(), "attempts_exhausted": true }),
                    )
                }
            }
        };

        let executed_at = Utc::now();
        let retry_delay = backoff_seconds(attempts);

        let mut update: tasks::ActiveModel = task.clone().into();
        update.attempts = Set(attempts);
        update.last_execute_at = Set(Some(executed_at));
        update.result = Set(Some(result.clone()));
        update.status = Set(status.as_str().to_string());
        update.weight = Set(0);
        if status == TaskStatus::Executing {
            update.started_at = Set(Some(executed_at + chrono::Duration::seconds(retry_delay)));
        }
        update.update(self.db.as_ref()).await?;

        match status {
            TaskStatus::Executing => {
                warn!(
                    "task {} attempt {}/{} failed, retrying in {}s",
                    task_row_id, attempts, MAX_ATTEMPTS, retry_delay
                );
                self.service.enqueue_after(task_row_id, retry_delay + 3);
            }
            TaskStatus::Failed => {
                // Business rejections are recorded, not escalated; only
                // exhausted infrastructure retries reach the operator.
                if exhausted {
                    if let Err(e) = &outcome {
                        self.escalate(&task, attempts, executed_at, e, &result).await;
                    }
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// `weight` doubles as the in-flight marker: the claiming update runs
    /// inside the locking transaction, so a row is handed to exactly one
    /// worker. The result update resets it to 0.
    async fn claim(&self, task_row_id: i64) -> Result<Option<tasks::Model>, TaskError> {
        let txn = self.db.begin().await?;

        let mut query = tasks::Entity::find_by_id(task_row_id)
            .filter(tasks::Column::Status.eq(TaskStatus::Executing.as_str()))
            .filter(tasks::Column::StartedAt.lte(Utc::now()))
            .filter(tasks::Column::Weight.eq(0));
        if supports_row_locks(self.db.as_ref()) {
            query = query.lock_exclusive();
        }

        let task = query.one(&txn).await?;

        if let Some(task) = &task {
            let mut marker: tasks::ActiveModel = task.clone().into();
            marker.weight = Set(1);
            marker.update(&txn).await?;
        }

        txn.commit().await?;

        Ok(task)
    }

    async fn dispatch(&self, action: TaskAction, subject_id: i64) -> Result<(), OrderError> {
        let actor = Actor::operator();

        match action {
            TaskAction::Commit => self.orders.commit(actor, subject_id).await,
            TaskAction::Sync => self.orders.sync(actor, subject_id).await,
            TaskAction::Revalidate => self.orders.revalidate(actor, subject_id).await,
            TaskAction::Cancel | TaskAction::CommitCancel => {
                self.orders.commit_cancel(actor, subject_id).await
            }
            TaskAction::RevokeCancel => self.orders.revoke_cancel(actor, subject_id).await,
            TaskAction::SendActive => self.orders.send_active(subject_id, None).await,
            TaskAction::SendExpire => self.orders.send_expire(subject_id, None).await,
        }
    }

    /// Permanent failure: mail the operator the full diagnostic context.
    async fn escalate(
        &self,
        task: &tasks::Model,
        attempts: i32,
        executed_at: certpilot_core::UtcDateTime,
        error: &OrderError,
        result: &serde_json::Value,
    ) {
        let Some(admin_email) = self.settings.site.admin_email.clone() else {
            warn!("task {} failed permanently but no admin email is set", task.id);
            return;
        };

        let message = task_failure_notice(
            &self.settings.site,
            &admin_email,
            &TaskFailureContext {
                task_row_id: task.id,
                subject_id: task.task_id,
                action: task.action.clone(),
                status: TaskStatus::Failed.as_str().to_string(),
                attempts,
                error: error.to_string(),
                result: Some(result.clone()),
                created_at: task.created_at,
                executed_at: Some(executed_at),
            },
        );

        if let Err(e) = self.mailer.send(&message).await {
            error!("failed to send task failure notice: {}", e);
        }
    }
}

fn backoff_seconds(attempt: i32) -> i64 {
    30 * 2i64.pow(attempt.max(1) as u32 - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_seconds(1), 30);
        assert_eq!(backoff_seconds(2), 60);
        assert_eq!(backoff_seconds(3), 120);
    }
}
