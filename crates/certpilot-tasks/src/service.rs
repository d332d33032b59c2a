//! Task creation and deletion. One executing row per (subject, action);
//! dispatch is enqueued onto a tokio channel no earlier than the task's
//! `started_at`, with a few seconds of grace so a clock skew cannot run a
//! task early.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, QuerySelect,
    TransactionTrait,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use certpilot_core::{
    ExecuteTaskJob, Job, ServiceError, ServiceResult, TaskAction, TaskScheduler, TaskStatus,
};
use certpilot_database::{supports_row_locks, DbConnection};
use certpilot_entities::tasks;

/// Cancel tasks never run earlier than this, so a customer can change
/// their mind and the vendor state can settle.
const CANCEL_MIN_DELAY_SECONDS: i64 = 120;

/// Dispatch grace added on top of `started_at`.
const DISPATCH_GRACE_SECONDS: i64 = 3;

pub struct TaskService {
    db: Arc<DbConnection>,
    job_sender: mpsc::Sender<Job>,
}

impl TaskService {
    /// Build the service plus the receiving end a worker drains.
    pub fn create(db: Arc<DbConnection>, buffer_size: usize) -> (Arc<Self>, mpsc::Receiver<Job>) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        (
            Arc::new(Self {
                db,
                job_sender: sender,
            }),
            receiver,
        )
    }

    /// Re-enqueue an existing row after a delay (worker retry path).
    pub fn enqueue_after(&self, task_row_id: i64, delay_seconds: i64) {
        let sender = self.job_sender.clone();
        tokio::spawn(async move {
            if delay_seconds > 0 {
                tokio::time::sleep(std::time::Duration::from_secs(delay_seconds as u64)).await;
            }
            if sender
                .send(Job::ExecuteTask(ExecuteTaskJob { task_row_id }))
                .await
                .is_err()
            {
                warn!("queue channel closed, task {} not dispatched", task_row_id);
            }
        });
    }
}

#[async_trait]
impl TaskScheduler for TaskService {
    async fn create_task(
        &self,
        subject_ids: &[i64],
        action: TaskAction,
        delay_seconds: i64,
    ) -> ServiceResult<()> {
        let delay = if action == TaskAction::Cancel {
            delay_seconds.max(CANCEL_MIN_DELAY_SECONDS)
        } else {
            delay_seconds.max(0)
        };
        let started_at = Utc::now() + Duration::seconds(delay);

        for &subject_id in subject_ids {
            let txn = self
                .db
                .begin()
                .await
                .map_err(|e| ServiceError::Database(e.to_string()))?;

            // Dedup: skip when an executing row already exists for this
            // (subject, action) pair.
            let mut existing = tasks::Entity::find()
                .filter(tasks::Column::TaskId.eq(subject_id))
                .filter(tasks::Column::Action.eq(action.as_str()))
                .filter(tasks::Column::Status.eq(TaskStatus::Executing.as_str()));
            if supports_row_locks(self.db.as_ref()) {
                existing = existing.lock_exclusive();
            }

            let exists = existing
                .one(&txn)
                .await
                .map_err(|e| ServiceError::Database(e.to_string()))?
                .is_some();

            if exists {
                debug!("task {}/{} already executing, skipped", subject_id, action);
                txn.commit()
                    .await
                    .map_err(|e| ServiceError::Database(e.to_string()))?;
                continue;
            }

            let task = tasks::ActiveModel {
                task_id: Set(subject_id),
                action: Set(action.as_str().to_string()),
                attempts: Set(0),
                started_at: Set(Some(started_at)),
                weight: Set(0),
                status: Set(TaskStatus::Executing.as_str().to_string()),
                ..Default::default()
            }
            .insert(&txn)
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))?;

            txn.commit()
                .await
                .map_err(|e| ServiceError::Database(e.to_string()))?;

            self.enqueue_after(task.id, delay + DISPATCH_GRACE_SECONDS);
        }

        Ok(())
    }

    async fn delete_task(
        &self,
        subject_ids: &[i64],
        actions: &[TaskAction],
    ) -> ServiceResult<()> {
        let mut delete = tasks::Entity::delete_many()
            .filter(tasks::Column::TaskId.is_in(subject_ids.to_vec()))
            .filter(
                tasks::Column::Status.is_in([
                    TaskStatus::Executing.as_str(),
                    TaskStatus::Stopped.as_str(),
                ]),
            );

        if !actions.is_empty() {
            delete = delete.filter(
                tasks::Column::Action
                    .is_in(actions.iter().map(|a| a.as_str()).collect::<Vec<_>>()),
            );
        }

        delete
            .exec(self.db.as_ref())
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certpilot_database::test_utils::setup_test_db;

    #[tokio::test]
    async fn create_task_dedups_executing_rows() {
        let db = setup_test_db().await;
        let (service, _receiver) = TaskService::create(db.clone(), 16);

        service.create_task(&[7], TaskAction::Commit, 0).await.unwrap();
        service.create_task(&[7], TaskAction::Commit, 0).await.unwrap();

        let rows = tasks::Entity::find().all(db.as_ref()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].task_id, 7);
        assert_eq!(rows[0].status, "executing");

        // A different action for the same subject is its own task.
        service.create_task(&[7], TaskAction::Sync, 0).await.unwrap();
        assert_eq!(tasks::Entity::find().all(db.as_ref()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_creates_produce_one_executing_row() {
        let db = setup_test_db().await;
        let (service, _receiver) = TaskService::create(db.clone(), 16);

        let a = service.create_task(&[9], TaskAction::Revalidate, 0);
        let b = service.create_task(&[9], TaskAction::Revalidate, 0);
        let c = service.create_task(&[9], TaskAction::Revalidate, 0);
        let (ra, rb, rc) = tokio::join!(a, b, c);
        ra.unwrap();
        rb.unwrap();
        rc.unwrap();

        let rows = tasks::Entity::find()
            .filter(tasks::Column::Status.eq("executing"))
            .all(db.as_ref())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn cancel_tasks_get_the_minimum_delay() {
        let db = setup_test_db().await;
        let (service, _receiver) = TaskService::create(db.clone(), 16);

        let before = Utc::now();
        service.create_task(&[3], TaskAction::Cancel, 0).await.unwrap();

        let row = tasks::Entity::find().one(db.as_ref()).await.unwrap().unwrap();
        let started_at = row.started_at.unwrap();
        // Stored timestamps may lose sub-microsecond precision.
        assert!(started_at >= before + Duration::seconds(CANCEL_MIN_DELAY_SECONDS - 1));
    }

    #[tokio::test]
    async fn delete_task_removes_matching_rows_only() {
        let db = setup_test_db().await;
        let (service, _receiver) = TaskService::create(db.clone(), 16);

        service.create_task(&[1], TaskAction::Commit, 0).await.unwrap();
        service.create_task(&[1], TaskAction::Sync, 0).await.unwrap();
        service.create_task(&[2], TaskAction::Commit, 0).await.unwrap();

        service
            .delete_task(&[1], &[TaskAction::Commit])
            .await
            .unwrap();

        let rows = tasks::Entity::find().all(db.as_ref()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows
            .iter()
            .all(|t| !(t.task_id == 1 && t.action == "commit")));
    }
}
