//! Job payloads flowing through the in-process queue channel, and the
//! scheduling seam services use to enqueue asynchronous work.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ServiceResult;
use crate::status::TaskAction;

/// Pointer to a persisted task row due for execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteTaskJob {
    /// Primary key of the `tasks` row (not the subject id).
    pub task_row_id: i64,
}

/// Core job enum containing all possible job types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Job {
    ExecuteTask(ExecuteTaskJob),
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::ExecuteTask(job) => write!(f, "ExecuteTask(task_row_id: {})", job.task_row_id),
        }
    }
}

/// Scheduling seam between the orchestrator and the task queue. One task
/// per (subject, action): creating a duplicate of an executing task is a
/// no-op, deleting abandons work that has not started.
#[async_trait]
pub trait TaskScheduler: Send + Sync {
    async fn create_task(
        &self,
        subject_ids: &[i64],
        action: TaskAction,
        delay_seconds: i64,
    ) -> ServiceResult<()>;

    async fn delete_task(
        &self,
        subject_ids: &[i64],
        actions: &[TaskAction],
    ) -> ServiceResult<()>;
}

/// Scheduler that drops everything; for tests and one-shot tooling.
#[derive(Default)]
pub struct NullTaskScheduler;

#[async_trait]
impl TaskScheduler for NullTaskScheduler {
    async fn create_task(
        &self,
        _subject_ids: &[i64],
        _action: TaskAction,
        _delay_seconds: i64,
    ) -> ServiceResult<()> {
        Ok(())
    }

    async fn delete_task(
        &self,
        _subject_ids: &[i64],
        _actions: &[TaskAction],
    ) -> ServiceResult<()> {
        Ok(())
    }
}
