//! Read-only status surface over the task queue.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::queue::{Progress, Task, TaskId, TaskQueue, TaskState};
use crate::workflow::WorkflowOutcome;

/// Externally visible task state.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    Pending,
    Started(Option<Progress>),
    Succeeded(WorkflowOutcome),
    Failed(String),
}

impl TaskStatus {
    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Started(_) => "STARTED",
            TaskStatus::Succeeded(_) => "SUCCESS",
            TaskStatus::Failed(_) => "FAILURE",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded(_) | TaskStatus::Failed(_))
    }

    fn from_task(task: &Task) -> Self {
        match task.state {
            TaskState::Pending => TaskStatus::Pending,
            TaskState::Started => TaskStatus::Started(task.progress.clone()),
            // A successful task always carries its outcome; fall back to
            // Pending rather than report a success without a payload.
            TaskState::Succeeded => match &task.result {
                Some(result) => TaskStatus::Succeeded(result.clone()),
                None => TaskStatus::Pending,
            },
            TaskState::Failed => TaskStatus::Failed(
                task.error
                    .clone()
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| "Unknown error".to_string()),
            ),
        }
    }
}

/// Wire shape of a status query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusResponse {
    pub task_id: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusResponse {
    fn new(task_id: &TaskId, status: &TaskStatus) -> Self {
        let (result, error) = match status {
            TaskStatus::Pending => (None, None),
            TaskStatus::Started(progress) => (
                progress
                    .as_ref()
                    .and_then(|p| serde_json::to_value(p).ok()),
                None,
            ),
            TaskStatus::Succeeded(outcome) => (Some(outcome.payload()), None),
            TaskStatus::Failed(error) => (None, Some(error.clone())),
        };
        Self {
            task_id: task_id.to_string(),
            status: status.label(),
            result,
            error,
        }
    }
}

#[derive(Clone)]
pub struct StatusReporter {
    queue: TaskQueue,
}

impl StatusReporter {
    pub fn new(queue: TaskQueue) -> Self {
        Self { queue }
    }

    /// Current status of `id`. Ids the queue has never issued read as `Pending`.
    pub fn status(&self, id: &TaskId) -> TaskStatus {
        self.queue
            .task(id)
            .map(|task| TaskStatus::from_task(&task))
            .unwrap_or(TaskStatus::Pending)
    }

    pub fn report(&self, id: &TaskId) -> StatusResponse {
        StatusResponse::new(id, &self.status(id))
    }

    /// Whether the queue issued `id`. Lets in-process callers tell an unknown
    /// id apart from one that has not been picked up yet.
    pub fn is_known(&self, id: &TaskId) -> bool {
        self.queue.task(id).is_some()
    }

    /// Poll until the task reaches a terminal status, calling `on_poll` with
    /// every status observed along the way.
    pub async fn wait_for_terminal<F, Fut>(
        &self,
        id: &TaskId,
        interval: Duration,
        mut on_poll: F,
    ) -> StatusResponse
    where
        F: FnMut(&TaskStatus) -> Fut,
        Fut: Future<Output = ()>,
    {
        loop {
            let status = self.status(id);
            on_poll(&status).await;
            if status.is_terminal() {
                return StatusResponse::new(id, &status);
            }
            tokio::time::sleep(interval).await;
        }
    }
}
