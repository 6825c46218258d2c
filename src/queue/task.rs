use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::{WorkflowOutcome, WorkflowRequest};

/// Opaque queue-assigned task identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        TaskId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        TaskId(s.to_string())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Internal lifecycle of a task.
///
/// `Pending -> Started -> {Succeeded | Failed}`, where a transient failure
/// may send `Started` back to `Pending` while retry budget remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Started,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Pending => write!(f, "PENDING"),
            TaskState::Started => write!(f, "STARTED"),
            TaskState::Succeeded => write!(f, "SUCCEEDED"),
            TaskState::Failed => write!(f, "FAILED"),
        }
    }
}

/// Retry behaviour for transient failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Fixed delay before a retried task is re-delivered.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_secs(60),
        }
    }
}

/// Partial-progress metadata a worker may publish while a task runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// A unit of deferred work tracked by the queue.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub request: WorkflowRequest,
    pub state: TaskState,
    pub state_history: Vec<TaskState>,
    pub result: Option<WorkflowOutcome>,
    pub error: Option<String>,
    pub progress: Option<Progress>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(request: WorkflowRequest) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            request,
            state: TaskState::Pending,
            state_history: Vec::new(),
            result: None,
            error: None,
            progress: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn set_state(&mut self, next: TaskState) {
        self.state_history.push(self.state);
        self.state = next;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn train_request() -> WorkflowRequest {
        WorkflowRequest::Train {
            dataset_name: "dataset_test123".into(),
        }
    }

    #[test]
    fn task_creation_defaults() {
        let task = Task::new(train_request());
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.retry_count, 0);
        assert!(task.state_history.is_empty());
        assert!(task.result.is_none());
        assert!(task.error.is_none());
    }

    #[test]
    fn task_ids_are_unique() {
        assert_ne!(Task::new(train_request()).id, Task::new(train_request()).id);
    }

    #[test]
    fn default_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.backoff, Duration::from_secs(60));
    }

    #[test]
    fn terminal_states() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Started.is_terminal());
        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::Failed.is_terminal());
    }

    #[test]
    fn set_state_records_history() {
        let mut task = Task::new(train_request());
        task.set_state(TaskState::Started);
        task.set_state(TaskState::Succeeded);
        assert_eq!(task.state_history, vec![TaskState::Pending, TaskState::Started]);
        assert_eq!(task.state, TaskState::Succeeded);
    }
}
