//! Task submission: synchronous precondition check, then enqueue.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::WorkflowError;
use crate::queue::{TaskId, TaskQueue};
use crate::workflow::{WorkflowOrchestrator, WorkflowRequest};

/// Acknowledgement returned to a submitter, echoing the request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Submission {
    pub task_id: TaskId,
    pub status: &'static str,
    #[serde(flatten)]
    pub request: WorkflowRequest,
}

/// Entry point for new work. Rejects bad requests before they reach the queue.
#[derive(Clone)]
pub struct Submitter {
    /// Used only for the synchronous precondition check.
    orchestrator: Arc<WorkflowOrchestrator>,
    queue: TaskQueue,
}

impl Submitter {
    pub fn new(orchestrator: Arc<WorkflowOrchestrator>, queue: TaskQueue) -> Self {
        Self {
            orchestrator,
            queue,
        }
    }

    /// Queue `request`, or reject it before any task exists when a named input
    /// is missing or an argument is invalid.
    pub fn submit(&self, request: WorkflowRequest) -> Result<Submission, WorkflowError> {
        if let Err(e) = self.orchestrator.check_preconditions(&request) {
            warn!(workflow = request.kind(), error = %e, "submission rejected");
            return Err(e);
        }

        let task_id = self.queue.submit(request.clone());
        info!(task_id = %task_id, workflow = request.kind(), "submitted");
        Ok(Submission {
            task_id,
            status: "submitted",
            request,
        })
    }
}
