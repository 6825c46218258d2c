use std::time::Duration;

use crate::error::Classification;
use crate::workflow::WorkflowOutcome;

use super::task::{RetryPolicy, Task, TaskState};

/// What the queue should do after an attempt finishes.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The attempt succeeded; the task is terminal.
    Succeeded,
    /// A transient failure with budget left; re-deliver after `delay`.
    Retry {
        retry: u32,
        delay: Duration,
        reason: Classification,
    },
    /// A permanent failure, or a transient one with the budget spent.
    Failed(Classification),
}

/// Drives a [`Task`] through its lifecycle.
pub struct TaskMachine;

impl TaskMachine {
    /// Mark a delivered task as started.
    ///
    /// Returns `false` when the task is not `Pending`, so a stray duplicate
    /// delivery never runs an attempt twice.
    pub fn start(task: &mut Task) -> bool {
        if task.state != TaskState::Pending {
            return false;
        }
        task.progress = None;
        task.set_state(TaskState::Started);
        true
    }

    /// Apply the outcome of the current attempt.
    ///
    /// - Success is terminal.
    /// - `Permanent` failures are terminal regardless of remaining budget.
    /// - `Transient` failures go back to `Pending` with `retry_count`
    ///   incremented while `retry_count < max_retries`; afterwards terminal.
    pub fn finish(
        task: &mut Task,
        outcome: Result<WorkflowOutcome, Classification>,
        policy: &RetryPolicy,
    ) -> Transition {
        task.progress = None;
        match outcome {
            Ok(result) => {
                task.result = Some(result);
                task.error = None;
                task.set_state(TaskState::Succeeded);
                Transition::Succeeded
            }
            Err(reason @ Classification::Permanent(_)) => Self::fail(task, reason),
            Err(reason @ Classification::Transient(_)) => {
                if task.retry_count < policy.max_retries {
                    task.retry_count += 1;
                    task.error = Some(reason.reason().to_string());
                    task.set_state(TaskState::Pending);
                    Transition::Retry {
                        retry: task.retry_count,
                        delay: policy.backoff,
                        reason,
                    }
                } else {
                    Self::fail(task, reason)
                }
            }
        }
    }

    fn fail(task: &mut Task, reason: Classification) -> Transition {
        task.error = Some(reason.reason().to_string());
        task.set_state(TaskState::Failed);
        Transition::Failed(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowRequest;

    fn make_task() -> Task {
        Task::new(WorkflowRequest::Train {
            dataset_name: "dataset_1".into(),
        })
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: Duration::from_millis(5),
        }
    }

    fn trained() -> WorkflowOutcome {
        WorkflowOutcome::Trained {
            model_name: "model_1".into(),
            dataset_name: "dataset_1".into(),
        }
    }

    fn transient(msg: &str) -> Classification {
        Classification::Transient(msg.into())
    }

    #[test]
    fn happy_path() {
        let mut task = make_task();
        assert!(TaskMachine::start(&mut task));
        assert_eq!(task.state, TaskState::Started);

        let t = TaskMachine::finish(&mut task, Ok(trained()), &policy(3));
        assert_eq!(t, Transition::Succeeded);
        assert_eq!(task.state, TaskState::Succeeded);
        assert_eq!(task.result, Some(trained()));
        assert_eq!(task.state_history, vec![TaskState::Pending, TaskState::Started]);
    }

    #[test]
    fn start_only_from_pending() {
        let mut task = make_task();
        assert!(TaskMachine::start(&mut task));
        assert!(!TaskMachine::start(&mut task));
        assert_eq!(task.state_history, vec![TaskState::Pending]);
    }

    #[test]
    fn permanent_failure_ignores_budget() {
        let mut task = make_task();
        TaskMachine::start(&mut task);

        let t = TaskMachine::finish(
            &mut task,
            Err(Classification::Permanent("Dataset 'x' not found".into())),
            &policy(3),
        );
        assert!(matches!(t, Transition::Failed(Classification::Permanent(_))));
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.error.as_deref(), Some("Dataset 'x' not found"));
        assert!(!task.state_history[1..].contains(&TaskState::Pending));
    }

    #[test]
    fn transient_failure_retries_then_fails() {
        let mut task = make_task();
        let policy = policy(2);

        for expected in 1..=2 {
            TaskMachine::start(&mut task);
            let t = TaskMachine::finish(&mut task, Err(transient("disk busy")), &policy);
            assert_eq!(
                t,
                Transition::Retry {
                    retry: expected,
                    delay: Duration::from_millis(5),
                    reason: transient("disk busy"),
                }
            );
            assert_eq!(task.state, TaskState::Pending);
            assert_eq!(task.retry_count, expected);
        }

        TaskMachine::start(&mut task);
        let t = TaskMachine::finish(&mut task, Err(transient("still busy")), &policy);
        assert_eq!(t, Transition::Failed(transient("still busy")));
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.retry_count, 2);
        assert_eq!(task.error.as_deref(), Some("still busy"));
    }

    #[test]
    fn zero_retries_fails_immediately() {
        let mut task = make_task();
        TaskMachine::start(&mut task);

        let t = TaskMachine::finish(&mut task, Err(transient("timeout")), &policy(0));
        assert_eq!(t, Transition::Failed(transient("timeout")));
        assert_eq!(task.retry_count, 0);
    }

    #[test]
    fn retry_then_succeed_clears_error() {
        let mut task = make_task();
        let policy = policy(3);

        TaskMachine::start(&mut task);
        TaskMachine::finish(&mut task, Err(transient("network error")), &policy);
        assert_eq!(task.error.as_deref(), Some("network error"));

        TaskMachine::start(&mut task);
        let t = TaskMachine::finish(&mut task, Ok(trained()), &policy);
        assert_eq!(t, Transition::Succeeded);
        assert_eq!(task.retry_count, 1);
        assert!(task.error.is_none());
        assert_eq!(
            task.state_history,
            vec![
                TaskState::Pending,
                TaskState::Started,
                TaskState::Pending,
                TaskState::Started
            ]
        );
    }
}
