//! Job orchestration and artifact lineage for an ML pipeline.
//!
//! Workflows (generate, train, evaluate, prune) are submitted through
//! [`submit::Submitter`], run asynchronously on a [`queue::TaskQueue`] with
//! permanent/transient retry classification, and polled through
//! [`status::StatusReporter`]. Every produced artifact is recorded in the
//! [`lineage`] repository so its provenance can be rebuilt by name.

pub mod app;
pub mod config;
pub mod error;
pub mod lineage;
pub mod operations;
pub mod queue;
pub mod status;
pub mod storage;
pub mod submit;
pub mod telemetry;
pub mod workflow;
