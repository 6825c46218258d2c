//! Workflows: one per pipeline stage (generate, train, evaluate, prune).
//!
//! Every workflow has the same shape:
//! 1. resolve the named inputs, failing fast with a permanent `NotFound`
//!    before any expensive work;
//! 2. invoke the artifact operation, letting its failures propagate for
//!    retry classification;
//! 3. derive the output name and write the blob;
//! 4. record lineage. This last phase has its own error channel: failures
//!    are logged and never undo the result of the earlier phases, because
//!    the blob is already durable.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{ArtifactKind, Classification, OperationError, WorkflowError};
use crate::lineage::{LineageRepository, LineageResult, MacroField, MacroSettings};
use crate::operations::ArtifactOperations;
use crate::queue::{ProgressHandle, TaskHandler};
use crate::storage::{ArtifactStore, pruned_name};

pub const DEFAULT_ROWS: u64 = 1000;

fn default_rows() -> u64 {
    DEFAULT_ROWS
}

/// A workflow invocation, as queued and echoed back to submitters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "workflow", rename_all = "snake_case")]
pub enum WorkflowRequest {
    Generate {
        #[serde(default = "default_rows")]
        rows: u64,
        #[serde(default)]
        macro_overrides: MacroSettings,
    },
    Train {
        dataset_name: String,
    },
    Evaluate {
        model_name: String,
        dataset_name: String,
    },
    Prune {
        model_name: String,
        dataset_name: String,
    },
}

impl WorkflowRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowRequest::Generate { .. } => "generate",
            WorkflowRequest::Train { .. } => "train",
            WorkflowRequest::Evaluate { .. } => "evaluate",
            WorkflowRequest::Prune { .. } => "prune",
        }
    }
}

/// The result of a successful workflow run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WorkflowOutcome {
    Generated {
        dataset_name: String,
        rows: u64,
        #[serde(rename = "macro")]
        macro_settings: MacroSettings,
    },
    Trained {
        model_name: String,
        dataset_name: String,
    },
    Evaluated {
        model_name: String,
        dataset_name: String,
        auc: f64,
    },
    Pruned {
        model_name: String,
        pruned_model_name: String,
        dataset_name: String,
    },
}

impl WorkflowOutcome {
    /// The structured payload reported on `SUCCESS`, tagged `"status": "success"`.
    pub fn payload(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.insert("status".into(), Value::String("success".into()));
        }
        value
    }
}

/// Runs workflows against one artifact store and one lineage repository.
pub struct WorkflowOrchestrator {
    /// Blob storage for datasets and models.
    store: ArtifactStore,
    /// Best-effort lineage sink. Its failures never fail a workflow.
    lineage: Arc<dyn LineageRepository>,
    /// The generate, train, evaluate and prune routines.
    operations: Arc<dyn ArtifactOperations>,
}

impl WorkflowOrchestrator {
    pub fn new(
        store: ArtifactStore,
        lineage: Arc<dyn LineageRepository>,
        operations: Arc<dyn ArtifactOperations>,
    ) -> Self {
        Self {
            store,
            lineage,
            operations,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Check that every named input exists. Cheap; runs before anything is queued.
    pub fn check_preconditions(&self, request: &WorkflowRequest) -> Result<(), WorkflowError> {
        match request {
            WorkflowRequest::Generate {
                rows,
                macro_overrides,
            } => {
                if *rows == 0 {
                    return Err(WorkflowError::InvalidArgument(
                        "rows must be a positive integer".into(),
                    ));
                }
                if let Some((field, value)) = first_non_finite(macro_overrides) {
                    return Err(WorkflowError::InvalidArgument(format!(
                        "{field} must be a finite number, got {value}"
                    )));
                }
            }
            WorkflowRequest::Train { dataset_name } => {
                self.require_dataset(dataset_name)?;
            }
            WorkflowRequest::Evaluate {
                model_name,
                dataset_name,
            }
            | WorkflowRequest::Prune {
                model_name,
                dataset_name,
            } => {
                self.require_model(model_name)?;
                self.require_dataset(dataset_name)?;
            }
        }
        Ok(())
    }

    /// Run a workflow to completion on the calling thread.
    pub fn run(
        &self,
        request: &WorkflowRequest,
        progress: &ProgressHandle,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        progress.publish("validating", None);
        self.check_preconditions(request)?;

        match request {
            WorkflowRequest::Generate {
                rows,
                macro_overrides,
            } => self.generate(*rows, macro_overrides, progress),
            WorkflowRequest::Train { dataset_name } => self.train(dataset_name, progress),
            WorkflowRequest::Evaluate {
                model_name,
                dataset_name,
            } => self.evaluate(model_name, dataset_name, progress),
            WorkflowRequest::Prune {
                model_name,
                dataset_name,
            } => self.prune(model_name, dataset_name, progress),
        }
    }

    fn generate(
        &self,
        rows: u64,
        overrides: &MacroSettings,
        progress: &ProgressHandle,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        let missing: Vec<MacroField> = MacroField::ALL
            .into_iter()
            .filter(|field| !overrides.contains_key(field))
            .collect();

        let mut macro_settings = if missing.is_empty() {
            MacroSettings::new()
        } else {
            progress.publish("loading", Some(format!("fetching {} macro fields", missing.len())));
            info!(?missing, "fetching missing macro fields");
            self.operations.fetch_macro(&missing)?
        };
        if let Some((field, value)) = first_non_finite(&macro_settings) {
            return Err(OperationError::Failed(format!(
                "macro feed returned non-finite {field}: {value}"
            ))
            .into());
        }
        macro_settings.extend(overrides.iter().map(|(k, v)| (*k, *v)));

        progress.publish("running", Some(format!("generating {rows} rows")));
        let generated = self.operations.generate(&macro_settings, rows)?;

        let dataset_name = self.store.fresh_name(ArtifactKind::Dataset)?;
        let path = self.store.write_dataset(&dataset_name, &generated.blob)?;
        info!(dataset = %dataset_name, path = %path.display(), rows = generated.rows, "saved dataset");

        progress.publish("recording", Some(dataset_name.clone()));
        self.record_lineage(ArtifactKind::Dataset, &dataset_name, |repo| {
            repo.record_dataset(&dataset_name, generated.rows, &macro_settings)
        });

        Ok(WorkflowOutcome::Generated {
            dataset_name,
            rows: generated.rows,
            macro_settings,
        })
    }

    fn train(
        &self,
        dataset_name: &str,
        progress: &ProgressHandle,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        progress.publish("loading", Some(dataset_name.to_string()));
        let dataset = self.store.read_dataset(dataset_name)?;
        info!(dataset = dataset_name, bytes = dataset.len(), "training dataset loaded");

        progress.publish("running", Some("training".into()));
        let blob = self.operations.train(&dataset)?;

        let model_name = self.store.fresh_name(ArtifactKind::Model)?;
        let path = self.store.write_model(&model_name, &blob)?;
        let trained_at = Utc::now();
        info!(model = %model_name, path = %path.display(), "saved model");

        progress.publish("recording", Some(model_name.clone()));
        self.record_lineage(ArtifactKind::Model, &model_name, |repo| {
            repo.record_model(&model_name, dataset_name, Some(trained_at))
        });

        Ok(WorkflowOutcome::Trained {
            model_name,
            dataset_name: dataset_name.to_string(),
        })
    }

    fn evaluate(
        &self,
        model_name: &str,
        dataset_name: &str,
        progress: &ProgressHandle,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        progress.publish("loading", Some(format!("{model_name} on {dataset_name}")));
        let model = self.store.read_model(model_name)?;
        let dataset = self.store.read_dataset(dataset_name)?;

        progress.publish("running", Some("scoring".into()));
        let auc = self.operations.evaluate(&model, &dataset)?;
        info!(model = model_name, dataset = dataset_name, auc, "evaluated model");

        progress.publish("recording", None);
        self.record_lineage(ArtifactKind::Evaluation, model_name, |repo| {
            repo.record_evaluation(model_name, dataset_name, auc)
        });

        Ok(WorkflowOutcome::Evaluated {
            model_name: model_name.to_string(),
            dataset_name: dataset_name.to_string(),
            auc,
        })
    }

    fn prune(
        &self,
        model_name: &str,
        dataset_name: &str,
        progress: &ProgressHandle,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        progress.publish("loading", Some(format!("{model_name} on {dataset_name}")));
        let model = self.store.read_model(model_name)?;
        let dataset = self.store.read_dataset(dataset_name)?;

        progress.publish("running", Some("selecting features".into()));
        let blob = self.operations.prune(&model, &dataset)?;

        let pruned_model_name = pruned_name(model_name);
        let path = self.store.write_model(&pruned_model_name, &blob)?;
        info!(pruned = %pruned_model_name, path = %path.display(), "saved pruned model");

        progress.publish("recording", Some(pruned_model_name.clone()));
        self.record_lineage(ArtifactKind::PrunedModel, &pruned_model_name, |repo| {
            repo.record_pruned_model(&pruned_model_name, model_name)
        });

        Ok(WorkflowOutcome::Pruned {
            model_name: model_name.to_string(),
            pruned_model_name,
            dataset_name: dataset_name.to_string(),
        })
    }

    /// Phase 4. The outcome only reaches the log.
    fn record_lineage<T>(
        &self,
        kind: ArtifactKind,
        name: &str,
        write: impl FnOnce(&dyn LineageRepository) -> LineageResult<T>,
    ) {
        if let Err(e) = write(self.lineage.as_ref()) {
            warn!(artifact = %kind, name, error = %e, "failed to log lineage, keeping artifact");
        }
    }

    fn require_dataset(&self, name: &str) -> Result<(), WorkflowError> {
        if name.trim().is_empty() {
            return Err(WorkflowError::MissingArgument("dataset_name"));
        }
        if !self.store.dataset_exists(name) {
            return Err(WorkflowError::not_found(ArtifactKind::Dataset, name));
        }
        Ok(())
    }

    fn require_model(&self, name: &str) -> Result<(), WorkflowError> {
        if name.trim().is_empty() {
            return Err(WorkflowError::MissingArgument("model_name"));
        }
        if !self.store.model_exists(name) {
            return Err(WorkflowError::not_found(ArtifactKind::Model, name));
        }
        Ok(())
    }
}

fn first_non_finite(settings: &MacroSettings) -> Option<(MacroField, f64)> {
    settings
        .iter()
        .find(|(_, value)| !value.is_finite())
        .map(|(field, value)| (*field, *value))
}

impl TaskHandler for WorkflowOrchestrator {
    fn handle(
        &self,
        request: &WorkflowRequest,
        progress: &ProgressHandle,
    ) -> Result<WorkflowOutcome, Classification> {
        self.run(request, progress).map_err(|e| e.classify())
    }
}
