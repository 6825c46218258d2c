//! Process wiring: one of each component, built from [`PipelineConfig`].

use std::sync::Arc;

use tracing::info;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::lineage::{LineageRepository, SqliteLineage};
use crate::operations::{ArtifactOperations, StubOperations};
use crate::queue::TaskQueue;
use crate::status::StatusReporter;
use crate::storage::ArtifactStore;
use crate::submit::Submitter;
use crate::workflow::WorkflowOrchestrator;

/// The running pipeline. Must be started inside a tokio runtime.
pub struct Pipeline {
    pub lineage: Arc<SqliteLineage>,
    pub queue: TaskQueue,
    pub submitter: Submitter,
    pub reporter: StatusReporter,
}

impl Pipeline {
    /// Start with the deterministic stub operations.
    pub fn start(config: &PipelineConfig) -> Result<Self, PipelineError> {
        Self::start_with(config, Arc::new(StubOperations))
    }

    pub fn start_with(
        config: &PipelineConfig,
        operations: Arc<dyn ArtifactOperations>,
    ) -> Result<Self, PipelineError> {
        let store = ArtifactStore::new(&config.storage_dir);
        store.ensure_layout()?;

        if let Some(parent) = config.database_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let lineage = Arc::new(SqliteLineage::open(&config.database_path)?);
        let repository: Arc<dyn LineageRepository> = lineage.clone();

        let orchestrator = Arc::new(WorkflowOrchestrator::new(store, repository, operations));
        let queue = TaskQueue::start(config.workers, config.retry_policy(), orchestrator.clone())
            .with_retention(config.task_retention());
        info!(
            storage = %config.storage_dir.display(),
            database = %config.database_path.display(),
            workers = config.workers,
            max_retries = config.max_retries,
            "pipeline started"
        );

        Ok(Self {
            lineage,
            submitter: Submitter::new(orchestrator, queue.clone()),
            reporter: StatusReporter::new(queue.clone()),
            queue,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::lineage::{MacroField, MacroSettings, Provenance};
    use crate::queue::TaskId;
    use crate::status::StatusResponse;
    use crate::workflow::WorkflowRequest;

    fn config(dir: &tempfile::TempDir) -> PipelineConfig {
        PipelineConfig {
            storage_dir: dir.path().join("storage"),
            database_path: dir.path().join("db").join("lineage.db"),
            workers: 2,
            retry_backoff_ms: 1,
            ..Default::default()
        }
    }

    async fn run(pipeline: &Pipeline, request: WorkflowRequest) -> StatusResponse {
        let submission = pipeline.submitter.submit(request).unwrap();
        let id: TaskId = submission.task_id;
        pipeline
            .reporter
            .wait_for_terminal(&id, Duration::from_millis(5), |_| async {})
            .await
    }

    fn field(response: &StatusResponse, key: &str) -> String {
        response.result.as_ref().unwrap()[key]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn full_pipeline_records_provenance() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::start(&config(&dir)).unwrap();

        let overrides: MacroSettings = [
            (MacroField::DebtRatio, 0.5),
            (MacroField::Delinquency, 0.1),
            (MacroField::InterestRate, 0.02),
        ]
        .into_iter()
        .collect();
        let generated = run(
            &pipeline,
            WorkflowRequest::Generate {
                rows: 1000,
                macro_overrides: overrides.clone(),
            },
        )
        .await;
        assert_eq!(generated.status, "SUCCESS");
        let dataset = field(&generated, "dataset_name");

        let trained = run(
            &pipeline,
            WorkflowRequest::Train {
                dataset_name: dataset.clone(),
            },
        )
        .await;
        assert_eq!(trained.status, "SUCCESS");
        let model = field(&trained, "model_name");

        let evaluated = run(
            &pipeline,
            WorkflowRequest::Evaluate {
                model_name: model.clone(),
                dataset_name: dataset.clone(),
            },
        )
        .await;
        assert_eq!(evaluated.result.as_ref().unwrap()["auc"], 0.5);

        let pruned = run(
            &pipeline,
            WorkflowRequest::Prune {
                model_name: model.clone(),
                dataset_name: dataset.clone(),
            },
        )
        .await;
        assert_eq!(field(&pruned, "pruned_model_name"), format!("{model}_pruned"));

        let counts = pipeline.lineage.counts().unwrap();
        assert_eq!(
            (counts.datasets, counts.models, counts.evaluations, counts.pruned_models),
            (1, 1, 1, 1)
        );

        match pipeline.lineage.provenance(&format!("{model}_pruned")).unwrap() {
            Provenance::PrunedModel {
                base_model,
                dataset,
                evaluations,
                ..
            } => {
                assert_eq!(base_model.name, model);
                assert_eq!(dataset.macro_settings, overrides);
                assert_eq!(evaluations.len(), 1);
            }
            other => panic!("unexpected provenance {other:?}"),
        }
    }

    #[tokio::test]
    async fn lineage_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = {
            let pipeline = Pipeline::start(&config(&dir)).unwrap();
            let generated = run(
                &pipeline,
                WorkflowRequest::Generate {
                    rows: 5,
                    macro_overrides: MacroSettings::new(),
                },
            )
            .await;
            field(&generated, "dataset_name")
        };

        let reopened = SqliteLineage::open(&config(&dir).database_path).unwrap();
        let record = reopened.dataset(&dataset).unwrap().unwrap();
        assert_eq!(record.rows, 5);
    }
}
