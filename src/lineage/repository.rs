//! The lineage repository contract.
//!
//! Guarantees shared by every implementation:
//! - Each write is atomic: it commits as a whole or leaves the store unchanged.
//! - Names are unique per artifact kind; a second insert fails with
//!   [`LineageError::DuplicateName`].
//! - Foreign-key targets are resolved by name inside the write; a miss fails
//!   with [`LineageError::NotFound`] and nothing is inserted.
//! - Errors propagate to the caller. Deciding to tolerate a failed write is
//!   the workflow layer's business, not the repository's.

use chrono::{DateTime, Utc};

use crate::error::{ArtifactKind, LineageError};

use super::records::{
    DatasetId, DatasetRecord, EvaluationId, EvaluationRecord, MacroSettings, ModelId, ModelRecord,
    PrunedModelId, PrunedModelRecord, Provenance,
};

pub type LineageResult<T> = std::result::Result<T, LineageError>;

pub trait LineageRepository: Send + Sync {
    /// Record a generated dataset. Fails with `DuplicateName` if `name` exists.
    fn record_dataset(
        &self,
        name: &str,
        rows: u64,
        macro_settings: &MacroSettings,
    ) -> LineageResult<DatasetId>;

    /// Record a trained model against an existing dataset.
    ///
    /// `created_at` defaults to now when `None`.
    fn record_model(
        &self,
        name: &str,
        dataset_name: &str,
        created_at: Option<DateTime<Utc>>,
    ) -> LineageResult<ModelId>;

    /// Record an evaluation score. The model is resolved before the dataset.
    fn record_evaluation(
        &self,
        model_name: &str,
        dataset_name: &str,
        auc: f64,
    ) -> LineageResult<EvaluationId>;

    /// Record a pruned model derived from an existing base model.
    fn record_pruned_model(
        &self,
        pruned_name: &str,
        base_model_name: &str,
    ) -> LineageResult<PrunedModelId>;

    fn dataset(&self, name: &str) -> LineageResult<Option<DatasetRecord>>;

    fn model(&self, name: &str) -> LineageResult<Option<ModelRecord>>;

    fn pruned_model(&self, pruned_name: &str) -> LineageResult<Option<PrunedModelRecord>>;

    fn evaluation(&self, id: EvaluationId) -> LineageResult<Option<EvaluationRecord>>;

    /// All evaluations of a model, oldest first.
    fn evaluations_for_model(&self, model_name: &str) -> LineageResult<Vec<EvaluationRecord>>;

    /// Reconstruct the lineage chain of any named artifact.
    ///
    /// Names are looked up as a pruned model first, then a model, then a
    /// dataset, since a pruned name embeds its base model's name.
    fn provenance(&self, name: &str) -> LineageResult<Provenance> {
        if let Some(pruned) = self.pruned_model(name)? {
            let base_model = self.model(&pruned.base_model_name)?.ok_or_else(|| {
                LineageError::NotFound {
                    kind: ArtifactKind::Model,
                    name: pruned.base_model_name.clone(),
                }
            })?;
            let dataset = self.require_dataset(&base_model.dataset_name)?;
            let evaluations = self.evaluations_for_model(&base_model.name)?;
            return Ok(Provenance::PrunedModel {
                pruned,
                base_model,
                dataset,
                evaluations,
            });
        }

        if let Some(model) = self.model(name)? {
            let dataset = self.require_dataset(&model.dataset_name)?;
            let evaluations = self.evaluations_for_model(&model.name)?;
            return Ok(Provenance::Model {
                model,
                dataset,
                evaluations,
            });
        }

        match self.dataset(name)? {
            Some(dataset) => Ok(Provenance::Dataset { dataset }),
            None => Err(LineageError::NotFound {
                kind: ArtifactKind::Dataset,
                name: name.to_string(),
            }),
        }
    }

    #[doc(hidden)]
    fn require_dataset(&self, name: &str) -> LineageResult<DatasetRecord> {
        self.dataset(name)?.ok_or_else(|| LineageError::NotFound {
            kind: ArtifactKind::Dataset,
            name: name.to_string(),
        })
    }
}
