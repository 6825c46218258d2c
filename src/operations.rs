//! Artifact operations: the statistical routines the workflows invoke.
//!
//! The routines themselves (synthesising borrowers, fitting a classifier,
//! scoring AUC, selecting features, fetching macro series) live outside this
//! crate. [`ArtifactOperations`] is the seam; blobs cross it as opaque bytes.

use serde::{Deserialize, Serialize};

use crate::error::OperationError;
use crate::lineage::{MacroField, MacroSettings};

/// Output of dataset generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedDataset {
    pub blob: Vec<u8>,
    pub rows: u64,
}

pub trait ArtifactOperations: Send + Sync {
    /// Fetch current values for the macro fields the caller did not supply.
    fn fetch_macro(&self, missing: &[MacroField]) -> Result<MacroSettings, OperationError>;

    fn generate(
        &self,
        macro_settings: &MacroSettings,
        rows: u64,
    ) -> Result<GeneratedDataset, OperationError>;

    fn train(&self, dataset: &[u8]) -> Result<Vec<u8>, OperationError>;

    /// Score `model` on `dataset`, returning the ROC AUC.
    fn evaluate(&self, model: &[u8], dataset: &[u8]) -> Result<f64, OperationError>;

    fn prune(&self, model: &[u8], dataset: &[u8]) -> Result<Vec<u8>, OperationError>;
}

/// Deterministic stand-in used when no real ML backend is wired in.
///
/// Blobs are small JSON documents describing their inputs, and every model
/// scores a chance-level AUC of 0.5.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubOperations;

#[derive(Debug, Serialize, Deserialize)]
struct StubDataset {
    rows: u64,
    #[serde(rename = "macro")]
    macro_settings: MacroSettings,
}

#[derive(Debug, Serialize, Deserialize)]
struct StubModel {
    estimator: String,
    trained_rows: u64,
    pruned: bool,
}

const CHANCE_AUC: f64 = 0.5;

fn baseline(field: MacroField) -> f64 {
    match field {
        MacroField::DebtRatio => 9.8,
        MacroField::Delinquency => 3.0,
        MacroField::InterestRate => 5.3,
    }
}

fn decode<'a, T: Deserialize<'a>>(blob: &'a [u8], what: &str) -> Result<T, OperationError> {
    serde_json::from_slice(blob)
        .map_err(|e| OperationError::Failed(format!("unreadable {what} blob: {e}")))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, OperationError> {
    serde_json::to_vec(value).map_err(|e| OperationError::Failed(e.to_string()))
}

impl ArtifactOperations for StubOperations {
    fn fetch_macro(&self, missing: &[MacroField]) -> Result<MacroSettings, OperationError> {
        Ok(missing.iter().map(|&f| (f, baseline(f))).collect())
    }

    fn generate(
        &self,
        macro_settings: &MacroSettings,
        rows: u64,
    ) -> Result<GeneratedDataset, OperationError> {
        let blob = encode(&StubDataset {
            rows,
            macro_settings: macro_settings.clone(),
        })?;
        Ok(GeneratedDataset { blob, rows })
    }

    fn train(&self, dataset: &[u8]) -> Result<Vec<u8>, OperationError> {
        let dataset: StubDataset = decode(dataset, "dataset")?;
        encode(&StubModel {
            estimator: "logistic_regression".into(),
            trained_rows: dataset.rows,
            pruned: false,
        })
    }

    fn evaluate(&self, model: &[u8], dataset: &[u8]) -> Result<f64, OperationError> {
        decode::<StubModel>(model, "model")?;
        decode::<StubDataset>(dataset, "dataset")?;
        Ok(CHANCE_AUC)
    }

    fn prune(&self, model: &[u8], dataset: &[u8]) -> Result<Vec<u8>, OperationError> {
        let mut model: StubModel = decode(model, "model")?;
        let dataset: StubDataset = decode(dataset, "dataset")?;
        model.pruned = true;
        model.trained_rows = dataset.rows;
        encode(&model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_macro_fills_only_requested_fields() {
        let fetched = StubOperations
            .fetch_macro(&[MacroField::InterestRate])
            .unwrap();
        assert_eq!(fetched.len(), 1);
        assert!(fetched.contains_key(&MacroField::InterestRate));
    }

    #[test]
    fn stub_pipeline_runs_end_to_end() {
        let ops = StubOperations;
        let macro_settings = ops.fetch_macro(&MacroField::ALL).unwrap();
        let dataset = ops.generate(&macro_settings, 250).unwrap();
        assert_eq!(dataset.rows, 250);

        let model = ops.train(&dataset.blob).unwrap();
        assert_eq!(ops.evaluate(&model, &dataset.blob).unwrap(), CHANCE_AUC);

        let pruned = ops.prune(&model, &dataset.blob).unwrap();
        let pruned: StubModel = serde_json::from_slice(&pruned).unwrap();
        assert!(pruned.pruned);
    }

    #[test]
    fn train_rejects_foreign_blob() {
        let err = StubOperations.train(b"PAR1 not json").unwrap_err();
        assert!(matches!(err, OperationError::Failed(_)));
    }
}
