//! Lineage record types.
//!
//! Every record carries both the surrogate ids of its foreign keys and the
//! names they resolve to, so callers never need a second lookup to follow
//! an edge of the lineage graph.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! row_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(DatasetId);
row_id!(ModelId);
row_id!(EvaluationId);
row_id!(PrunedModelId);

/// The macro-economic inputs a dataset is generated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacroField {
    DebtRatio,
    Delinquency,
    InterestRate,
}

impl MacroField {
    pub const ALL: [MacroField; 3] = [
        MacroField::DebtRatio,
        MacroField::Delinquency,
        MacroField::InterestRate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MacroField::DebtRatio => "debt_ratio",
            MacroField::Delinquency => "delinquency",
            MacroField::InterestRate => "interest_rate",
        }
    }
}

impl fmt::Display for MacroField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Macro field values keyed by field, serialized as `{"debt_ratio": 0.5, ...}`.
pub type MacroSettings = BTreeMap<MacroField, f64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub id: DatasetId,
    pub name: String,
    pub rows: u64,
    #[serde(rename = "macro")]
    pub macro_settings: MacroSettings,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub id: ModelId,
    pub name: String,
    pub dataset_id: DatasetId,
    pub dataset_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub id: EvaluationId,
    pub model_id: ModelId,
    pub model_name: String,
    pub dataset_id: DatasetId,
    pub dataset_name: String,
    pub auc: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrunedModelRecord {
    pub id: PrunedModelId,
    pub pruned_name: String,
    pub base_model_id: ModelId,
    pub base_model_name: String,
    pub created_at: DateTime<Utc>,
}

/// The reconstructed lineage chain of one named artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "artifact", rename_all = "snake_case")]
pub enum Provenance {
    Dataset {
        dataset: DatasetRecord,
    },
    Model {
        model: ModelRecord,
        dataset: DatasetRecord,
        evaluations: Vec<EvaluationRecord>,
    },
    PrunedModel {
        pruned: PrunedModelRecord,
        base_model: ModelRecord,
        dataset: DatasetRecord,
        evaluations: Vec<EvaluationRecord>,
    },
}

impl Provenance {
    /// The dataset at the root of the chain.
    pub fn root_dataset(&self) -> &DatasetRecord {
        match self {
            Provenance::Dataset { dataset }
            | Provenance::Model { dataset, .. }
            | Provenance::PrunedModel { dataset, .. } => dataset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macro_settings_serialize_with_field_names() {
        let settings: MacroSettings = [
            (MacroField::DebtRatio, 0.5),
            (MacroField::Delinquency, 0.1),
            (MacroField::InterestRate, 0.02),
        ]
        .into_iter()
        .collect();

        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"debt_ratio": 0.5, "delinquency": 0.1, "interest_rate": 0.02})
        );
    }

    #[test]
    fn macro_settings_reject_unknown_fields() {
        let parsed = serde_json::from_str::<MacroSettings>(r#"{"gdp_growth": 0.01}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn macro_field_display_matches_serde_name() {
        for field in MacroField::ALL {
            let json = serde_json::to_value(field).unwrap();
            assert_eq!(json, serde_json::Value::String(field.to_string()));
        }
    }

    #[test]
    fn provenance_is_tagged_by_artifact() {
        let dataset = DatasetRecord {
            id: DatasetId(1),
            name: "dataset_0badf00d".into(),
            rows: 10,
            macro_settings: MacroSettings::new(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(Provenance::Dataset {
            dataset: dataset.clone(),
        })
        .unwrap();
        assert_eq!(json["artifact"], "dataset");
        assert_eq!(json["dataset"]["name"], "dataset_0badf00d");
        assert!(json["dataset"].get("macro").is_some());
    }
}
