mod records;
mod repository;
mod sqlite;

pub use records::{
    DatasetId, DatasetRecord, EvaluationId, EvaluationRecord, MacroField, MacroSettings, ModelId,
    ModelRecord, PrunedModelId, PrunedModelRecord, Provenance,
};
pub use repository::{LineageRepository, LineageResult};
pub use sqlite::{LineageCounts, SqliteLineage};
