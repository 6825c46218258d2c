//! Physical artifact storage.
//!
//! Blobs live under the storage root as `datasets/<name>.parquet` and
//! `models/<name>.pkl`. The artifact name is the join key with the lineage
//! store: the file path and the lineage row are two views of the same name.
//! Blob contents are opaque here.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::error::{ArtifactKind, WorkflowError};

const DATASET_DIR: &str = "datasets";
const MODEL_DIR: &str = "models";
const DATASET_EXT: &str = "parquet";
const MODEL_EXT: &str = "pkl";
const PRUNED_SUFFIX: &str = "_pruned";

/// Fresh-name draws before giving up on finding an unused name.
const MAX_NAME_DRAWS: usize = 8;

/// Filesystem layout for artifact blobs.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    /// Directory holding `datasets/` and `models/`.
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the `datasets/` and `models/` directories if missing.
    pub fn ensure_layout(&self) -> io::Result<()> {
        fs::create_dir_all(self.root.join(DATASET_DIR))?;
        fs::create_dir_all(self.root.join(MODEL_DIR))?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dataset_path(&self, name: &str) -> PathBuf {
        self.root
            .join(DATASET_DIR)
            .join(format!("{name}.{DATASET_EXT}"))
    }

    /// Path of a model blob. Pruned models share the models directory.
    pub fn model_path(&self, name: &str) -> PathBuf {
        self.root.join(MODEL_DIR).join(format!("{name}.{MODEL_EXT}"))
    }

    pub fn dataset_exists(&self, name: &str) -> bool {
        self.dataset_path(name).is_file()
    }

    pub fn model_exists(&self, name: &str) -> bool {
        self.model_path(name).is_file()
    }

    pub fn read_dataset(&self, name: &str) -> io::Result<Vec<u8>> {
        fs::read(self.dataset_path(name))
    }

    pub fn read_model(&self, name: &str) -> io::Result<Vec<u8>> {
        fs::read(self.model_path(name))
    }

    pub fn write_dataset(&self, name: &str, blob: &[u8]) -> io::Result<PathBuf> {
        write_blob(self.dataset_path(name), blob)
    }

    pub fn write_model(&self, name: &str, blob: &[u8]) -> io::Result<PathBuf> {
        write_blob(self.model_path(name), blob)
    }

    /// Derive an unused `<kind>_<8 lowercase hex>` name.
    ///
    /// Draws again when a blob of that name already exists on disk.
    pub fn fresh_name(&self, kind: ArtifactKind) -> Result<String, WorkflowError> {
        for _ in 0..MAX_NAME_DRAWS {
            let name = random_name(kind);
            let taken = match kind {
                ArtifactKind::Dataset => self.dataset_exists(&name),
                _ => self.model_exists(&name),
            };
            if !taken {
                return Ok(name);
            }
            tracing::debug!(%name, "artifact name already taken, drawing again");
        }
        Err(WorkflowError::NameSpaceExhausted(kind))
    }
}

/// The name a pruned model derived from `model_name` is stored under.
pub fn pruned_name(model_name: &str) -> String {
    format!("{model_name}{PRUNED_SUFFIX}")
}

fn random_name(kind: ArtifactKind) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}_{}", kind.prefix(), &hex[..8])
}

// Each writer gets its own temp file in the target directory, then renames it
// into place, so readers never see a partial blob and concurrent writers of
// one name never share a temp path.
fn write_blob(path: PathBuf, blob: &[u8]) -> io::Result<PathBuf> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(blob)?;
    tmp.as_file().sync_all()?;
    tmp.persist(&path).map_err(|e| e.error)?;
    Ok(path)
}
