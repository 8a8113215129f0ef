use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{errors::GraphMetaError, record::MetadataRecord};

pub const SNAPSHOT_FILE: &str = "metadata.json";

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotDocument {
    record_label: String,
    record: MetadataRecord,
}

#[derive(Clone, Debug)]
pub struct SnapshotCache {
    dir: PathBuf,
}

impl SnapshotCache {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    pub fn load(&self, record_label: &str) -> Result<Option<MetadataRecord>, GraphMetaError> {
        let path = self.path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(cache_error(&path, err)),
        };
        let document: SnapshotDocument = serde_json::from_str(&raw)
            .map_err(|e| GraphMetaError::cache(format!("{}: {e}", path.display())))?;
        if document.record_label != record_label {
            debug!(
                found = %document.record_label,
                expected = record_label,
                "cache.snapshot.label_mismatch"
            );
            return Ok(None);
        }
        Ok(Some(document.record))
    }

    pub fn store(&self, record_label: &str, record: &MetadataRecord) -> Result<(), GraphMetaError> {
        fs::create_dir_all(&self.dir).map_err(|err| cache_error(&self.dir, err))?;
        let document = SnapshotDocument {
            record_label: record_label.to_string(),
            record: record.clone(),
        };
        let encoded = serde_json::to_string_pretty(&document)
            .map_err(|e| GraphMetaError::encode(e.to_string()))?;
        let path = self.path();
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, encoded).map_err(|err| cache_error(&staging, err))?;
        fs::rename(&staging, &path).map_err(|err| cache_error(&path, err))?;
        debug!(path = %path.display(), entries = record.counts.len(), "cache.snapshot.stored");
        Ok(())
    }
}

fn cache_error(path: &Path, err: std::io::Error) -> GraphMetaError {
    GraphMetaError::cache(format!("{}: {err}", path.display()))
}
