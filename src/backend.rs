//! Storage seams consumed by the metadata engine. [`GraphReader`] is the raw
//! graph query interface, [`RecordStore`] persists the single metadata record.
//! [`SharedGraph`] implements both over the embedded [`SqliteGraph`], so the
//! engine runs against any host that can provide the same two surfaces.

use std::path::Path;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::{
    errors::GraphMetaError,
    graph::{SqliteGraph, scan},
    label_set::LabelSet,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSetTally {
    pub labels: LabelSet,
    pub entities: i64,
    pub inbound: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelProperties {
    pub label: String,
    pub keys: Vec<String>,
}

pub trait GraphReader: Send + Sync {
    fn is_ready(&self) -> bool;
    fn labels_of(&self, id: i64) -> Result<LabelSet, GraphMetaError>;
    fn property_keys_of(&self, id: i64) -> Result<Vec<String>, GraphMetaError>;
    fn label_set_tallies(&self) -> Result<Vec<LabelSetTally>, GraphMetaError>;
    fn label_property_keys(&self) -> Result<Vec<LabelProperties>, GraphMetaError>;
}

pub trait RecordStore: Send + Sync {
    fn get_or_create_record(&self, label: &str) -> Result<i64, GraphMetaError>;
    fn find_record(&self, label: &str) -> Result<Option<i64>, GraphMetaError>;
    fn read_field(&self, record_id: i64, field: &str) -> Result<Option<String>, GraphMetaError>;
    fn replace_field(
        &self,
        record_id: i64,
        field: &str,
        document: &str,
    ) -> Result<(), GraphMetaError>;
}

pub trait MetadataBackend: GraphReader + RecordStore + 'static {}

impl<T> MetadataBackend for T where T: GraphReader + RecordStore + 'static {}

/// Thread-safe handle over one [`SqliteGraph`] connection.
#[derive(Clone)]
pub struct SharedGraph {
    graph: Arc<Mutex<SqliteGraph>>,
    available: Arc<AtomicBool>,
}

impl SharedGraph {
    pub fn new(graph: SqliteGraph) -> Self {
        Self {
            graph: Arc::new(Mutex::new(graph)),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn in_memory() -> Result<Self, GraphMetaError> {
        Ok(Self::new(SqliteGraph::open_in_memory()?))
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, GraphMetaError> {
        Ok(Self::new(SqliteGraph::open(path)?))
    }

    pub fn lock(&self) -> MutexGuard<'_, SqliteGraph> {
        self.graph.lock()
    }

    /// Hosts flip this while the underlying store is starting or stopping.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }
}

impl GraphReader for SharedGraph {
    fn is_ready(&self) -> bool {
        self.available.load(Ordering::Acquire) && self.graph.lock().ping()
    }

    fn labels_of(&self, id: i64) -> Result<LabelSet, GraphMetaError> {
        self.graph.lock().labels_of(id)
    }

    fn property_keys_of(&self, id: i64) -> Result<Vec<String>, GraphMetaError> {
        self.graph.lock().property_keys_of(id)
    }

    fn label_set_tallies(&self) -> Result<Vec<LabelSetTally>, GraphMetaError> {
        scan::label_set_tallies(self.graph.lock().connection())
    }

    fn label_property_keys(&self) -> Result<Vec<LabelProperties>, GraphMetaError> {
        scan::label_property_keys(self.graph.lock().connection())
    }
}

impl RecordStore for SharedGraph {
    fn get_or_create_record(&self, label: &str) -> Result<i64, GraphMetaError> {
        self.graph.lock().get_or_create_record(label)
    }

    fn find_record(&self, label: &str) -> Result<Option<i64>, GraphMetaError> {
        self.graph.lock().find_record(label)
    }

    fn read_field(&self, record_id: i64, field: &str) -> Result<Option<String>, GraphMetaError> {
        self.graph.lock().read_record_field(record_id, field)
    }

    fn replace_field(
        &self,
        record_id: i64,
        field: &str,
        document: &str,
    ) -> Result<(), GraphMetaError> {
        self.graph.lock().write_record_field(record_id, field, document)
    }
}
