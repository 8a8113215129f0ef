//! The persisted metadata record and the critical section guarding it.
//!
//! The record is a single graph entity carrying the reserved label. Its
//! `counts` and `properties` fields each hold one JSON document; both are only
//! ever read and replaced whole. Every read-modify-write of the record goes
//! through [`MetadataStore`], which serializes writers behind one mutex.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    backend::MetadataBackend,
    counts::CountOutcome,
    errors::GraphMetaError,
    label_set::{CanonicalKey, LabelSet},
};

pub const COUNTS_FIELD: &str = "counts";
pub const PROPERTIES_FIELD: &str = "properties";
pub const DEFAULT_PROPERTY_TYPE: &str = "Object";

/// Stamp carried by entries produced from a full recount.
pub const RECOUNT_TX: i64 = 0;
pub const RECOUNT_ENTITY: i64 = -1;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountEntry {
    pub labels: LabelSet,
    pub count: i64,
    /// Inbound relationships; may dip below zero until the next recount.
    pub relations: i64,
    pub last_tx: i64,
    pub last_entity: i64,
}

impl CountEntry {
    pub fn new(labels: LabelSet, count: i64, relations: i64, last_tx: i64, last_entity: i64) -> Self {
        Self {
            labels,
            count,
            relations,
            last_tx,
            last_entity,
        }
    }

    pub fn stamped_by(&self, tx_id: i64, entity_id: i64) -> bool {
        self.last_tx == tx_id && self.last_entity == entity_id
    }

    pub fn stamp(&mut self, tx_id: i64, entity_id: i64) {
        self.last_tx = tx_id;
        self.last_entity = entity_id;
    }
}

pub type CountsMap = BTreeMap<CanonicalKey, CountEntry>;

/// label -> property name -> property type
pub type PropertyIndex = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub counts: CountsMap,
    pub properties: PropertyIndex,
}

pub fn encode_counts(counts: &CountsMap) -> Result<String, GraphMetaError> {
    serde_json::to_string(counts).map_err(|e| GraphMetaError::encode(format!("counts: {e}")))
}

pub fn decode_counts(raw: &str) -> Result<CountsMap, GraphMetaError> {
    serde_json::from_str(raw).map_err(|e| GraphMetaError::corrupt_record(format!("counts: {e}")))
}

pub fn encode_properties(index: &PropertyIndex) -> Result<String, GraphMetaError> {
    let document: BTreeMap<&str, Vec<PropertyInfo>> = index
        .iter()
        .map(|(label, props)| {
            let infos = props
                .iter()
                .map(|(name, kind)| PropertyInfo {
                    name: name.clone(),
                    kind: kind.clone(),
                })
                .collect();
            (label.as_str(), infos)
        })
        .collect();
    serde_json::to_string(&document).map_err(|e| GraphMetaError::encode(format!("properties: {e}")))
}

pub fn decode_properties(raw: &str) -> Result<PropertyIndex, GraphMetaError> {
    let document: BTreeMap<String, Vec<PropertyInfo>> = serde_json::from_str(raw)
        .map_err(|e| GraphMetaError::corrupt_record(format!("properties: {e}")))?;
    Ok(document
        .into_iter()
        .map(|(label, infos)| {
            let props = infos.into_iter().map(|info| (info.name, info.kind)).collect();
            (label, props)
        })
        .collect())
}

pub struct MetadataStore<B> {
    backend: Arc<B>,
    label: String,
    write_lock: Mutex<()>,
}

impl<B: MetadataBackend> MetadataStore<B> {
    pub fn new<L: Into<String>>(backend: Arc<B>, label: L) -> Self {
        Self {
            backend,
            label: label.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// The reserved label marking the record entity.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn ensure_record(&self) -> Result<i64, GraphMetaError> {
        self.backend.get_or_create_record(&self.label)
    }

    pub fn record_id(&self) -> Result<Option<i64>, GraphMetaError> {
        self.backend.find_record(&self.label)
    }

    /// Whether `id` is the record entity itself. Lookup failures answer `false`
    /// and leave exclusion to the reserved-label check.
    pub fn is_record_entity(&self, id: i64) -> bool {
        matches!(self.record_id(), Ok(Some(record)) if record == id)
    }

    /// Whether a label-set takes part in aggregation at all.
    pub fn is_countable(&self, labels: &LabelSet) -> bool {
        !labels.is_empty() && !labels.contains(&self.label)
    }

    pub fn counts(&self) -> Result<CountsMap, GraphMetaError> {
        let Some(record) = self.record_id()? else {
            return Ok(CountsMap::new());
        };
        match self.backend.read_field(record, COUNTS_FIELD)? {
            Some(raw) => decode_counts(&raw),
            None => Ok(CountsMap::new()),
        }
    }

    pub fn properties(&self) -> Result<PropertyIndex, GraphMetaError> {
        let Some(record) = self.record_id()? else {
            return Ok(PropertyIndex::new());
        };
        match self.backend.read_field(record, PROPERTIES_FIELD)? {
            Some(raw) => decode_properties(&raw),
            None => Ok(PropertyIndex::new()),
        }
    }

    /// The record as persisted, or `None` when there is no record or it never
    /// received a counts document.
    pub fn load_existing(&self) -> Result<Option<MetadataRecord>, GraphMetaError> {
        let Some(record) = self.record_id()? else {
            return Ok(None);
        };
        let Some(raw) = self.backend.read_field(record, COUNTS_FIELD)? else {
            return Ok(None);
        };
        let counts = decode_counts(&raw)?;
        let properties = match self.backend.read_field(record, PROPERTIES_FIELD)? {
            Some(raw) => decode_properties(&raw)?,
            None => PropertyIndex::new(),
        };
        Ok(Some(MetadataRecord { counts, properties }))
    }

    pub fn load(&self) -> Result<MetadataRecord, GraphMetaError> {
        Ok(MetadataRecord {
            counts: self.counts()?,
            properties: self.properties()?,
        })
    }

    /// Read-modify-write of the counts field under the writer lock. The field
    /// is written back only when `apply` reports [`CountOutcome::Applied`]. A
    /// missing record or field fails the update; the next recount recreates it.
    pub fn update_counts<F>(&self, apply: F) -> Result<CountOutcome, GraphMetaError>
    where
        F: FnOnce(&mut CountsMap) -> CountOutcome,
    {
        let _guard = self.write_lock.lock();
        let record = self
            .record_id()?
            .ok_or_else(|| GraphMetaError::not_found(format!("metadata record '{}'", self.label)))?;
        let raw = self
            .backend
            .read_field(record, COUNTS_FIELD)?
            .ok_or_else(|| GraphMetaError::not_found("metadata counts field"))?;
        let mut counts = decode_counts(&raw)?;
        let outcome = apply(&mut counts);
        if outcome == CountOutcome::Applied {
            self.backend
                .replace_field(record, COUNTS_FIELD, &encode_counts(&counts)?)?;
        }
        Ok(outcome)
    }

    /// Replaces the whole counts map, creating the record if needed.
    pub fn replace_counts(&self, counts: &CountsMap) -> Result<(), GraphMetaError> {
        let document = encode_counts(counts)?;
        let _guard = self.write_lock.lock();
        let record = self.ensure_record()?;
        self.backend.replace_field(record, COUNTS_FIELD, &document)?;
        debug!(entries = counts.len(), "record.counts.replaced");
        Ok(())
    }

    pub fn replace_properties(&self, index: &PropertyIndex) -> Result<(), GraphMetaError> {
        let document = encode_properties(index)?;
        let _guard = self.write_lock.lock();
        let record = self.ensure_record()?;
        self.backend
            .replace_field(record, PROPERTIES_FIELD, &document)?;
        debug!(labels = index.len(), "record.properties.replaced");
        Ok(())
    }
}
