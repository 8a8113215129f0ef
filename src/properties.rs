use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::{
    backend::MetadataBackend,
    errors::GraphMetaError,
    record::{DEFAULT_PROPERTY_TYPE, MetadataStore, PropertyIndex},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    Written,
    Clean,
    Debounced,
}

#[derive(Default)]
struct IndexState {
    index: PropertyIndex,
    last_mutation: Option<Instant>,
    generation: u64,
    synced_generation: u64,
}

impl IndexState {
    fn is_dirty(&self) -> bool {
        self.generation != self.synced_generation
    }
}

pub struct PropertyAggregator<B> {
    store: Arc<MetadataStore<B>>,
    debounce: Duration,
    state: RwLock<IndexState>,
}

impl<B: MetadataBackend> PropertyAggregator<B> {
    pub fn new(store: Arc<MetadataStore<B>>, debounce: Duration) -> Self {
        Self {
            store,
            debounce,
            state: RwLock::new(IndexState::default()),
        }
    }

    pub fn snapshot(&self) -> PropertyIndex {
        self.state.read().index.clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.state.read().is_dirty()
    }

    pub fn seed(&self, index: PropertyIndex) {
        let mut state = self.state.write();
        state.index = index;
        state.synced_generation = state.generation;
    }

    /// Returns `true` when the key was new for at least one label.
    pub fn on_property_assigned(&self, id: i64, key: &str) -> Result<bool, GraphMetaError> {
        if self.store.is_record_entity(id) {
            return Ok(false);
        }
        let labels = self.store.backend().labels_of(id)?;
        let labels: Vec<&str> = labels.iter().collect();
        Ok(self.absorb(&labels, &[key.to_string()]))
    }

    pub fn on_entity_created(&self, id: i64) -> Result<bool, GraphMetaError> {
        if self.store.is_record_entity(id) {
            return Ok(false);
        }
        let backend = self.store.backend();
        let labels = backend.labels_of(id)?;
        let keys = backend.property_keys_of(id)?;
        let labels: Vec<&str> = labels.iter().collect();
        Ok(self.absorb(&labels, &keys))
    }

    pub fn on_label_assigned(&self, id: i64, label: &str) -> Result<bool, GraphMetaError> {
        if self.store.is_record_entity(id) {
            return Ok(false);
        }
        let keys = self.store.backend().property_keys_of(id)?;
        Ok(self.absorb(&[label], &keys))
    }

    /// Writes the index to the record. Without `force` the write only happens
    /// when something changed and the last mutation is older than the
    /// debounce window.
    pub fn sync(&self, force: bool) -> Result<SyncOutcome, GraphMetaError> {
        let (index, generation) = {
            let state = self.state.read();
            if !force {
                if !state.is_dirty() {
                    return Ok(SyncOutcome::Clean);
                }
                if state
                    .last_mutation
                    .is_some_and(|at| at.elapsed() < self.debounce)
                {
                    return Ok(SyncOutcome::Debounced);
                }
            }
            (state.index.clone(), state.generation)
        };
        self.store.replace_properties(&index)?;
        let mut state = self.state.write();
        state.synced_generation = state.synced_generation.max(generation);
        debug!(labels = index.len(), force, "properties.sync");
        Ok(SyncOutcome::Written)
    }

    pub fn full_refresh(&self) -> Result<PropertyIndex, GraphMetaError> {
        let scanned = self.store.backend().label_property_keys()?;
        let persisted = self.store.properties().unwrap_or_else(|err| {
            warn!(error = %err, "properties.refresh.persisted_unreadable");
            PropertyIndex::new()
        });

        let mut index = PropertyIndex::new();
        for row in scanned {
            if row.label == self.store.label() {
                continue;
            }
            let known = persisted.get(&row.label);
            let props = index.entry(row.label.clone()).or_default();
            for key in row.keys {
                let kind = known
                    .and_then(|types| types.get(&key))
                    .filter(|kind| kind.as_str() != DEFAULT_PROPERTY_TYPE)
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_PROPERTY_TYPE.to_string());
                props.insert(key, kind);
            }
        }

        {
            let mut state = self.state.write();
            state.index = index.clone();
            state.generation += 1;
        }
        self.sync(true)?;
        info!(labels = index.len(), "properties.refresh");
        Ok(index)
    }

    fn absorb(&self, labels: &[&str], keys: &[String]) -> bool {
        let reserved = self.store.label();
        let mut state = self.state.write();
        state.last_mutation = Some(Instant::now());
        let mut changed = false;
        for label in labels.iter().filter(|label| **label != reserved) {
            if !state.index.contains_key(*label) {
                state.index.insert((*label).to_string(), Default::default());
                changed = true;
            }
            if let Some(props) = state.index.get_mut(*label) {
                for key in keys {
                    if !props.contains_key(key) {
                        props.insert(key.clone(), DEFAULT_PROPERTY_TYPE.to_string());
                        changed = true;
                    }
                }
            }
        }
        if changed {
            state.generation += 1;
        }
        changed
    }
}
