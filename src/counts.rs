//! Entity and inbound-relationship counts per exact label-set.
//!
//! Each incremental operation is one read-modify-write of the record's counts
//! field. Entries are keyed by [`CanonicalKey`], created at count 1 and removed
//! as soon as their count drops to zero. The `(last_tx, last_entity)` stamp on
//! an entry marks the last entity transition applied to it; seeing the same
//! stamp again means the event was already applied and is dropped.

use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    backend::MetadataBackend,
    errors::GraphMetaError,
    label_set::{CanonicalKey, LabelSet},
    record::{CountEntry, CountsMap, MetadataStore, RECOUNT_ENTITY, RECOUNT_TX},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CountOutcome {
    /// The counts map changed and was written back.
    Applied,
    /// The same `(tx, entity)` transition was already applied.
    Duplicate,
    /// Nothing to do: excluded entity, unlabeled entity or unknown entry.
    Ignored,
}

pub struct CountsAggregator<B> {
    store: Arc<MetadataStore<B>>,
}

impl<B: MetadataBackend> CountsAggregator<B> {
    pub fn new(store: Arc<MetadataStore<B>>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<MetadataStore<B>> {
        &self.store
    }

    pub fn snapshot(&self) -> Result<CountsMap, GraphMetaError> {
        self.store.counts()
    }

    pub fn on_entity_created(
        &self,
        id: i64,
        labels: &LabelSet,
        tx_id: i64,
    ) -> Result<CountOutcome, GraphMetaError> {
        let Some(key) = self.countable_key(id, labels) else {
            return Ok(CountOutcome::Ignored);
        };
        self.store.update_counts(|counts| {
            if counts.get(&key).is_some_and(|entry| entry.stamped_by(tx_id, id)) {
                return CountOutcome::Duplicate;
            }
            increment(counts, key, labels, tx_id, id);
            CountOutcome::Applied
        })
    }

    /// `labels` is the entity's label-set as it was before the deleting
    /// transaction; the live graph can no longer answer for it.
    pub fn on_entity_deleted(
        &self,
        id: i64,
        labels: &LabelSet,
        tx_id: i64,
    ) -> Result<CountOutcome, GraphMetaError> {
        let Some(key) = self.countable_key(id, labels) else {
            return Ok(CountOutcome::Ignored);
        };
        self.store.update_counts(|counts| {
            if counts.get(&key).is_some_and(|entry| entry.stamped_by(tx_id, id)) {
                return CountOutcome::Duplicate;
            }
            if decrement(counts, &key, tx_id, id) {
                CountOutcome::Applied
            } else {
                CountOutcome::Ignored
            }
        })
    }

    /// Moves the entity from `current - label` to its current label-set.
    pub fn on_label_assigned(
        &self,
        id: i64,
        label: &str,
        tx_id: i64,
    ) -> Result<CountOutcome, GraphMetaError> {
        if label == self.store.label() {
            return Ok(CountOutcome::Ignored);
        }
        let current = self.store.backend().labels_of(id)?;
        let previous = current.without(label);
        self.transition(id, &previous, &current, tx_id)
    }

    /// Moves the entity from `current + label` to its current label-set.
    pub fn on_label_removed(
        &self,
        id: i64,
        label: &str,
        tx_id: i64,
    ) -> Result<CountOutcome, GraphMetaError> {
        if label == self.store.label() {
            return Ok(CountOutcome::Ignored);
        }
        let current = self.store.backend().labels_of(id)?;
        let previous = current.with(label);
        self.transition(id, &previous, &current, tx_id)
    }

    /// One transition for an entity whose labels changed several times in
    /// the same transaction; `previous` is its label-set before that
    /// transaction.
    pub fn on_labels_changed(
        &self,
        id: i64,
        previous: &LabelSet,
        tx_id: i64,
    ) -> Result<CountOutcome, GraphMetaError> {
        let current = self.store.backend().labels_of(id)?;
        self.transition(id, previous, &current, tx_id)
    }

    /// Net label changes of one entity within a transaction; the previous
    /// label-set is rebuilt from the current one.
    pub fn on_label_changes(
        &self,
        id: i64,
        assigned: &[&str],
        removed: &[&str],
        tx_id: i64,
    ) -> Result<CountOutcome, GraphMetaError> {
        let current = self.store.backend().labels_of(id)?;
        let mut previous = current.clone();
        for label in assigned {
            previous.remove(label);
        }
        for label in removed {
            previous.insert(*label);
        }
        self.transition(id, &previous, &current, tx_id)
    }

    pub fn on_relationship_created(
        &self,
        target_id: i64,
        tx_id: i64,
    ) -> Result<CountOutcome, GraphMetaError> {
        if self.store.is_record_entity(target_id) {
            return Ok(CountOutcome::Ignored);
        }
        let labels = self.store.backend().labels_of(target_id)?;
        self.adjust_inbound(target_id, &labels, 1, tx_id)
    }

    pub fn on_relationship_deleted(
        &self,
        target_id: i64,
        tx_id: i64,
    ) -> Result<CountOutcome, GraphMetaError> {
        if self.store.is_record_entity(target_id) {
            return Ok(CountOutcome::Ignored);
        }
        let labels = self.store.backend().labels_of(target_id)?;
        self.adjust_inbound(target_id, &labels, -1, tx_id)
    }

    /// Variant for a relationship whose target was deleted in the same batch.
    pub fn on_relationship_deleted_with_labels(
        &self,
        target_id: i64,
        labels: &LabelSet,
        tx_id: i64,
    ) -> Result<CountOutcome, GraphMetaError> {
        self.adjust_inbound(target_id, labels, -1, tx_id)
    }

    /// Recomputes the counts map from the live graph without persisting it.
    pub fn compute_recount(&self) -> Result<CountsMap, GraphMetaError> {
        let tallies = self.store.backend().label_set_tallies()?;
        let mut counts = CountsMap::new();
        for tally in tallies {
            if !self.store.is_countable(&tally.labels) {
                continue;
            }
            if let Some(key) = tally.labels.canonical_key() {
                counts.insert(
                    key,
                    CountEntry::new(
                        tally.labels,
                        tally.entities,
                        tally.inbound,
                        RECOUNT_TX,
                        RECOUNT_ENTITY,
                    ),
                );
            }
        }
        Ok(counts)
    }

    /// Replaces the persisted counts map wholesale with a fresh recount.
    pub fn full_recount(&self) -> Result<CountsMap, GraphMetaError> {
        let counts = self.compute_recount()?;
        self.store.replace_counts(&counts)?;
        info!(
            entries = counts.len(),
            entities = counts.values().map(|entry| entry.count).sum::<i64>(),
            "counts.recount"
        );
        Ok(counts)
    }

    fn transition(
        &self,
        id: i64,
        previous: &LabelSet,
        current: &LabelSet,
        tx_id: i64,
    ) -> Result<CountOutcome, GraphMetaError> {
        if previous == current || self.store.is_record_entity(id) {
            return Ok(CountOutcome::Ignored);
        }
        let from = self.countable_key(id, previous);
        let to = self.countable_key(id, current);
        if from.is_none() && to.is_none() {
            return Ok(CountOutcome::Ignored);
        }
        self.store.update_counts(|counts| {
            let check = to.as_ref().or(from.as_ref());
            if check
                .and_then(|key| counts.get(key))
                .is_some_and(|entry| entry.stamped_by(tx_id, id))
            {
                return CountOutcome::Duplicate;
            }
            let mut changed = false;
            if let Some(key) = to {
                increment(counts, key, current, tx_id, id);
                changed = true;
            }
            if let Some(key) = from {
                changed |= decrement(counts, &key, tx_id, id);
            }
            if changed {
                CountOutcome::Applied
            } else {
                CountOutcome::Ignored
            }
        })
    }

    fn adjust_inbound(
        &self,
        target_id: i64,
        labels: &LabelSet,
        delta: i64,
        tx_id: i64,
    ) -> Result<CountOutcome, GraphMetaError> {
        let Some(key) = self.countable_key(target_id, labels) else {
            return Ok(CountOutcome::Ignored);
        };
        debug!(tx = tx_id, target = target_id, delta, "counts.inbound");
        self.store.update_counts(|counts| match counts.get_mut(&key) {
            Some(entry) => {
                entry.relations += delta;
                CountOutcome::Applied
            }
            None if delta > 0 => {
                // Placeholder until the entity side catches up or a recount runs.
                // It carries no entity stamp so a later creation still applies.
                let entry =
                    CountEntry::new(labels.clone(), 0, delta, RECOUNT_TX, RECOUNT_ENTITY);
                counts.insert(key, entry);
                CountOutcome::Applied
            }
            None => CountOutcome::Ignored,
        })
    }

    fn countable_key(&self, id: i64, labels: &LabelSet) -> Option<CanonicalKey> {
        if !self.store.is_countable(labels) || self.store.is_record_entity(id) {
            return None;
        }
        labels.canonical_key()
    }
}

fn increment(counts: &mut CountsMap, key: CanonicalKey, labels: &LabelSet, tx_id: i64, id: i64) {
    counts
        .entry(key)
        .and_modify(|entry| {
            entry.count += 1;
            entry.stamp(tx_id, id);
        })
        .or_insert_with(|| CountEntry::new(labels.clone(), 1, 0, tx_id, id));
}

/// Returns `false` when there was nothing to decrement.
fn decrement(counts: &mut CountsMap, key: &CanonicalKey, tx_id: i64, id: i64) -> bool {
    let Some(entry) = counts.get_mut(key) else {
        return false;
    };
    if entry.count <= 0 {
        return false;
    }
    entry.count -= 1;
    if entry.count == 0 {
        counts.remove(key);
    } else {
        entry.stamp(tx_id, id);
    }
    true
}
