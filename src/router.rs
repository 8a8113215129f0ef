use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    backend::MetadataBackend,
    counts::{CountOutcome, CountsAggregator},
    errors::GraphMetaError,
    events::MutationBatch,
    properties::PropertyAggregator,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CategoryReport {
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl CategoryReport {
    fn record_count(&mut self, result: Result<CountOutcome, GraphMetaError>, what: &str, tx_id: i64) {
        match result {
            Ok(CountOutcome::Applied) => self.applied += 1,
            Ok(CountOutcome::Duplicate | CountOutcome::Ignored) => self.skipped += 1,
            Err(err) => self.fail(err, what, tx_id),
        }
    }

    fn record_property(&mut self, result: Result<bool, GraphMetaError>, tx_id: i64) {
        match result {
            Ok(true) => self.applied += 1,
            Ok(false) => self.skipped += 1,
            Err(err) => self.fail(err, "properties", tx_id),
        }
    }

    fn fail(&mut self, err: GraphMetaError, what: &str, tx_id: i64) {
        warn!(tx = tx_id, category = what, error = %err, "router.event_failed");
        self.failed += 1;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RouteReport {
    pub tx_id: i64,
    pub deletions: CategoryReport,
    pub creations: CategoryReport,
    pub labels: CategoryReport,
    pub relationships: CategoryReport,
    pub properties: CategoryReport,
}

impl RouteReport {
    pub fn applied(&self) -> usize {
        self.categories().iter().map(|c| c.applied).sum()
    }

    pub fn failed(&self) -> usize {
        self.categories().iter().map(|c| c.failed).sum()
    }

    fn categories(&self) -> [CategoryReport; 5] {
        [
            self.deletions,
            self.creations,
            self.labels,
            self.relationships,
            self.properties,
        ]
    }
}

/// Routes batches in a fixed order: deletions, creations, label changes,
/// relationships, then property intake. A failing event is logged and
/// counted; it never stops the rest of the batch.
pub struct MutationRouter<B> {
    counts: Arc<CountsAggregator<B>>,
    properties: Arc<PropertyAggregator<B>>,
}

impl<B: MetadataBackend> MutationRouter<B> {
    pub fn new(counts: Arc<CountsAggregator<B>>, properties: Arc<PropertyAggregator<B>>) -> Self {
        Self { counts, properties }
    }

    pub fn route(&self, batch: &MutationBatch) -> RouteReport {
        let tx = batch.tx_id;
        let mut report = RouteReport {
            tx_id: tx,
            ..RouteReport::default()
        };
        if batch.is_empty() {
            return report;
        }

        let store = self.counts.store();
        let reserved = store.label();
        let record = match store.record_id() {
            Ok(record) => record,
            Err(err) => {
                warn!(tx, error = %err, "router.record_lookup_failed");
                None
            }
        };
        let created: BTreeSet<i64> = batch.created_entities.iter().copied().collect();
        let deleted: BTreeSet<i64> = batch.deleted_entities.iter().map(|e| e.id).collect();
        let transient: BTreeSet<i64> = created.intersection(&deleted).copied().collect();
        let excluded = |id: i64| record == Some(id) || transient.contains(&id);

        for entity in &batch.deleted_entities {
            if excluded(entity.id) {
                continue;
            }
            report.deletions.record_count(
                self.counts.on_entity_deleted(entity.id, &entity.labels, tx),
                "deletions",
                tx,
            );
        }

        for &id in &batch.created_entities {
            if excluded(id) || deleted.contains(&id) {
                continue;
            }
            let result = store
                .backend()
                .labels_of(id)
                .and_then(|labels| self.counts.on_entity_created(id, &labels, tx));
            report.creations.record_count(result, "creations", tx);
        }

        // Per entity: (assigned, removed)
        let mut label_changes: BTreeMap<i64, (Vec<&str>, Vec<&str>)> = BTreeMap::new();
        let skip_labels = |id: i64, label: &str| {
            label == reserved || excluded(id) || created.contains(&id) || deleted.contains(&id)
        };
        for entry in &batch.assigned_labels {
            if !skip_labels(entry.entity_id, &entry.label) {
                label_changes.entry(entry.entity_id).or_default().0.push(&entry.label);
            }
        }
        for entry in &batch.removed_labels {
            if !skip_labels(entry.entity_id, &entry.label) {
                label_changes.entry(entry.entity_id).or_default().1.push(&entry.label);
            }
        }
        for (id, (assigned, removed)) in &label_changes {
            let result = match (assigned.as_slice(), removed.as_slice()) {
                ([label], []) => self.counts.on_label_assigned(*id, label, tx),
                ([], [label]) => self.counts.on_label_removed(*id, label, tx),
                _ => self.counts.on_label_changes(*id, assigned, removed, tx),
            };
            report.labels.record_count(result, "labels", tx);
        }

        let created_rels: BTreeSet<i64> = batch.created_relationships.iter().map(|r| r.id).collect();
        let deleted_rels: BTreeSet<i64> = batch.deleted_relationships.iter().map(|r| r.id).collect();
        for rel in &batch.created_relationships {
            if deleted_rels.contains(&rel.id) || excluded(rel.target_id) {
                continue;
            }
            report.relationships.record_count(
                self.counts.on_relationship_created(rel.target_id, tx),
                "relationships",
                tx,
            );
        }
        for rel in &batch.deleted_relationships {
            if created_rels.contains(&rel.id) || excluded(rel.target_id) {
                continue;
            }
            let result = match batch.deleted_labels(rel.target_id) {
                Some(labels) => {
                    self.counts
                        .on_relationship_deleted_with_labels(rel.target_id, labels, tx)
                }
                None => self.counts.on_relationship_deleted(rel.target_id, tx),
            };
            report.relationships.record_count(result, "relationships", tx);
        }

        for &id in &batch.created_entities {
            if !excluded(id) && !deleted.contains(&id) {
                report
                    .properties
                    .record_property(self.properties.on_entity_created(id), tx);
            }
        }
        for (id, (assigned, _)) in &label_changes {
            for label in assigned {
                report
                    .properties
                    .record_property(self.properties.on_label_assigned(*id, label), tx);
            }
        }
        for entry in &batch.assigned_properties {
            let id = entry.entity_id;
            if excluded(id) || created.contains(&id) || deleted.contains(&id) {
                continue;
            }
            report
                .properties
                .record_property(self.properties.on_property_assigned(id, &entry.key), tx);
        }

        debug!(
            tx,
            batch = %batch,
            applied = report.applied(),
            failed = report.failed(),
            "router.batch"
        );
        report
    }
}
