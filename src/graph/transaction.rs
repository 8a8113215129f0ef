use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{OptionalExtension, Transaction, params};

use crate::{
    errors::GraphMetaError,
    events::{DeletedEntity, LabelEntry, MutationBatch, PropertyEntry, RelationshipRef},
    label_set::LabelSet,
};

use super::{
    sqlite_graph::{entity_exists, labels_of},
    types::{encode_value, validate_edge, validate_label, validate_property_key},
};

/// A write transaction over [`super::SqliteGraph`].
///
/// Statements execute immediately inside the SQLite transaction; the change
/// log is accumulated alongside and handed back as a [`MutationBatch`] on
/// commit. Dropping the value without committing rolls everything back.
pub struct GraphTransaction<'a> {
    tx: Transaction<'a>,
    batch: MutationBatch,
    // Net label changes per entity; an add followed by a remove cancels out.
    assigned: BTreeMap<i64, LabelSet>,
    removed: BTreeMap<i64, LabelSet>,
}

impl<'a> GraphTransaction<'a> {
    pub(crate) fn start(tx: Transaction<'a>) -> Result<Self, GraphMetaError> {
        tx.execute("INSERT INTO graph_transactions(committed_at) VALUES(NULL)", [])
            .map_err(|e| GraphMetaError::query(e.to_string()))?;
        let tx_id = tx.last_insert_rowid();
        Ok(Self {
            tx,
            batch: MutationBatch::new(tx_id),
            assigned: BTreeMap::new(),
            removed: BTreeMap::new(),
        })
    }

    pub fn tx_id(&self) -> i64 {
        self.batch.tx_id
    }

    pub fn create_entity(
        &mut self,
        labels: &[&str],
        properties: &[(&str, serde_json::Value)],
    ) -> Result<i64, GraphMetaError> {
        for label in labels {
            validate_label(label)?;
        }
        for (key, _) in properties {
            validate_property_key(key)?;
        }
        self.tx
            .execute("INSERT INTO graph_entities DEFAULT VALUES", [])
            .map_err(|e| GraphMetaError::query(e.to_string()))?;
        let id = self.tx.last_insert_rowid();
        self.batch.created_entities.push(id);
        for label in labels {
            self.add_label(id, label)?;
        }
        for (key, value) in properties {
            self.set_property(id, key, value)?;
        }
        Ok(id)
    }

    /// Returns `false` when the entity already carried the label.
    pub fn add_label(&mut self, id: i64, label: &str) -> Result<bool, GraphMetaError> {
        validate_label(label)?;
        self.require_entity(id)?;
        let changed = self
            .tx
            .execute(
                "INSERT OR IGNORE INTO graph_labels(entity_id, label) VALUES(?1, ?2)",
                params![id, label],
            )
            .map_err(|e| GraphMetaError::query(e.to_string()))?;
        if changed == 0 {
            return Ok(false);
        }
        let reverted = self
            .removed
            .get_mut(&id)
            .is_some_and(|labels| labels.remove(label));
        if !reverted {
            self.assigned.entry(id).or_default().insert(label);
        }
        Ok(true)
    }

    pub fn remove_label(&mut self, id: i64, label: &str) -> Result<bool, GraphMetaError> {
        self.require_entity(id)?;
        let changed = self
            .tx
            .execute(
                "DELETE FROM graph_labels WHERE entity_id=?1 AND label=?2",
                params![id, label],
            )
            .map_err(|e| GraphMetaError::query(e.to_string()))?;
        if changed == 0 {
            return Ok(false);
        }
        let reverted = self
            .assigned
            .get_mut(&id)
            .is_some_and(|labels| labels.remove(label));
        if !reverted {
            self.removed.entry(id).or_default().insert(label);
        }
        Ok(true)
    }

    pub fn set_property(
        &mut self,
        id: i64,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), GraphMetaError> {
        validate_property_key(key)?;
        self.require_entity(id)?;
        let encoded = encode_value(value)?;
        self.tx
            .execute(
                "INSERT INTO graph_properties(entity_id, key, value) VALUES(?1, ?2, ?3) \
                 ON CONFLICT(entity_id, key) DO UPDATE SET value=excluded.value",
                params![id, key, encoded],
            )
            .map_err(|e| GraphMetaError::query(e.to_string()))?;
        self.batch.assigned_properties.push(PropertyEntry {
            entity_id: id,
            key: key.to_string(),
        });
        Ok(())
    }

    pub fn remove_property(&mut self, id: i64, key: &str) -> Result<bool, GraphMetaError> {
        self.require_entity(id)?;
        let changed = self
            .tx
            .execute(
                "DELETE FROM graph_properties WHERE entity_id=?1 AND key=?2",
                params![id, key],
            )
            .map_err(|e| GraphMetaError::query(e.to_string()))?;
        if changed > 0 {
            self.batch.removed_properties.push(PropertyEntry {
                entity_id: id,
                key: key.to_string(),
            });
        }
        Ok(changed > 0)
    }

    pub fn create_relationship(
        &mut self,
        from_id: i64,
        to_id: i64,
        edge_type: &str,
    ) -> Result<i64, GraphMetaError> {
        validate_edge(from_id, to_id, edge_type)?;
        if !entity_exists(&self.tx, from_id)? || !entity_exists(&self.tx, to_id)? {
            return Err(GraphMetaError::invalid_input(
                "edge endpoints must reference existing entities",
            ));
        }
        self.tx
            .execute(
                "INSERT INTO graph_edges(from_id, to_id, edge_type) VALUES(?1, ?2, ?3)",
                params![from_id, to_id, edge_type],
            )
            .map_err(|e| GraphMetaError::query(e.to_string()))?;
        let id = self.tx.last_insert_rowid();
        self.batch.created_relationships.push(RelationshipRef {
            id,
            source_id: from_id,
            target_id: to_id,
            edge_type: edge_type.to_string(),
        });
        Ok(id)
    }

    pub fn delete_relationship(&mut self, id: i64) -> Result<(), GraphMetaError> {
        let edge = self
            .tx
            .query_row(
                "SELECT id, from_id, to_id, edge_type FROM graph_edges WHERE id=?1",
                params![id],
                row_to_relationship,
            )
            .optional()
            .map_err(|e| GraphMetaError::query(e.to_string()))?
            .ok_or_else(|| GraphMetaError::not_found(format!("edge {id}")))?;
        self.tx
            .execute("DELETE FROM graph_edges WHERE id=?1", params![id])
            .map_err(|e| GraphMetaError::query(e.to_string()))?;
        self.batch.deleted_relationships.push(edge);
        Ok(())
    }

    pub fn delete_entity(&mut self, id: i64) -> Result<(), GraphMetaError> {
        let current = labels_of(&self.tx, id)?;
        let labels = self.pre_transaction_labels(id, current);

        let incident = {
            let mut stmt = self
                .tx
                .prepare_cached(
                    "SELECT id, from_id, to_id, edge_type FROM graph_edges \
                     WHERE from_id=?1 OR to_id=?1 ORDER BY id",
                )
                .map_err(|e| GraphMetaError::query(e.to_string()))?;
            let rows = stmt
                .query_map(params![id], row_to_relationship)
                .map_err(|e| GraphMetaError::query(e.to_string()))?;
            let mut edges = Vec::new();
            for row in rows {
                edges.push(row.map_err(|e| GraphMetaError::query(e.to_string()))?);
            }
            edges
        };

        for statement in [
            "DELETE FROM graph_edges WHERE from_id=?1 OR to_id=?1",
            "DELETE FROM graph_labels WHERE entity_id=?1",
            "DELETE FROM graph_properties WHERE entity_id=?1",
            "DELETE FROM graph_entities WHERE id=?1",
        ] {
            self.tx
                .execute(statement, params![id])
                .map_err(|e| GraphMetaError::query(e.to_string()))?;
        }

        self.batch.deleted_relationships.extend(incident);
        self.assigned.remove(&id);
        self.removed.remove(&id);
        self.batch.deleted_entities.push(DeletedEntity { id, labels });
        Ok(())
    }

    pub fn commit(mut self) -> Result<MutationBatch, GraphMetaError> {
        let committed_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        self.tx
            .execute(
                "UPDATE graph_transactions SET committed_at=?1 WHERE id=?2",
                params![committed_at, self.batch.tx_id],
            )
            .map_err(|e| GraphMetaError::query(e.to_string()))?;
        self.tx
            .commit()
            .map_err(|e| GraphMetaError::query(e.to_string()))?;

        for (entity_id, labels) in &self.assigned {
            for label in labels.iter() {
                self.batch.assigned_labels.push(LabelEntry {
                    entity_id: *entity_id,
                    label: label.to_string(),
                });
            }
        }
        for (entity_id, labels) in &self.removed {
            for label in labels.iter() {
                self.batch.removed_labels.push(LabelEntry {
                    entity_id: *entity_id,
                    label: label.to_string(),
                });
            }
        }
        Ok(self.batch)
    }

    pub fn rollback(self) -> Result<(), GraphMetaError> {
        self.tx
            .rollback()
            .map_err(|e| GraphMetaError::query(e.to_string()))
    }

    fn pre_transaction_labels(&self, id: i64, mut labels: LabelSet) -> LabelSet {
        if let Some(assigned) = self.assigned.get(&id) {
            for label in assigned.iter() {
                labels.remove(label);
            }
        }
        if let Some(removed) = self.removed.get(&id) {
            for label in removed.iter() {
                labels.insert(label);
            }
        }
        labels
    }

    fn require_entity(&self, id: i64) -> Result<(), GraphMetaError> {
        if !entity_exists(&self.tx, id)? {
            return Err(GraphMetaError::not_found(format!("entity {id}")));
        }
        Ok(())
    }
}

fn row_to_relationship(row: &rusqlite::Row<'_>) -> Result<RelationshipRef, rusqlite::Error> {
    Ok(RelationshipRef {
        id: row.get(0)?,
        source_id: row.get(1)?,
        target_id: row.get(2)?,
        edge_type: row.get(3)?,
    })
}
