use std::fmt;

use serde::{Deserialize, Serialize};

use crate::label_set::LabelSet;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedEntity {
    pub id: i64,
    pub labels: LabelSet,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEntry {
    pub entity_id: i64,
    pub label: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipRef {
    pub id: i64,
    pub source_id: i64,
    pub target_id: i64,
    pub edge_type: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyEntry {
    pub entity_id: i64,
    pub key: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationBatch {
    pub tx_id: i64,
    pub created_entities: Vec<i64>,
    pub deleted_entities: Vec<DeletedEntity>,
    pub assigned_labels: Vec<LabelEntry>,
    pub removed_labels: Vec<LabelEntry>,
    pub created_relationships: Vec<RelationshipRef>,
    pub deleted_relationships: Vec<RelationshipRef>,
    pub assigned_properties: Vec<PropertyEntry>,
    pub removed_properties: Vec<PropertyEntry>,
}

impl MutationBatch {
    pub fn new(tx_id: i64) -> Self {
        Self {
            tx_id,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.created_entities.is_empty()
            && self.deleted_entities.is_empty()
            && self.assigned_labels.is_empty()
            && self.removed_labels.is_empty()
            && self.created_relationships.is_empty()
            && self.deleted_relationships.is_empty()
            && self.assigned_properties.is_empty()
            && self.removed_properties.is_empty()
    }

    pub fn deleted_labels(&self, id: i64) -> Option<&LabelSet> {
        self.deleted_entities
            .iter()
            .find(|entity| entity.id == id)
            .map(|entity| &entity.labels)
    }
}

impl fmt::Display for MutationBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tx={} created={} deleted={} labels+={} labels-={} rels+={} rels-={} props+={} props-={}",
            self.tx_id,
            self.created_entities.len(),
            self.deleted_entities.len(),
            self.assigned_labels.len(),
            self.removed_labels.len(),
            self.created_relationships.len(),
            self.deleted_relationships.len(),
            self.assigned_properties.len(),
            self.removed_properties.len(),
        )
    }
}
