use ahash::AHashMap;
use rusqlite::Connection;

use crate::{
    backend::{LabelProperties, LabelSetTally},
    errors::GraphMetaError,
    label_set::LabelSet,
};

pub fn label_set_tallies(conn: &Connection) -> Result<Vec<LabelSetTally>, GraphMetaError> {
    let inbound = inbound_counts(conn)?;

    let mut per_entity: Vec<(i64, LabelSet)> = Vec::new();
    {
        let mut stmt = conn
            .prepare_cached(
                "SELECT e.id, l.label FROM graph_entities e \
                 LEFT JOIN graph_labels l ON l.entity_id = e.id ORDER BY e.id",
            )
            .map_err(|e| GraphMetaError::query(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?)))
            .map_err(|e| GraphMetaError::query(e.to_string()))?;
        for row in rows {
            let (id, label) = row.map_err(|e| GraphMetaError::query(e.to_string()))?;
            if per_entity.last().map(|(last, _)| *last) != Some(id) {
                per_entity.push((id, LabelSet::new()));
            }
            if let (Some(label), Some((_, labels))) = (label, per_entity.last_mut()) {
                labels.insert(label);
            }
        }
    }

    let mut grouped: AHashMap<LabelSet, (i64, i64)> = AHashMap::new();
    for (id, labels) in per_entity {
        let slot = grouped.entry(labels).or_insert((0, 0));
        slot.0 += 1;
        slot.1 += inbound.get(&id).copied().unwrap_or(0);
    }

    let mut tallies: Vec<LabelSetTally> = grouped
        .into_iter()
        .map(|(labels, (entities, inbound))| LabelSetTally {
            labels,
            entities,
            inbound,
        })
        .collect();
    tallies.sort_by(|a, b| a.labels.cmp(&b.labels));
    Ok(tallies)
}

pub fn label_property_keys(conn: &Connection) -> Result<Vec<LabelProperties>, GraphMetaError> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT l.label, p.key FROM graph_labels l \
             LEFT JOIN graph_properties p ON p.entity_id = l.entity_id \
             GROUP BY l.label, p.key ORDER BY l.label, p.key",
        )
        .map_err(|e| GraphMetaError::query(e.to_string()))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)))
        .map_err(|e| GraphMetaError::query(e.to_string()))?;

    let mut result: Vec<LabelProperties> = Vec::new();
    for row in rows {
        let (label, key) = row.map_err(|e| GraphMetaError::query(e.to_string()))?;
        if result.last().map(|last| last.label.as_str()) != Some(label.as_str()) {
            result.push(LabelProperties {
                label,
                keys: Vec::new(),
            });
        }
        if let (Some(key), Some(last)) = (key, result.last_mut()) {
            last.keys.push(key);
        }
    }
    Ok(result)
}

fn inbound_counts(conn: &Connection) -> Result<AHashMap<i64, i64>, GraphMetaError> {
    let mut stmt = conn
        .prepare_cached("SELECT to_id, COUNT(*) FROM graph_edges GROUP BY to_id")
        .map_err(|e| GraphMetaError::query(e.to_string()))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))
        .map_err(|e| GraphMetaError::query(e.to_string()))?;
    let mut counts = AHashMap::new();
    for row in rows {
        let (id, n) = row.map_err(|e| GraphMetaError::query(e.to_string()))?;
        counts.insert(id, n);
    }
    Ok(counts)
}
