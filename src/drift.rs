use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::{
    backend::MetadataBackend,
    counts::CountsAggregator,
    errors::GraphMetaError,
    label_set::{CanonicalKey, LabelSet},
    record::{CountEntry, CountsMap},
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CountDrift {
    pub key: CanonicalKey,
    pub labels: LabelSet,
    pub persisted: Option<(i64, i64)>,
    pub live: Option<(i64, i64)>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    pub persisted_entries: usize,
    pub live_entries: usize,
    pub counts: Vec<CountDrift>,
    pub missing_property_keys: BTreeMap<String, Vec<String>>,
}

impl DriftReport {
    pub fn has_drift(&self) -> bool {
        !self.counts.is_empty() || !self.missing_property_keys.is_empty()
    }
}

pub fn compare_counts(persisted: &CountsMap, live: &CountsMap) -> Vec<CountDrift> {
    let keys: BTreeSet<&CanonicalKey> = persisted.keys().chain(live.keys()).collect();
    let tally = |entry: &CountEntry| (entry.count, entry.relations);
    keys.into_iter()
        .filter_map(|key| {
            let before = persisted.get(key);
            let after = live.get(key);
            if before.map(tally) == after.map(tally) {
                return None;
            }
            let labels = before.or(after).map(|e| e.labels.clone()).unwrap_or_default();
            Some(CountDrift {
                key: key.clone(),
                labels,
                persisted: before.map(tally),
                live: after.map(tally),
            })
        })
        .collect()
}

pub fn check_drift<B: MetadataBackend>(
    counts: &CountsAggregator<B>,
) -> Result<DriftReport, GraphMetaError> {
    let store = counts.store();
    let persisted = store.counts()?;
    let live = counts.compute_recount()?;

    let persisted_props = store.properties()?;
    let mut missing_property_keys = BTreeMap::new();
    for row in store.backend().label_property_keys()? {
        if row.label == store.label() {
            continue;
        }
        let known = persisted_props.get(&row.label);
        let missing: Vec<String> = row
            .keys
            .into_iter()
            .filter(|key| !known.is_some_and(|props| props.contains_key(key)))
            .collect();
        let label_unknown = known.is_none();
        if !missing.is_empty() || label_unknown {
            missing_property_keys.insert(row.label, missing);
        }
    }

    Ok(DriftReport {
        persisted_entries: persisted.len(),
        live_entries: live.len(),
        counts: compare_counts(&persisted, &live),
        missing_property_keys,
    })
}
