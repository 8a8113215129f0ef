use std::sync::Arc;
use std::time::Duration;

use graphmeta::{
    CountEntry, CountOutcome, CountsAggregator, GraphMetaError, GraphTransaction, LabelSet,
    MetadataStore, MutationBatch, MutationRouter, PropertyAggregator, RouteReport, SharedGraph,
};

struct Fixture {
    graph: SharedGraph,
    store: Arc<MetadataStore<SharedGraph>>,
    counts: Arc<CountsAggregator<SharedGraph>>,
    router: MutationRouter<SharedGraph>,
}

impl Fixture {
    fn new() -> Self {
        let graph = SharedGraph::in_memory().expect("graph");
        let store = Arc::new(MetadataStore::new(Arc::new(graph.clone()), "graph_metadata"));
        let counts = Arc::new(CountsAggregator::new(Arc::clone(&store)));
        let properties = Arc::new(PropertyAggregator::new(Arc::clone(&store), Duration::ZERO));
        counts.full_recount().expect("initial recount");
        let router = MutationRouter::new(Arc::clone(&counts), properties);
        Self {
            graph,
            store,
            counts,
            router,
        }
    }

    fn commit<T, F>(&self, f: F) -> (T, MutationBatch)
    where
        F: FnOnce(&mut GraphTransaction<'_>) -> Result<T, GraphMetaError>,
    {
        let graph = self.graph.lock();
        let mut tx = graph.begin().expect("begin");
        let value = f(&mut tx).expect("mutation");
        let batch = tx.commit().expect("commit");
        (value, batch)
    }

    fn apply<T, F>(&self, f: F) -> (T, RouteReport)
    where
        F: FnOnce(&mut GraphTransaction<'_>) -> Result<T, GraphMetaError>,
    {
        let (value, batch) = self.commit(f);
        (value, self.router.route(&batch))
    }

    fn entry(&self, set: &[&str]) -> Option<CountEntry> {
        let key = labels(set).canonical_key()?;
        self.counts.snapshot().expect("snapshot").get(&key).cloned()
    }

    fn total(&self) -> i64 {
        self.counts
            .snapshot()
            .expect("snapshot")
            .values()
            .map(|entry| entry.count)
            .sum()
    }
}

fn labels(items: &[&str]) -> LabelSet {
    items.iter().copied().collect()
}

#[test]
fn test_person_employee_lifecycle() {
    let fx = Fixture::new();

    let (e1, _) = fx.apply(|tx| tx.create_entity(&["Person", "Employee"], &[]));
    let entry = fx.entry(&["Person", "Employee"]).expect("entry after create");
    assert_eq!(entry.count, 1);
    assert_eq!(entry.relations, 0);

    fx.apply(|tx| {
        let source = tx.create_entity(&[], &[])?;
        tx.create_relationship(source, e1, "MANAGES")
    });
    assert_eq!(fx.entry(&["Employee", "Person"]).expect("entry").relations, 1);

    fx.apply(|tx| tx.remove_label(e1, "Employee"));
    assert!(fx.entry(&["Person", "Employee"]).is_none());
    assert_eq!(fx.entry(&["Person"]).expect("person entry").count, 1);

    fx.apply(|tx| tx.delete_entity(e1));
    assert!(fx.entry(&["Person"]).is_none());
    assert_eq!(fx.total(), 0);
}

#[test]
fn test_redelivered_label_assignment_is_applied_once() {
    let fx = Fixture::new();
    let (id, _) = fx.apply(|tx| tx.create_entity(&["Person"], &[]));
    fx.apply(|tx| tx.create_entity(&["Person"], &[]));

    let (_, batch) = fx.commit(|tx| tx.add_label(id, "Employee"));
    let first = fx.router.route(&batch);
    let second = fx.router.route(&batch);

    assert_eq!(first.labels.applied, 1);
    assert_eq!(second.labels.applied, 0);
    assert_eq!(second.labels.skipped, 1);
    assert_eq!(fx.entry(&["Employee", "Person"]).expect("entry").count, 1);
    assert_eq!(fx.entry(&["Person"]).expect("entry").count, 1);
}

#[test]
fn test_direct_duplicate_calls_are_detected() {
    let fx = Fixture::new();
    let (id, batch) = fx.commit(|tx| tx.create_entity(&["Person"], &[]));
    let person = labels(&["Person"]);

    assert_eq!(
        fx.counts.on_entity_created(id, &person, batch.tx_id).expect("create"),
        CountOutcome::Applied
    );
    assert_eq!(
        fx.counts.on_entity_created(id, &person, batch.tx_id).expect("again"),
        CountOutcome::Duplicate
    );
    assert_eq!(fx.entry(&["Person"]).expect("entry").count, 1);
}

#[test]
fn test_zero_count_entry_is_removed_and_restarts_fresh() {
    let fx = Fixture::new();
    let (a, _) = fx.apply(|tx| tx.create_entity(&["Temp"], &[]));
    fx.apply(|tx| tx.delete_entity(a));
    assert!(fx.entry(&["Temp"]).is_none());

    let (b, report) = fx.apply(|tx| tx.create_entity(&["Temp"], &[]));
    let entry = fx.entry(&["Temp"]).expect("fresh entry");
    assert_eq!(entry.count, 1);
    assert_eq!(entry.relations, 0);
    assert!(entry.stamped_by(report.tx_id, b));
}

#[test]
fn test_label_order_maps_to_one_entry() {
    let fx = Fixture::new();
    fx.apply(|tx| tx.create_entity(&["A", "B"], &[]));
    fx.apply(|tx| tx.create_entity(&["B", "A"], &[]));

    let snapshot = fx.counts.snapshot().expect("snapshot");
    assert_eq!(snapshot.len(), 1);
    assert_eq!(fx.entry(&["A", "B"]).expect("entry").count, 2);
}

#[test]
fn test_unlabeled_entities_are_not_counted() {
    let fx = Fixture::new();
    let (_, report) = fx.apply(|tx| tx.create_entity(&[], &[]));
    assert_eq!(report.creations.skipped, 1);
    assert!(fx.counts.snapshot().expect("snapshot").is_empty());
}

#[test]
fn test_record_entity_never_counted() {
    let fx = Fixture::new();
    let record = fx.store.record_id().expect("lookup").expect("record exists");
    let reserved = labels(&["graph_metadata"]);
    assert_eq!(
        fx.counts.on_entity_created(record, &reserved, 99).expect("create"),
        CountOutcome::Ignored
    );
    assert_eq!(
        fx.counts.on_relationship_created(record, 99).expect("rel"),
        CountOutcome::Ignored
    );

    let recount = fx.counts.full_recount().expect("recount");
    assert!(recount.values().all(|entry| !entry.labels.contains("graph_metadata")));
}

#[test]
fn test_relationship_to_unknown_set_creates_placeholder() {
    let fx = Fixture::new();
    let (target, batch) = fx.commit(|tx| tx.create_entity(&["Late"], &[]));

    assert_eq!(
        fx.counts.on_relationship_created(target, batch.tx_id).expect("rel"),
        CountOutcome::Applied
    );
    let placeholder = fx.entry(&["Late"]).expect("placeholder");
    assert_eq!((placeholder.count, placeholder.relations), (0, 1));

    fx.router.route(&batch);
    let entry = fx.entry(&["Late"]).expect("entry");
    assert_eq!((entry.count, entry.relations), (1, 1));
}

#[test]
fn test_deleting_target_uses_snapshot_labels_for_relationships() {
    let fx = Fixture::new();
    let (target, _) = fx.apply(|tx| {
        let target = tx.create_entity(&["Doc"], &[])?;
        let other = tx.create_entity(&["Doc"], &[])?;
        let source = tx.create_entity(&["User"], &[])?;
        tx.create_relationship(source, target, "OWNS")?;
        tx.create_relationship(source, other, "OWNS")?;
        Ok(target)
    });
    assert_eq!(fx.entry(&["Doc"]).expect("docs").relations, 2);

    let (_, report) = fx.apply(|tx| tx.delete_entity(target));
    assert_eq!(report.failed(), 0);
    let docs = fx.entry(&["Doc"]).expect("docs");
    assert_eq!((docs.count, docs.relations), (1, 1));
}

#[test]
fn test_missing_record_drops_event() {
    let graph = SharedGraph::in_memory().expect("graph");
    let store = Arc::new(MetadataStore::new(Arc::new(graph.clone()), "graph_metadata"));
    let counts = CountsAggregator::new(store);

    let err = counts
        .on_entity_created(1, &labels(&["Person"]), 1)
        .unwrap_err();
    assert!(matches!(err, GraphMetaError::NotFound(_)));
    assert!(counts.snapshot().expect("snapshot").is_empty());
}

#[test]
fn test_malformed_counts_field_fails_event_until_recount() {
    let fx = Fixture::new();
    let record = fx.store.record_id().expect("lookup").expect("record");
    fx.graph
        .lock()
        .write_record_field(record, "counts", "not json")
        .expect("corrupt");

    let (_, report) = fx.apply(|tx| tx.create_entity(&["Person"], &[]));
    assert_eq!(report.creations.failed, 1);

    let recount = fx.counts.full_recount().expect("recount heals");
    assert_eq!(recount.len(), 1);
    assert_eq!(fx.entry(&["Person"]).expect("entry").count, 1);
}

#[test]
fn test_recount_matches_live_graph_after_drift() {
    let fx = Fixture::new();
    let (ids, _) = fx.apply(|tx| {
        let a = tx.create_entity(&["Person", "Employee"], &[])?;
        let b = tx.create_entity(&["Person"], &[])?;
        tx.create_relationship(b, a, "REPORTS_TO")?;
        Ok((a, b))
    });
    // Removing a label loses the inbound tally of the old entry.
    fx.apply(|tx| tx.remove_label(ids.0, "Employee"));
    // Changes made behind the router's back.
    fx.commit(|tx| tx.create_entity(&["Unseen"], &[]));

    let recount = fx.counts.full_recount().expect("recount");
    let persisted = fx.counts.snapshot().expect("snapshot");
    assert_eq!(recount, persisted);

    let person = fx.entry(&["Person"]).expect("person");
    assert_eq!((person.count, person.relations), (2, 1));
    assert_eq!(fx.entry(&["Unseen"]).expect("unseen").count, 1);
    assert!(person.stamped_by(0, -1));
}

#[test]
fn test_labels_changed_moves_entity_once() {
    let fx = Fixture::new();
    let (id, _) = fx.apply(|tx| tx.create_entity(&["Draft"], &[]));

    let (_, batch) = fx.commit(|tx| {
        tx.add_label(id, "Reviewed")?;
        tx.add_label(id, "Published")?;
        tx.remove_label(id, "Draft")
    });
    let previous = labels(&["Draft"]);
    assert_eq!(
        fx.counts.on_labels_changed(id, &previous, batch.tx_id).expect("change"),
        CountOutcome::Applied
    );
    assert!(fx.entry(&["Draft"]).is_none());
    assert_eq!(fx.entry(&["Published", "Reviewed"]).expect("moved").count, 1);

    assert_eq!(
        fx.counts.on_labels_changed(id, &previous, batch.tx_id).expect("again"),
        CountOutcome::Duplicate
    );
    assert_eq!(fx.total(), 1);
}

#[test]
fn test_relabel_leaves_inbound_on_previous_set_until_recount() {
    let fx = Fixture::new();
    let (target, _) = fx.apply(|tx| {
        let target = tx.create_entity(&["Doc"], &[])?;
        let source = tx.create_entity(&["User"], &[])?;
        tx.create_relationship(source, target, "OWNS")?;
        Ok(target)
    });
    assert_eq!(fx.entry(&["Doc"]).expect("doc").relations, 1);

    fx.apply(|tx| tx.add_label(target, "Archived"));
    assert!(fx.entry(&["Doc"]).is_none());
    let moved = fx.entry(&["Archived", "Doc"]).expect("archived");
    assert_eq!((moved.count, moved.relations), (1, 0));

    fx.counts.full_recount().expect("recount");
    let healed = fx.entry(&["Archived", "Doc"]).expect("archived");
    assert_eq!((healed.count, healed.relations), (1, 1));
}
