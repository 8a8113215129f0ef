use graphmeta::{
    GraphMetaError, GraphReader, LabelSet, RecordStore, SharedGraph, SqliteGraph,
    events::MutationBatch,
};
use serde_json::json;

fn labels(items: &[&str]) -> LabelSet {
    items.iter().copied().collect()
}

fn seed(graph: &SqliteGraph, entity_labels: &[&str]) -> i64 {
    let mut tx = graph.begin().expect("begin");
    let id = tx.create_entity(entity_labels, &[]).expect("entity");
    tx.commit().expect("commit");
    id
}

#[test]
fn test_create_entity_reports_labels_and_properties() {
    let graph = SqliteGraph::open_in_memory().expect("graph");
    let mut tx = graph.begin().expect("begin");
    let id = tx
        .create_entity(&["Person", "Employee"], &[("name", json!("Ada"))])
        .expect("entity");
    let batch = tx.commit().expect("commit");

    assert_eq!(batch.created_entities, vec![id]);
    assert_eq!(batch.assigned_labels.len(), 2);
    assert_eq!(batch.assigned_properties.len(), 1);
    assert_eq!(graph.labels_of(id).expect("labels"), labels(&["Employee", "Person"]));
    assert_eq!(graph.property(id, "name").expect("prop"), Some(json!("Ada")));
}

#[test]
fn test_transaction_ids_increase() {
    let graph = SqliteGraph::open_in_memory().expect("graph");
    let first = graph.begin().expect("begin").commit().expect("commit");
    let second = graph.begin().expect("begin").commit().expect("commit");
    assert!(second.tx_id > first.tx_id);
    assert!(first.is_empty());
}

#[test]
fn test_add_then_remove_label_cancels_out() {
    let graph = SqliteGraph::open_in_memory().expect("graph");
    let id = seed(&graph, &["Person"]);

    let mut tx = graph.begin().expect("begin");
    assert!(tx.add_label(id, "Temp").expect("add"));
    assert!(tx.remove_label(id, "Temp").expect("remove"));
    assert!(!tx.add_label(id, "Person").expect("already present"));
    let batch = tx.commit().expect("commit");

    assert!(batch.assigned_labels.is_empty());
    assert!(batch.removed_labels.is_empty());
}

#[test]
fn test_delete_entity_keeps_labels_from_before_the_transaction() {
    let graph = SqliteGraph::open_in_memory().expect("graph");
    let id = seed(&graph, &["Person"]);

    let mut tx = graph.begin().expect("begin");
    tx.add_label(id, "Employee").expect("add");
    tx.remove_label(id, "Person").expect("remove");
    tx.delete_entity(id).expect("delete");
    let batch = tx.commit().expect("commit");

    assert_eq!(batch.deleted_labels(id), Some(&labels(&["Person"])));
    assert!(batch.assigned_labels.is_empty());
    assert!(batch.removed_labels.is_empty());
    assert!(!graph.entity_exists(id).expect("exists"));
}

#[test]
fn test_delete_entity_reports_incident_relationships() {
    let graph = SqliteGraph::open_in_memory().expect("graph");
    let a = seed(&graph, &["A"]);
    let b = seed(&graph, &["B"]);
    let c = seed(&graph, &["C"]);
    let mut tx = graph.begin().expect("begin");
    tx.create_relationship(a, b, "LINK").expect("a->b");
    tx.create_relationship(b, c, "LINK").expect("b->c");
    tx.commit().expect("commit");

    let mut tx = graph.begin().expect("begin");
    tx.delete_entity(b).expect("delete");
    let batch: MutationBatch = tx.commit().expect("commit");

    let targets: Vec<i64> = batch.deleted_relationships.iter().map(|r| r.target_id).collect();
    assert_eq!(targets, vec![b, c]);
}

#[test]
fn test_relationship_requires_existing_endpoints() {
    let graph = SqliteGraph::open_in_memory().expect("graph");
    let a = seed(&graph, &["A"]);
    let mut tx = graph.begin().expect("begin");
    let err = tx.create_relationship(a, 999, "LINK").unwrap_err();
    assert!(matches!(err, GraphMetaError::InvalidInput(_)));
    let err = tx.create_relationship(a, a, " ").unwrap_err();
    assert!(matches!(err, GraphMetaError::InvalidInput(_)));
}

#[test]
fn test_rollback_discards_changes() {
    let graph = SqliteGraph::open_in_memory().expect("graph");
    let mut tx = graph.begin().expect("begin");
    tx.create_entity(&["Ghost"], &[]).expect("entity");
    tx.rollback().expect("rollback");
    assert_eq!(graph.entity_count().expect("count"), 0);
}

#[test]
fn test_labels_of_missing_entity_is_not_found() {
    let graph = SqliteGraph::open_in_memory().expect("graph");
    let err = graph.labels_of(42).unwrap_err();
    assert!(matches!(err, GraphMetaError::NotFound(_)));
}

#[test]
fn test_record_is_created_once_and_stores_fields() {
    let shared = SharedGraph::in_memory().expect("graph");
    assert_eq!(shared.find_record("graph_metadata").expect("find"), None);

    let record = shared.get_or_create_record("graph_metadata").expect("record");
    assert_eq!(shared.get_or_create_record("graph_metadata").expect("again"), record);
    assert_eq!(shared.read_field(record, "counts").expect("read"), None);

    shared.replace_field(record, "counts", "{}").expect("write");
    shared.replace_field(record, "counts", r#"{"a":1}"#).expect("overwrite");
    assert_eq!(
        shared.read_field(record, "counts").expect("read"),
        Some(r#"{"a":1}"#.to_string())
    );

    let err = shared.replace_field(record + 100, "counts", "{}").unwrap_err();
    assert!(matches!(err, GraphMetaError::NotFound(_)));
}

#[test]
fn test_label_set_tallies_group_exact_sets() {
    let shared = SharedGraph::in_memory().expect("graph");
    {
        let graph = shared.lock();
        let mut tx = graph.begin().expect("begin");
        let a = tx.create_entity(&["Person", "Employee"], &[]).expect("a");
        let b = tx.create_entity(&["Employee", "Person"], &[]).expect("b");
        let c = tx.create_entity(&["Person"], &[]).expect("c");
        let d = tx.create_entity(&[], &[]).expect("d");
        tx.create_relationship(c, a, "KNOWS").expect("c->a");
        tx.create_relationship(d, a, "KNOWS").expect("d->a");
        tx.create_relationship(a, b, "KNOWS").expect("a->b");
        tx.create_relationship(a, d, "KNOWS").expect("a->d");
        tx.commit().expect("commit");
    }

    let tallies = shared.label_set_tallies().expect("tallies");
    let find = |set: &[&str]| {
        tallies
            .iter()
            .find(|t| t.labels == labels(set))
            .map(|t| (t.entities, t.inbound))
    };
    assert_eq!(find(&["Employee", "Person"]), Some((2, 3)));
    assert_eq!(find(&["Person"]), Some((1, 0)));
    assert_eq!(find(&[]), Some((1, 1)));
}

#[test]
fn test_label_property_keys_attribute_to_every_label() {
    let shared = SharedGraph::in_memory().expect("graph");
    {
        let graph = shared.lock();
        let mut tx = graph.begin().expect("begin");
        tx.create_entity(&["Person", "Employee"], &[("name", json!("Ada")), ("age", json!(36))])
            .expect("a");
        tx.create_entity(&["Robot"], &[]).expect("b");
        tx.commit().expect("commit");
    }

    let rows = shared.label_property_keys().expect("keys");
    let keys_of = |label: &str| {
        rows.iter()
            .find(|row| row.label == label)
            .map(|row| row.keys.clone())
    };
    assert_eq!(keys_of("Person"), Some(vec!["age".to_string(), "name".to_string()]));
    assert_eq!(keys_of("Employee"), Some(vec!["age".to_string(), "name".to_string()]));
    assert_eq!(keys_of("Robot"), Some(Vec::new()));
}

#[test]
fn test_unavailable_graph_is_not_ready() {
    let shared = SharedGraph::in_memory().expect("graph");
    assert!(shared.is_ready());
    shared.set_available(false);
    assert!(!shared.is_ready());
}
