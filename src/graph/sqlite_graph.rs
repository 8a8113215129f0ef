use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};

use crate::{errors::GraphMetaError, label_set::LabelSet, schema::ensure_schema};

use super::{
    transaction::GraphTransaction,
    types::{decode_value, validate_label},
};

pub struct SqliteGraph {
    conn: Connection,
}

impl SqliteGraph {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, GraphMetaError> {
        let conn =
            Connection::open(path).map_err(|e| GraphMetaError::connection(e.to_string()))?;
        ensure_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, GraphMetaError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| GraphMetaError::connection(e.to_string()))?;
        ensure_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    pub fn begin(&self) -> Result<GraphTransaction<'_>, GraphMetaError> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| GraphMetaError::query(e.to_string()))?;
        GraphTransaction::start(tx)
    }

    pub fn labels_of(&self, id: i64) -> Result<LabelSet, GraphMetaError> {
        labels_of(&self.conn, id)
    }

    pub fn property_keys_of(&self, id: i64) -> Result<Vec<String>, GraphMetaError> {
        if !entity_exists(&self.conn, id)? {
            return Err(GraphMetaError::not_found(format!("entity {id}")));
        }
        collect_strings(
            &self.conn,
            "SELECT key FROM graph_properties WHERE entity_id=?1 ORDER BY key",
            id,
        )
    }

    pub fn property(&self, id: i64, key: &str) -> Result<Option<serde_json::Value>, GraphMetaError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM graph_properties WHERE entity_id=?1 AND key=?2",
                params![id, key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| GraphMetaError::query(e.to_string()))?;
        raw.as_deref().map(decode_value).transpose()
    }

    pub fn entity_exists(&self, id: i64) -> Result<bool, GraphMetaError> {
        entity_exists(&self.conn, id)
    }

    pub fn entity_count(&self) -> Result<i64, GraphMetaError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM graph_entities", [], |row| row.get(0))
            .map_err(|e| GraphMetaError::query(e.to_string()))
    }

    pub fn find_record(&self, label: &str) -> Result<Option<i64>, GraphMetaError> {
        self.conn
            .query_row(
                "SELECT entity_id FROM graph_labels WHERE label=?1 ORDER BY entity_id LIMIT 1",
                params![label],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| GraphMetaError::query(e.to_string()))
    }

    pub fn get_or_create_record(&self, label: &str) -> Result<i64, GraphMetaError> {
        validate_label(label)?;
        if let Some(id) = self.find_record(label)? {
            return Ok(id);
        }
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| GraphMetaError::query(e.to_string()))?;
        tx.execute("INSERT INTO graph_entities DEFAULT VALUES", [])
            .map_err(|e| GraphMetaError::query(e.to_string()))?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO graph_labels(entity_id, label) VALUES(?1, ?2)",
            params![id, label],
        )
        .map_err(|e| GraphMetaError::query(e.to_string()))?;
        tx.commit()
            .map_err(|e| GraphMetaError::query(e.to_string()))?;
        Ok(id)
    }

    pub fn read_record_field(
        &self,
        record_id: i64,
        field: &str,
    ) -> Result<Option<String>, GraphMetaError> {
        self.conn
            .query_row(
                "SELECT value FROM graph_properties WHERE entity_id=?1 AND key=?2",
                params![record_id, field],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| GraphMetaError::query(e.to_string()))
    }

    pub fn write_record_field(
        &self,
        record_id: i64,
        field: &str,
        document: &str,
    ) -> Result<(), GraphMetaError> {
        if !entity_exists(&self.conn, record_id)? {
            return Err(GraphMetaError::not_found(format!("record {record_id}")));
        }
        self.conn
            .execute(
                "INSERT INTO graph_properties(entity_id, key, value) VALUES(?1, ?2, ?3) \
                 ON CONFLICT(entity_id, key) DO UPDATE SET value=excluded.value",
                params![record_id, field, document],
            )
            .map_err(|e| GraphMetaError::query(e.to_string()))?;
        Ok(())
    }

    pub fn ping(&self) -> bool {
        self.conn
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    fn from_connection(conn: Connection) -> Self {
        conn.set_prepared_statement_cache_capacity(64);
        Self { conn }
    }
}

pub(crate) fn labels_of(conn: &Connection, id: i64) -> Result<LabelSet, GraphMetaError> {
    if !entity_exists(conn, id)? {
        return Err(GraphMetaError::not_found(format!("entity {id}")));
    }
    let labels = collect_strings(
        conn,
        "SELECT label FROM graph_labels WHERE entity_id=?1 ORDER BY label",
        id,
    )?;
    Ok(labels.into_iter().collect())
}

pub(crate) fn entity_exists(conn: &Connection, id: i64) -> Result<bool, GraphMetaError> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM graph_entities WHERE id=?1",
            params![id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| GraphMetaError::query(e.to_string()))?;
    Ok(exists.is_some())
}

fn collect_strings(conn: &Connection, sql: &str, id: i64) -> Result<Vec<String>, GraphMetaError> {
    let mut stmt = conn
        .prepare_cached(sql)
        .map_err(|e| GraphMetaError::query(e.to_string()))?;
    let rows = stmt
        .query_map(params![id], |row| row.get(0))
        .map_err(|e| GraphMetaError::query(e.to_string()))?;
    let mut result = Vec::new();
    for item in rows {
        result.push(item.map_err(|e| GraphMetaError::query(e.to_string()))?);
    }
    Ok(result)
}
