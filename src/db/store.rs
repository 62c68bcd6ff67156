use crate::error::{AssistantError, Result};
use crate::execution::result::{QueryResult, Row};
use crate::schema::{quote_ident, render_ddl, SchemaDescriptor};
use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

pub use rusqlite::types::Value as SqlValue;

/// Rows per insert transaction.
pub const INSERT_CHUNK_SIZE: usize = 500;

#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    /// Opens (creating if needed) the store file once to prove it is usable.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        store
            .connect()
            .map_err(|e| AssistantError::UpstreamUnavailable(format!("Failed to open store: {}", e)))?;
        info!("Persisted store ready at {}", store.path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.path)
            .map_err(|e| AssistantError::Execution(format!("Failed to open database: {}", e)))
    }

    pub fn is_reachable(&self) -> bool {
        match self.connect() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(e) => {
                warn!("Store unreachable: {}", e);
                false
            }
        }
    }

    /// Catalog lookup of a table's definition text.
    pub fn table_definition(&self, table: &str) -> Result<Option<String>> {
        let conn = self.connect()?;
        let ddl = conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type='table' AND name=?1",
                [table],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
        Ok(ddl)
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.table_definition(table)?.is_some())
    }

    /// Creates the table unless it already exists. Returns `true` when a
    /// new table was created.
    pub fn create_table_if_needed(&self, schema: &SchemaDescriptor) -> Result<bool> {
        if schema.columns.is_empty() {
            return Err(AssistantError::Schema(format!("No columns to create {}", schema.table)));
        }
        let existed = self.table_exists(&schema.table)?;
        let ddl = render_ddl(&schema.table, &schema.columns);
        let conn = self.connect()?;
        conn.execute(&ddl, [])
            .map_err(|e| AssistantError::Execution(format!("Failed to create table {}: {}", schema.table, e)))?;
        if existed {
            debug!("Table {} already present, create skipped", schema.table);
        } else {
            info!("Created table {} ({} columns)", schema.table, schema.columns.len());
        }
        Ok(!existed)
    }

    /// One parameterized insert per row, committed in chunks of
    /// `INSERT_CHUNK_SIZE`. Failing rows are logged and skipped; the
    /// number of inserted rows is returned.
    pub fn batch_insert(&self, table: &str, columns: &[String], rows: &[Vec<SqlValue>]) -> Result<usize> {
        if columns.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; columns.len()].join(", ");
        let column_list = columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            column_list,
            placeholders
        );

        let mut conn = self.connect()?;
        let mut inserted = 0usize;
        let mut failed = 0usize;

        for (chunk_idx, chunk) in rows.chunks(INSERT_CHUNK_SIZE).enumerate() {
            let tx = conn
                .transaction()
                .map_err(|e| AssistantError::Execution(format!("Failed to start transaction: {}", e)))?;
            {
                let mut stmt = tx.prepare(&sql)?;
                for row in chunk {
                    match stmt.execute(params_from_iter(row.iter())) {
                        Ok(_) => {
                            inserted += 1;
                            if inserted % 100 == 0 {
                                debug!("Inserted {} rows into {}", inserted, table);
                            }
                        }
                        Err(e) => {
                            failed += 1;
                            warn!("Row insert into {} failed: {}", table, e);
                        }
                    }
                }
            }
            tx.commit()
                .map_err(|e| AssistantError::Execution(format!("Failed to commit chunk {}: {}", chunk_idx, e)))?;
        }

        info!("Inserted {} rows into {} ({} failed)", inserted, table, failed);
        Ok(inserted)
    }

    /// Runs one read statement. Store errors are returned verbatim.
    pub fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        let started = Instant::now();
        let conn = self.connect()?;
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = Vec::new();
        let mut cursor = stmt.query(params_from_iter(params.iter()))?;
        while let Some(row) = cursor.next()? {
            let mut fields = Vec::with_capacity(columns.len());
            for (idx, name) in columns.iter().enumerate() {
                fields.push((name.clone(), value_ref_to_json(row.get_ref(idx)?)));
            }
            rows.push(Row::new(fields));
        }
        Ok(QueryResult {
            columns,
            rows,
            execution_time_ms: started.elapsed().as_millis() as u64,
        })
    }
}

fn value_ref_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => serde_json::Value::String(format!("<{} bytes>", bytes.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDef;

    fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("store.db")).unwrap();
        (dir, store)
    }

    fn schema() -> SchemaDescriptor {
        SchemaDescriptor::new(
            "customers_tbl",
            vec![ColumnDef::new("Name", "TEXT"), ColumnDef::new("Age", "INTEGER")],
        )
    }

    #[test]
    fn test_create_is_idempotent() {
        let (_dir, store) = temp_store();
        assert!(store.create_table_if_needed(&schema()).unwrap());
        assert!(!store.create_table_if_needed(&schema()).unwrap());
        let count = store
            .query("SELECT COUNT(*) AS n FROM sqlite_master WHERE type='table' AND name='customers_tbl'", &[])
            .unwrap();
        assert_eq!(count.rows[0].get("n"), Some(&serde_json::json!(1)));
    }

    #[test]
    fn test_batch_insert_skips_bad_rows() {
        let (_dir, store) = temp_store();
        store.create_table_if_needed(&schema()).unwrap();
        let columns = vec!["Name".to_string(), "Age".to_string()];
        let good = vec![SqlValue::Text("Riya".into()), SqlValue::Integer(31)];
        // wrong arity fails for that row only
        let bad = vec![SqlValue::Text("Broken".into())];
        let inserted = store
            .batch_insert("customers_tbl", &columns, &[good.clone(), bad, good])
            .unwrap();
        assert_eq!(inserted, 2);
    }

    #[test]
    fn test_query_error_is_verbatim() {
        let (_dir, store) = temp_store();
        store.create_table_if_needed(&schema()).unwrap();
        let err = store.query("SELECT Missing FROM customers_tbl", &[]).unwrap_err();
        match err {
            AssistantError::Execution(msg) => assert!(msg.contains("no such column")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_table_definition_absent() {
        let (_dir, store) = temp_store();
        assert_eq!(store.table_definition("nope").unwrap(), None);
    }
}
