//! Query Execution Gateway
//!
//! Runs a validated SELECT against the persisted store. Store errors are
//! passed through verbatim so the retry loop can feed them back to the
//! translator as repair hints.

use crate::db::SqliteStore;
use crate::error::{AssistantError, Result};
use crate::execution::result::QueryResult;
use crate::query::safety::safety_violation;
use async_trait::async_trait;
use tracing::debug;

#[async_trait]
pub trait QueryGateway: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<QueryResult>;
}

/// Gateway over a SQLite file. Each call opens and releases its own
/// connection on the blocking pool.
#[derive(Debug, Clone)]
pub struct SqliteGateway {
    store: SqliteStore,
}

impl SqliteGateway {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }
}

#[async_trait]
impl QueryGateway for SqliteGateway {
    async fn execute(&self, sql: &str) -> Result<QueryResult> {
        if let Some(reason) = safety_violation(sql) {
            return Err(AssistantError::UnsafeCandidate(reason));
        }
        let store = self.store.clone();
        let sql = sql.to_string();
        debug!("Executing: {}", sql);
        tokio::task::spawn_blocking(move || store.query(&sql, &[]))
            .await
            .map_err(|e| AssistantError::Execution(format!("query task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqlValue;
    use crate::schema::{ColumnDef, SchemaDescriptor};
    use tempfile::tempdir;

    fn seeded(dir: &std::path::Path) -> SqliteGateway {
        let store = SqliteStore::open(dir.join("store.db")).unwrap();
        let schema = SchemaDescriptor::new("t", vec![ColumnDef::new("Name", "TEXT")]);
        store.create_table_if_needed(&schema).unwrap();
        store
            .batch_insert("t", &["Name".to_string()], &[vec![SqlValue::Text("Riya".into())]])
            .unwrap();
        SqliteGateway::new(store)
    }

    #[tokio::test]
    async fn test_execute_returns_rows_and_columns() {
        let dir = tempdir().unwrap();
        let gateway = seeded(dir.path());
        let result = gateway.execute("SELECT Name FROM t").await.unwrap();
        assert_eq!(result.columns, vec!["Name"]);
        assert_eq!(result.rows[0].text("Name").as_deref(), Some("Riya"));
    }

    #[tokio::test]
    async fn test_store_error_is_verbatim() {
        let dir = tempdir().unwrap();
        let gateway = seeded(dir.path());
        let err = gateway.execute("SELECT Phone FROM t").await.unwrap_err();
        match err {
            AssistantError::Execution(msg) => assert!(msg.contains("no such column: Phone"), "{}", msg),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unsafe_sql_never_reaches_store() {
        let dir = tempdir().unwrap();
        let gateway = seeded(dir.path());
        let err = gateway.execute("DROP TABLE t").await.unwrap_err();
        assert!(matches!(err, AssistantError::UnsafeCandidate(_)));
        assert!(gateway.store().table_exists("t").unwrap());
    }
}
