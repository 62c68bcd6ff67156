mod common;

use churnguard::db::SqliteStore;
use churnguard::execution::{QueryGateway, SqliteGateway};
use churnguard::schema::SchemaIntrospector;
use churnguard::table_upload::{self, schema_for_frame};
use churnguard::SessionContext;
use common::*;
use tempfile::TempDir;

#[tokio::test]
async fn test_sync_once_per_signature() {
    let dir = TempDir::new().unwrap();
    let csv = write_csv(dir.path(), "{acme}_customers_2025_11_01.csv", CUSTOMERS_CSV);
    let store = SqliteStore::open(dir.path().join("store.db")).unwrap();
    let mut session = SessionContext::new();

    let first = table_upload::ingest(&mut session, &csv, Some(&store)).unwrap().unwrap();
    assert!(first.created);
    assert_eq!(first.inserted, 5);

    let second = table_upload::ingest(&mut session, &csv, Some(&store)).unwrap().unwrap();
    assert!(second.skipped);

    let gateway = SqliteGateway::new(store.clone());
    let result = gateway
        .execute("SELECT COUNT(*) AS n FROM acme_customers_tbl")
        .await
        .unwrap();
    assert_eq!(result.rows[0].get("n"), Some(&serde_json::json!(5)));
}

#[test]
fn test_create_is_idempotent_and_introspectable() {
    let dir = TempDir::new().unwrap();
    let csv = write_csv(dir.path(), "customers.csv", CUSTOMERS_CSV);
    let store = SqliteStore::open(dir.path().join("store.db")).unwrap();
    let frame = table_upload::load_csv(&csv).unwrap();
    let schema = schema_for_frame("customers_tbl", &frame);

    assert!(store.create_table_if_needed(&schema).unwrap());
    assert!(!store.create_table_if_needed(&schema).unwrap());

    let fetched = SchemaIntrospector::new(&store).fetch("customers_tbl").unwrap().unwrap();
    assert_eq!(fetched.column_names(), vec!["Name", "City", "Email", "Phone", "Age"]);
    assert_eq!(fetched.find("Age").map(|c| c.declared_type.as_str()), Some("REAL"));
}
