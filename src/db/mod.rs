//! Persisted table store
//!
//! A SQLite file holding uploaded tables. Connections are opened per
//! logical operation and dropped when it finishes.

pub mod store;

pub use store::{SqlValue, SqliteStore};
