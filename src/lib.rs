//! churnguard: a conversational assistant over one uploaded customer table.
//!
//! Questions are answered against a persisted SQLite copy of the table when
//! it is synced, otherwise against the in-memory polars frame through a
//! restricted expression evaluator. Campaigns reuse the same targeting path.

pub mod campaign;
pub mod config;
pub mod data_assistant;
pub mod db;
pub mod error;
pub mod evaluator;
pub mod execution;
pub mod execution_loop;
pub mod intent;
pub mod llm;
pub mod query;
pub mod schema;
pub mod session;
pub mod table_upload;
pub mod targeting;

pub use config::AppConfig;
pub use data_assistant::{AssistantResponse, DataAssistant, Route};
pub use error::{AssistantError, Result};
pub use session::SessionContext;
