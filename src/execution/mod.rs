pub mod gateway;
pub mod result;

pub use gateway::{QueryGateway, SqliteGateway};
pub use result::{QueryResult, Row};
