pub mod error_classifier;
pub mod r#loop;

pub use error_classifier::*;
pub use r#loop::*;
