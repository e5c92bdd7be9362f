pub mod document;
pub mod error;

pub use document::merge_filters;
pub use error::{DbError, Result};
