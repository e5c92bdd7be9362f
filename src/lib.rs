// ============================================================================
// memodoc Library
// ============================================================================
//
// A process-wide MongoDB connection manager and a generic collection service
// that issues every read as an aggregation pipeline.
//
// ============================================================================

//! # Example
//!
//! ```no_run
//! use memodoc::bson::{doc, Bson, Document};
//! use memodoc::{ConnectionConfig, ConnectionManager, DefaultService, ListOptions, ServiceConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> memodoc::Result<()> {
//! let config = ConnectionConfig::new("mongodb://localhost:27017/app");
//! let client = ConnectionManager::global().connect(Some(&config)).await?;
//! let db = client.database("app");
//!
//! let products = DefaultService::<Document>::new(
//!     ServiceConfig::new("products")
//!         .base_filter(doc! { "deleted_at": Bson::Null })
//!         .default_sort(doc! { "name": 1 }),
//! );
//!
//! products.insert(&db, &doc! { "name": "Test A", "code": "0001" }, None).await?;
//! let live = products.list(&db, doc! {}, ListOptions::new(), None).await?;
//! println!("{} live products", live.len());
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod core;
pub mod service;

pub use mongodb;
pub use mongodb::bson;

// Re-export main types for convenience
pub use core::{DbError, Result, merge_filters};

// Re-export connection API
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionOptions};

// Re-export service API
pub use service::{
    Clock, DefaultService, EntityRef, IndexSpec, IndexState, IntoEntityId, ListOptions,
    ManualClock, Paginate, Pagination, ServiceConfig, SystemClock,
};
