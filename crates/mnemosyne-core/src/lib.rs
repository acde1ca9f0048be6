//! mnemosyne-core - Core library for mnemosyne.
//!
//! This crate provides the error hierarchy, configuration, collection schema
//! types, the filter DSL and the [`VectorDatabase`] trait that every storage
//! backend of the mnemosyne long-term memory layer implements.
//!
//! # Example
//!
//! ```ignore
//! use mnemosyne_core::memory::{memory_schema, MemoryRecord, MemoryScope};
//!
//! db.create_collection("mnemosyne_default", &memory_schema(1024)).await?;
//! db.insert("mnemosyne_default", vec![record.into_entity()]).await?;
//!
//! let scope = MemoryScope::session("persona-a", "session-1");
//! let hits = db
//!     .search("mnemosyne_default", &embedding, 5, scope.to_expr().as_deref())
//!     .await?;
//! ```

pub mod config;
pub mod error;
pub mod expr;
pub mod memory;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::{MnemosyneConfig, VectorDatabaseConfig};
pub use error::{ErrorCode, MnemosyneError, MnemosyneResult};
pub use memory::{MemoryRecord, MemoryScope};
pub use traits::{VectorDatabase, VectorDatabaseProvider};
pub use types::{
    CollectionSchema, DataType, Entity, FieldSchema, Filter, FilterCondition, FilterOperator,
    IndexParams, MetricType, SchemaMismatch, SearchHit,
};
