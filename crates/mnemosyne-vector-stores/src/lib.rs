//! mnemosyne-vector-stores - Vector database backends for mnemosyne.
//!
//! # Supported Backends
//!
//! - **Milvus** (feature: `milvus`) - Milvus over its RESTful API v2
//! - **Memory** (feature: `memory`) - Embedded in-process store with the
//!   same semantics, for tests and single-process deployments

mod factory;

#[cfg(feature = "milvus")]
mod milvus;

#[cfg(feature = "memory")]
mod memory;

// Public exports
pub use factory::VectorDatabaseFactory;

#[cfg(feature = "milvus")]
pub use milvus::MilvusDatabase;

#[cfg(feature = "memory")]
pub use memory::InMemoryDatabase;

// Re-export core types for convenience
pub use mnemosyne_core::traits::{VectorDatabase, VectorDatabaseProvider};
pub use mnemosyne_core::types::{CollectionSchema, Entity, FieldSchema, SearchHit};
