//! Vector database trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::MnemosyneResult;
use crate::types::{int64_value, CollectionSchema, Entity, SearchHit};

/// Name of the field that records insertion time, in unix seconds.
pub const CREATE_TIME_FIELD: &str = "create_time";

/// Name of the vector field searched by [`VectorDatabase::search`].
pub const EMBEDDING_FIELD: &str = "embedding";

/// Vector database backend kind.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum VectorDatabaseProvider {
    #[default]
    Milvus,
    /// Embedded backend that keeps everything in process memory.
    Memory,
}

/// Storage backend for conversational memories.
///
/// Filter arguments are Milvus boolean expressions (see [`crate::expr`]);
/// an empty expression matches every row.
#[async_trait]
pub trait VectorDatabase: Send + Sync {
    /// Connect to the backend and reload the collection cache.
    ///
    /// Collections without an index are skipped; a failure loading one
    /// collection does not abort the others.
    async fn connect(&self) -> MnemosyneResult<()>;

    /// Disconnect. Calling it while disconnected is a no-op.
    async fn close(&self) -> MnemosyneResult<()>;

    /// Whether the backend is currently connected.
    async fn is_connected(&self) -> bool;

    /// Reconnect if the connection was lost.
    async fn ensure_connection(&self) -> MnemosyneResult<()> {
        if !self.is_connected().await {
            tracing::warn!(provider = %self.provider(), "Connection lost, reconnecting");
            self.connect().await?;
        }
        Ok(())
    }

    /// Create a collection and index its vector fields.
    ///
    /// Succeeds without changes when the collection already exists.
    async fn create_collection(&self, name: &str, schema: &CollectionSchema)
        -> MnemosyneResult<()>;

    /// Whether the collection exists.
    async fn has_collection(&self, name: &str) -> MnemosyneResult<bool>;

    /// Schema of an existing collection.
    async fn describe_collection(&self, name: &str) -> MnemosyneResult<CollectionSchema>;

    /// Insert rows, stamping `create_time` where absent. Returns the count inserted.
    async fn insert(&self, collection_name: &str, rows: Vec<Entity>) -> MnemosyneResult<usize>;

    /// Return rows matching `filter`, projected to `output_fields` (`"*"` for all).
    async fn query(
        &self,
        collection_name: &str,
        filter: &str,
        output_fields: &[String],
    ) -> MnemosyneResult<Vec<Entity>>;

    /// Similarity search on the `embedding` field.
    async fn search(
        &self,
        collection_name: &str,
        query_vector: &[f32],
        top_k: usize,
        filter: Option<&str>,
    ) -> MnemosyneResult<Vec<SearchHit>>;

    /// Names of all collections.
    async fn list_collections(&self) -> MnemosyneResult<Vec<String>>;

    /// Names of collections currently loaded into memory.
    async fn get_loaded_collections(&self) -> MnemosyneResult<Vec<String>>;

    /// The `limit` most recent rows by `create_time`, newest first.
    async fn get_latest_memory(
        &self,
        collection_name: &str,
        limit: usize,
    ) -> MnemosyneResult<Vec<Entity>>;

    /// Delete rows matching `expr`.
    async fn delete(&self, collection_name: &str, expr: &str) -> MnemosyneResult<()>;

    /// Drop a collection with all its data. Missing collections are ignored.
    async fn drop_collection(&self, name: &str) -> MnemosyneResult<()>;

    /// Check an existing collection against the expected schema.
    ///
    /// Returns `false` when the collection is missing or any field differs;
    /// every difference is logged.
    async fn check_collection_schema_consistency(
        &self,
        name: &str,
        expected: &CollectionSchema,
    ) -> MnemosyneResult<bool> {
        self.ensure_connection().await?;

        if !self.has_collection(name).await? {
            tracing::warn!(collection = name, "Collection does not exist, cannot check schema");
            return Ok(false);
        }

        let actual = self.describe_collection(name).await?;
        let mismatches = expected.diff(&actual);
        if mismatches.is_empty() {
            tracing::info!(collection = name, "Collection schema matches expected schema");
            return Ok(true);
        }

        for mismatch in &mismatches {
            tracing::warn!(collection = name, "Schema mismatch: {}", mismatch);
        }
        Ok(false)
    }

    /// Backend kind.
    fn provider(&self) -> VectorDatabaseProvider;
}

/// Keep the `limit` newest rows by `create_time`, newest first.
///
/// Rows without a timestamp sort last. String-encoded timestamps are read as
/// integers.
pub fn newest_first(mut rows: Vec<Entity>, limit: usize) -> Vec<Entity> {
    rows.sort_by_key(|row| {
        std::cmp::Reverse(
            row.get(CREATE_TIME_FIELD)
                .and_then(int64_value)
                .unwrap_or(i64::MIN),
        )
    });
    rows.truncate(limit);
    rows
}

/// Stamp `create_time` on rows that lack it.
pub fn stamp_create_time(rows: &mut [Entity], now: i64) {
    for row in rows {
        row.entry(CREATE_TIME_FIELD.to_string())
            .or_insert_with(|| serde_json::Value::from(now));
    }
}
