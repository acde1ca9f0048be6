//! Memory records and the schema of the collection that stores them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorCode, MnemosyneError, MnemosyneResult};
use crate::traits::{CREATE_TIME_FIELD, EMBEDDING_FIELD};
use crate::types::{int64_value, CollectionSchema, Entity, FieldSchema};

pub const MEMORY_ID_FIELD: &str = "memory_id";
pub const PERSONALITY_ID_FIELD: &str = "personality_id";
pub const SESSION_ID_FIELD: &str = "session_id";
pub const CONTENT_FIELD: &str = "content";

pub const PERSONALITY_ID_MAX_LENGTH: u32 = 256;
pub const SESSION_ID_MAX_LENGTH: u32 = 72;
pub const CONTENT_MAX_LENGTH: u32 = 4096;

/// Schema of the memory collection for embeddings of dimension `dim`.
pub fn memory_schema(dim: usize) -> CollectionSchema {
    CollectionSchema::new(vec![
        FieldSchema::primary_int64(MEMORY_ID_FIELD, true),
        FieldSchema::varchar(PERSONALITY_ID_FIELD, PERSONALITY_ID_MAX_LENGTH),
        FieldSchema::varchar(SESSION_ID_FIELD, SESSION_ID_MAX_LENGTH),
        FieldSchema::varchar(CONTENT_FIELD, CONTENT_MAX_LENGTH),
        FieldSchema::float_vector(EMBEDDING_FIELD, dim),
        FieldSchema::int64(CREATE_TIME_FIELD),
    ])
    .with_description("Long-term conversational memories")
}

/// A single remembered fact or summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Primary key, assigned by the database on insert.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<i64>,
    pub personality_id: String,
    pub session_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    /// Unix seconds; stamped on insert when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<i64>,
}

impl MemoryRecord {
    pub fn new(
        personality_id: impl Into<String>,
        session_id: impl Into<String>,
        content: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            memory_id: None,
            personality_id: personality_id.into(),
            session_id: session_id.into(),
            content: content.into(),
            embedding,
            create_time: None,
        }
    }

    /// Insertion time, when the row has been stored.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.create_time.and_then(|t| DateTime::from_timestamp(t, 0))
    }

    /// Convert into a row for insertion. `memory_id` is left out so the
    /// database assigns it.
    pub fn into_entity(self) -> Entity {
        let mut entity = Entity::new();
        entity.insert(PERSONALITY_ID_FIELD.to_string(), Value::from(self.personality_id));
        entity.insert(SESSION_ID_FIELD.to_string(), Value::from(self.session_id));
        entity.insert(CONTENT_FIELD.to_string(), Value::from(self.content));
        entity.insert(EMBEDDING_FIELD.to_string(), Value::from(self.embedding));
        if let Some(t) = self.create_time {
            entity.insert(CREATE_TIME_FIELD.to_string(), Value::from(t));
        }
        entity
    }

    /// Read a record back from a query or search row.
    ///
    /// The embedding is optional since searches do not return it.
    pub fn from_entity(entity: &Entity) -> MnemosyneResult<Self> {
        let text = |field: &str| -> MnemosyneResult<String> {
            entity
                .get(field)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    MnemosyneError::validation_code(
                        ErrorCode::ValMissingField,
                        format!("memory row is missing '{}'", field),
                    )
                })
        };

        let embedding = entity
            .get(EMBEDDING_FIELD)
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_f64().map(|f| f as f32))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            memory_id: entity.get(MEMORY_ID_FIELD).and_then(int64_value),
            personality_id: text(PERSONALITY_ID_FIELD)?,
            session_id: text(SESSION_ID_FIELD)?,
            content: text(CONTENT_FIELD)?,
            embedding,
            create_time: entity.get(CREATE_TIME_FIELD).and_then(int64_value),
        })
    }
}
