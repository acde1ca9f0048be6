//! In-process vector database.
//!
//! Mirrors the Milvus backend's behavior (filter expressions, metrics,
//! schema checks, `create_time` stamping) without a server. Search is a
//! brute-force scan, which is fine for tests and small single-process setups.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use mnemosyne_core::error::{ErrorCode, MnemosyneError, MnemosyneResult};
use mnemosyne_core::expr;
use mnemosyne_core::traits::{
    newest_first, stamp_create_time, VectorDatabase, VectorDatabaseProvider, CREATE_TIME_FIELD,
    EMBEDDING_FIELD,
};
use mnemosyne_core::types::{
    CollectionSchema, DataType, Entity, Filter, MetricType, SearchHit,
};

use serde_json::Value;
use tokio::sync::RwLock;

struct MemCollection {
    schema: CollectionSchema,
    metric: MetricType,
    rows: Vec<Entity>,
    next_id: i64,
    indexed: bool,
    loaded: bool,
}

impl MemCollection {
    fn new(schema: CollectionSchema) -> Self {
        let vector = schema.vector_field();
        let metric = vector
            .map(|f| f.effective_index().metric_type)
            .unwrap_or_default();
        let indexed = vector.is_some();
        Self {
            schema,
            metric,
            rows: Vec::new(),
            next_id: 1,
            indexed,
            loaded: indexed,
        }
    }

    fn primary_name(&self) -> Option<&str> {
        self.schema.primary_field().map(|f| f.name.as_str())
    }

    /// Check a row against the schema and fill in nullable gaps.
    fn check_row(&self, row: &mut Entity) -> MnemosyneResult<()> {
        if let Some(unknown) = row.keys().find(|k| self.schema.field(k).is_none()) {
            return Err(MnemosyneError::validation(format!(
                "field '{}' is not in the collection schema",
                unknown
            )));
        }

        for field in &self.schema.fields {
            if field.auto_id {
                if row.contains_key(&field.name) {
                    return Err(MnemosyneError::validation_with_suggestion(
                        format!("field '{}' is assigned automatically", field.name),
                        "Leave the primary key out of inserted rows",
                    ));
                }
                continue;
            }

            let present = row.get(&field.name).is_some_and(|v| !v.is_null());
            if !present {
                if field.is_nullable {
                    row.insert(field.name.clone(), Value::Null);
                    continue;
                }
                return Err(MnemosyneError::validation_code(
                    ErrorCode::ValMissingField,
                    format!("row is missing field '{}'", field.name),
                ));
            }
            let Some(value) = row.get(&field.name) else {
                continue;
            };

            if !field.dtype.accepts(value) {
                return Err(MnemosyneError::validation(format!(
                    "field '{}' expects {}, got {}",
                    field.name, field.dtype, value
                )));
            }

            match field.dtype {
                DataType::VarChar => {
                    let len = value.as_str().map(str::len).unwrap_or(0);
                    let max = field.max_length.unwrap_or(u32::MAX) as usize;
                    if len > max {
                        return Err(MnemosyneError::validation(format!(
                            "field '{}' is {} bytes, longer than max_length {}",
                            field.name, len, max
                        )));
                    }
                }
                DataType::FloatVector => {
                    let len = value.as_array().map(Vec::len).unwrap_or(0);
                    if Some(len) != field.dim {
                        return Err(MnemosyneError::validation_code(
                            ErrorCode::ValDimensionMismatch,
                            format!(
                                "field '{}' has {} dimensions, expected {}",
                                field.name,
                                len,
                                field.dim.unwrap_or(0)
                            ),
                        ));
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn project(&self, row: &Entity, output_fields: &[String]) -> Entity {
        if output_fields.is_empty() || output_fields.iter().any(|f| f == "*") {
            return row.clone();
        }
        row.iter()
            .filter(|(k, _)| {
                output_fields.contains(*k) || self.primary_name() == Some(k.as_str())
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

fn embedding_of(row: &Entity) -> Option<Vec<f32>> {
    row.get(EMBEDDING_FIELD)?
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

fn row_matches(filter: &Option<Filter>, row: &Entity) -> bool {
    filter.as_ref().map_or(true, |f| f.matches(row))
}

/// Vector database kept entirely in process memory.
///
/// Data survives `close` and reconnects but not the process.
pub struct InMemoryDatabase {
    collections: RwLock<HashMap<String, MemCollection>>,
    connected: AtomicBool,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            connected: AtomicBool::new(false),
        }
    }

    /// Mark a collection loaded, as Milvus does on first access.
    async fn load(&self, name: &str) -> MnemosyneResult<()> {
        let mut collections = self.collections.write().await;
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| MnemosyneError::collection_not_found(name))?;
        if !collection.loaded {
            tracing::info!(collection = name, "Collection is not loaded, loading now");
            collection.loaded = true;
        }
        Ok(())
    }
}

impl Default for InMemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorDatabase for InMemoryDatabase {
    async fn connect(&self) -> MnemosyneResult<()> {
        self.connected.store(true, Ordering::SeqCst);

        let mut collections = self.collections.write().await;
        for (name, collection) in collections.iter_mut() {
            if collection.indexed {
                collection.loaded = true;
            } else {
                tracing::warn!(collection = %name, "Collection has no index, skipping load");
            }
        }

        tracing::info!(collections = collections.len(), "Connected to in-memory database");
        Ok(())
    }

    async fn close(&self) -> MnemosyneResult<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            tracing::info!("Disconnected from in-memory database");
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn create_collection(
        &self,
        name: &str,
        schema: &CollectionSchema,
    ) -> MnemosyneResult<()> {
        schema.validate()?;
        self.ensure_connection().await?;

        let mut collections = self.collections.write().await;
        if collections.contains_key(name) {
            tracing::info!(collection = name, "Collection already exists");
            return Ok(());
        }

        for field in schema.fields.iter().filter(|f| f.dtype == DataType::FloatVector) {
            if field.index_params.is_none() {
                tracing::warn!(
                    field = %field.name,
                    "No index parameters given, using default IVF_FLAT index"
                );
            }
        }

        collections.insert(name.to_string(), MemCollection::new(schema.clone()));
        tracing::info!(collection = name, "Collection created");
        Ok(())
    }

    async fn has_collection(&self, name: &str) -> MnemosyneResult<bool> {
        Ok(self.collections.read().await.contains_key(name))
    }

    async fn describe_collection(&self, name: &str) -> MnemosyneResult<CollectionSchema> {
        self.collections
            .read()
            .await
            .get(name)
            .map(|c| c.schema.clone())
            .ok_or_else(|| MnemosyneError::collection_not_found(name))
    }

    async fn insert(&self, collection_name: &str, mut rows: Vec<Entity>) -> MnemosyneResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        self.ensure_connection().await?;
        self.load(collection_name).await?;

        let mut collections = self.collections.write().await;
        let collection = collections
            .get_mut(collection_name)
            .ok_or_else(|| MnemosyneError::collection_not_found(collection_name))?;

        if collection.schema.field(CREATE_TIME_FIELD).is_some() {
            stamp_create_time(&mut rows, chrono::Utc::now().timestamp());
        }
        for row in rows.iter_mut() {
            collection.check_row(row).inspect_err(|e| {
                tracing::error!(collection = collection_name, error = %e, "Insert failed")
            })?;
        }

        let auto_key = collection
            .schema
            .primary_field()
            .filter(|f| f.auto_id)
            .map(|f| f.name.clone());
        let count = rows.len();
        for mut row in rows {
            if let Some(key) = &auto_key {
                row.insert(key.clone(), Value::from(collection.next_id));
                collection.next_id += 1;
            }
            collection.rows.push(row);
        }

        tracing::info!(collection = collection_name, inserted = count, "Inserted rows");
        Ok(count)
    }

    async fn query(
        &self,
        collection_name: &str,
        filter: &str,
        output_fields: &[String],
    ) -> MnemosyneResult<Vec<Entity>> {
        self.ensure_connection().await?;
        self.load(collection_name).await?;
        let filter = expr::parse(filter)?;

        let collections = self.collections.read().await;
        let collection = collections
            .get(collection_name)
            .ok_or_else(|| MnemosyneError::collection_not_found(collection_name))?;

        Ok(collection
            .rows
            .iter()
            .filter(|row| row_matches(&filter, row))
            .map(|row| collection.project(row, output_fields))
            .collect())
    }

    async fn search(
        &self,
        collection_name: &str,
        query_vector: &[f32],
        top_k: usize,
        filter: Option<&str>,
    ) -> MnemosyneResult<Vec<SearchHit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        self.ensure_connection().await?;
        self.load(collection_name).await?;
        let filter = expr::parse_opt(filter)?;

        let collections = self.collections.read().await;
        let collection = collections
            .get(collection_name)
            .ok_or_else(|| MnemosyneError::collection_not_found(collection_name))?;

        let dim = collection
            .schema
            .field(EMBEDDING_FIELD)
            .and_then(|f| f.dim)
            .ok_or_else(|| {
                MnemosyneError::validation(format!(
                    "collection '{}' has no '{}' vector field",
                    collection_name, EMBEDDING_FIELD
                ))
            })?;
        if query_vector.len() != dim {
            return Err(MnemosyneError::validation_code(
                ErrorCode::ValDimensionMismatch,
                format!(
                    "query vector has {} dimensions, expected {}",
                    query_vector.len(),
                    dim
                ),
            ));
        }

        let primary = collection.primary_name().unwrap_or_default();
        let mut scored: Vec<(f32, &Entity)> = collection
            .rows
            .iter()
            .filter(|row| row_matches(&filter, row))
            .filter_map(|row| {
                embedding_of(row).map(|v| (collection.metric.distance(query_vector, &v), row))
            })
            .collect();

        if collection.metric.ascending() {
            scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        } else {
            scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        }
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(distance, row)| {
                let mut entity = row.clone();
                entity.remove(EMBEDDING_FIELD);
                SearchHit {
                    id: row.get(primary).cloned().unwrap_or(Value::Null),
                    distance,
                    entity,
                }
            })
            .collect())
    }

    async fn list_collections(&self) -> MnemosyneResult<Vec<String>> {
        let mut names: Vec<String> = self.collections.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn get_loaded_collections(&self) -> MnemosyneResult<Vec<String>> {
        let mut names: Vec<String> = self
            .collections
            .read()
            .await
            .iter()
            .filter(|(_, c)| c.loaded)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn get_latest_memory(
        &self,
        collection_name: &str,
        limit: usize,
    ) -> MnemosyneResult<Vec<Entity>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let rows = self.query(collection_name, "", &[]).await?;
        Ok(newest_first(rows, limit))
    }

    async fn delete(&self, collection_name: &str, expr: &str) -> MnemosyneResult<()> {
        if expr.trim().is_empty() {
            return Err(MnemosyneError::invalid_filter(
                "delete requires a filter expression",
                "Use drop_collection to remove every row",
            ));
        }

        self.ensure_connection().await?;
        self.load(collection_name).await?;
        let filter = expr::parse(expr)?;

        let mut collections = self.collections.write().await;
        let collection = collections
            .get_mut(collection_name)
            .ok_or_else(|| MnemosyneError::collection_not_found(collection_name))?;

        let before = collection.rows.len();
        collection.rows.retain(|row| !row_matches(&filter, row));
        tracing::info!(
            collection = collection_name,
            expr,
            deleted = before - collection.rows.len(),
            "Deleted matching rows"
        );
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> MnemosyneResult<()> {
        if self.collections.write().await.remove(name).is_none() {
            tracing::warn!(collection = name, "Tried to drop a collection that does not exist");
            return Ok(());
        }
        tracing::info!(collection = name, "Dropped collection and all its data");
        Ok(())
    }

    fn provider(&self) -> VectorDatabaseProvider {
        VectorDatabaseProvider::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemosyne_core::types::FieldSchema;
    use serde_json::json;

    fn schema() -> CollectionSchema {
        CollectionSchema::new(vec![
            FieldSchema::primary_int64("id", true),
            FieldSchema::varchar("tag", 4),
            FieldSchema::float_vector(EMBEDDING_FIELD, 2),
            FieldSchema::int64("create_time"),
            FieldSchema::varchar("note", 16).nullable(),
        ])
    }

    fn row(tag: &str, v: [f32; 2]) -> Entity {
        [
            ("tag".to_string(), json!(tag)),
            (EMBEDDING_FIELD.to_string(), json!(v)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_check_row_fills_nullable() {
        let collection = MemCollection::new(schema());
        let mut r = row("a", [0.0, 1.0]);
        r.insert("create_time".into(), json!(1));
        collection.check_row(&mut r).unwrap();
        assert_eq!(r["note"], Value::Null);
    }

    #[test]
    fn test_check_row_rejections() {
        let collection = MemCollection::new(schema());
        let mut base = row("a", [0.0, 1.0]);
        base.insert("create_time".into(), json!(1));

        let mut too_long = base.clone();
        too_long.insert("tag".into(), json!("abcde"));
        assert!(collection.check_row(&mut too_long).is_err());

        let mut bad_dim = base.clone();
        bad_dim.insert(EMBEDDING_FIELD.into(), json!([1.0]));
        assert_eq!(
            collection.check_row(&mut bad_dim).unwrap_err().code(),
            ErrorCode::ValDimensionMismatch
        );

        let mut with_id = base.clone();
        with_id.insert("id".into(), json!(5));
        assert!(collection.check_row(&mut with_id).is_err());

        let mut unknown = base.clone();
        unknown.insert("mood".into(), json!("happy"));
        assert!(collection.check_row(&mut unknown).is_err());

        let mut missing = base;
        missing.remove("tag");
        assert_eq!(
            collection.check_row(&mut missing).unwrap_err().code(),
            ErrorCode::ValMissingField
        );
    }

    #[test]
    fn test_project_keeps_primary_key() {
        let collection = MemCollection::new(schema());
        let mut r = row("a", [0.0, 1.0]);
        r.insert("id".into(), json!(3));
        let projected = collection.project(&r, &["tag".to_string()]);
        assert_eq!(projected.len(), 2);
        assert_eq!(projected["id"], 3);
        assert_eq!(collection.project(&r, &["*".to_string()]).len(), 3);
    }

    #[tokio::test]
    async fn test_insert_is_all_or_nothing() {
        let db = InMemoryDatabase::new();
        db.create_collection("c", &schema()).await.unwrap();

        let result = db
            .insert("c", vec![row("ok", [0.0, 1.0]), row("too long", [1.0, 0.0])])
            .await;
        assert!(result.is_err());
        assert!(db.query("c", "", &[]).await.unwrap().is_empty());
    }
}
