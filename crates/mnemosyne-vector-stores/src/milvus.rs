//! Milvus vector database implementation.
//!
//! Talks to Milvus through its RESTful API v2 (`/v2/vectordb/...`). Every
//! response is wrapped in a `{code, data, message}` envelope where a non-zero
//! `code` signals failure even on HTTP 200.

use async_trait::async_trait;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mnemosyne_core::config::VectorDatabaseConfig;
use mnemosyne_core::error::{ErrorCode, MnemosyneError, MnemosyneResult};
use mnemosyne_core::traits::{
    newest_first, stamp_create_time, VectorDatabase, VectorDatabaseProvider, CREATE_TIME_FIELD,
    EMBEDDING_FIELD,
};
use mnemosyne_core::types::{
    int64_value, CollectionSchema, DataType, Entity, FieldSchema, MetricType, SearchHit,
};

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tokio::sync::RwLock;

const LOAD_STATE_LOADED: &str = "LoadStateLoaded";
const SEARCH_NPROBE: u32 = 10;
/// Ask for INT64 values as JSON numbers instead of strings.
const INT64_HEADER: &str = "Accept-Type-Allow-Int64";
/// How many times `get_latest_memory` re-queries above a `create_time` cutoff.
const LATEST_NARROWING_ROUNDS: usize = 4;

/// What the client remembers about a collection between calls.
#[derive(Debug, Clone)]
struct CollectionHandle {
    primary_field: String,
    metric: MetricType,
}

/// Parsed `collections/describe` response.
#[derive(Debug, Clone)]
struct CollectionDescription {
    schema: CollectionSchema,
    /// Vector field name to index metric.
    indexes: HashMap<String, MetricType>,
}

impl CollectionDescription {
    fn handle(&self) -> CollectionHandle {
        let primary_field = self
            .schema
            .primary_field()
            .map(|f| f.name.clone())
            .unwrap_or_else(|| "id".to_string());
        let metric = self
            .indexes
            .get(EMBEDDING_FIELD)
            .or_else(|| self.indexes.values().next())
            .copied()
            .unwrap_or_default();
        CollectionHandle {
            primary_field,
            metric,
        }
    }
}

/// Milvus vector database using the REST API.
pub struct MilvusDatabase {
    client: Client,
    base_url: String,
    database: String,
    token: Option<SecretString>,
    latest_window: usize,
    connected: AtomicBool,
    collections: RwLock<HashMap<String, CollectionHandle>>,
}

impl MilvusDatabase {
    /// Create a new Milvus client. No request is made until [`VectorDatabase::connect`].
    pub fn new(config: VectorDatabaseConfig) -> MnemosyneResult<Self> {
        let base_url = config.base_url();
        url::Url::parse(&base_url).map_err(|e| {
            MnemosyneError::Configuration(format!("Invalid Milvus URL '{}': {}", base_url, e))
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MnemosyneError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            database: config.database,
            token: config.token,
            latest_window: config.latest_window,
            connected: AtomicBool::new(false),
            collections: RwLock::new(HashMap::new()),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/v2/vectordb{}", self.base_url, path)
    }

    /// POST to an endpoint and unwrap the response envelope.
    async fn post(&self, path: &str, mut body: Value) -> MnemosyneResult<Value> {
        if let Some(obj) = body.as_object_mut() {
            obj.insert("dbName".to_string(), Value::String(self.database.clone()));
        }

        let mut request = self
            .client
            .post(self.api_url(path))
            .header(INT64_HEADER, "true")
            .json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                self.connected.store(false, Ordering::SeqCst);
            }
            transport_error(path, e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(MnemosyneError::vector_store(format!(
                "{} failed with HTTP {}: {}",
                path, status, error
            )));
        }

        let envelope: Value = response.json().await.map_err(|e| MnemosyneError::VectorStore {
            message: format!("Failed to parse response of {}: {}", path, e),
            code: ErrorCode::ParseInvalidResponse,
            source: Some(Box::new(e)),
        })?;

        let code = envelope["code"].as_i64().unwrap_or(0);
        if code != 0 {
            let message = envelope["message"].as_str().unwrap_or("unknown error");
            return Err(MnemosyneError::vector_store(format!(
                "{} failed (code {}): {}",
                path, code, message
            )));
        }

        Ok(envelope.get("data").cloned().unwrap_or(Value::Null))
    }

    async fn describe(&self, name: &str) -> MnemosyneResult<CollectionDescription> {
        let data = self
            .post("/collections/describe", json!({ "collectionName": name }))
            .await?;
        parse_description(&data)
    }

    async fn load_state(&self, name: &str) -> MnemosyneResult<String> {
        let data = self
            .post("/collections/get_load_state", json!({ "collectionName": name }))
            .await?;
        Ok(data["loadState"].as_str().unwrap_or_default().to_string())
    }

    async fn load(&self, name: &str) -> MnemosyneResult<()> {
        self.post("/collections/load", json!({ "collectionName": name }))
            .await?;
        Ok(())
    }

    /// Cached handle for a collection, making sure it is loaded.
    async fn get_collection(&self, name: &str) -> MnemosyneResult<CollectionHandle> {
        let cached = self.collections.read().await.get(name).cloned();
        let handle = match cached {
            Some(handle) => handle,
            None => {
                if !self.has_collection(name).await? {
                    return Err(MnemosyneError::collection_not_found(name));
                }
                let handle = self.describe(name).await?.handle();
                self.collections
                    .write()
                    .await
                    .insert(name.to_string(), handle.clone());
                handle
            }
        };

        if self.load_state(name).await? != LOAD_STATE_LOADED {
            tracing::info!(collection = name, "Collection is not loaded, loading now");
            self.load(name).await?;
        }

        Ok(handle)
    }

    /// Load one collection during connect and cache it.
    async fn load_into_cache(&self, name: &str) -> MnemosyneResult<bool> {
        if !self.has_collection(name).await? {
            tracing::debug!(collection = name, "Collection does not exist");
            return Ok(false);
        }

        let description = self.describe(name).await?;
        if description.indexes.is_empty() {
            tracing::warn!(collection = name, "Collection has no index, skipping load");
            return Ok(false);
        }

        self.load(name).await?;
        tracing::debug!(collection = name, "Collection loaded into memory");
        self.collections
            .write()
            .await
            .insert(name.to_string(), description.handle());
        Ok(true)
    }

    async fn create_index(&self, collection: &str, field: &FieldSchema) -> MnemosyneResult<()> {
        let index = match &field.index_params {
            Some(index) => index.clone(),
            None => {
                tracing::warn!(
                    field = %field.name,
                    "No index parameters given, using default IVF_FLAT index"
                );
                Default::default()
            }
        };

        let mut params = index.params.clone();
        params.insert("index_type".to_string(), Value::String(index.index_type.clone()));

        tracing::info!(collection, field = %field.name, "Creating index");
        self.post(
            "/indexes/create",
            json!({
                "collectionName": collection,
                "indexParams": [{
                    "fieldName": field.name,
                    "indexName": field.name,
                    "metricType": index.metric_type.to_string(),
                    "params": params,
                }]
            }),
        )
        .await?;
        tracing::info!(collection, field = %field.name, "Index created");
        Ok(())
    }
}

#[async_trait]
impl VectorDatabase for MilvusDatabase {
    async fn connect(&self) -> MnemosyneResult<()> {
        let names = match self.post("/collections/list", json!({})).await {
            Ok(data) => string_list(&data),
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                tracing::error!(url = %self.base_url, error = %e, "Failed to connect to Milvus");
                return Err(e);
            }
        };
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(url = %self.base_url, "Connected to Milvus");

        self.collections.write().await.clear();
        for name in names {
            if let Err(e) = self.load_into_cache(&name).await {
                tracing::error!(collection = %name, error = %e, "Failed to load collection");
            }
        }

        Ok(())
    }

    async fn close(&self) -> MnemosyneResult<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            tracing::info!(url = %self.base_url, "Disconnected from Milvus");
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

        if self.has_collection(name).await? {
            tracing::info!(collection = name, "Collection already exists");
            return Ok(());
        }

        let auto_id = schema.primary_field().is_some_and(|f| f.auto_id);
        let fields: Vec<Value> = schema.fields.iter().map(field_to_json).collect();

        self.post(
            "/collections/create",
            json!({
                "collectionName": name,
                "description": schema.description,
                "schema": {
                    "autoId": auto_id,
                    "enableDynamicField": false,
                    "fields": fields,
                }
            }),
        )
        .await?;
        tracing::info!(collection = name, "Collection created");

        let metric = schema
            .vector_field()
            .map(|f| f.effective_index().metric_type)
            .unwrap_or_default();
        let primary_field = schema
            .primary_field()
            .map(|f| f.name.clone())
            .unwrap_or_else(|| "id".to_string());
        self.collections.write().await.insert(
            name.to_string(),
            CollectionHandle {
                primary_field,
                metric,
            },
        );

        for field in schema
            .fields
            .iter()
            .filter(|f| f.dtype == DataType::FloatVector)
        {
            self.create_index(name, field).await?;
        }

        Ok(())
    }

    async fn has_collection(&self, name: &str) -> MnemosyneResult<bool> {
        let data = self
            .post("/collections/has", json!({ "collectionName": name }))
            .await?;
        Ok(data["has"].as_bool().unwrap_or(false))
    }

    async fn describe_collection(&self, name: &str) -> MnemosyneResult<CollectionSchema> {
        if !self.has_collection(name).await? {
            return Err(MnemosyneError::collection_not_found(name));
        }
        Ok(self.describe(name).await?.schema)
    }

    async fn insert(&self, collection_name: &str, mut rows: Vec<Entity>) -> MnemosyneResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        self.ensure_connection().await?;
        self.get_collection(collection_name).await?;

        stamp_create_time(&mut rows, chrono::Utc::now().timestamp());
        let count = rows.len();

        let data = self
            .post(
                "/entities/insert",
                json!({
                    "collectionName": collection_name,
                    "data": rows,
                }),
            )
            .await
            .inspect_err(|e| {
                tracing::error!(collection = collection_name, error = %e, "Insert failed")
            })?;

        let inserted = data["insertCount"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(count);
        tracing::info!(collection = collection_name, inserted, "Inserted rows");
        Ok(inserted)
    }

    async fn query(
        &self,
        collection_name: &str,
        filter: &str,
        output_fields: &[String],
    ) -> MnemosyneResult<Vec<Entity>> {
        self.ensure_connection().await?;
        self.get_collection(collection_name).await?;

        let output_fields: Vec<String> = if output_fields.is_empty() {
            vec!["*".to_string()]
        } else {
            output_fields.to_vec()
        };

        let data = self
            .post(
                "/entities/query",
                json!({
                    "collectionName": collection_name,
                    "filter": filter,
                    "outputFields": output_fields,
                    "limit": self.latest_window,
                }),
            )
            .await
            .inspect_err(|e| {
                tracing::error!(collection = collection_name, filter, error = %e, "Query failed")
            })?;

        Ok(entity_list(data))
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
        let handle = self.get_collection(collection_name).await?;

        let mut body = json!({
            "collectionName": collection_name,
            "data": [query_vector],
            "annsField": EMBEDDING_FIELD,
            "limit": top_k,
            "outputFields": ["*"],
            "searchParams": {
                "metricType": handle.metric.to_string(),
                "params": { "nprobe": SEARCH_NPROBE }
            }
        });
        if let Some(f) = filter.filter(|f| !f.trim().is_empty()) {
            body["filter"] = Value::String(f.to_string());
        }

        let data = self
            .post("/entities/search", body)
            .await
            .inspect_err(|e| {
                tracing::error!(collection = collection_name, error = %e, "Search failed")
            })?;

        let mut hits = Vec::new();
        for item in entity_list(data) {
            match to_search_hit(item, &handle.primary_field) {
                Some(hit) => hits.push(hit),
                None => tracing::warn!(
                    collection = collection_name,
                    "Search result without id or distance, skipping"
                ),
            }
        }
        Ok(hits)
    }

    async fn list_collections(&self) -> MnemosyneResult<Vec<String>> {
        let data = self.post("/collections/list", json!({})).await?;
        Ok(string_list(&data))
    }

    async fn get_loaded_collections(&self) -> MnemosyneResult<Vec<String>> {
        let mut loaded = Vec::new();
        for name in self.list_collections().await? {
            if self.load_state(&name).await? == LOAD_STATE_LOADED {
                loaded.push(name);
            }
        }
        Ok(loaded)
    }

    async fn get_latest_memory(
        &self,
        collection_name: &str,
        limit: usize,
    ) -> MnemosyneResult<Vec<Entity>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let all_fields = ["*".to_string()];
        let mut rows = self.query(collection_name, "", &all_fields).await?;
        if rows.is_empty() {
            tracing::debug!(collection = collection_name, "Collection has no rows");
        }

        // A full window is an arbitrary subset. The newest rows all sit at or
        // above the limit-th newest timestamp seen.
        let mut cutoff: Option<i64> = None;
        for _ in 0..LATEST_NARROWING_ROUNDS {
            if rows.len() < self.latest_window {
                break;
            }
            let Some(next) = nth_newest_time(&rows, limit) else {
                break;
            };
            if cutoff.is_some_and(|c| next <= c) {
                break;
            }
            cutoff = Some(next);
            tracing::debug!(
                collection = collection_name,
                cutoff = next,
                "Query window full, narrowing by create_time"
            );
            let filter = format!("{} >= {}", CREATE_TIME_FIELD, next);
            rows = self.query(collection_name, &filter, &all_fields).await?;
        }

        if rows.len() >= self.latest_window {
            tracing::warn!(
                collection = collection_name,
                window = self.latest_window,
                "Query window is full, the newest memories may be incomplete"
            );
        }
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
        self.get_collection(collection_name).await?;

        self.post(
            "/entities/delete",
            json!({
                "collectionName": collection_name,
                "filter": expr,
            }),
        )
        .await?;
        tracing::info!(collection = collection_name, expr, "Deleted matching rows");
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> MnemosyneResult<()> {
        if !self.has_collection(name).await? {
            tracing::warn!(collection = name, "Tried to drop a collection that does not exist");
            return Ok(());
        }

        if self.collections.read().await.contains_key(name) {
            self.post("/collections/release", json!({ "collectionName": name }))
                .await?;
        }

        self.post("/collections/drop", json!({ "collectionName": name }))
            .await?;
        self.collections.write().await.remove(name);

        tracing::info!(collection = name, "Dropped collection and all its data");
        Ok(())
    }

    fn provider(&self) -> VectorDatabaseProvider {
        VectorDatabaseProvider::Milvus
    }
}

fn transport_error(path: &str, e: reqwest::Error) -> MnemosyneError {
    let code = if e.is_timeout() {
        ErrorCode::NetTimeout
    } else if e.is_connect() {
        ErrorCode::VecConnectionFailed
    } else {
        ErrorCode::NetConnectionFailed
    };
    MnemosyneError::Network {
        message: format!("Request to {} failed: {}", path, e),
        code,
        source: Some(Box::new(e)),
    }
}

fn field_to_json(field: &FieldSchema) -> Value {
    let mut obj = json!({
        "fieldName": field.name,
        "dataType": field.dtype.to_string(),
        "isPrimary": field.is_primary,
    });
    if field.is_nullable {
        obj["nullable"] = Value::Bool(true);
    }

    let mut params = serde_json::Map::new();
    if let Some(max_length) = field.max_length {
        params.insert("max_length".to_string(), json!(max_length));
    }
    if let Some(dim) = field.dim {
        params.insert("dim".to_string(), json!(dim));
    }
    if !params.is_empty() {
        obj["elementTypeParams"] = Value::Object(params);
    }
    obj
}

/// Read a numeric type parameter; Milvus reports them as strings.
/// Timestamp of the `n`-th newest row, if that many rows carry one.
fn nth_newest_time(rows: &[Entity], n: usize) -> Option<i64> {
    let mut times: Vec<i64> = rows
        .iter()
        .filter_map(|row| row.get(CREATE_TIME_FIELD).and_then(int64_value))
        .collect();
    if n == 0 || times.len() < n {
        return None;
    }
    times.sort_unstable_by(|a, b| b.cmp(a));
    Some(times[n - 1])
}

fn type_param(field: &Value, key: &str) -> Option<u64> {
    let params = field["params"].as_array()?;
    params
        .iter()
        .find(|p| p["key"] == key)
        .and_then(|p| match &p["value"] {
            Value::String(s) => s.parse().ok(),
            other => other.as_u64(),
        })
}

fn parse_description(data: &Value) -> MnemosyneResult<CollectionDescription> {
    let raw_fields = data["fields"].as_array().ok_or_else(|| MnemosyneError::VectorStore {
        message: "describe response has no fields".to_string(),
        code: ErrorCode::ParseInvalidResponse,
        source: None,
    })?;

    let mut fields = Vec::with_capacity(raw_fields.len());
    for raw in raw_fields {
        let name = raw["name"].as_str().unwrap_or_default().to_string();
        let type_name = raw["type"].as_str().unwrap_or_default();
        let dtype = DataType::from_str(type_name).map_err(|_| {
            MnemosyneError::vector_store(format!(
                "field '{}' has unsupported type '{}'",
                name, type_name
            ))
        })?;

        let mut field = FieldSchema::new(name, dtype);
        field.is_primary = raw["primaryKey"].as_bool().unwrap_or(false);
        field.auto_id = raw["autoId"].as_bool().unwrap_or(false);
        field.is_nullable = raw["nullable"].as_bool().unwrap_or(false);
        field.max_length = type_param(raw, "max_length").and_then(|v| u32::try_from(v).ok());
        field.dim = type_param(raw, "dim").and_then(|v| usize::try_from(v).ok());
        fields.push(field);
    }

    let mut indexes = HashMap::new();
    for index in data["indexes"].as_array().into_iter().flatten() {
        if let Some(field) = index["fieldName"].as_str() {
            let metric = index["metricType"]
                .as_str()
                .and_then(|m| MetricType::from_str(m).ok())
                .unwrap_or_default();
            indexes.insert(field.to_string(), metric);
        }
    }

    Ok(CollectionDescription {
        schema: CollectionSchema {
            fields,
            description: data["description"].as_str().unwrap_or_default().to_string(),
        },
        indexes,
    })
}

fn string_list(data: &Value) -> Vec<String> {
    data.as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn entity_list(data: Value) -> Vec<Entity> {
    match data {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(obj) => Some(obj.into_iter().collect()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn to_search_hit(mut item: Entity, primary_field: &str) -> Option<SearchHit> {
    let distance = item.remove("distance")?.as_f64()? as f32;
    let id = item
        .get("id")
        .or_else(|| item.get(primary_field))
        .cloned()?;
    item.remove("id");
    item.remove(EMBEDDING_FIELD);
    Some(SearchHit {
        id,
        distance,
        entity: item,
    })
}
