//! Behavior tests for the in-process backend.
//!
//! These exercise the `VectorDatabase` contract end to end with the memory
//! collection layout, without a running server.

#![cfg(feature = "memory")]

use mnemosyne_core::error::{ErrorCode, MnemosyneError, MnemosyneResult};
use mnemosyne_core::memory::{memory_schema, MemoryRecord, MemoryScope, CONTENT_FIELD, MEMORY_ID_FIELD};
use mnemosyne_core::traits::CREATE_TIME_FIELD;
use mnemosyne_core::types::{FieldSchema, IndexParams, MetricType};
use mnemosyne_vector_stores::{CollectionSchema, InMemoryDatabase, VectorDatabase};
use serde_json::json;

const DIM: usize = 4;
const COLLECTION: &str = "memories";

async fn setup() -> MnemosyneResult<InMemoryDatabase> {
    let db = InMemoryDatabase::new();
    db.connect().await?;
    db.create_collection(COLLECTION, &memory_schema(DIM)).await?;
    Ok(db)
}

fn record(persona: &str, session: &str, content: &str, v: [f32; DIM], t: i64) -> MemoryRecord {
    let mut r = MemoryRecord::new(persona, session, content, v.to_vec());
    r.create_time = Some(t);
    r
}

async fn seed(db: &InMemoryDatabase) -> MnemosyneResult<()> {
    let rows = vec![
        record("alice", "s1", "likes tea", [1.0, 0.0, 0.0, 0.0], 100),
        record("alice", "s1", "lives in Oslo", [0.0, 1.0, 0.0, 0.0], 200),
        record("alice", "s2", "has a cat", [0.9, 0.1, 0.0, 0.0], 300),
        record("bob", "s3", "plays chess", [0.0, 0.0, 1.0, 0.0], 400),
    ];
    let inserted = db
        .insert(COLLECTION, rows.into_iter().map(MemoryRecord::into_entity).collect())
        .await?;
    assert_eq!(inserted, 4);
    Ok(())
}

#[tokio::test]
async fn test_create_collection_is_idempotent() -> MnemosyneResult<()> {
    let db = setup().await?;
    seed(&db).await?;

    db.create_collection(COLLECTION, &memory_schema(DIM)).await?;
    assert_eq!(db.list_collections().await?, vec![COLLECTION.to_string()]);
    assert_eq!(db.query(COLLECTION, "", &[]).await?.len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_create_collection_rejects_invalid_schema() -> MnemosyneResult<()> {
    let db = setup().await?;
    let schema = CollectionSchema::new(vec![FieldSchema::varchar("content", 16)]);

    let err = db.create_collection("broken", &schema).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValInvalidSchema);
    assert!(!db.has_collection("broken").await?);
    Ok(())
}

#[tokio::test]
async fn test_insert_assigns_ids_and_stamps_time() -> MnemosyneResult<()> {
    let db = setup().await?;
    let row = MemoryRecord::new("alice", "s1", "hello", vec![0.5; DIM]).into_entity();
    db.insert(COLLECTION, vec![row.clone(), row]).await?;

    let rows = db.query(COLLECTION, "", &["*".to_string()]).await?;
    let mut ids: Vec<i64> = rows
        .iter()
        .map(|r| r[MEMORY_ID_FIELD].as_i64().unwrap())
        .collect();
    ids.sort();
    assert_eq!(ids, vec![1, 2]);
    assert!(rows.iter().all(|r| r[CREATE_TIME_FIELD].as_i64().unwrap() > 0));
    Ok(())
}

#[tokio::test]
async fn test_insert_into_missing_collection() -> MnemosyneResult<()> {
    let db = setup().await?;
    let row = MemoryRecord::new("a", "s", "x", vec![0.0; DIM]).into_entity();

    let err = db.insert("nope", vec![row]).await.unwrap_err();
    assert!(matches!(err, MnemosyneError::CollectionNotFound { .. }));
    assert_eq!(err.to_string(), "Collection 'nope' does not exist");
    Ok(())
}

#[tokio::test]
async fn test_insert_rejects_wrong_dimension() -> MnemosyneResult<()> {
    let db = setup().await?;
    let row = MemoryRecord::new("a", "s", "x", vec![0.0; DIM + 1]).into_entity();

    let err = db.insert(COLLECTION, vec![row]).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValDimensionMismatch);
    Ok(())
}

#[tokio::test]
async fn test_query_with_scope_and_projection() -> MnemosyneResult<()> {
    let db = setup().await?;
    seed(&db).await?;

    let scope = MemoryScope::session("alice", "s1").to_expr().unwrap();
    let rows = db
        .query(COLLECTION, &scope, &[CONTENT_FIELD.to_string()])
        .await?;
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(row.len(), 2, "content plus primary key");
        assert!(row.contains_key(MEMORY_ID_FIELD));
    }

    let recent = db
        .query(COLLECTION, "create_time >= 300 and content like \"%chess\"", &[])
        .await?;
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0][CONTENT_FIELD], "plays chess");
    Ok(())
}

#[tokio::test]
async fn test_query_rejects_bad_expression() -> MnemosyneResult<()> {
    let db = setup().await?;
    let err = db.query(COLLECTION, "content ==", &[]).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ParseInvalidExpr);
    Ok(())
}

#[tokio::test]
async fn test_search_ranks_by_l2() -> MnemosyneResult<()> {
    let db = setup().await?;
    seed(&db).await?;

    let hits = db
        .search(COLLECTION, &[1.0, 0.0, 0.0, 0.0], 2, None)
        .await?;
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].entity[CONTENT_FIELD], "likes tea");
    assert_eq!(hits[0].distance, 0.0);
    assert_eq!(hits[1].entity[CONTENT_FIELD], "has a cat");
    assert!(hits[0].distance <= hits[1].distance);
    assert!(!hits[0].entity.contains_key("embedding"));
    assert_eq!(hits[0].id, hits[0].entity[MEMORY_ID_FIELD]);
    Ok(())
}

#[tokio::test]
async fn test_search_with_filter() -> MnemosyneResult<()> {
    let db = setup().await?;
    seed(&db).await?;

    let scope = MemoryScope::persona("bob").to_expr();
    let hits = db
        .search(COLLECTION, &[1.0, 0.0, 0.0, 0.0], 5, scope.as_deref())
        .await?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entity[CONTENT_FIELD], "plays chess");
    Ok(())
}

#[tokio::test]
async fn test_search_cosine_ranks_descending() -> MnemosyneResult<()> {
    let db = setup().await?;
    let schema = CollectionSchema::new(vec![
        FieldSchema::primary_int64("id", true),
        FieldSchema::float_vector("embedding", 2).with_index(IndexParams {
            metric_type: MetricType::Cosine,
            ..Default::default()
        }),
    ]);
    db.create_collection("cosine", &schema).await?;
    db.insert(
        "cosine",
        vec![
            [("embedding".to_string(), json!([0.0, 1.0]))].into_iter().collect(),
            [("embedding".to_string(), json!([2.0, 0.1]))].into_iter().collect(),
        ],
    )
    .await?;

    let hits = db.search("cosine", &[1.0, 0.0], 2, None).await?;
    assert_eq!(hits[0].id, json!(2));
    assert!(hits[0].distance > hits[1].distance);
    Ok(())
}

#[tokio::test]
async fn test_search_edge_cases() -> MnemosyneResult<()> {
    let db = setup().await?;
    seed(&db).await?;

    assert!(db.search(COLLECTION, &[1.0; DIM], 0, None).await?.is_empty());

    let err = db.search(COLLECTION, &[1.0; 2], 3, None).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValDimensionMismatch);

    let err = db.search("nope", &[1.0; DIM], 3, None).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::VecCollectionNotFound);
    Ok(())
}

#[tokio::test]
async fn test_get_latest_memory() -> MnemosyneResult<()> {
    let db = setup().await?;
    seed(&db).await?;

    let latest = db.get_latest_memory(COLLECTION, 2).await?;
    let contents: Vec<&str> = latest
        .iter()
        .map(|r| r[CONTENT_FIELD].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["plays chess", "has a cat"]);

    assert!(db.get_latest_memory(COLLECTION, 0).await?.is_empty());
    assert_eq!(db.get_latest_memory(COLLECTION, 50).await?.len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_delete_by_expression() -> MnemosyneResult<()> {
    let db = setup().await?;
    seed(&db).await?;

    db.delete(COLLECTION, r#"personality_id == "alice" and session_id == "s1""#)
        .await?;
    let remaining = db.query(COLLECTION, "", &[]).await?;
    assert_eq!(remaining.len(), 2);

    let err = db.delete(COLLECTION, "  ").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValInvalidFilter);
    assert_eq!(db.query(COLLECTION, "", &[]).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_drop_collection() -> MnemosyneResult<()> {
    let db = setup().await?;
    seed(&db).await?;

    db.drop_collection(COLLECTION).await?;
    assert!(!db.has_collection(COLLECTION).await?);
    assert!(db.get_loaded_collections().await?.is_empty());

    // Dropping again only warns.
    db.drop_collection(COLLECTION).await?;
    Ok(())
}

#[tokio::test]
async fn test_schema_consistency() -> MnemosyneResult<()> {
    let db = setup().await?;

    assert!(
        db.check_collection_schema_consistency(COLLECTION, &memory_schema(DIM))
            .await?
    );
    assert!(
        !db.check_collection_schema_consistency(COLLECTION, &memory_schema(DIM * 2))
            .await?
    );
    assert!(
        !db.check_collection_schema_consistency("nope", &memory_schema(DIM))
            .await?
    );
    Ok(())
}

#[tokio::test]
async fn test_reconnects_after_close() -> MnemosyneResult<()> {
    let db = setup().await?;
    seed(&db).await?;

    db.close().await?;
    assert!(!db.is_connected().await);
    db.close().await?;

    // Operations reconnect on demand and the data is still there.
    assert_eq!(db.get_latest_memory(COLLECTION, 10).await?.len(), 4);
    assert!(db.is_connected().await);
    assert_eq!(db.get_loaded_collections().await?, vec![COLLECTION.to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_records_round_trip_through_search() -> MnemosyneResult<()> {
    let db = setup().await?;
    seed(&db).await?;

    let hits = db.search(COLLECTION, &[0.0, 1.0, 0.0, 0.0], 1, None).await?;
    let record = MemoryRecord::from_entity(&hits[0].entity)?;
    assert_eq!(record.content, "lives in Oslo");
    assert_eq!(record.personality_id, "alice");
    assert_eq!(record.create_time, Some(200));
    assert!(record.memory_id.is_some());
    assert!(record.embedding.is_empty());
    Ok(())
}
