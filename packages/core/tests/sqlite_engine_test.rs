//! Relational cache engine tests
//!
//! Covers the exact-match backend's contract:
//! - Idempotent upsert by slug
//! - Filter allow-list enforcement and unknown-category rejection
//! - Document scoping (single value and list)
//! - Empty-input and missing-slug leniency
//! - Absent semantic capability
//! - Legacy raw-response TTL cache

use lorespace_core::cache::{CacheError, EntityCache, FilterMap, FilterValue, SqliteCacheEngine};
use lorespace_core::models::EntityRecord;
use serde_json::json;
use tempfile::TempDir;

fn test_engine() -> (SqliteCacheEngine, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let engine = SqliteCacheEngine::new(temp_dir.path().join("entities.db"));
    (engine, temp_dir)
}

fn spell(slug: &str, name: &str, level: i64, school: &str, document: &str) -> EntityRecord {
    EntityRecord::from_value(json!({
        "slug": slug,
        "name": name,
        "level": level,
        "school": school,
        "document": document,
        "desc": format!("The {} spell.", name),
    }))
    .unwrap()
}

fn filters(pairs: Vec<(&str, FilterValue)>) -> FilterMap {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

#[tokio::test]
async fn test_store_and_get_round_trip() {
    let (engine, _dir) = test_engine();

    let stored = engine
        .store_entities(
            &[
                spell("fireball", "Fireball", 3, "Evocation", "srd"),
                spell("icestorm", "Ice Storm", 4, "Evocation", "srd"),
            ],
            "spells",
        )
        .await
        .unwrap();
    assert_eq!(stored, 2);

    let all = engine.get_entities("spells", &FilterMap::new()).await.unwrap();
    assert_eq!(all.len(), 2);
    // Full payload survives verbatim, including unindexed fields
    assert!(all.iter().any(|e| e.get("desc") == Some(&json!("The Fireball spell."))));
}

#[tokio::test]
async fn test_filter_correctness() {
    let (engine, _dir) = test_engine();
    engine
        .store_entities(
            &[
                spell("fireball", "Fireball", 3, "Evocation", "srd"),
                spell("icestorm", "Ice Storm", 4, "Evocation", "srd"),
            ],
            "spells",
        )
        .await
        .unwrap();

    let level_3 = engine
        .get_entities("spells", &filters(vec![("level", FilterValue::Integer(3))]))
        .await
        .unwrap();
    assert_eq!(level_3.len(), 1);
    assert_eq!(level_3[0].slug(), Some("fireball"));

    let evocation = engine
        .get_entities(
            "spells",
            &filters(vec![("school", FilterValue::Text("Evocation".into()))]),
        )
        .await
        .unwrap();
    assert_eq!(evocation.len(), 2);

    let none = engine
        .get_entities("spells", &filters(vec![("level", FilterValue::Integer(9))]))
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_document_scoping() {
    let (engine, _dir) = test_engine();
    engine
        .store_entities(
            &[
                spell("fireball", "Fireball", 3, "Evocation", "srd"),
                spell("homebrew-nova", "Nova", 3, "Evocation", "homebrew"),
            ],
            "spells",
        )
        .await
        .unwrap();

    let srd_only = engine
        .get_entities(
            "spells",
            &filters(vec![("document", FilterValue::Text("srd".into()))]),
        )
        .await
        .unwrap();
    assert_eq!(srd_only.len(), 1);
    assert_eq!(srd_only[0].slug(), Some("fireball"));

    let both = engine
        .get_entities(
            "spells",
            &filters(vec![(
                "document",
                FilterValue::TextList(vec!["srd".into(), "homebrew".into()]),
            )]),
        )
        .await
        .unwrap();
    assert_eq!(both.len(), 2);
}

#[tokio::test]
async fn test_idempotent_upsert() {
    let (engine, _dir) = test_engine();

    engine
        .store_entities(&[spell("fireball", "Fireball", 3, "Evocation", "srd")], "spells")
        .await
        .unwrap();
    engine
        .store_entities(
            &[spell("fireball", "Fireball (revised)", 3, "Evocation", "a5e")],
            "spells",
        )
        .await
        .unwrap();

    assert_eq!(engine.count_entities("spells").await.unwrap(), 1);

    let all = engine.get_entities("spells", &FilterMap::new()).await.unwrap();
    assert_eq!(all[0].name(), Some("Fireball (revised)"));
    assert_eq!(all[0].document(), Some("a5e"));
}

#[tokio::test]
async fn test_unknown_category_rejected() {
    let (engine, _dir) = test_engine();

    let store_err = engine
        .store_entities(
            &[spell("x", "X", 1, "Evocation", "srd")],
            "not_a_real_category",
        )
        .await
        .unwrap_err();
    assert!(matches!(store_err, CacheError::UnknownCategory(_)));

    let get_err = engine
        .get_entities("not_a_real_category", &FilterMap::new())
        .await
        .unwrap_err();
    assert!(matches!(get_err, CacheError::UnknownCategory(_)));
}

#[tokio::test]
async fn test_filter_allow_list_enforced() {
    let (engine, _dir) = test_engine();

    let err = engine
        .get_entities(
            "spells",
            &filters(vec![("nonexistent_field", FilterValue::Integer(3))]),
        )
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("nonexistent_field"));
    assert!(message.contains("level"));

    // A declared field passes
    engine
        .get_entities("spells", &filters(vec![("level", FilterValue::Integer(3))]))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_empty_list_is_a_noop() {
    let (engine, _dir) = test_engine();
    let stored = engine.store_entities(&[], "spells").await.unwrap();
    assert_eq!(stored, 0);
}

#[tokio::test]
async fn test_entities_without_slug_are_skipped() {
    let (engine, _dir) = test_engine();

    let no_slug = EntityRecord::from_value(json!({"name": "Nameless", "level": 1})).unwrap();
    let stored = engine
        .store_entities(
            &[no_slug, spell("fireball", "Fireball", 3, "Evocation", "srd")],
            "spells",
        )
        .await
        .unwrap();

    assert_eq!(stored, 1);
    assert_eq!(engine.count_entities("spells").await.unwrap(), 1);
}

#[tokio::test]
async fn test_no_semantic_capability() {
    let (engine, _dir) = test_engine();
    assert!(!engine.supports_semantic_search());

    let err = engine
        .semantic_search("spells", "fire", 10, &FilterMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::SemanticSearchUnsupported(_)));
}

#[tokio::test]
async fn test_reads_tolerate_missing_tables() {
    let (engine, _dir) = test_engine();

    assert_eq!(engine.count_entities("spells").await.unwrap(), 0);
    assert!(engine.list_documents().await.unwrap().is_empty());
    assert!(engine.document_counts().await.unwrap().is_empty());

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.total_entities, 0);
    assert!(stats.per_category.is_empty());
}

#[tokio::test]
async fn test_document_breakdown_and_stats() {
    let (engine, _dir) = test_engine();
    engine
        .store_entities(
            &[
                spell("fireball", "Fireball", 3, "Evocation", "srd"),
                spell("homebrew-nova", "Nova", 3, "Evocation", "homebrew"),
            ],
            "spells",
        )
        .await
        .unwrap();
    engine
        .store_entities(
            &[EntityRecord::from_value(json!({
                "slug": "goblin", "name": "Goblin", "document": "srd",
            }))
            .unwrap()],
            "creatures",
        )
        .await
        .unwrap();

    let documents = engine.list_documents().await.unwrap();
    assert_eq!(documents, vec!["homebrew".to_string(), "srd".to_string()]);

    let counts = engine.document_counts().await.unwrap();
    assert_eq!(counts.get("srd"), Some(&2));
    assert_eq!(counts.get("homebrew"), Some(&1));

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.backend, "sqlite");
    assert_eq!(stats.total_entities, 3);
    assert_eq!(stats.per_category.get("spells"), Some(&2));
    assert!(stats.storage_bytes > 0);
}

#[tokio::test]
async fn test_response_cache_honors_ttl() {
    let (engine, _dir) = test_engine();

    engine
        .put_response("spells?level=3", b"raw payload", 60.0, Some("srd"))
        .await
        .unwrap();
    assert_eq!(
        engine.get_response("spells?level=3").await.unwrap(),
        Some(b"raw payload".to_vec())
    );

    // An already-expired entry is invisible and purgeable
    engine
        .put_response("stale-key", b"old", -1.0, None)
        .await
        .unwrap();
    assert_eq!(engine.get_response("stale-key").await.unwrap(), None);
    assert_eq!(engine.purge_expired_responses().await.unwrap(), 1);
}
