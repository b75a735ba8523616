//! Cache manager behaviour across both tiers

mod common;

use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;
use serde::{Deserialize, Serialize};
use serde_json::json;

use common::{FailingExternalTier, InMemoryExternalTier, test_cache_options};
use rtg_core::infrastructure::cache::{CacheContext, CacheManager, CacheNamespace, CacheOptions};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Template {
    id: String,
    content: String,
}

fn template() -> Template {
    Template {
        id: "t1".to_string(),
        content: "Hello {{KEY}}".to_string(),
    }
}

#[tokio::test]
async fn test_set_then_get_returns_exact_value() {
    let cache = CacheManager::new(test_cache_options(10));
    let ctx = CacheContext::for_target("P1");

    cache
        .set(CacheNamespace::Template, "t1", &template(), &ctx, None)
        .await;

    let hit: Option<Template> = cache.get(CacheNamespace::Template, "t1", &ctx).await;
    assert_eq!(hit, Some(template()));
}

#[tokio::test(start_paused = true)]
async fn test_expired_entry_is_absent_and_purged() {
    let cache = CacheManager::new(test_cache_options(10));
    let ctx = CacheContext::none();

    cache
        .set(
            CacheNamespace::Project,
            "p",
            &json!({"name": "A"}),
            &ctx,
            Some(Duration::from_secs(2)),
        )
        .await;
    assert_eq!(cache.stats().memory_entries, 1);

    tokio::time::advance(Duration::from_secs(3)).await;

    let miss: Option<serde_json::Value> = cache.get(CacheNamespace::Project, "p", &ctx).await;
    assert!(miss.is_none());
    assert_eq!(cache.stats().memory_entries, 0);
}

#[rstest]
#[case(CacheContext::for_target("P2"))]
#[case(CacheContext::none())]
#[case(CacheContext::for_target("P1").with_filters(json!({"author": "bob"})))]
#[tokio::test]
async fn test_differing_context_misses(#[case] other: CacheContext) {
    let cache = CacheManager::new(test_cache_options(10));
    cache
        .set(
            CacheNamespace::Components,
            "scoped",
            &json!([1, 2]),
            &CacheContext::for_target("P1"),
            None,
        )
        .await;

    let miss: Option<serde_json::Value> = cache
        .get(CacheNamespace::Components, "scoped", &other)
        .await;
    assert!(miss.is_none());
}

#[test]
fn test_key_derivation_is_deterministic() {
    let ctx = CacheContext::for_target("P1").with_filters(json!({"b": 2, "a": 1}));
    let key = CacheManager::cache_key(CacheNamespace::Threats, "scoped", &ctx);
    assert_eq!(key, r#"threats:scoped:target:P1:filters:{"a":1,"b":2}"#);
    assert_eq!(
        key,
        CacheManager::cache_key(CacheNamespace::Threats, "scoped", &ctx.clone())
    );
}

#[rstest]
#[case("a:target:b", CacheContext::none(), "a", CacheContext::for_target("b"))]
#[case("a", CacheContext::for_target("b:filters:{}"), "a", CacheContext::for_target("b").with_filters(json!({})))]
#[case(r"a\", CacheContext::for_target("b"), "a", CacheContext::for_target(r"\:b"))]
fn test_colons_in_components_do_not_collide(
    #[case] left_key: &str,
    #[case] left: CacheContext,
    #[case] right_key: &str,
    #[case] right: CacheContext,
) {
    assert_ne!(
        CacheManager::cache_key(CacheNamespace::Project, left_key, &left),
        CacheManager::cache_key(CacheNamespace::Project, right_key, &right)
    );
}

#[tokio::test]
async fn test_colon_key_misses_scoped_entry() {
    let cache = CacheManager::new(CacheOptions::default());
    cache
        .set(
            CacheNamespace::Project,
            "a",
            &json!({"scoped": true}),
            &CacheContext::for_target("b"),
            None,
        )
        .await;

    let miss: Option<serde_json::Value> = cache
        .get(CacheNamespace::Project, "a:target:b", &CacheContext::none())
        .await;
    assert!(miss.is_none());
}

#[tokio::test]
async fn test_external_hit_repopulates_memory() {
    let external = InMemoryExternalTier::new();
    let writer = CacheManager::with_external_tier(test_cache_options(10), external.clone());
    let ctx = CacheContext::none();
    writer
        .set(CacheNamespace::Template, "t1", &template(), &ctx, None)
        .await;

    // A second process sharing the tier starts with an empty memory map
    let reader = CacheManager::with_external_tier(test_cache_options(10), external.clone());
    assert_eq!(reader.stats().memory_entries, 0);

    let first: Option<Template> = reader.get(CacheNamespace::Template, "t1", &ctx).await;
    assert_eq!(first, Some(template()));
    assert_eq!(reader.stats().memory_entries, 1);

    let gets_after_first = external.get_calls();
    let second: Option<Template> = reader.get(CacheNamespace::Template, "t1", &ctx).await;
    assert_eq!(second, Some(template()));
    assert_eq!(external.get_calls(), gets_after_first, "served from memory");
}

#[tokio::test]
async fn test_failing_external_tier_degrades_to_memory() {
    let cache = CacheManager::with_external_tier(test_cache_options(10), Arc::new(FailingExternalTier));
    let ctx = CacheContext::none();

    cache
        .set(CacheNamespace::Statistics, "s", &json!({"count": 3}), &ctx, None)
        .await;
    let hit: Option<serde_json::Value> = cache.get(CacheNamespace::Statistics, "s", &ctx).await;
    assert_eq!(hit, Some(json!({"count": 3})));

    let miss: Option<serde_json::Value> = cache.get(CacheNamespace::Statistics, "other", &ctx).await;
    assert!(miss.is_none());

    let stats = cache.stats();
    assert!(stats.external_tier_enabled);
    assert!(!stats.external_tier_connected);

    cache.delete(CacheNamespace::Statistics, "s", &ctx).await;
    cache.clear(None).await;
}

#[tokio::test]
async fn test_clear_namespace_keeps_other_namespaces() {
    let external = InMemoryExternalTier::new();
    let cache = CacheManager::with_external_tier(test_cache_options(10), external.clone());
    let ctx = CacheContext::none();

    cache.set(CacheNamespace::Template, "a", &1, &ctx, None).await;
    cache.set(CacheNamespace::Threats, "b", &2, &ctx, None).await;

    cache.clear(Some(CacheNamespace::Template)).await;

    assert_eq!(cache.get::<i32>(CacheNamespace::Template, "a", &ctx).await, None);
    assert_eq!(cache.get::<i32>(CacheNamespace::Threats, "b", &ctx).await, Some(2));
    assert_eq!(external.entries.lock().await.len(), 1);
}

#[tokio::test]
async fn test_delete_removes_from_both_tiers() {
    let external = InMemoryExternalTier::new();
    let cache = CacheManager::with_external_tier(test_cache_options(10), external.clone());
    let ctx = CacheContext::none();

    cache.set(CacheNamespace::Safeguards, "x", &"v", &ctx, None).await;
    cache.delete(CacheNamespace::Safeguards, "x", &ctx).await;

    assert_eq!(cache.get::<String>(CacheNamespace::Safeguards, "x", &ctx).await, None);
    assert!(external.entries.lock().await.is_empty());
}

#[tokio::test]
async fn test_full_memory_tier_stays_bounded() {
    let cache = CacheManager::new(test_cache_options(20));
    let ctx = CacheContext::none();
    for i in 0..50 {
        cache
            .set(CacheNamespace::Project, &i.to_string(), &i, &ctx, None)
            .await;
    }
    assert!(cache.stats().memory_entries <= 20);
    // the newest entry always survives
    assert_eq!(cache.get::<i32>(CacheNamespace::Project, "49", &ctx).await, Some(49));
}

#[tokio::test]
async fn test_unreachable_external_tier_falls_back_to_memory_only() {
    let options = CacheOptions {
        external_tier_enabled: true,
        external_tier_address: Some("redis://127.0.0.1:1".to_string()),
        ..test_cache_options(10)
    };
    let cache = CacheManager::connect(options).await;
    let stats = cache.stats();
    assert!(stats.external_tier_enabled);
    assert!(!stats.external_tier_connected);

    cache.set(CacheNamespace::Template, "k", &"v", &CacheContext::none(), None).await;
    assert_eq!(
        cache.get::<String>(CacheNamespace::Template, "k", &CacheContext::none()).await,
        Some("v".to_string())
    );
}
