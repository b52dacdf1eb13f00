//! Hybrid search: fusion order, filters, paging, neighbors and degraded
//! embedding.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;

use strata_core::config::{SearchConfig, StoreConfig};
use strata_core::cursor::PageDirection;
use strata_core::schema::StaticSchemaRegistry;
use strata_core::{
    CanonicalId, CreateObject, CreateRelationship, ObjectFilter, Result, StrataError, TenantScope,
};
use strata_query::types::SearchMeta;
use strata_query::{
    EmbeddingProvider, HashingEmbedder, NeighborOptions, SearchEngine, SearchPage, SearchRequest,
};
use strata_store::GraphStore;

fn store() -> GraphStore {
    GraphStore::open(
        StoreConfig::default(),
        Arc::new(StaticSchemaRegistry::permissive()),
    )
    .unwrap()
}

fn ids(page: &SearchPage) -> Vec<CanonicalId> {
    page.items.iter().map(|h| h.canonical_id).collect()
}

struct Catalog {
    gateway: CanonicalId,
    retry: CanonicalId,
    shipping: CanonicalId,
}

async fn catalog(store: &GraphStore, tenant: &TenantScope) -> Catalog {
    let gateway = store
        .create_object(
            tenant,
            CreateObject::new("Requirement")
                .with_property("title", json!("payment gateway"))
                .with_embedding(vec![1.0, 0.0, 0.0]),
        )
        .await
        .unwrap();
    let retry = store
        .create_object(
            tenant,
            CreateObject::new("Requirement")
                .with_property("title", json!("payment retry"))
                .with_embedding(vec![0.0, 1.0, 0.0]),
        )
        .await
        .unwrap();
    let shipping = store
        .create_object(
            tenant,
            CreateObject::new("Task")
                .with_property("title", json!("shipping"))
                .with_embedding(vec![0.9, 0.1, 0.0]),
        )
        .await
        .unwrap();
    store
        .create_relationship(
            tenant,
            CreateRelationship::new("DEPENDS_ON", gateway.canonical_id, shipping.canonical_id),
        )
        .await
        .unwrap();
    Catalog {
        gateway: gateway.canonical_id,
        retry: retry.canonical_id,
        shipping: shipping.canonical_id,
    }
}

#[tokio::test]
async fn test_fused_order_and_scores() {
    let store = store();
    let tenant = TenantScope::random();
    let c = catalog(&store, &tenant).await;
    let engine = SearchEngine::new(store, SearchConfig::default());

    let page = engine
        .search(
            &tenant,
            &SearchRequest::text("payment").with_vector(vec![1.0, 0.0, 0.0]),
        )
        .await
        .unwrap();

    assert_eq!(ids(&page), vec![c.gateway, c.retry, c.shipping]);
    assert_eq!(page.items[0].vector_rank, Some(1));
    assert!(page.items[0].lexical_rank.is_some());
    assert_eq!(page.items[2].lexical_rank, None);
    assert_eq!(page.items[2].vector_rank, Some(2));

    for hit in &page.items {
        let expected = hit.lexical_rank.map_or(0.0, |r| 0.4 / (60.0 + r as f64))
            + hit.vector_rank.map_or(0.0, |r| 0.6 / (60.0 + r as f64));
        assert!((hit.score - expected).abs() < 1e-12);
    }
    assert_eq!(page.meta.total, 3);
    assert!(!page.has_next);
}

#[tokio::test]
async fn test_filters_restrict_both_channels() {
    let store = store();
    let tenant = TenantScope::random();
    let c = catalog(&store, &tenant).await;
    let engine = SearchEngine::new(store, SearchConfig::default());

    let request = SearchRequest::text("payment")
        .with_vector(vec![1.0, 0.0, 0.0])
        .with_filter(ObjectFilter::of_type("Requirement"));
    let page = engine.search(&tenant, &request).await.unwrap();
    assert_eq!(page.meta.total, 2);
    assert!(!ids(&page).contains(&c.shipping));

    // Free text and property filters combine.
    let request = SearchRequest::text("shipping").with_filter(ObjectFilter::of_type("Requirement"));
    let page = engine.search(&tenant, &request).await.unwrap();
    assert!(page.items.is_empty());
}

#[tokio::test]
async fn test_single_channel_operations() {
    let store = store();
    let tenant = TenantScope::random();
    let c = catalog(&store, &tenant).await;
    let engine = SearchEngine::new(store, SearchConfig::default());

    let lexical = engine
        .lexical_search(
            &tenant,
            &SearchRequest::text("payment").with_vector(vec![1.0, 0.0, 0.0]),
        )
        .await
        .unwrap();
    assert_eq!(lexical.meta.total, 2);
    assert!(lexical.items.iter().all(|h| h.vector_rank.is_none()));

    let vector = engine
        .vector_search(
            &tenant,
            &SearchRequest::text("payment").with_vector(vec![1.0, 0.0, 0.0]),
        )
        .await
        .unwrap();
    assert_eq!(ids(&vector)[..2], [c.gateway, c.shipping]);
    assert!(vector.items.iter().all(|h| h.lexical_rank.is_none()));
}

#[tokio::test]
async fn test_neighbor_expansion_covers_top_k_only() {
    let store = store();
    let tenant = TenantScope::random();
    let c = catalog(&store, &tenant).await;
    let engine = SearchEngine::new(store, SearchConfig::default());

    let request = SearchRequest {
        neighbors: Some(NeighborOptions {
            top_k: Some(1),
            ..Default::default()
        }),
        ..SearchRequest::text("payment").with_vector(vec![1.0, 0.0, 0.0])
    };
    let page = engine.search(&tenant, &request).await.unwrap();

    let top = &page.items[0];
    assert_eq!(top.canonical_id, c.gateway);
    assert_eq!(top.neighbors.len(), 1);
    assert_eq!(top.neighbors[0].object.canonical_id, c.shipping);
    assert_eq!(top.neighbors[0].relationship.rel_type, "DEPENDS_ON");
    assert_eq!(top.neighbors[0].depth, 1);
    assert!(page.items[1..].iter().all(|h| h.neighbors.is_empty()));
}

async fn corpus(store: &GraphStore, tenant: &TenantScope, n: usize) {
    for i in 0..n {
        store
            .create_object(
                tenant,
                CreateObject::new("Requirement")
                    .with_key(format!("REQ-{i}"))
                    .with_property("title", json!(format!("audit trail entry {i}"))),
            )
            .await
            .unwrap();
    }
}

async fn page(
    engine: &SearchEngine,
    tenant: &TenantScope,
    cursor: Option<String>,
    direction: PageDirection,
) -> SearchPage {
    engine
        .search(
            tenant,
            &SearchRequest::text("audit")
                .with_limit(5)
                .with_cursor(cursor)
                .with_page_direction(direction),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_forward_and_backward_paging() {
    let store = store();
    let tenant = TenantScope::random();
    corpus(&store, &tenant, 12).await;
    let engine = SearchEngine::new(store, SearchConfig::default());

    let p1 = page(&engine, &tenant, None, PageDirection::Forward).await;
    let p2 = page(&engine, &tenant, p1.next_cursor.clone(), PageDirection::Forward).await;
    let p3 = page(&engine, &tenant, p2.next_cursor.clone(), PageDirection::Forward).await;
    assert_eq!((p1.items.len(), p2.items.len(), p3.items.len()), (5, 5, 2));
    assert!(p1.has_next && p2.has_next && !p3.has_next);
    assert!(!p1.has_prev && p3.has_prev);

    let all: HashSet<CanonicalId> = [&p1, &p2, &p3].iter().flat_map(|p| ids(p)).collect();
    assert_eq!(all.len(), 12);

    let scores: Vec<f64> = [&p1, &p2, &p3]
        .iter()
        .flat_map(|p| p.items.iter().map(|h| h.score))
        .collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));

    let back = page(&engine, &tenant, p3.prev_cursor.clone(), PageDirection::Backward).await;
    assert_eq!(ids(&back), ids(&p2));
    let back = page(&engine, &tenant, p2.prev_cursor.clone(), PageDirection::Backward).await;
    assert_eq!(ids(&back), ids(&p1));

    let garbage = page(&engine, &tenant, Some("###".into()), PageDirection::Forward).await;
    assert_eq!(ids(&garbage), ids(&p1));
}

fn mean_and_p95(samples: &mut [Duration]) -> (Duration, Duration) {
    samples.sort();
    let mean = samples.iter().sum::<Duration>() / samples.len() as u32;
    let p95 = samples[(samples.len() * 95).div_ceil(100) - 1];
    (mean, p95)
}

fn within_tolerance(a: Duration, b: Duration) -> bool {
    let larger = a.max(b);
    let tolerance = Duration::from_millis(5).max(larger / 20);
    let delta = if a > b { a - b } else { b - a };
    delta <= tolerance
}

#[tokio::test]
async fn test_backward_pages_cost_the_same_as_forward() {
    let store = store();
    let tenant = TenantScope::random();
    corpus(&store, &tenant, 150).await;
    let engine = SearchEngine::new(store, SearchConfig::default());

    let mut cursor = None;
    for _ in 0..15 {
        cursor = page(&engine, &tenant, cursor, PageDirection::Forward)
            .await
            .next_cursor;
    }
    assert!(cursor.is_some());

    // Warm up, then interleave so drift hits both directions alike.
    page(&engine, &tenant, cursor.clone(), PageDirection::Forward).await;
    page(&engine, &tenant, cursor.clone(), PageDirection::Backward).await;

    let mut forward = Vec::new();
    let mut backward = Vec::new();
    for i in 0..40 {
        let order = if i % 2 == 0 {
            [PageDirection::Forward, PageDirection::Backward]
        } else {
            [PageDirection::Backward, PageDirection::Forward]
        };
        for direction in order {
            let t = Instant::now();
            page(&engine, &tenant, cursor.clone(), direction).await;
            let elapsed = t.elapsed();
            match direction {
                PageDirection::Forward => forward.push(elapsed),
                PageDirection::Backward => backward.push(elapsed),
            }
        }
    }

    let (forward_mean, forward_p95) = mean_and_p95(&mut forward);
    let (backward_mean, backward_p95) = mean_and_p95(&mut backward);
    assert!(
        within_tolerance(forward_mean, backward_mean),
        "mean: forward {forward_mean:?} vs backward {backward_mean:?}"
    );
    assert!(
        within_tolerance(forward_p95, backward_p95),
        "p95: forward {forward_p95:?} vs backward {backward_p95:?}"
    );
}

#[tokio::test]
async fn test_text_only_requests_use_the_embedding_provider() {
    let store = store();
    let tenant = TenantScope::random();
    let embedder = Arc::new(HashingEmbedder::new(32));
    for title in ["billing export", "billing audit", "onboarding"] {
        store
            .create_object(
                &tenant,
                CreateObject::new("Requirement")
                    .with_property("title", json!(title))
                    .with_embedding(embedder.embed_sync(&format!("Requirement {title}"))),
            )
            .await
            .unwrap();
    }
    let engine = SearchEngine::new(store, SearchConfig::default()).with_embedder(embedder);

    let request = SearchRequest {
        include_debug: true,
        ..SearchRequest::text("billing")
    };
    let page = engine.search(&tenant, &request).await.unwrap();
    let vector_stats = page.meta.vector.clone().unwrap();
    assert_eq!(vector_stats.candidates, 3);
    assert_eq!(page.meta.lexical.clone().unwrap().candidates, 2);
    assert!(page.items.iter().take(2).all(|h| h.lexical_rank.is_some()));
}

struct Unavailable;

#[async_trait]
impl EmbeddingProvider for Unavailable {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(StrataError::StorageUnavailable("embedding service down".into()))
    }

    fn dimensions(&self) -> usize {
        3
    }
}

#[tokio::test]
async fn test_embedding_failure_degrades_to_lexical() {
    let store = store();
    let tenant = TenantScope::random();
    catalog(&store, &tenant).await;
    let engine =
        SearchEngine::new(store, SearchConfig::default()).with_embedder(Arc::new(Unavailable));

    let request = SearchRequest {
        include_debug: true,
        ..SearchRequest::text("payment")
    };
    let page = engine.search(&tenant, &request).await.unwrap();
    assert_eq!(page.meta.total, 2);
    let SearchMeta { vector, .. } = page.meta;
    assert_eq!(vector.unwrap().candidates, 0);
}

#[tokio::test]
async fn test_search_never_crosses_tenants() {
    let store = store();
    let owner = TenantScope::random();
    let other = TenantScope::random();
    catalog(&store, &owner).await;
    let engine = SearchEngine::new(store, SearchConfig::default());

    let page = engine
        .search(
            &other,
            &SearchRequest::text("payment").with_vector(vec![1.0, 0.0, 0.0]),
        )
        .await
        .unwrap();
    assert!(page.items.is_empty());
    assert_eq!(page.meta.total, 0);
}
