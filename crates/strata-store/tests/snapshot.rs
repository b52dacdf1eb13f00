//! Snapshot persistence round trip and tamper detection.

use std::sync::Arc;

use serde_json::json;

use strata_core::config::StoreConfig;
use strata_core::schema::StaticSchemaRegistry;
use strata_core::{
    CreateObject, CreateRelationship, ObjectFilter, ObjectPatch, StrataError, TenantScope,
};
use strata_store::{GraphStore, ScopedQuery, Storage};

#[tokio::test]
async fn test_snapshot_restores_rows_and_indexes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("snapshot.json");
    let config = StoreConfig::default();
    let tenant = TenantScope::random();

    let store = GraphStore::open(config.clone(), Arc::new(StaticSchemaRegistry::permissive())).unwrap();
    let a = store
        .create_object(
            &tenant,
            CreateObject::new("Requirement")
                .with_property("title", json!("Password reset"))
                .with_embedding(vec![1.0, 0.0]),
        )
        .await
        .unwrap();
    let b = store
        .create_object(&tenant, CreateObject::new("Requirement").with_property("title", json!("Audit log")))
        .await
        .unwrap();
    store
        .update_object(&tenant, a.canonical_id, ObjectPatch::default().with_status("done"))
        .await
        .unwrap();
    store
        .create_relationship(&tenant, CreateRelationship::new("DEPENDS_ON", a.canonical_id, b.canonical_id))
        .await
        .unwrap();
    store.storage().save_snapshot(&path).unwrap();

    let loaded = Arc::new(Storage::load_snapshot(&config, &path).unwrap());
    assert_eq!(loaded.stats(), store.storage().stats());

    let reopened = GraphStore::new(
        loaded.clone(),
        Arc::new(StaticSchemaRegistry::permissive()),
        config,
    );
    let head = reopened.get_object_head(&tenant, a.canonical_id).unwrap();
    assert_eq!(head.version, 2);
    assert_eq!(head.status.as_deref(), Some("done"));
    reopened.verify_object_chain(&tenant, a.canonical_id).unwrap();
    assert_eq!(reopened.object_edges(&tenant, a.canonical_id).unwrap().outgoing.len(), 1);

    let q = ScopedQuery::new(tenant).filter(ObjectFilter::default());
    let hits = loaded.read_tenant(&tenant, |view| view.fulltext(&q, "password", 10));
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].canonical_id, a.canonical_id);

    // Writes continue the restored chain.
    let v3 = reopened
        .update_object(&tenant, a.canonical_id, ObjectPatch::default())
        .await
        .unwrap();
    assert_eq!(v3.version, 3);
}

#[tokio::test]
async fn test_tampered_snapshot_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.json");
    let config = StoreConfig::default();
    let tenant = TenantScope::random();

    let store = GraphStore::open(config.clone(), Arc::new(StaticSchemaRegistry::permissive())).unwrap();
    let a = store
        .create_object(&tenant, CreateObject::new("Decision").with_property("choice", json!("postgres")))
        .await
        .unwrap();
    store
        .update_object(&tenant, a.canonical_id, ObjectPatch::default().with_property("choice", json!("sqlite")))
        .await
        .unwrap();
    store.storage().save_snapshot(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, text.replacen("postgres", "mysql", 1)).unwrap();

    let err = Storage::load_snapshot(&config, &path).err().unwrap();
    assert!(matches!(err, StrataError::Integrity(_)));
}
