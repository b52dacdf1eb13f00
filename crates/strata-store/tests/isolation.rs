//! Tenant isolation at both layers, the bootstrap scope and policy drift.

use std::sync::Arc;

use serde_json::json;

use strata_core::config::StoreConfig;
use strata_core::schema::StaticSchemaRegistry;
use strata_core::scope::{self, ScopeContext};
use strata_core::{
    CreateObject, CreateRelationship, ObjectFilter, ObjectPatch, Scope, StrataError, TenantScope,
};
use strata_store::{AdminStore, Command, GraphStore, PolicyCatalog, ScopedQuery, Storage};

fn store() -> GraphStore {
    GraphStore::open(
        StoreConfig::default(),
        Arc::new(StaticSchemaRegistry::permissive()),
    )
    .unwrap()
}

#[tokio::test]
async fn test_tenants_cannot_see_or_touch_each_other() {
    let store = store();
    let alpha = TenantScope::random();
    let beta = TenantScope::random();

    let a = store
        .create_object(&alpha, CreateObject::new("Requirement").with_key("A-1"))
        .await
        .unwrap();

    let err = store.get_object_head(&beta, a.canonical_id).unwrap_err();
    assert!(matches!(err, StrataError::NotFound { .. }));
    assert!(store.get_object_by_id(&beta, a.id).is_err());
    assert!(store
        .object_history(&beta, a.canonical_id, None, None)
        .is_err());

    let err = store
        .update_object(&beta, a.canonical_id, ObjectPatch::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StrataError::NotFound { .. }));
    assert!(store.delete_object(&beta, a.canonical_id).await.is_err());

    let listed = store
        .list_objects(&beta, ObjectFilter::default(), None, None)
        .unwrap();
    assert!(listed.items.is_empty());

    // An edge from another tenant's object cannot be created.
    let b = store
        .create_object(&beta, CreateObject::new("Requirement"))
        .await
        .unwrap();
    let err = store
        .create_relationship(
            &beta,
            CreateRelationship::new("DEPENDS_ON", b.canonical_id, a.canonical_id),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StrataError::NotFound { .. }));

    assert_eq!(store.get_object_head(&alpha, a.canonical_id).unwrap().version, 1);
}

#[tokio::test]
async fn test_storage_policies_filter_even_mismatched_queries() {
    let store = store();
    let alpha = TenantScope::random();
    let beta = TenantScope::random();
    let a = store
        .create_object(&alpha, CreateObject::new("Requirement"))
        .await
        .unwrap();

    // Layer 1 alone would admit the row; the session policy still hides it.
    let visible = store.storage().read_tenant(&beta, |view| {
        view.object_head(&ScopedQuery::new(alpha), a.canonical_id)
            .is_some()
    });
    assert!(!visible);

    // A wildcard query under a tenant session sees only that tenant's rows.
    let visible = store.storage().read_tenant(&beta, |view| {
        view.object_head(&ScopedQuery::new(Scope::Bootstrap), a.canonical_id)
            .is_some()
    });
    assert!(!visible);
}

#[tokio::test]
async fn test_only_admin_store_reads_across_tenants() {
    let store = store();
    let victim = TenantScope::random();
    let intruder = TenantScope::random();
    let secret = store
        .create_object(&victim, CreateObject::new("Requirement").with_key("SECRET-1"))
        .await
        .unwrap();

    // Public storage entry points take a tenant, so the most a tenant-facing
    // caller can do is ask for everything under its own session.
    let everything = ScopedQuery::new(Scope::Bootstrap);
    let (head, heads) = store.storage().read_tenant(&intruder, |view| {
        (
            view.object_head(&everything, secret.canonical_id).is_some(),
            view.object_heads(&everything).len(),
        )
    });
    assert!(!head);
    assert_eq!(heads, 0);

    // A transaction opened for the intruder cannot write into the victim.
    let mut forged = secret.clone();
    forged.version = 2;
    let mut txn = store.storage().begin_tenant(&intruder);
    let err = txn.append_object(Command::Update, forged).unwrap_err();
    assert!(matches!(err, StrataError::TenantMismatch(_)));
    drop(txn);

    let admin = AdminStore::new(store.storage().clone());
    assert_eq!(admin.tenants(), vec![victim]);
    assert_eq!(admin.object_heads().len(), 1);
}

#[tokio::test]
async fn test_bootstrap_scope_sees_every_tenant() {
    let store = store();
    let tenants: Vec<TenantScope> = (0..3).map(|_| TenantScope::random()).collect();
    for t in &tenants {
        store
            .create_object(t, CreateObject::new("Requirement").with_property("t", json!(t.to_string())))
            .await
            .unwrap();
    }

    let admin = AdminStore::new(store.storage().clone());
    assert_eq!(admin.object_heads().len(), 3);
    let mut expected = tenants.clone();
    expected.sort();
    assert_eq!(admin.tenants(), expected);

    let report = admin.verify_all_chains();
    assert!(report.is_clean());
    assert_eq!(report.objects_checked, 3);
}

#[test]
fn test_policy_drift_fails_startup() {
    let config = StoreConfig::default();
    assert!(Storage::open(&config).is_ok());

    let mut catalog = PolicyCatalog::standard();
    catalog.drop_policy("graph_objects_delete");
    let err = Storage::with_policies(&config, catalog).err().unwrap();
    assert!(matches!(err, StrataError::PolicyDrift(_)));
}

#[tokio::test]
async fn test_ambient_scope_drives_store_calls() {
    let store = store();
    let alpha = TenantScope::random();
    let beta = TenantScope::random();
    let ctx = ScopeContext::new(alpha);

    let (in_alpha, in_beta) = scope::with_context(ctx.clone(), async {
        let tenant = scope::current_tenant().unwrap();
        let a = store
            .create_object(&tenant, CreateObject::new("Requirement"))
            .await
            .unwrap();

        let carrier = scope::ambient().unwrap();
        let b = carrier
            .scoped(beta, async {
                let tenant = scope::current_tenant().unwrap();
                store
                    .create_object(&tenant, CreateObject::new("Requirement"))
                    .await
                    .unwrap()
            })
            .await;
        (a, b)
    })
    .await;

    assert_eq!(in_alpha.organization_id, alpha.organization_id);
    assert_eq!(in_beta.project_id, beta.project_id);
    assert_eq!(ctx.current(), Scope::Tenant(alpha));
    assert_eq!(ctx.restorations(), 1);
}
