//! Object lifecycle: create, update, delete, restore, reads and history.

use chrono::Utc;

use strata_core::schema;
use strata_core::types::merge_properties;
use strata_core::{
    CanonicalId, CreateObject, EntityRef, GraphObject, ObjectPatch, Result, Scope, StrataError,
    TenantScope, VersionId,
};

use crate::locks::object_key;
use crate::policy::Command;
use crate::query::ScopedQuery;
use crate::store::{
    history_page, next_object, object_not_found, seal_object, ChainReport, GraphStore, HistoryPage,
};

impl GraphStore {
    // ── Mutations ─────────────────────────────────────────────────

    /// Create version 1 of a new object.
    pub async fn create_object(&self, scope: &TenantScope, input: CreateObject) -> Result<GraphObject> {
        let validator = self.schema.object_validator(&input.object_type).await;
        schema::check(validator.as_ref(), &input.object_type, &input.properties)?;

        let canonical_id = CanonicalId::new();
        let mut txn = self.storage.begin(Scope::Tenant(*scope));
        txn.lock([object_key(canonical_id)]).await?;

        let row = seal_object(
            GraphObject {
                id: VersionId::new(),
                canonical_id,
                version: 1,
                supersedes_id: None,
                object_type: input.object_type,
                key: input.key,
                status: input.status,
                properties: input.properties,
                labels: input.labels,
                embedding: input.embedding,
                deleted_at: None,
                organization_id: scope.organization_id,
                project_id: scope.project_id,
                branch_id: input.branch_id,
                created_at: Utc::now(),
                content_hash: String::new(),
            },
            "",
        )?;
        txn.append_object(Command::Insert, row.clone())?;
        txn.commit()?;

        tracing::debug!(
            canonical_id = %row.canonical_id,
            object_type = %row.object_type,
            organization_id = %scope.organization_id,
            project_id = %scope.project_id,
            "Object created"
        );
        Ok(row)
    }

    /// Append a new version with `patch` merged into the current head.
    pub async fn update_object(
        &self,
        scope: &TenantScope,
        entity: impl Into<EntityRef>,
        patch: ObjectPatch,
    ) -> Result<GraphObject> {
        let (canonical_id, object_type) = self.resolve_object_type(scope, entity.into())?;
        let validator = self.schema.object_validator(&object_type).await;

        let q = ScopedQuery::new(*scope);
        let mut txn = self.storage.begin(Scope::Tenant(*scope));
        txn.lock([object_key(canonical_id)]).await?;

        let head = txn
            .read(|view| view.object_head(&q, canonical_id).cloned())
            .ok_or_else(|| object_not_found(canonical_id))?;
        if head.is_deleted() {
            return Err(StrataError::AlreadyDeleted {
                entity: "object",
                canonical_id: canonical_id.to_string(),
            });
        }

        let properties = merge_properties(&head.properties, &patch.properties);
        schema::check(validator.as_ref(), &head.object_type, &properties)?;

        let mut row = next_object(&head);
        row.properties = properties;
        if let Some(labels) = patch.labels {
            row.labels = labels;
        }
        if patch.status.is_some() {
            row.status = patch.status;
        }
        if patch.key.is_some() {
            row.key = patch.key;
        }
        if patch.embedding.is_some() {
            row.embedding = patch.embedding;
        }
        let row = seal_object(row, &head.content_hash)?;
        txn.append_object(Command::Update, row.clone())?;
        txn.commit()?;

        tracing::debug!(canonical_id = %canonical_id, version = row.version, "Object updated");
        Ok(row)
    }

    /// Append a tombstone version.
    pub async fn delete_object(&self, scope: &TenantScope, entity: impl Into<EntityRef>) -> Result<GraphObject> {
        let (canonical_id, _) = self.resolve_object_type(scope, entity.into())?;

        let q = ScopedQuery::new(*scope);
        let mut txn = self.storage.begin(Scope::Tenant(*scope));
        txn.lock([object_key(canonical_id)]).await?;

        let head = txn
            .read(|view| view.object_head(&q, canonical_id).cloned())
            .ok_or_else(|| object_not_found(canonical_id))?;
        if head.is_deleted() {
            return Err(StrataError::AlreadyDeleted {
                entity: "object",
                canonical_id: canonical_id.to_string(),
            });
        }

        let mut row = next_object(&head);
        row.deleted_at = Some(row.created_at);
        let row = seal_object(row, &head.content_hash)?;
        txn.append_object(Command::Delete, row.clone())?;
        txn.commit()?;

        tracing::debug!(canonical_id = %canonical_id, version = row.version, "Object deleted");
        Ok(row)
    }

    /// Append a version that clears the tombstone.
    pub async fn restore_object(&self, scope: &TenantScope, entity: impl Into<EntityRef>) -> Result<GraphObject> {
        let (canonical_id, object_type) = self.resolve_object_type(scope, entity.into())?;
        let validator = self.schema.object_validator(&object_type).await;

        let q = ScopedQuery::new(*scope);
        let mut txn = self.storage.begin(Scope::Tenant(*scope));
        txn.lock([object_key(canonical_id)]).await?;

        let head = txn
            .read(|view| view.object_head(&q, canonical_id).cloned())
            .ok_or_else(|| object_not_found(canonical_id))?;
        if !head.is_deleted() {
            return Err(StrataError::NotDeleted {
                entity: "object",
                canonical_id: canonical_id.to_string(),
            });
        }
        schema::check(validator.as_ref(), &head.object_type, &head.properties)?;

        let mut row = next_object(&head);
        row.deleted_at = None;
        let row = seal_object(row, &head.content_hash)?;
        txn.append_object(Command::Update, row.clone())?;
        txn.commit()?;

        tracing::debug!(canonical_id = %canonical_id, version = row.version, "Object restored");
        Ok(row)
    }

    // ── Reads ─────────────────────────────────────────────────────

    /// Any version row by its row id.
    pub fn get_object_by_id(&self, scope: &TenantScope, id: VersionId) -> Result<GraphObject> {
        let q = ScopedQuery::new(*scope);
        self.storage
            .read(Scope::Tenant(*scope), |view| view.object_row(&q, id).cloned())
            .ok_or_else(|| object_not_found(id))
    }

    /// Current head, which may be a tombstone.
    pub fn get_object_head(&self, scope: &TenantScope, canonical_id: CanonicalId) -> Result<GraphObject> {
        let q = ScopedQuery::new(*scope);
        self.storage
            .read(Scope::Tenant(*scope), |view| {
                view.object_head(&q, canonical_id).cloned()
            })
            .ok_or_else(|| object_not_found(canonical_id))
    }

    /// Versions strictly below `cursor`, newest first.
    pub fn object_history(
        &self,
        scope: &TenantScope,
        canonical_id: CanonicalId,
        cursor: Option<u32>,
        limit: Option<usize>,
    ) -> Result<HistoryPage<GraphObject>> {
        let limit = self.page_size(limit);
        let q = ScopedQuery::new(*scope);
        self.storage.read(Scope::Tenant(*scope), |view| {
            let versions = view.object_versions(&q, canonical_id);
            if versions.is_empty() {
                return Err(object_not_found(canonical_id));
            }
            Ok(history_page(&versions, |o| o.version, cursor, limit))
        })
    }

    /// Check the object's version chain and content hashes.
    pub fn verify_object_chain(&self, scope: &TenantScope, canonical_id: CanonicalId) -> Result<ChainReport> {
        let q = ScopedQuery::new(*scope);
        self.storage.read(Scope::Tenant(*scope), |view| {
            let versions = view.object_versions(&q, canonical_id);
            let head = versions.last().ok_or_else(|| object_not_found(canonical_id))?;
            crate::hash::verify_chain(canonical_id, &versions)?;
            Ok(ChainReport {
                canonical_id,
                versions: head.version,
                head_hash: head.content_hash.clone(),
            })
        })
    }

    /// Canonical id and type of a visible object, read without locking.
    /// Type is immutable, so the answer stays valid once the lock is taken.
    fn resolve_object_type(&self, scope: &TenantScope, entity: EntityRef) -> Result<(CanonicalId, String)> {
        let q = ScopedQuery::new(*scope);
        self.storage
            .read(Scope::Tenant(*scope), |view| {
                let id = view.resolve_object(&q, entity)?;
                view.object_head(&q, id)
                    .map(|head| (id, head.object_type.clone()))
            })
            .ok_or_else(|| object_not_found(entity))
    }
}
