//! Relationship lifecycle with multiplicity enforcement.
//!
//! A relationship is identified by `(type, src, dst)`: creating one whose
//! triple already exists appends to the existing chain instead of starting a
//! new canonical id. Every relationship mutation locks the triple key, plus
//! one side key per endpoint whose multiplicity is `one`.

use chrono::Utc;

use strata_core::schema::{self, Cardinality, Multiplicity};
use strata_core::types::merge_properties;
use strata_core::{
    CanonicalId, CreateRelationship, Direction, EntityRef, GraphRelationship, RelationshipPatch,
    Result, Scope, StrataError, TenantScope, VersionId,
};

use crate::engine::ReadView;
use crate::locks::{side_key, triple_key, LockKey};
use crate::policy::Command;
use crate::query::ScopedQuery;
use crate::store::{
    history_page, next_relationship, object_not_found, relationship_not_found, seal_relationship,
    ChainReport, GraphStore, HistoryPage,
};

const DEFAULT_WEIGHT: f64 = 1.0;

/// Immutable identity of a relationship, read before locking.
struct RelIdentity {
    canonical_id: CanonicalId,
    rel_type: String,
    src_id: CanonicalId,
    dst_id: CanonicalId,
}

fn lock_keys(rel_type: &str, src: CanonicalId, dst: CanonicalId, multiplicity: Multiplicity) -> Vec<LockKey> {
    let mut keys = vec![triple_key(rel_type, src, dst)];
    if multiplicity.src == Cardinality::One {
        keys.push(side_key(rel_type, "src", src));
    }
    if multiplicity.dst == Cardinality::One {
        keys.push(side_key(rel_type, "dst", dst));
    }
    keys
}

/// Reject a live edge that would break a `one` side, ignoring `exclude`
/// (the relationship being revived or restored).
fn check_multiplicity(
    view: &ReadView<'_>,
    q: &ScopedQuery,
    rel_type: &str,
    src: CanonicalId,
    dst: CanonicalId,
    multiplicity: Multiplicity,
    exclude: Option<CanonicalId>,
) -> Result<()> {
    let others = |endpoint, direction| {
        view.live_edges_of_type(q, rel_type, endpoint, direction)
            .into_iter()
            .any(|r| Some(r.canonical_id) != exclude)
    };
    if multiplicity.src == Cardinality::One && others(src, Direction::Outgoing) {
        return Err(StrataError::MultiplicityViolation {
            rel_type: rel_type.to_string(),
            side: "src",
            endpoint: src.to_string(),
        });
    }
    if multiplicity.dst == Cardinality::One && others(dst, Direction::Incoming) {
        return Err(StrataError::MultiplicityViolation {
            rel_type: rel_type.to_string(),
            side: "dst",
            endpoint: dst.to_string(),
        });
    }
    Ok(())
}

fn check_endpoints(view: &ReadView<'_>, q: &ScopedQuery, src: CanonicalId, dst: CanonicalId) -> Result<()> {
    for id in [src, dst] {
        if view.live_object(q, id).is_none() {
            return Err(object_not_found(id));
        }
    }
    Ok(())
}

fn already_deleted(canonical_id: CanonicalId) -> StrataError {
    StrataError::AlreadyDeleted {
        entity: "relationship",
        canonical_id: canonical_id.to_string(),
    }
}

impl GraphStore {
    // ── Mutations ─────────────────────────────────────────────────

    /// Create a relationship, or return / extend the existing one with the
    /// same `(type, src, dst)`.
    ///
    /// An existing live head with identical properties is returned as is.
    /// Otherwise the existing chain gains a version carrying the new
    /// properties, which also revives a tombstoned head.
    pub async fn create_relationship(
        &self,
        scope: &TenantScope,
        input: CreateRelationship,
    ) -> Result<GraphRelationship> {
        if input.src_id == input.dst_id {
            return Err(StrataError::validation(
                &input.rel_type,
                "a relationship cannot connect an object to itself",
            ));
        }
        let validator = self.schema.relationship_validator(&input.rel_type).await;
        let multiplicity = self.schema.relationship_multiplicity(&input.rel_type).await;
        schema::check(validator.as_ref(), &input.rel_type, &input.properties)?;

        let q = ScopedQuery::new(*scope);
        let mut txn = self.storage.begin(Scope::Tenant(*scope));
        txn.lock(lock_keys(&input.rel_type, input.src_id, input.dst_id, multiplicity))
            .await?;

        let existing = txn.read(|view| -> Result<Option<GraphRelationship>> {
            check_endpoints(view, &q, input.src_id, input.dst_id)?;
            let existing = view
                .triple_head(&q, &input.rel_type, input.src_id, input.dst_id)
                .cloned();
            let reviving = existing.as_ref().map(|h| h.canonical_id);
            let live = existing.as_ref().is_some_and(|h| !h.is_deleted());
            if !live {
                check_multiplicity(
                    view,
                    &q,
                    &input.rel_type,
                    input.src_id,
                    input.dst_id,
                    multiplicity,
                    reviving,
                )?;
            }
            Ok(existing)
        })?;

        let (command, row, prev_hash) = match existing {
            Some(head) if !head.is_deleted() && head.properties == input.properties => {
                tracing::debug!(canonical_id = %head.canonical_id, "Relationship already exists");
                return Ok(head);
            }
            Some(head) => {
                let mut row = next_relationship(&head);
                row.properties = input.properties;
                row.deleted_at = None;
                if let Some(weight) = input.weight {
                    row.weight = weight;
                }
                if input.valid_from.is_some() {
                    row.valid_from = input.valid_from;
                }
                if input.valid_to.is_some() {
                    row.valid_to = input.valid_to;
                }
                (Command::Update, row, head.content_hash)
            }
            None => {
                let row = GraphRelationship {
                    id: VersionId::new(),
                    canonical_id: CanonicalId::new(),
                    version: 1,
                    supersedes_id: None,
                    rel_type: input.rel_type,
                    src_id: input.src_id,
                    dst_id: input.dst_id,
                    properties: input.properties,
                    weight: input.weight.unwrap_or(DEFAULT_WEIGHT),
                    valid_from: input.valid_from,
                    valid_to: input.valid_to,
                    branch_id: input.branch_id,
                    deleted_at: None,
                    organization_id: scope.organization_id,
                    project_id: scope.project_id,
                    created_at: Utc::now(),
                    content_hash: String::new(),
                };
                (Command::Insert, row, String::new())
            }
        };

        let row = seal_relationship(row, &prev_hash)?;
        txn.append_relationship(command, row.clone())?;
        txn.commit()?;

        tracing::debug!(
            canonical_id = %row.canonical_id,
            version = row.version,
            rel_type = %row.rel_type,
            organization_id = %scope.organization_id,
            project_id = %scope.project_id,
            "Relationship written"
        );
        Ok(row)
    }

    /// Append a version with `patch` merged into the head.
    pub async fn update_relationship(
        &self,
        scope: &TenantScope,
        entity: impl Into<EntityRef>,
        patch: RelationshipPatch,
    ) -> Result<GraphRelationship> {
        let ident = self.resolve_relationship(scope, entity.into())?;
        let validator = self.schema.relationship_validator(&ident.rel_type).await;

        let q = ScopedQuery::new(*scope);
        let mut txn = self.storage.begin(Scope::Tenant(*scope));
        txn.lock([triple_key(&ident.rel_type, ident.src_id, ident.dst_id)])
            .await?;

        let head = txn
            .read(|view| view.relationship_head(&q, ident.canonical_id).cloned())
            .ok_or_else(|| relationship_not_found(ident.canonical_id))?;
        if head.is_deleted() {
            return Err(already_deleted(ident.canonical_id));
        }

        let properties = merge_properties(&head.properties, &patch.properties);
        schema::check(validator.as_ref(), &head.rel_type, &properties)?;

        let mut row = next_relationship(&head);
        row.properties = properties;
        if let Some(weight) = patch.weight {
            row.weight = weight;
        }
        if patch.valid_from.is_some() {
            row.valid_from = patch.valid_from;
        }
        if patch.valid_to.is_some() {
            row.valid_to = patch.valid_to;
        }
        let row = seal_relationship(row, &head.content_hash)?;
        txn.append_relationship(Command::Update, row.clone())?;
        txn.commit()?;

        tracing::debug!(canonical_id = %row.canonical_id, version = row.version, "Relationship updated");
        Ok(row)
    }

    /// Append a tombstone version.
    pub async fn delete_relationship(
        &self,
        scope: &TenantScope,
        entity: impl Into<EntityRef>,
    ) -> Result<GraphRelationship> {
        let ident = self.resolve_relationship(scope, entity.into())?;

        let q = ScopedQuery::new(*scope);
        let mut txn = self.storage.begin(Scope::Tenant(*scope));
        txn.lock([triple_key(&ident.rel_type, ident.src_id, ident.dst_id)])
            .await?;

        let head = txn
            .read(|view| view.relationship_head(&q, ident.canonical_id).cloned())
            .ok_or_else(|| relationship_not_found(ident.canonical_id))?;
        if head.is_deleted() {
            return Err(already_deleted(ident.canonical_id));
        }

        let mut row = next_relationship(&head);
        row.deleted_at = Some(row.created_at);
        let row = seal_relationship(row, &head.content_hash)?;
        txn.append_relationship(Command::Delete, row.clone())?;
        txn.commit()?;

        tracing::debug!(canonical_id = %row.canonical_id, version = row.version, "Relationship deleted");
        Ok(row)
    }

    /// Clear the tombstone. Endpoints must be live and multiplicity must
    /// still hold.
    pub async fn restore_relationship(
        &self,
        scope: &TenantScope,
        entity: impl Into<EntityRef>,
    ) -> Result<GraphRelationship> {
        let ident = self.resolve_relationship(scope, entity.into())?;
        let validator = self.schema.relationship_validator(&ident.rel_type).await;
        let multiplicity = self.schema.relationship_multiplicity(&ident.rel_type).await;

        let q = ScopedQuery::new(*scope);
        let mut txn = self.storage.begin(Scope::Tenant(*scope));
        txn.lock(lock_keys(&ident.rel_type, ident.src_id, ident.dst_id, multiplicity))
            .await?;

        let head = txn.read(|view| -> Result<GraphRelationship> {
            let head = view
                .relationship_head(&q, ident.canonical_id)
                .cloned()
                .ok_or_else(|| relationship_not_found(ident.canonical_id))?;
            if !head.is_deleted() {
                return Err(StrataError::NotDeleted {
                    entity: "relationship",
                    canonical_id: ident.canonical_id.to_string(),
                });
            }
            check_endpoints(view, &q, head.src_id, head.dst_id)?;
            check_multiplicity(
                view,
                &q,
                &head.rel_type,
                head.src_id,
                head.dst_id,
                multiplicity,
                Some(head.canonical_id),
            )?;
            Ok(head)
        })?;
        schema::check(validator.as_ref(), &head.rel_type, &head.properties)?;

        let mut row = next_relationship(&head);
        row.deleted_at = None;
        let row = seal_relationship(row, &head.content_hash)?;
        txn.append_relationship(Command::Update, row.clone())?;
        txn.commit()?;

        tracing::debug!(canonical_id = %row.canonical_id, version = row.version, "Relationship restored");
        Ok(row)
    }

    // ── Reads ─────────────────────────────────────────────────────

    pub fn get_relationship_by_id(&self, scope: &TenantScope, id: VersionId) -> Result<GraphRelationship> {
        let q = ScopedQuery::new(*scope);
        self.storage
            .read(Scope::Tenant(*scope), |view| {
                view.relationship_row(&q, id).cloned()
            })
            .ok_or_else(|| relationship_not_found(id))
    }

    pub fn get_relationship_head(
        &self,
        scope: &TenantScope,
        canonical_id: CanonicalId,
    ) -> Result<GraphRelationship> {
        let q = ScopedQuery::new(*scope);
        self.storage
            .read(Scope::Tenant(*scope), |view| {
                view.relationship_head(&q, canonical_id).cloned()
            })
            .ok_or_else(|| relationship_not_found(canonical_id))
    }

    pub fn relationship_history(
        &self,
        scope: &TenantScope,
        canonical_id: CanonicalId,
        cursor: Option<u32>,
        limit: Option<usize>,
    ) -> Result<HistoryPage<GraphRelationship>> {
        let limit = self.page_size(limit);
        let q = ScopedQuery::new(*scope);
        self.storage.read(Scope::Tenant(*scope), |view| {
            let versions = view.relationship_versions(&q, canonical_id);
            if versions.is_empty() {
                return Err(relationship_not_found(canonical_id));
            }
            Ok(history_page(&versions, |r| r.version, cursor, limit))
        })
    }

    pub fn verify_relationship_chain(
        &self,
        scope: &TenantScope,
        canonical_id: CanonicalId,
    ) -> Result<ChainReport> {
        let q = ScopedQuery::new(*scope);
        self.storage.read(Scope::Tenant(*scope), |view| {
            let versions = view.relationship_versions(&q, canonical_id);
            let head = versions
                .last()
                .ok_or_else(|| relationship_not_found(canonical_id))?;
            crate::hash::verify_chain(canonical_id, &versions)?;
            Ok(ChainReport {
                canonical_id,
                versions: head.version,
                head_hash: head.content_hash.clone(),
            })
        })
    }

    fn resolve_relationship(&self, scope: &TenantScope, entity: EntityRef) -> Result<RelIdentity> {
        let q = ScopedQuery::new(*scope);
        self.storage
            .read(Scope::Tenant(*scope), |view| {
                let id = view.resolve_relationship(&q, entity)?;
                view.relationship_head(&q, id).map(|head| RelIdentity {
                    canonical_id: id,
                    rel_type: head.rel_type.clone(),
                    src_id: head.src_id,
                    dst_id: head.dst_id,
                })
            })
            .ok_or_else(|| relationship_not_found(entity))
    }
}
