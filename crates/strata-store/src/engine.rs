//! Embedded storage engine: committed tables, transactions and read views.
//!
//! Writers stage rows inside a [`Txn`] that holds exclusive entity locks;
//! commit re-checks the append invariants and applies every staged row
//! under one write lock, so readers never observe a partial mutation.
//! Dropping a transaction without committing discards its staged rows and
//! releases its locks.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::OwnedMutexGuard;

use strata_core::config::StoreConfig;
use strata_core::types::Tenanted;
use strata_core::{
    CanonicalId, Direction, EntityRef, GraphObject, GraphRelationship, ObjectFilter, Result,
    Scope, StrataError, TenantScope, VersionId,
};

use crate::index::Hit;
use crate::locks::{LockKey, LockTable};
use crate::policy::{Command, PolicyCatalog, Table};
use crate::query::{RowFilter, ScopedQuery};
use crate::tables::Tables;

/// Row counts, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StorageStats {
    pub object_rows: usize,
    pub objects: usize,
    pub relationship_rows: usize,
    pub relationships: usize,
    pub fulltext_docs: usize,
    pub embeddings: usize,
}

pub struct Storage {
    pub(crate) tables: RwLock<Tables>,
    policies: PolicyCatalog,
    locks: LockTable,
    lock_timeout: Duration,
}

impl Storage {
    /// Open an empty store with the standard policy catalog.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        Self::with_policies(config, PolicyCatalog::standard())
    }

    /// Open with an explicit catalog. Fails with `PolicyDrift` unless the
    /// catalog matches the standard manifest exactly.
    pub fn with_policies(config: &StoreConfig, policies: PolicyCatalog) -> Result<Self> {
        policies.verify(&PolicyCatalog::standard())?;
        tracing::info!(
            policies = policies.policies().len(),
            lock_timeout_ms = config.lock_timeout_ms,
            "Storage opened"
        );
        Ok(Self {
            tables: RwLock::new(Tables::default()),
            policies,
            locks: LockTable::default(),
            lock_timeout: Duration::from_millis(config.lock_timeout_ms),
        })
    }

    pub fn policies(&self) -> &PolicyCatalog {
        &self.policies
    }

    /// Run `f` against a consistent view of committed rows, with `tenant` as
    /// the session scope for policy evaluation.
    pub fn read_tenant<R>(&self, tenant: &TenantScope, f: impl FnOnce(&ReadView<'_>) -> R) -> R {
        self.read(Scope::Tenant(*tenant), f)
    }

    /// Begin a transaction whose session scope is `tenant`.
    pub fn begin_tenant(&self, tenant: &TenantScope) -> Txn<'_> {
        self.begin(Scope::Tenant(*tenant))
    }

    /// Read under any session scope. The wildcard scope is only reachable
    /// from inside this crate, through [`crate::AdminStore`].
    pub(crate) fn read<R>(&self, scope: Scope, f: impl FnOnce(&ReadView<'_>) -> R) -> R {
        let tables = self.tables.read();
        let view = ReadView {
            tables: &tables,
            session: scope,
            policies: &self.policies,
        };
        f(&view)
    }

    /// Begin a transaction bound to `scope`.
    pub(crate) fn begin(&self, scope: Scope) -> Txn<'_> {
        Txn {
            storage: self,
            scope,
            guards: Vec::new(),
            staged_objects: Vec::new(),
            staged_relationships: Vec::new(),
            committed: false,
        }
    }

    pub fn stats(&self) -> StorageStats {
        let tables = self.tables.read();
        StorageStats {
            object_rows: tables.objects.len(),
            objects: tables.object_chains.len(),
            relationship_rows: tables.relationships.len(),
            relationships: tables.relationship_chains.len(),
            fulltext_docs: tables.fulltext.len(),
            embeddings: tables.vectors.len(),
        }
    }

    /// Number of live lock slots. Zero whenever no transaction is open.
    pub fn lock_slots(&self) -> usize {
        self.locks.len()
    }

    fn authorize(&self, scope: &Scope, table: Table, command: Command, row: &impl Tenanted) -> Result<()> {
        let tenant = row.tenant();
        let allowed = self.policies.permits(table, command, scope, &tenant)
            && (command == Command::Insert
                || self.policies.permits(table, Command::Insert, scope, &tenant));
        if allowed {
            Ok(())
        } else {
            Err(StrataError::TenantMismatch(format!(
                "{} on {} denied: row belongs to {tenant}, session is {scope}",
                command.name(),
                table.name()
            )))
        }
    }
}

// ── Transactions ──────────────────────────────────────────────────

/// A write transaction. Locks are released when it is committed or dropped.
pub struct Txn<'a> {
    storage: &'a Storage,
    scope: Scope,
    guards: Vec<(LockKey, OwnedMutexGuard<()>)>,
    staged_objects: Vec<GraphObject>,
    staged_relationships: Vec<GraphRelationship>,
    committed: bool,
}

impl<'a> Txn<'a> {
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Acquire exclusive locks on `keys` in ascending key order. Keys this
    /// transaction already holds are skipped. Fails with
    /// `StorageUnavailable` if the whole set is not acquired within the
    /// configured lock timeout; locks taken so far stay with the
    /// transaction and are released when it drops.
    pub async fn lock(&mut self, keys: impl IntoIterator<Item = LockKey>) -> Result<()> {
        let mut keys: Vec<LockKey> = keys.into_iter().collect();
        keys.sort_unstable();
        keys.dedup();
        keys.retain(|k| !self.guards.iter().any(|(held, _)| held == k));

        let deadline = Instant::now() + self.storage.lock_timeout;
        for key in keys {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, self.storage.locks.acquire(key)).await {
                Ok(guard) => self.guards.push((key, guard)),
                Err(_) => {
                    tracing::warn!(
                        key,
                        timeout_ms = self.storage.lock_timeout.as_millis() as u64,
                        scope = %self.scope,
                        "Lock acquisition timed out"
                    );
                    return Err(StrataError::StorageUnavailable(format!(
                        "timed out after {} ms waiting for entity lock",
                        self.storage.lock_timeout.as_millis()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Read committed rows under the transaction's session scope.
    pub fn read<R>(&self, f: impl FnOnce(&ReadView<'_>) -> R) -> R {
        self.storage.read(self.scope, f)
    }

    /// Stage an object row. `command` is `Insert` for a new canonical id,
    /// `Update` for a new live version and `Delete` for a tombstone.
    pub fn append_object(&mut self, command: Command, row: GraphObject) -> Result<()> {
        self.storage
            .authorize(&self.scope, Table::GraphObjects, command, &row)?;
        self.staged_objects.push(row);
        Ok(())
    }

    pub fn append_relationship(&mut self, command: Command, row: GraphRelationship) -> Result<()> {
        self.storage
            .authorize(&self.scope, Table::GraphRelationships, command, &row)?;
        self.staged_relationships.push(row);
        Ok(())
    }

    /// Apply every staged row atomically.
    pub fn commit(mut self) -> Result<()> {
        let objects = std::mem::take(&mut self.staged_objects);
        let relationships = std::mem::take(&mut self.staged_relationships);
        {
            let mut tables = self.storage.tables.write();
            tables.check_appends(&objects, &relationships)?;
            let (n_obj, n_rel) = (objects.len(), relationships.len());
            for row in objects {
                tables.apply_object(row);
            }
            for row in relationships {
                tables.apply_relationship(row);
            }
            tracing::debug!(objects = n_obj, relationships = n_rel, scope = %self.scope, "Transaction committed");
        }
        self.committed = true;
        Ok(())
    }
}

impl Drop for Txn<'_> {
    fn drop(&mut self) {
        let staged = self.staged_objects.len() + self.staged_relationships.len();
        if !self.committed && staged > 0 {
            tracing::debug!(staged, scope = %self.scope, "Transaction rolled back");
        }
        let keys: Vec<LockKey> = self.guards.iter().map(|(k, _)| *k).collect();
        self.guards.clear();
        for key in keys {
            self.storage.locks.prune(key);
        }
    }
}

// ── Read Views ────────────────────────────────────────────────────

/// A consistent view of committed rows. Every accessor applies the select
/// policy for the session scope and the query's own tenant predicate.
pub struct ReadView<'a> {
    tables: &'a Tables,
    session: Scope,
    policies: &'a PolicyCatalog,
}

impl<'a> ReadView<'a> {
    pub fn session(&self) -> &Scope {
        &self.session
    }

    fn visible<R: Tenanted>(&self, table: Table, row: &R) -> bool {
        self.policies
            .permits(table, Command::Select, &self.session, &row.tenant())
    }

    fn object_visible<F>(&self, q: &ScopedQuery<F>, row: &GraphObject) -> bool
    where
        F: RowFilter<GraphObject>,
    {
        self.visible(Table::GraphObjects, row) && q.admits(row)
    }

    fn relationship_visible<F>(&self, q: &ScopedQuery<F>, row: &GraphRelationship) -> bool
    where
        F: RowFilter<GraphRelationship>,
    {
        self.visible(Table::GraphRelationships, row) && q.admits(row)
    }

    // ── Objects ──

    pub fn object_row<F>(&self, q: &ScopedQuery<F>, id: VersionId) -> Option<&'a GraphObject>
    where
        F: RowFilter<GraphObject>,
    {
        self.tables
            .objects
            .get(&id)
            .filter(|row| self.object_visible(q, row))
    }

    /// Head row of `canonical_id`, deleted or not, if visible and admitted.
    pub fn object_head<F>(&self, q: &ScopedQuery<F>, canonical_id: CanonicalId) -> Option<&'a GraphObject>
    where
        F: RowFilter<GraphObject>,
    {
        self.tables
            .object_head(canonical_id)
            .filter(|row| self.object_visible(q, row))
    }

    /// Live (non-tombstoned) visible head.
    pub fn live_object<F>(&self, q: &ScopedQuery<F>, canonical_id: CanonicalId) -> Option<&'a GraphObject>
    where
        F: RowFilter<GraphObject>,
    {
        self.object_head(q, canonical_id).filter(|row| !row.is_deleted())
    }

    /// Every version in ascending order, or empty when the entity is not
    /// visible.
    pub fn object_versions(&self, q: &ScopedQuery, canonical_id: CanonicalId) -> Vec<&'a GraphObject> {
        let rows = self.tables.object_versions(canonical_id);
        if rows.iter().all(|row| self.object_visible(q, *row)) {
            rows
        } else {
            Vec::new()
        }
    }

    /// Visible heads admitted by the query's filter, in no particular order.
    pub fn object_heads<F>(&self, q: &ScopedQuery<F>) -> Vec<&'a GraphObject>
    where
        F: RowFilter<GraphObject>,
    {
        self.tables
            .object_chains
            .keys()
            .filter_map(|id| self.tables.object_head(*id))
            .filter(|row| self.object_visible(q, row))
            .collect()
    }

    /// Creation time of version 1 of a visible object.
    pub fn object_origin(&self, canonical_id: CanonicalId) -> Option<DateTime<Utc>> {
        self.tables
            .object_chains
            .get(&canonical_id)
            .and_then(|chain| chain.first())
            .and_then(|id| self.tables.objects.get(id))
            .filter(|row| self.visible(Table::GraphObjects, *row))
            .map(|row| row.created_at)
    }

    /// Canonical id for a row or canonical reference, if visible.
    pub fn resolve_object(&self, q: &ScopedQuery, entity: EntityRef) -> Option<CanonicalId> {
        match entity {
            EntityRef::Canonical(id) => self.object_head(q, id).map(|row| row.canonical_id),
            EntityRef::Version(id) => self.object_row(q, id).map(|row| row.canonical_id),
        }
    }

    // ── Relationships ──

    pub fn relationship_row<F>(&self, q: &ScopedQuery<F>, id: VersionId) -> Option<&'a GraphRelationship>
    where
        F: RowFilter<GraphRelationship>,
    {
        self.tables
            .relationships
            .get(&id)
            .filter(|row| self.relationship_visible(q, row))
    }

    pub fn relationship_head<F>(
        &self,
        q: &ScopedQuery<F>,
        canonical_id: CanonicalId,
    ) -> Option<&'a GraphRelationship>
    where
        F: RowFilter<GraphRelationship>,
    {
        self.tables
            .relationship_head(canonical_id)
            .filter(|row| self.relationship_visible(q, row))
    }

    pub fn relationship_versions(
        &self,
        q: &ScopedQuery,
        canonical_id: CanonicalId,
    ) -> Vec<&'a GraphRelationship> {
        let rows = self.tables.relationship_versions(canonical_id);
        if rows.iter().all(|row| self.relationship_visible(q, *row)) {
            rows
        } else {
            Vec::new()
        }
    }

    pub fn relationship_heads<F>(&self, q: &ScopedQuery<F>) -> Vec<&'a GraphRelationship>
    where
        F: RowFilter<GraphRelationship>,
    {
        self.tables
            .relationship_chains
            .keys()
            .filter_map(|id| self.tables.relationship_head(*id))
            .filter(|row| self.relationship_visible(q, row))
            .collect()
    }

    pub fn resolve_relationship(&self, q: &ScopedQuery, entity: EntityRef) -> Option<CanonicalId> {
        match entity {
            EntityRef::Canonical(id) => self.relationship_head(q, id).map(|row| row.canonical_id),
            EntityRef::Version(id) => self.relationship_row(q, id).map(|row| row.canonical_id),
        }
    }

    /// Head of the relationship identified by `(rel_type, src, dst)`.
    pub fn triple_head(
        &self,
        q: &ScopedQuery,
        rel_type: &str,
        src: CanonicalId,
        dst: CanonicalId,
    ) -> Option<&'a GraphRelationship> {
        self.tables
            .triples
            .get(&(rel_type.to_string(), src, dst))
            .and_then(|id| self.relationship_head(q, *id))
    }

    /// Live visible relationship heads touching `node` in `direction`,
    /// ordered by relationship canonical id. A self-referencing edge is
    /// returned once.
    pub fn edges(
        &self,
        q: &ScopedQuery,
        node: CanonicalId,
        direction: Direction,
    ) -> Vec<&'a GraphRelationship> {
        let mut ids: Vec<CanonicalId> = Vec::new();
        if direction.follows_outgoing() {
            if let Some(out) = self.tables.outgoing.get(&node) {
                ids.extend(out.iter().copied());
            }
        }
        if direction.follows_incoming() {
            if let Some(inc) = self.tables.incoming.get(&node) {
                ids.extend(inc.iter().copied());
            }
        }
        ids.sort_unstable();
        ids.dedup();
        ids.into_iter()
            .filter_map(|id| self.relationship_head(q, id))
            .filter(|row| !row.is_deleted())
            .collect()
    }

    /// Live heads of `rel_type` leaving `src` (`outgoing`) or entering it.
    pub fn live_edges_of_type(
        &self,
        q: &ScopedQuery,
        rel_type: &str,
        endpoint: CanonicalId,
        direction: Direction,
    ) -> Vec<&'a GraphRelationship> {
        self.edges(q, endpoint, direction)
            .into_iter()
            .filter(|row| row.rel_type == rel_type)
            .filter(|row| match direction {
                Direction::Outgoing => row.src_id == endpoint,
                Direction::Incoming => row.dst_id == endpoint,
                Direction::Both => true,
            })
            .collect()
    }

    // ── Candidate retrieval ──

    /// Full-text candidates among live heads admitted by `filter`.
    pub fn fulltext(
        &self,
        q: &ScopedQuery<ObjectFilter>,
        text: &str,
        limit: usize,
    ) -> Vec<Hit> {
        self.tables.fulltext.search(text, limit, |id| {
            self.tables
                .object_head(id)
                .is_some_and(|row| !row.is_deleted() && self.object_visible(q, row))
        })
    }

    /// Nearest embeddings among live heads admitted by `filter`.
    pub fn nearest(&self, q: &ScopedQuery<ObjectFilter>, vector: &[f32], limit: usize) -> Vec<Hit> {
        self.tables.vectors.nearest(vector, limit, |id| {
            self.tables
                .object_head(id)
                .is_some_and(|row| !row.is_deleted() && self.object_visible(q, row))
        })
    }
}
