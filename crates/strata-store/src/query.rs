//! Scope-bound read queries.
//!
//! A [`ScopedQuery`] cannot be built without a scope, and every row it admits
//! must carry that scope's tenant columns. The storage engine applies its
//! visibility policies independently of this predicate.

use strata_core::types::Tenanted;
use strata_core::{GraphObject, GraphRelationship, ObjectFilter, RelationshipFilter, Scope};

/// A structural predicate over rows of type `R`.
pub trait RowFilter<R> {
    fn admits(&self, row: &R) -> bool;
}

impl<R> RowFilter<R> for () {
    fn admits(&self, _row: &R) -> bool {
        true
    }
}

impl RowFilter<GraphObject> for ObjectFilter {
    fn admits(&self, row: &GraphObject) -> bool {
        self.matches(row)
    }
}

impl RowFilter<GraphRelationship> for RelationshipFilter {
    fn admits(&self, row: &GraphRelationship) -> bool {
        self.matches(row)
    }
}

/// Tenant predicate plus an optional structural filter.
#[derive(Debug, Clone)]
pub struct ScopedQuery<F = ()> {
    scope: Scope,
    filter: F,
}

impl ScopedQuery<()> {
    pub fn new(scope: impl Into<Scope>) -> Self {
        Self {
            scope: scope.into(),
            filter: (),
        }
    }
}

impl<F> ScopedQuery<F> {
    /// Replace the structural filter, keeping the scope.
    pub fn filter<G>(self, filter: G) -> ScopedQuery<G> {
        ScopedQuery {
            scope: self.scope,
            filter,
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn filter_ref(&self) -> &F {
        &self.filter
    }

    /// Whether `row` is in scope, ignoring the structural filter.
    pub fn in_scope<R: Tenanted>(&self, row: &R) -> bool {
        self.scope.covers(&row.tenant())
    }

    /// Whether `row` is in scope and passes the structural filter.
    pub fn admits<R: Tenanted>(&self, row: &R) -> bool
    where
        F: RowFilter<R>,
    {
        self.in_scope(row) && self.filter.admits(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use strata_core::{CanonicalId, TenantScope, VersionId};

    fn object(tenant: TenantScope, object_type: &str) -> GraphObject {
        GraphObject {
            id: VersionId::new(),
            canonical_id: CanonicalId::new(),
            version: 1,
            supersedes_id: None,
            object_type: object_type.into(),
            key: None,
            status: None,
            properties: serde_json::Map::new(),
            labels: Default::default(),
            embedding: None,
            deleted_at: None,
            organization_id: tenant.organization_id,
            project_id: tenant.project_id,
            branch_id: None,
            created_at: Utc::now(),
            content_hash: String::new(),
        }
    }

    #[test]
    fn tenant_predicate_always_applies() {
        let mine = TenantScope::random();
        let theirs = TenantScope::random();
        let q = ScopedQuery::new(mine).filter(ObjectFilter::of_type("Requirement"));

        assert!(q.admits(&object(mine, "Requirement")));
        assert!(!q.admits(&object(mine, "Decision")));
        assert!(!q.admits(&object(theirs, "Requirement")));
    }

    #[test]
    fn bootstrap_query_spans_tenants() {
        let q = ScopedQuery::new(Scope::Bootstrap);
        assert!(q.admits(&object(TenantScope::random(), "Requirement")));
    }
}
