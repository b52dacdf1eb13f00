//! Administrative access under the bootstrap scope.
//!
//! This is the only place the store reads with [`Scope::Bootstrap`]. It is
//! meant for maintenance paths (integrity audits, tenant inventory), never
//! for serving tenant requests.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use strata_core::types::Tenanted;
use strata_core::{CanonicalId, GraphObject, Result, Scope, TenantScope};

use crate::engine::{Storage, StorageStats};
use crate::hash::verify_chain;
use crate::query::ScopedQuery;

/// Result of auditing every hash chain in the store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    pub objects_checked: usize,
    pub relationships_checked: usize,
    pub failures: Vec<String>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct AdminStore {
    storage: Arc<Storage>,
}

impl AdminStore {
    pub fn new(storage: Arc<Storage>) -> Self {
        tracing::info!("Bootstrap scope session opened");
        Self { storage }
    }

    /// Every tenant that owns at least one object.
    pub fn tenants(&self) -> Vec<TenantScope> {
        let q = ScopedQuery::new(Scope::Bootstrap);
        self.storage.read(Scope::Bootstrap, |view| {
            view.object_heads(&q)
                .into_iter()
                .map(|o| o.tenant())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        })
    }

    /// Object heads across all tenants, ordered by canonical id.
    pub fn object_heads(&self) -> Vec<GraphObject> {
        let q = ScopedQuery::new(Scope::Bootstrap);
        let mut heads: Vec<GraphObject> = self
            .storage
            .read(Scope::Bootstrap, |view| {
                view.object_heads(&q).into_iter().cloned().collect()
            });
        heads.sort_by_key(|o| o.canonical_id);
        heads
    }

    /// Verify every object and relationship chain. Failures are collected,
    /// not returned early.
    pub fn verify_all_chains(&self) -> AuditReport {
        let q = ScopedQuery::new(Scope::Bootstrap);
        let report = self.storage.read(Scope::Bootstrap, |view| {
            let mut report = AuditReport::default();

            let mut object_ids: Vec<CanonicalId> =
                view.object_heads(&q).iter().map(|o| o.canonical_id).collect();
            object_ids.sort_unstable();
            for id in object_ids {
                report.objects_checked += 1;
                if let Err(e) = verify_chain(id, &view.object_versions(&q, id)) {
                    report.failures.push(e.to_string());
                }
            }

            let mut rel_ids: Vec<CanonicalId> = view
                .relationship_heads(&q)
                .iter()
                .map(|r| r.canonical_id)
                .collect();
            rel_ids.sort_unstable();
            for id in rel_ids {
                report.relationships_checked += 1;
                if let Err(e) = verify_chain(id, &view.relationship_versions(&q, id)) {
                    report.failures.push(e.to_string());
                }
            }
            report
        });

        if report.is_clean() {
            tracing::info!(
                objects = report.objects_checked,
                relationships = report.relationships_checked,
                "Hash chain audit passed"
            );
        } else {
            tracing::warn!(failures = report.failures.len(), "Hash chain audit found failures");
        }
        report
    }

    pub fn stats(&self) -> StorageStats {
        self.storage.stats()
    }

    /// Persist the whole store.
    pub fn save_snapshot(&self, path: &std::path::Path) -> Result<()> {
        self.storage.save_snapshot(path)
    }
}
