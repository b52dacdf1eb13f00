//! BLAKE3 content hash chain for tamper-evident history.
//!
//! Each version row's `content_hash` covers the row's content fields
//! (everything except `content_hash` itself) chained to the previous
//! version's hash, so rewriting any historical row breaks every later link.

use chrono::{DateTime, Utc};
use serde::Serialize;

use strata_core::types::BranchId;
use strata_core::{
    CanonicalId, GraphObject, GraphRelationship, OrganizationId, ProjectId, Result, StrataError,
    VersionId,
};

#[derive(Serialize)]
struct HashableObject<'a> {
    id: &'a VersionId,
    canonical_id: &'a CanonicalId,
    version: u32,
    supersedes_id: &'a Option<VersionId>,
    object_type: &'a str,
    key: &'a Option<String>,
    status: &'a Option<String>,
    properties: &'a serde_json::Map<String, serde_json::Value>,
    labels: &'a std::collections::BTreeSet<String>,
    embedding: &'a Option<Vec<f32>>,
    deleted_at: &'a Option<DateTime<Utc>>,
    organization_id: &'a OrganizationId,
    project_id: &'a ProjectId,
    branch_id: &'a Option<BranchId>,
    created_at: &'a DateTime<Utc>,
    prev: &'a str,
}

#[derive(Serialize)]
struct HashableRelationship<'a> {
    id: &'a VersionId,
    canonical_id: &'a CanonicalId,
    version: u32,
    supersedes_id: &'a Option<VersionId>,
    rel_type: &'a str,
    src_id: &'a CanonicalId,
    dst_id: &'a CanonicalId,
    properties: &'a serde_json::Map<String, serde_json::Value>,
    weight: f64,
    valid_from: &'a Option<DateTime<Utc>>,
    valid_to: &'a Option<DateTime<Utc>>,
    branch_id: &'a Option<BranchId>,
    deleted_at: &'a Option<DateTime<Utc>>,
    organization_id: &'a OrganizationId,
    project_id: &'a ProjectId,
    created_at: &'a DateTime<Utc>,
    prev: &'a str,
}

fn digest<T: Serialize>(hashable: &T) -> Result<String> {
    let json = serde_json::to_vec(hashable)?;
    Ok(blake3::hash(&json).to_hex().to_string())
}

/// Hash of an object row chained to `prev` (empty for version 1).
pub fn object_hash(obj: &GraphObject, prev: &str) -> Result<String> {
    digest(&HashableObject {
        id: &obj.id,
        canonical_id: &obj.canonical_id,
        version: obj.version,
        supersedes_id: &obj.supersedes_id,
        object_type: &obj.object_type,
        key: &obj.key,
        status: &obj.status,
        properties: &obj.properties,
        labels: &obj.labels,
        embedding: &obj.embedding,
        deleted_at: &obj.deleted_at,
        organization_id: &obj.organization_id,
        project_id: &obj.project_id,
        branch_id: &obj.branch_id,
        created_at: &obj.created_at,
        prev,
    })
}

/// Hash of a relationship row chained to `prev` (empty for version 1).
pub fn relationship_hash(rel: &GraphRelationship, prev: &str) -> Result<String> {
    digest(&HashableRelationship {
        id: &rel.id,
        canonical_id: &rel.canonical_id,
        version: rel.version,
        supersedes_id: &rel.supersedes_id,
        rel_type: &rel.rel_type,
        src_id: &rel.src_id,
        dst_id: &rel.dst_id,
        properties: &rel.properties,
        weight: rel.weight,
        valid_from: &rel.valid_from,
        valid_to: &rel.valid_to,
        branch_id: &rel.branch_id,
        deleted_at: &rel.deleted_at,
        organization_id: &rel.organization_id,
        project_id: &rel.project_id,
        created_at: &rel.created_at,
        prev,
    })
}

/// Fields of a version row the chain check needs.
pub(crate) trait ChainLink {
    fn row_id(&self) -> VersionId;
    fn version(&self) -> u32;
    fn supersedes(&self) -> Option<VersionId>;
    fn stored_hash(&self) -> &str;
    fn compute_hash(&self, prev: &str) -> Result<String>;
}

impl ChainLink for GraphObject {
    fn row_id(&self) -> VersionId {
        self.id
    }
    fn version(&self) -> u32 {
        self.version
    }
    fn supersedes(&self) -> Option<VersionId> {
        self.supersedes_id
    }
    fn stored_hash(&self) -> &str {
        &self.content_hash
    }
    fn compute_hash(&self, prev: &str) -> Result<String> {
        object_hash(self, prev)
    }
}

impl ChainLink for GraphRelationship {
    fn row_id(&self) -> VersionId {
        self.id
    }
    fn version(&self) -> u32 {
        self.version
    }
    fn supersedes(&self) -> Option<VersionId> {
        self.supersedes_id
    }
    fn stored_hash(&self) -> &str {
        &self.content_hash
    }
    fn compute_hash(&self, prev: &str) -> Result<String> {
        relationship_hash(self, prev)
    }
}

/// Check a chain given in ascending version order: versions are gap-free
/// from 1, each row supersedes its predecessor, and every stored hash
/// matches its recomputed value.
pub(crate) fn verify_chain<T: ChainLink>(canonical_id: CanonicalId, rows: &[&T]) -> Result<()> {
    let mut prev_hash = String::new();
    let mut prev_id: Option<VersionId> = None;

    for (i, row) in rows.iter().enumerate() {
        let expected_version = i as u32 + 1;
        if row.version() != expected_version {
            return Err(StrataError::Integrity(format!(
                "{canonical_id}: expected version {expected_version}, found {}",
                row.version()
            )));
        }
        if row.supersedes() != prev_id {
            return Err(StrataError::Integrity(format!(
                "{canonical_id}: version {expected_version} does not supersede its predecessor"
            )));
        }
        let computed = row.compute_hash(&prev_hash)?;
        if computed != row.stored_hash() {
            return Err(StrataError::Integrity(format!(
                "{canonical_id}: content hash mismatch at version {expected_version}"
            )));
        }
        prev_hash = computed;
        prev_id = Some(row.row_id());
    }
    Ok(())
}
