//! Core domain types for the Strata graph store.
//!
//! Objects and relationships are stored one row per version. All versions of
//! a logical entity share a `canonical_id`; each row has its own `id`.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scope::TenantScope;

// ── Identifiers ───────────────────────────────────────────────────

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Stable logical identity shared by every version of an entity.
    CanonicalId
);
uuid_id!(
    /// Identity of a single version row.
    VersionId
);
uuid_id!(OrganizationId);
uuid_id!(ProjectId);
uuid_id!(BranchId);

/// A reference to an entity by either one of its version rows or its
/// canonical identity. Mutations accept both, as callers often hold the row
/// id of whatever version they last read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRef {
    Canonical(CanonicalId),
    Version(VersionId),
}

impl From<CanonicalId> for EntityRef {
    fn from(id: CanonicalId) -> Self {
        Self::Canonical(id)
    }
}

impl From<VersionId> for EntityRef {
    fn from(id: VersionId) -> Self {
        Self::Version(id)
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Canonical(id) => write!(f, "{id}"),
            Self::Version(id) => write!(f, "{id}"),
        }
    }
}

// ── Records ───────────────────────────────────────────────────────

/// Rows carrying tenant columns.
pub trait Tenanted {
    fn tenant(&self) -> TenantScope;
}

/// One version of a graph object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphObject {
    pub id: VersionId,
    pub canonical_id: CanonicalId,
    pub version: u32,
    pub supersedes_id: Option<VersionId>,
    #[serde(rename = "type")]
    pub object_type: String,
    pub key: Option<String>,
    pub status: Option<String>,
    pub properties: serde_json::Map<String, serde_json::Value>,
    pub labels: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub organization_id: OrganizationId,
    pub project_id: ProjectId,
    pub branch_id: Option<BranchId>,
    pub created_at: DateTime<Utc>,
    /// BLAKE3 digest (hex) of this row chained to its predecessor's digest.
    pub content_hash: String,
}

impl GraphObject {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl Tenanted for GraphObject {
    fn tenant(&self) -> TenantScope {
        TenantScope::new(self.organization_id, self.project_id)
    }
}

/// One version of a directed relationship between two objects.
///
/// `src_id` and `dst_id` are object canonical ids, so an edge keeps pointing
/// at the same logical objects as they gain versions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphRelationship {
    pub id: VersionId,
    pub canonical_id: CanonicalId,
    pub version: u32,
    pub supersedes_id: Option<VersionId>,
    #[serde(rename = "type")]
    pub rel_type: String,
    pub src_id: CanonicalId,
    pub dst_id: CanonicalId,
    pub properties: serde_json::Map<String, serde_json::Value>,
    pub weight: f64,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub branch_id: Option<BranchId>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub organization_id: OrganizationId,
    pub project_id: ProjectId,
    pub created_at: DateTime<Utc>,
    pub content_hash: String,
}

impl GraphRelationship {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// The endpoint opposite `node`, if `node` is one of the endpoints.
    pub fn other_end(&self, node: CanonicalId) -> Option<CanonicalId> {
        if self.src_id == node {
            Some(self.dst_id)
        } else if self.dst_id == node {
            Some(self.src_id)
        } else {
            None
        }
    }
}

impl Tenanted for GraphRelationship {
    fn tenant(&self) -> TenantScope {
        TenantScope::new(self.organization_id, self.project_id)
    }
}

// ── Mutation Inputs ───────────────────────────────────────────────

/// Input for creating a new object (version 1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateObject {
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub branch_id: Option<BranchId>,
}

impl CreateObject {
    pub fn new(object_type: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            ..Default::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_property(mut self, name: &str, value: serde_json::Value) -> Self {
        self.properties.insert(name.to_string(), value);
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.labels.insert(label.to_string());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// A partial update to an object.
///
/// Properties merge into the current head: present keys overwrite, `null`
/// removes the key, absent keys are kept. The remaining fields replace the
/// head's value only when supplied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectPatch {
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub labels: Option<BTreeSet<String>>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl ObjectPatch {
    pub fn with_property(mut self, name: &str, value: serde_json::Value) -> Self {
        self.properties.insert(name.to_string(), value);
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }
}

/// Input for creating a relationship.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRelationship {
    #[serde(rename = "type")]
    pub rel_type: String,
    pub src_id: CanonicalId,
    pub dst_id: CanonicalId,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub branch_id: Option<BranchId>,
}

impl CreateRelationship {
    pub fn new(rel_type: impl Into<String>, src_id: CanonicalId, dst_id: CanonicalId) -> Self {
        Self {
            rel_type: rel_type.into(),
            src_id,
            dst_id,
            properties: serde_json::Map::new(),
            weight: None,
            valid_from: None,
            valid_to: None,
            branch_id: None,
        }
    }

    pub fn with_property(mut self, name: &str, value: serde_json::Value) -> Self {
        self.properties.insert(name.to_string(), value);
        self
    }
}

/// A partial update to a relationship. Endpoints and type are immutable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipPatch {
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
}

/// Apply a merge-patch to a property bag: `null` removes, anything else
/// overwrites.
pub fn merge_properties(
    base: &serde_json::Map<String, serde_json::Value>,
    patch: &serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    let mut merged = base.clone();
    for (k, v) in patch {
        if v.is_null() {
            merged.remove(k);
        } else {
            merged.insert(k.clone(), v.clone());
        }
    }
    merged
}

// ── Filters ───────────────────────────────────────────────────────

/// Structured filter over object heads.
///
/// Every populated field must match. `labels` requires all listed labels to
/// be present; `properties` requires equality on each listed key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectFilter {
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub branch_id: Option<BranchId>,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub include_deleted: bool,
}

impl ObjectFilter {
    pub fn of_type(object_type: impl Into<String>) -> Self {
        Self {
            types: vec![object_type.into()],
            ..Default::default()
        }
    }

    pub fn matches(&self, obj: &GraphObject) -> bool {
        if !self.include_deleted && obj.is_deleted() {
            return false;
        }
        if !self.types.is_empty() && !self.types.iter().any(|t| t == &obj.object_type) {
            return false;
        }
        if !self.labels.iter().all(|l| obj.labels.contains(l)) {
            return false;
        }
        if self.key.is_some() && self.key != obj.key {
            return false;
        }
        if self.status.is_some() && self.status != obj.status {
            return false;
        }
        if self.branch_id.is_some() && self.branch_id != obj.branch_id {
            return false;
        }
        self.properties
            .iter()
            .all(|(k, v)| obj.properties.get(k) == Some(v))
    }
}

/// Structured filter over relationship heads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipFilter {
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub src_id: Option<CanonicalId>,
    #[serde(default)]
    pub dst_id: Option<CanonicalId>,
    #[serde(default)]
    pub include_deleted: bool,
}

impl RelationshipFilter {
    pub fn matches(&self, rel: &GraphRelationship) -> bool {
        if !self.include_deleted && rel.is_deleted() {
            return false;
        }
        if !self.types.is_empty() && !self.types.iter().any(|t| t == &rel.rel_type) {
            return false;
        }
        if self.src_id.is_some_and(|s| s != rel.src_id) {
            return false;
        }
        !self.dst_id.is_some_and(|d| d != rel.dst_id)
    }
}

/// Which relationships to follow from a node.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
    #[default]
    Both,
}

impl Direction {
    pub fn follows_outgoing(self) -> bool {
        matches!(self, Self::Outgoing | Self::Both)
    }

    pub fn follows_incoming(self) -> bool {
        matches!(self, Self::Incoming | Self::Both)
    }
}
