//! strata-core: Shared types, configuration, and error handling for Strata.
//!
//! This crate provides the foundational pieces used by the store and the
//! query engines:
//! - Versioned object and relationship records
//! - Tenant scopes and the ambient scope stack
//! - The schema registry seam
//! - Opaque pagination cursors
//! - Configuration management
//! - The error taxonomy

pub mod config;
pub mod cursor;
pub mod error;
pub mod schema;
pub mod scope;
pub mod types;

pub use config::StrataConfig;
pub use error::{Result, StrataError};
pub use scope::{Scope, ScopeContext, TenantScope};
pub use types::{
    CanonicalId, CreateObject, CreateRelationship, Direction, EntityRef, GraphObject,
    GraphRelationship, ObjectFilter, ObjectPatch, OrganizationId, ProjectId, RelationshipFilter,
    RelationshipPatch, VersionId,
};
