//! strata-store: Versioned, tenant-isolated graph storage.
//!
//! Rows are append-only: every mutation writes a new version that supersedes
//! the previous head. Tenant isolation is enforced twice, once by the
//! [`ScopedQuery`] predicate on every read and once by the storage engine's
//! visibility policies.

pub mod admin;
pub mod engine;
pub mod hash;
pub mod index;
pub mod locks;
mod objects;
pub mod policy;
pub mod query;
mod reads;
mod relationships;
mod snapshot;
pub mod store;
mod tables;

pub use admin::{AdminStore, AuditReport};
pub use engine::{ReadView, Storage, StorageStats, Txn};
pub use index::Hit;
pub use policy::{Command, PolicyCatalog, PolicyExpr, Table, VisibilityPolicy};
pub use query::{RowFilter, ScopedQuery};
pub use store::{ChainReport, GraphStore, HistoryPage, ObjectEdges, ObjectPage};
