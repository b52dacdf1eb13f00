//! Tenant-facing versioned store.
//!
//! Every operation takes an explicit `&TenantScope`. Mutations follow one
//! protocol: resolve schema information first, then lock, read the head,
//! validate, stage the successor row and commit.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use strata_core::config::StoreConfig;
use strata_core::schema::SchemaRegistry;
use strata_core::{CanonicalId, GraphObject, GraphRelationship, Result, StrataError, VersionId};

use crate::engine::Storage;
use crate::hash;

/// Versioned object and relationship store over a shared [`Storage`].
///
/// Clone is cheap (inner Arcs).
#[derive(Clone)]
pub struct GraphStore {
    pub(crate) storage: Arc<Storage>,
    pub(crate) schema: Arc<dyn SchemaRegistry>,
    pub(crate) config: StoreConfig,
}

/// One page of an entity's history, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage<T> {
    pub items: Vec<T>,
    /// Pass back as `cursor` to continue below the last returned version.
    pub next_cursor: Option<u32>,
    pub has_more: bool,
}

impl<T> HistoryPage<T> {
    fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
            has_more: false,
        }
    }
}

/// One page of object heads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectPage {
    pub items: Vec<GraphObject>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Live relationships touching an object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectEdges {
    pub outgoing: Vec<GraphRelationship>,
    pub incoming: Vec<GraphRelationship>,
}

/// Outcome of a successful hash chain check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainReport {
    pub canonical_id: CanonicalId,
    pub versions: u32,
    pub head_hash: String,
}

impl GraphStore {
    pub fn new(storage: Arc<Storage>, schema: Arc<dyn SchemaRegistry>, config: StoreConfig) -> Self {
        Self {
            storage,
            schema,
            config,
        }
    }

    /// Open a fresh in-memory store.
    pub fn open(config: StoreConfig, schema: Arc<dyn SchemaRegistry>) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        Ok(Self::new(storage, schema, config))
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Clamp a requested page size to `[1, max_page_size]`.
    pub(crate) fn page_size(&self, limit: Option<usize>) -> usize {
        limit
            .unwrap_or(self.config.default_page_size)
            .clamp(1, self.config.max_page_size.max(1))
    }
}

// ── Shared helpers ────────────────────────────────────────────────

pub(crate) fn object_not_found(id: impl ToString) -> StrataError {
    StrataError::NotFound {
        entity: "object",
        id: id.to_string(),
    }
}

pub(crate) fn relationship_not_found(id: impl ToString) -> StrataError {
    StrataError::NotFound {
        entity: "relationship",
        id: id.to_string(),
    }
}

/// Successor of `head`: same canonical id, next version, superseding it.
/// The content hash is left for [`seal_object`].
pub(crate) fn next_object(head: &GraphObject) -> GraphObject {
    GraphObject {
        id: VersionId::new(),
        version: head.version + 1,
        supersedes_id: Some(head.id),
        created_at: Utc::now(),
        content_hash: String::new(),
        ..head.clone()
    }
}

pub(crate) fn next_relationship(head: &GraphRelationship) -> GraphRelationship {
    GraphRelationship {
        id: VersionId::new(),
        version: head.version + 1,
        supersedes_id: Some(head.id),
        created_at: Utc::now(),
        content_hash: String::new(),
        ..head.clone()
    }
}

/// Set `row.content_hash` chained to `prev_hash`.
pub(crate) fn seal_object(mut row: GraphObject, prev_hash: &str) -> Result<GraphObject> {
    row.content_hash = hash::object_hash(&row, prev_hash)?;
    Ok(row)
}

pub(crate) fn seal_relationship(mut row: GraphRelationship, prev_hash: &str) -> Result<GraphRelationship> {
    row.content_hash = hash::relationship_hash(&row, prev_hash)?;
    Ok(row)
}

/// Slice a chain (ascending) into a descending history page.
///
/// `cursor` is the last version already returned; the page holds versions
/// strictly below it. A cursor outside `1..=head` yields an empty page.
pub(crate) fn history_page<T: Clone>(
    versions: &[&T],
    version_of: impl Fn(&T) -> u32,
    cursor: Option<u32>,
    limit: usize,
) -> HistoryPage<T> {
    let head = versions.len() as u32;
    let below = match cursor {
        None => head + 1,
        Some(c) if c >= 1 && c <= head => c,
        Some(c) => {
            tracing::debug!(cursor = c, head, "History cursor out of range");
            return HistoryPage::empty();
        }
    };

    let items: Vec<T> = versions
        .iter()
        .rev()
        .filter(|row| version_of(row) < below)
        .take(limit)
        .map(|row| (*row).clone())
        .collect();

    let next_cursor = items
        .last()
        .map(&version_of)
        .filter(|&v| v > 1);
    HistoryPage {
        has_more: next_cursor.is_some(),
        next_cursor,
        items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_pages_walk_down_to_version_one() {
        let versions: Vec<u32> = (1..=5).collect();
        let refs: Vec<&u32> = versions.iter().collect();

        let first = history_page(&refs, |v| *v, None, 2);
        assert_eq!(first.items, vec![5, 4]);
        assert_eq!(first.next_cursor, Some(4));

        let second = history_page(&refs, |v| *v, first.next_cursor, 2);
        assert_eq!(second.items, vec![3, 2]);

        let last = history_page(&refs, |v| *v, second.next_cursor, 2);
        assert_eq!(last.items, vec![1]);
        assert!(!last.has_more);
        assert!(last.next_cursor.is_none());
    }

    #[test]
    fn out_of_range_history_cursor_is_empty() {
        let versions: Vec<u32> = (1..=3).collect();
        let refs: Vec<&u32> = versions.iter().collect();
        assert!(history_page(&refs, |v| *v, Some(0), 10).items.is_empty());
        assert!(history_page(&refs, |v| *v, Some(99), 10).items.is_empty());
        assert!(history_page(&refs, |v| *v, Some(1), 10).items.is_empty());
    }
}
