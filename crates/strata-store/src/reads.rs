//! Listing and adjacency reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use strata_core::cursor;
use strata_core::{
    CanonicalId, Direction, GraphObject, GraphRelationship, ObjectFilter, RelationshipFilter,
    Result, Scope, TenantScope,
};

use crate::query::ScopedQuery;
use crate::store::{object_not_found, GraphStore, ObjectEdges, ObjectPage};

const LIST_CURSOR: &str = "objects";

/// Sort key of a listed object: creation of version 1, newest first, then
/// canonical id descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
struct ListPosition {
    created_at: DateTime<Utc>,
    id: CanonicalId,
}

impl GraphStore {
    /// Object heads matching `filter`, newest first.
    ///
    /// A malformed cursor yields the first page.
    pub fn list_objects(
        &self,
        scope: &TenantScope,
        filter: ObjectFilter,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<ObjectPage> {
        let limit = self.page_size(limit);
        let after: Option<ListPosition> = cursor.and_then(|token| {
            let decoded = cursor::decode(LIST_CURSOR, token);
            if decoded.is_none() {
                tracing::warn!("Malformed list cursor, returning first page");
            }
            decoded
        });

        let q = ScopedQuery::new(*scope).filter(filter);
        let mut rows: Vec<(ListPosition, GraphObject)> =
            self.storage.read(Scope::Tenant(*scope), |view| {
                view.object_heads(&q)
                    .into_iter()
                    .filter_map(|head| {
                        let created_at = view.object_origin(head.canonical_id)?;
                        Some((
                            ListPosition {
                                created_at,
                                id: head.canonical_id,
                            },
                            head.clone(),
                        ))
                    })
                    .collect()
            });
        rows.sort_by(|a, b| b.0.cmp(&a.0));

        // Descending order: everything after the cursor sorts below it.
        let start = match after {
            Some(pos) => rows.partition_point(|(p, _)| *p >= pos),
            None => 0,
        };
        let end = (start + limit).min(rows.len());
        let has_more = end < rows.len();
        let next_cursor = if has_more {
            rows.get(end - 1).map(|(p, _)| cursor::encode(LIST_CURSOR, p))
        } else {
            None
        };
        let items = rows.drain(start..end).map(|(_, o)| o).collect();

        Ok(ObjectPage {
            items,
            next_cursor,
            has_more,
        })
    }

    /// Live relationships leaving and entering an object.
    pub fn object_edges(&self, scope: &TenantScope, canonical_id: CanonicalId) -> Result<ObjectEdges> {
        let q = ScopedQuery::new(*scope);
        self.storage.read(Scope::Tenant(*scope), |view| {
            if view.object_head(&q, canonical_id).is_none() {
                return Err(object_not_found(canonical_id));
            }
            let outgoing = view
                .edges(&q, canonical_id, Direction::Outgoing)
                .into_iter()
                .filter(|r| r.src_id == canonical_id)
                .cloned()
                .collect();
            let incoming = view
                .edges(&q, canonical_id, Direction::Incoming)
                .into_iter()
                .filter(|r| r.dst_id == canonical_id)
                .cloned()
                .collect();
            Ok(ObjectEdges { outgoing, incoming })
        })
    }

    /// Relationship heads matching `filter`, ordered by type, source and
    /// destination.
    pub fn list_relationships(
        &self,
        scope: &TenantScope,
        filter: RelationshipFilter,
    ) -> Result<Vec<GraphRelationship>> {
        let q = ScopedQuery::new(*scope).filter(filter);
        let mut rows: Vec<GraphRelationship> = self.storage.read(Scope::Tenant(*scope), |view| {
            view.relationship_heads(&q).into_iter().cloned().collect()
        });
        rows.sort_by(|a, b| {
            (&a.rel_type, a.src_id, a.dst_id).cmp(&(&b.rel_type, b.src_id, b.dst_id))
        });
        Ok(rows)
    }
}
