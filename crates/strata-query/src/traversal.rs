//! Breadth-first traversal with resumable, stateless pages.
//!
//! The walk is recomputed on every request from a single read snapshot.
//! Nodes are emitted depth ascending, then canonical id ascending; the first
//! depth at which a node is reached wins, and within a level the smallest
//! discovering parent wins. A cursor names the `(depth, id)` of a boundary
//! node and is located by binary search over that ordering.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use strata_core::config::TraversalConfig;
use strata_core::cursor::{self, page_bounds};
use strata_core::{
    CanonicalId, Direction, EntityRef, GraphObject, GraphRelationship, Result, StrataError,
    TenantScope, VersionId,
};
use strata_store::{GraphStore, ReadView, ScopedQuery};

use crate::types::{TraversalNode, TraversalPage, TraversalRequest};

const CURSOR_KIND: &str = "traverse";
const DEFAULT_MAX_DEPTH: u32 = 2;
const DEFAULT_LIMIT: usize = 50;

#[derive(Debug, Serialize, Deserialize)]
struct TraversePosition {
    d: u32,
    id: CanonicalId,
}

/// Limits and filters for one walk.
pub(crate) struct WalkOptions<'r> {
    pub max_depth: u32,
    pub direction: Direction,
    pub relationship_types: &'r [String],
    pub object_types: &'r [String],
    pub max_nodes: usize,
}

/// A discovered node, borrowed from the read snapshot.
pub(crate) struct Step<'a> {
    pub id: CanonicalId,
    pub depth: u32,
    pub parent: Option<CanonicalId>,
    pub via: Option<&'a GraphRelationship>,
    pub object: &'a GraphObject,
}

pub(crate) struct Walk<'a> {
    pub steps: Vec<Step<'a>>,
    pub truncated: bool,
}

/// BFS over live, visible relationships from `roots`.
///
/// Roots without a live visible head are dropped. `steps` comes back in
/// emission order.
pub(crate) fn walk<'a>(
    view: &ReadView<'a>,
    q: &ScopedQuery,
    roots: &[CanonicalId],
    opts: &WalkOptions<'_>,
) -> Walk<'a> {
    let mut roots = roots.to_vec();
    roots.sort_unstable();
    roots.dedup();

    let mut visited: HashSet<CanonicalId> = HashSet::new();
    let mut steps: Vec<Step<'a>> = Vec::new();
    let mut frontier: Vec<CanonicalId> = Vec::new();
    let mut truncated = false;

    for id in roots {
        let Some(object) = view.live_object(q, id) else {
            continue;
        };
        if steps.len() >= opts.max_nodes {
            truncated = true;
            break;
        }
        visited.insert(id);
        frontier.push(id);
        steps.push(Step {
            id,
            depth: 0,
            parent: None,
            via: None,
            object,
        });
    }

    let mut depth = 0;
    while !frontier.is_empty() && depth < opts.max_depth && !truncated {
        depth += 1;
        let mut level: BTreeMap<CanonicalId, Step<'a>> = BTreeMap::new();

        'expand: for node in &frontier {
            for rel in view.edges(q, *node, opts.direction) {
                if !opts.relationship_types.is_empty()
                    && !opts.relationship_types.contains(&rel.rel_type)
                {
                    continue;
                }
                let Some(neighbor) = rel.other_end(*node) else {
                    continue;
                };
                if visited.contains(&neighbor) {
                    continue;
                }
                let Some(object) = view.live_object(q, neighbor) else {
                    continue;
                };
                if !opts.object_types.is_empty() && !opts.object_types.contains(&object.object_type)
                {
                    continue;
                }
                if steps.len() + level.len() >= opts.max_nodes {
                    truncated = true;
                    break 'expand;
                }
                visited.insert(neighbor);
                level.insert(
                    neighbor,
                    Step {
                        id: neighbor,
                        depth,
                        parent: Some(*node),
                        via: Some(rel),
                        object,
                    },
                );
            }
        }

        frontier = level.keys().copied().collect();
        steps.extend(level.into_values());
    }

    Walk { steps, truncated }
}

/// Canonical id of a root given by canonical id or by any version row id.
fn resolve_root(view: &ReadView<'_>, q: &ScopedQuery, id: uuid::Uuid) -> Option<CanonicalId> {
    view.resolve_object(q, EntityRef::Canonical(CanonicalId(id)))
        .or_else(|| view.resolve_object(q, EntityRef::Version(VersionId(id))))
}

/// Paged breadth-first traversal over a [`GraphStore`].
#[derive(Clone)]
pub struct TraversalEngine {
    store: GraphStore,
    config: TraversalConfig,
}

impl TraversalEngine {
    pub fn new(store: GraphStore, config: TraversalConfig) -> Self {
        Self { store, config }
    }

    /// Compute one page of a traversal.
    ///
    /// A malformed cursor, or one naming a node the current walk does not
    /// emit, yields the first page.
    ///
    /// Roots are resolved to their live head. A tombstoned root keeps its
    /// history but is not walked from: it is dropped before depth 0, so a
    /// request whose only root is deleted returns an empty page.
    pub fn traverse(&self, tenant: &TenantScope, request: &TraversalRequest) -> Result<TraversalPage> {
        if request.root_ids.is_empty() {
            return Err(StrataError::validation("traversal", "root_ids must not be empty"));
        }
        let max_depth = request
            .max_depth
            .unwrap_or(DEFAULT_MAX_DEPTH)
            .min(self.config.max_depth);
        let limit = request
            .limit
            .unwrap_or(DEFAULT_LIMIT)
            .clamp(1, self.config.max_page_size.max(1));
        let position: Option<TraversePosition> = request
            .cursor
            .as_deref()
            .and_then(|token| cursor::decode(CURSOR_KIND, token));
        if request.cursor.is_some() && position.is_none() {
            warn!("Malformed traversal cursor, returning first page");
        }

        let start = std::time::Instant::now();
        let q = ScopedQuery::new(*tenant);
        let page = self.store.storage().read_tenant(tenant, |view| {
            let roots: Vec<CanonicalId> = request
                .root_ids
                .iter()
                .filter_map(|id| resolve_root(view, &q, *id))
                .collect();
            let opts = WalkOptions {
                max_depth,
                direction: request.direction,
                relationship_types: &request.relationship_types,
                object_types: &request.object_types,
                max_nodes: self.config.max_nodes,
            };
            let walk = walk(view, &q, &roots, &opts);

            let boundary = position.as_ref().and_then(|pos| {
                let found = walk
                    .steps
                    .binary_search_by(|s| (s.depth, s.id).cmp(&(pos.d, pos.id)))
                    .ok();
                if found.is_none() {
                    warn!(depth = pos.d, node = %pos.id, "Traversal cursor not located, returning first page");
                }
                found
            });
            let total = walk.steps.len();
            let (lo, hi) = page_bounds(total, boundary, request.page_direction, limit);
            let slice = &walk.steps[lo..hi];

            let encode = |s: &Step<'_>| {
                cursor::encode(
                    CURSOR_KIND,
                    &TraversePosition {
                        d: s.depth,
                        id: s.id,
                    },
                )
            };

            TraversalPage {
                nodes: slice
                    .iter()
                    .map(|s| TraversalNode {
                        id: s.id,
                        depth: s.depth,
                        parent: s.parent,
                        via_relationship: s.via.map(|rel| rel.canonical_id),
                        object: s.object.clone(),
                    })
                    .collect(),
                edges: slice.iter().filter_map(|s| s.via.cloned()).collect(),
                next_cursor: (hi > 0 && hi < total).then(|| encode(&walk.steps[hi - 1])),
                prev_cursor: (lo > 0 && lo < total).then(|| encode(&walk.steps[lo])),
                has_next: hi < total,
                has_prev: lo > 0,
                total_discovered: total,
                truncated: walk.truncated,
            }
        });

        debug!(
            organization_id = %tenant.organization_id,
            project_id = %tenant.project_id,
            nodes = page.nodes.len(),
            total = page.total_discovered,
            truncated = page.truncated,
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Traversal page computed"
        );
        Ok(page)
    }
}
