//! Request and response types for traversal and search.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use strata_core::cursor::PageDirection;
use strata_core::{CanonicalId, Direction, GraphObject, GraphRelationship, ObjectFilter};

// ── Traversal ─────────────────────────────────────────────────────

/// Request for a breadth-first traversal page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraversalRequest {
    /// Start nodes, by canonical id or by the id of any of their versions.
    pub root_ids: Vec<Uuid>,
    /// Maximum BFS depth (default: 2, capped by configuration).
    #[serde(default)]
    pub max_depth: Option<u32>,
    /// Page size (default: 50, capped by configuration).
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub page_direction: PageDirection,
    /// Edge direction to follow (default: both).
    #[serde(default)]
    pub direction: Direction,
    /// Only follow these relationship types. Empty follows all.
    #[serde(default)]
    pub relationship_types: Vec<String>,
    /// Only expand into these object types. Roots are always included.
    #[serde(default)]
    pub object_types: Vec<String>,
}

impl TraversalRequest {
    pub fn new(roots: impl IntoIterator<Item = CanonicalId>) -> Self {
        Self {
            root_ids: roots.into_iter().map(|id| id.0).collect(),
            ..Default::default()
        }
    }

    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_cursor(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn with_page_direction(mut self, direction: PageDirection) -> Self {
        self.page_direction = direction;
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }
}

/// A node emitted by a traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalNode {
    pub id: CanonicalId,
    pub depth: u32,
    /// Node this one was discovered from. `None` for roots.
    pub parent: Option<CanonicalId>,
    /// Relationship it was discovered through. `None` for roots.
    pub via_relationship: Option<CanonicalId>,
    pub object: GraphObject,
}

/// One page of traversal output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalPage {
    pub nodes: Vec<TraversalNode>,
    /// Discovery edges of the non-root nodes on this page.
    pub edges: Vec<GraphRelationship>,
    pub next_cursor: Option<String>,
    pub prev_cursor: Option<String>,
    pub has_next: bool,
    pub has_prev: bool,
    /// Nodes discovered by the whole walk, across all pages.
    pub total_discovered: usize,
    /// Discovery stopped at the configured node ceiling.
    pub truncated: bool,
}

// ── Search ────────────────────────────────────────────────────────

/// Request for a search page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: Option<String>,
    /// Query embedding. When absent, the query text is embedded if an
    /// embedding provider is configured.
    #[serde(default)]
    pub vector: Option<Vec<f32>>,
    /// Structured filters. Applied to both channels before ranking.
    #[serde(default)]
    pub filter: ObjectFilter,
    /// Page size (default from configuration).
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub page_direction: PageDirection,
    #[serde(default)]
    pub lexical_weight: Option<f64>,
    #[serde(default)]
    pub vector_weight: Option<f64>,
    #[serde(default)]
    pub neighbors: Option<NeighborOptions>,
    #[serde(default)]
    pub include_debug: bool,
}

impl SearchRequest {
    pub fn text(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Default::default()
        }
    }

    pub fn vector(vector: Vec<f32>) -> Self {
        Self {
            vector: Some(vector),
            ..Default::default()
        }
    }

    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = Some(vector);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_cursor(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn with_page_direction(mut self, direction: PageDirection) -> Self {
        self.page_direction = direction;
        self
    }

    pub fn with_filter(mut self, filter: ObjectFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// Neighbor expansion around the top results of a page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NeighborOptions {
    /// How many leading results to expand (default from configuration).
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Expansion depth (default: 1).
    #[serde(default)]
    pub depth: Option<u32>,
    #[serde(default)]
    pub direction: Direction,
    /// Neighbor cap per result (default from configuration).
    #[serde(default)]
    pub max_neighbors: Option<usize>,
    #[serde(default)]
    pub relationship_types: Vec<String>,
}

/// An object reached by neighbor expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neighbor {
    pub depth: u32,
    pub relationship: GraphRelationship,
    pub object: GraphObject,
}

/// A ranked search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub canonical_id: CanonicalId,
    /// Fused score.
    pub score: f64,
    /// 1-based rank in the lexical candidate list.
    pub lexical_rank: Option<usize>,
    /// 1-based rank in the vector candidate list.
    pub vector_rank: Option<usize>,
    pub object: GraphObject,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub neighbors: Vec<Neighbor>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchTiming {
    pub lexical_ms: f64,
    pub vector_ms: f64,
    pub fusion_ms: f64,
    pub hydration_ms: f64,
    pub total_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelStats {
    pub candidates: usize,
    /// Best raw channel score (BM25 or cosine).
    pub top_score: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchMeta {
    pub elapsed_ms: f64,
    /// Size of the fused result list across all pages.
    pub total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<SearchTiming>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lexical: Option<ChannelStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<ChannelStats>,
}

/// One page of search output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPage {
    pub items: Vec<SearchHit>,
    pub next_cursor: Option<String>,
    pub prev_cursor: Option<String>,
    pub has_next: bool,
    pub has_prev: bool,
    pub meta: SearchMeta,
}
