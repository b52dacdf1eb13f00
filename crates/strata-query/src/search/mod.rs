//! Hybrid lexical and vector search.
//!
//! Each request retrieves bounded candidate lists from the full-text and
//! vector indexes, both restricted by scope and filters before truncation,
//! fuses them with weighted RRF and slices one page. Objects are hydrated
//! only for the page. Nothing is kept between requests: the cursor carries
//! the `(score, id)` of a boundary item and is located again in the freshly
//! fused list.

pub mod fusion;

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use strata_core::config::SearchConfig;
use strata_core::cursor::{self, page_bounds};
use strata_core::{CanonicalId, ObjectFilter, Result, StrataError, TenantScope};
use strata_store::{GraphStore, Hit, ReadView, ScopedQuery};

use crate::embed::EmbeddingProvider;
use crate::traversal::{walk, WalkOptions};
use crate::types::{
    ChannelStats, Neighbor, NeighborOptions, SearchHit, SearchMeta, SearchPage, SearchRequest,
    SearchTiming,
};
use fusion::{FusedItem, FusionKey, FusionWeights};

const CURSOR_KIND: &str = "search";
const MAX_NEIGHBOR_DEPTH: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channels {
    Hybrid,
    Lexical,
    Vector,
}

/// Search over a [`GraphStore`], with an optional embedding provider for
/// text-only requests.
#[derive(Clone)]
pub struct SearchEngine {
    store: GraphStore,
    config: SearchConfig,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl SearchEngine {
    pub fn new(store: GraphStore, config: SearchConfig) -> Self {
        Self {
            store,
            config,
            embedder: None,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Fused lexical and vector search.
    pub async fn search(&self, tenant: &TenantScope, request: &SearchRequest) -> Result<SearchPage> {
        self.run(tenant, request, Channels::Hybrid).await
    }

    /// Full-text channel only. Requires a non-blank query.
    pub async fn lexical_search(
        &self,
        tenant: &TenantScope,
        request: &SearchRequest,
    ) -> Result<SearchPage> {
        self.run(tenant, request, Channels::Lexical).await
    }

    /// Vector channel only. Requires a vector, or a query plus a provider.
    pub async fn vector_search(
        &self,
        tenant: &TenantScope,
        request: &SearchRequest,
    ) -> Result<SearchPage> {
        self.run(tenant, request, Channels::Vector).await
    }

    fn weights(&self, request: &SearchRequest, channels: Channels) -> Result<FusionWeights> {
        self.config.validate()?;
        match channels {
            Channels::Lexical => Ok(FusionWeights {
                lexical: 1.0,
                vector: 0.0,
            }),
            Channels::Vector => Ok(FusionWeights {
                lexical: 0.0,
                vector: 1.0,
            }),
            Channels::Hybrid => {
                let lexical = request.lexical_weight.unwrap_or(self.config.lexical_weight);
                let vector = request.vector_weight.unwrap_or(self.config.vector_weight);
                for w in [lexical, vector] {
                    if !w.is_finite() || w < 0.0 {
                        return Err(StrataError::validation(
                            "search",
                            format!("weights must be finite and non-negative, got {w}"),
                        ));
                    }
                }
                Ok(FusionWeights { lexical, vector })
            }
        }
    }

    /// The query vector: supplied, or embedded from the text. Embedding
    /// failures disable the vector channel for this request.
    async fn query_vector(&self, request: &SearchRequest, text: Option<&str>) -> Option<Vec<f32>> {
        if let Some(v) = &request.vector {
            return Some(v.clone());
        }
        let (text, embedder) = (text?, self.embedder.as_ref()?);
        match embedder.embed(text).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, "Query embedding failed, vector channel disabled");
                None
            }
        }
    }

    async fn run(
        &self,
        tenant: &TenantScope,
        request: &SearchRequest,
        channels: Channels,
    ) -> Result<SearchPage> {
        let started = Instant::now();
        let text = request
            .query
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());

        match channels {
            Channels::Hybrid if text.is_none() && request.vector.is_none() => {
                return Err(StrataError::validation(
                    "search",
                    "either a non-blank query or a vector is required",
                ));
            }
            Channels::Lexical if text.is_none() => {
                return Err(StrataError::validation("search", "a non-blank query is required"));
            }
            Channels::Vector
                if request.vector.is_none() && (text.is_none() || self.embedder.is_none()) =>
            {
                return Err(StrataError::validation(
                    "search",
                    "a vector, or a query with an embedding provider, is required",
                ));
            }
            _ => {}
        }

        let weights = self.weights(request, channels)?;
        let limit = request
            .limit
            .unwrap_or(self.config.default_limit)
            .clamp(1, self.config.max_limit.max(1));
        let position: Option<FusionKey> = request
            .cursor
            .as_deref()
            .and_then(|token| cursor::decode(CURSOR_KIND, token));
        if request.cursor.is_some() && position.is_none() {
            warn!("Malformed search cursor, returning first page");
        }

        let vector = match channels {
            Channels::Lexical => None,
            _ => self.query_vector(request, text).await,
        };
        let lexical_text = match channels {
            Channels::Vector => None,
            _ => text,
        };

        let q = ScopedQuery::new(*tenant).filter(request.filter.clone());
        let page = self.store.storage().read_tenant(tenant, |view| {
            let t = Instant::now();
            let lexical_hits = match lexical_text {
                Some(text) => view.fulltext(&q, text, self.config.candidate_limit),
                None => Vec::new(),
            };
            let lexical_ms = elapsed_ms(t);

            let t = Instant::now();
            let vector_hits = match vector.as_deref() {
                Some(v) if !v.is_empty() => view.nearest(&q, v, self.config.candidate_limit),
                _ => Vec::new(),
            };
            let vector_ms = elapsed_ms(t);

            let t = Instant::now();
            let fused = fusion::fuse(
                &ids(&lexical_hits),
                &ids(&vector_hits),
                weights,
                self.config.rrf_k,
            );
            let boundary = position.as_ref().and_then(|key| {
                let found = fusion::locate(&fused, key);
                if found.is_none() {
                    warn!(node = %key.id, "Search cursor not located, returning first page");
                }
                found
            });
            let total = fused.len();
            let (lo, hi) = page_bounds(total, boundary, request.page_direction, limit);
            let fusion_ms = elapsed_ms(t);

            let t = Instant::now();
            let items = self.hydrate(view, &q, &fused[lo..hi], request.neighbors.as_ref(), tenant);
            let hydration_ms = elapsed_ms(t);

            let timing = SearchTiming {
                lexical_ms,
                vector_ms,
                fusion_ms,
                hydration_ms,
                total_ms: elapsed_ms(started),
            };
            let debug = request.include_debug;
            SearchPage {
                items,
                next_cursor: (hi > 0 && hi < total)
                    .then(|| cursor::encode(CURSOR_KIND, &fused[hi - 1].key())),
                prev_cursor: (lo > 0 && lo < total)
                    .then(|| cursor::encode(CURSOR_KIND, &fused[lo].key())),
                has_next: hi < total,
                has_prev: lo > 0,
                meta: SearchMeta {
                    elapsed_ms: elapsed_ms(started),
                    total,
                    timing: debug.then_some(timing),
                    lexical: debug.then(|| channel_stats(&lexical_hits)),
                    vector: debug.then(|| channel_stats(&vector_hits)),
                },
            }
        });

        debug!(
            organization_id = %tenant.organization_id,
            project_id = %tenant.project_id,
            channels = ?channels,
            items = page.items.len(),
            total = page.meta.total,
            elapsed_ms = page.meta.elapsed_ms,
            "Search page computed"
        );
        Ok(page)
    }

    /// Load the page's live heads and expand neighbors for the leading
    /// `top_k` of them.
    fn hydrate(
        &self,
        view: &ReadView<'_>,
        q: &ScopedQuery<ObjectFilter>,
        page: &[FusedItem],
        neighbors: Option<&NeighborOptions>,
        tenant: &TenantScope,
    ) -> Vec<SearchHit> {
        let top_k = neighbors
            .map(|n| n.top_k.unwrap_or(self.config.neighbor_top_k))
            .unwrap_or(0);
        let unfiltered = ScopedQuery::new(*tenant);

        page.iter()
            .enumerate()
            .filter_map(|(i, item)| {
                let object = view.live_object(q, item.canonical_id)?;
                let expanded = match neighbors {
                    Some(opts) if i < top_k => {
                        self.expand(view, &unfiltered, item.canonical_id, opts)
                    }
                    _ => Vec::new(),
                };
                Some(SearchHit {
                    canonical_id: item.canonical_id,
                    score: item.score,
                    lexical_rank: item.lexical_rank,
                    vector_rank: item.vector_rank,
                    object: object.clone(),
                    neighbors: expanded,
                })
            })
            .collect()
    }

    fn expand(
        &self,
        view: &ReadView<'_>,
        q: &ScopedQuery,
        root: CanonicalId,
        opts: &NeighborOptions,
    ) -> Vec<Neighbor> {
        let max = opts.max_neighbors.unwrap_or(self.config.max_neighbors);
        if max == 0 {
            return Vec::new();
        }
        let walk_opts = WalkOptions {
            max_depth: opts.depth.unwrap_or(1).min(MAX_NEIGHBOR_DEPTH),
            direction: opts.direction,
            relationship_types: &opts.relationship_types,
            object_types: &[],
            max_nodes: max + 1,
        };
        walk(view, q, &[root], &walk_opts)
            .steps
            .into_iter()
            .filter_map(|step| {
                step.via.map(|rel| Neighbor {
                    depth: step.depth,
                    relationship: rel.clone(),
                    object: step.object.clone(),
                })
            })
            .collect()
    }
}

fn ids(hits: &[Hit]) -> Vec<CanonicalId> {
    hits.iter().map(|h| h.canonical_id).collect()
}

fn channel_stats(hits: &[Hit]) -> ChannelStats {
    ChannelStats {
        candidates: hits.len(),
        top_score: hits.first().map(|h| h.score),
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}
