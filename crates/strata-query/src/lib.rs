//! strata-query: Read engines over the Strata graph store.
//!
//! Both engines recompute their ordering from a single read snapshot on every
//! request and hand out opaque cursors, so paging is stateless:
//! - [`TraversalEngine`]: breadth-first expansion from a set of roots
//! - [`SearchEngine`]: lexical and vector retrieval fused with weighted RRF,
//!   with optional neighbor expansion of the top results

pub mod embed;
pub mod import;
pub mod search;
pub mod traversal;
pub mod types;

pub use embed::{EmbeddingProvider, HashingEmbedder};
pub use import::{import_batch, ImportBatch, ImportSummary};
pub use search::SearchEngine;
pub use traversal::TraversalEngine;
pub use types::{
    NeighborOptions, SearchHit, SearchPage, SearchRequest, TraversalNode, TraversalPage,
    TraversalRequest,
};
