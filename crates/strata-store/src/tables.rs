//! Append-only version tables and their derived indexes.

use std::collections::{BTreeSet, HashMap};

use strata_core::{CanonicalId, GraphObject, GraphRelationship, Result, StrataError, VersionId};

use crate::index::{FullTextIndex, VectorIndex};

pub(crate) type Triple = (String, CanonicalId, CanonicalId);

/// Committed rows. Chains list row ids in ascending version order, so the
/// head of a canonical id is always the last entry of its chain.
#[derive(Default)]
pub(crate) struct Tables {
    pub(crate) objects: HashMap<VersionId, GraphObject>,
    pub(crate) object_chains: HashMap<CanonicalId, Vec<VersionId>>,
    pub(crate) relationships: HashMap<VersionId, GraphRelationship>,
    pub(crate) relationship_chains: HashMap<CanonicalId, Vec<VersionId>>,
    /// `(type, src, dst)` → relationship canonical id.
    pub(crate) triples: HashMap<Triple, CanonicalId>,
    /// Object canonical id → relationship canonical ids leaving it.
    pub(crate) outgoing: HashMap<CanonicalId, BTreeSet<CanonicalId>>,
    /// Object canonical id → relationship canonical ids entering it.
    pub(crate) incoming: HashMap<CanonicalId, BTreeSet<CanonicalId>>,
    pub(crate) fulltext: FullTextIndex,
    pub(crate) vectors: VectorIndex,
}

/// Position a new row must take at the end of a chain.
#[derive(Clone)]
struct ChainTail {
    len: usize,
    last: Option<VersionId>,
}

impl Tables {
    pub(crate) fn object_head(&self, canonical_id: CanonicalId) -> Option<&GraphObject> {
        self.object_chains
            .get(&canonical_id)
            .and_then(|chain| chain.last())
            .and_then(|id| self.objects.get(id))
    }

    pub(crate) fn relationship_head(&self, canonical_id: CanonicalId) -> Option<&GraphRelationship> {
        self.relationship_chains
            .get(&canonical_id)
            .and_then(|chain| chain.last())
            .and_then(|id| self.relationships.get(id))
    }

    pub(crate) fn object_versions(&self, canonical_id: CanonicalId) -> Vec<&GraphObject> {
        self.object_chains
            .get(&canonical_id)
            .map(|chain| chain.iter().filter_map(|id| self.objects.get(id)).collect())
            .unwrap_or_default()
    }

    pub(crate) fn relationship_versions(&self, canonical_id: CanonicalId) -> Vec<&GraphRelationship> {
        self.relationship_chains
            .get(&canonical_id)
            .map(|chain| {
                chain
                    .iter()
                    .filter_map(|id| self.relationships.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Check that staged rows extend their chains without gaps or forks,
    /// in staging order. Nothing is written.
    pub(crate) fn check_appends(
        &self,
        objects: &[GraphObject],
        relationships: &[GraphRelationship],
    ) -> Result<()> {
        let mut tails: HashMap<CanonicalId, ChainTail> = HashMap::new();
        for row in objects {
            let tail = tails.entry(row.canonical_id).or_insert_with(|| {
                let chain = self.object_chains.get(&row.canonical_id);
                ChainTail {
                    len: chain.map_or(0, Vec::len),
                    last: chain.and_then(|c| c.last().copied()),
                }
            });
            check_tail(tail, row.canonical_id, row.version, row.supersedes_id)?;
            tail.len += 1;
            tail.last = Some(row.id);
        }

        tails.clear();
        for row in relationships {
            let tail = tails.entry(row.canonical_id).or_insert_with(|| {
                let chain = self.relationship_chains.get(&row.canonical_id);
                ChainTail {
                    len: chain.map_or(0, Vec::len),
                    last: chain.and_then(|c| c.last().copied()),
                }
            });
            check_tail(tail, row.canonical_id, row.version, row.supersedes_id)?;
            tail.len += 1;
            tail.last = Some(row.id);
        }
        Ok(())
    }

    /// Append an object row and refresh the head indexes.
    pub(crate) fn apply_object(&mut self, row: GraphObject) {
        self.fulltext.upsert(&row);
        self.vectors.upsert(&row);
        self.object_chains
            .entry(row.canonical_id)
            .or_default()
            .push(row.id);
        self.objects.insert(row.id, row);
    }

    /// Append a relationship row and refresh adjacency.
    pub(crate) fn apply_relationship(&mut self, row: GraphRelationship) {
        self.triples.insert(
            (row.rel_type.clone(), row.src_id, row.dst_id),
            row.canonical_id,
        );
        self.outgoing
            .entry(row.src_id)
            .or_default()
            .insert(row.canonical_id);
        self.incoming
            .entry(row.dst_id)
            .or_default()
            .insert(row.canonical_id);
        self.relationship_chains
            .entry(row.canonical_id)
            .or_default()
            .push(row.id);
        self.relationships.insert(row.id, row);
    }
}

fn check_tail(
    tail: &ChainTail,
    canonical_id: CanonicalId,
    version: u32,
    supersedes_id: Option<VersionId>,
) -> Result<()> {
    if version as usize != tail.len + 1 || supersedes_id != tail.last {
        return Err(StrataError::StorageUnavailable(format!(
            "version conflict on {canonical_id}: staged version {version} does not extend a chain of {}",
            tail.len
        )));
    }
    Ok(())
}
