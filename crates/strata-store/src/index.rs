//! In-memory full-text and vector indexes over live object heads.
//!
//! Both indexes are keyed by canonical id and hold only the current head of
//! each object; tombstoned heads are removed. Visibility filtering is done by
//! the caller, which passes a predicate so that scope and filters restrict
//! candidates before any truncation.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use strata_core::{CanonicalId, GraphObject};

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

/// Lower-cased alphanumeric tokens of `text`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Searchable text of an object: type, key, labels and every string value in
/// its properties.
fn document_text(obj: &GraphObject) -> String {
    let mut text = String::new();
    text.push_str(&obj.object_type);
    if let Some(key) = &obj.key {
        text.push(' ');
        text.push_str(key);
    }
    for label in &obj.labels {
        text.push(' ');
        text.push_str(label);
    }
    for value in obj.properties.values() {
        extract_strings(value, &mut text);
    }
    text
}

fn extract_strings(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::String(s) => {
            out.push(' ');
            out.push_str(s);
        }
        serde_json::Value::Array(items) => items.iter().for_each(|v| extract_strings(v, out)),
        serde_json::Value::Object(map) => map.values().for_each(|v| extract_strings(v, out)),
        _ => {}
    }
}

/// A scored candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub canonical_id: CanonicalId,
    pub score: f64,
}

/// Sort by score descending, canonical id ascending.
pub(crate) fn rank(hits: &mut [Hit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.canonical_id.cmp(&b.canonical_id))
    });
}

struct Document {
    terms: HashMap<String, u32>,
    length: u32,
}

/// Inverted index with BM25 scoring.
#[derive(Default)]
pub(crate) struct FullTextIndex {
    docs: HashMap<CanonicalId, Document>,
    postings: HashMap<String, HashSet<CanonicalId>>,
    total_length: u64,
}

impl FullTextIndex {
    /// Index `obj` as the head of its canonical id, replacing any previous
    /// head. Tombstoned heads are only removed.
    pub(crate) fn upsert(&mut self, obj: &GraphObject) {
        self.remove(obj.canonical_id);
        if obj.is_deleted() {
            return;
        }
        let tokens = tokenize(&document_text(obj));
        let mut terms: HashMap<String, u32> = HashMap::new();
        for tok in tokens.iter() {
            *terms.entry(tok.clone()).or_default() += 1;
        }
        for term in terms.keys() {
            self.postings
                .entry(term.clone())
                .or_default()
                .insert(obj.canonical_id);
        }
        self.total_length += tokens.len() as u64;
        self.docs.insert(
            obj.canonical_id,
            Document {
                terms,
                length: tokens.len() as u32,
            },
        );
    }

    pub(crate) fn remove(&mut self, canonical_id: CanonicalId) {
        let Some(doc) = self.docs.remove(&canonical_id) else {
            return;
        };
        self.total_length -= u64::from(doc.length);
        for term in doc.terms.keys() {
            if let Some(ids) = self.postings.get_mut(term) {
                ids.remove(&canonical_id);
                if ids.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.docs.len()
    }

    /// Top `limit` documents for `query` that pass `admit`.
    pub(crate) fn search(
        &self,
        query: &str,
        limit: usize,
        mut admit: impl FnMut(CanonicalId) -> bool,
    ) -> Vec<Hit> {
        let mut terms = tokenize(query);
        terms.sort();
        terms.dedup();
        if terms.is_empty() || self.docs.is_empty() {
            return Vec::new();
        }

        let n = self.docs.len() as f64;
        let avg_len = (self.total_length as f64 / n).max(1.0);
        let mut scores: HashMap<CanonicalId, f64> = HashMap::new();
        let mut admitted: HashMap<CanonicalId, bool> = HashMap::new();

        for term in &terms {
            let Some(ids) = self.postings.get(term) else {
                continue;
            };
            let df = ids.len() as f64;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            for id in ids {
                if !*admitted.entry(*id).or_insert_with(|| admit(*id)) {
                    continue;
                }
                let Some(doc) = self.docs.get(id) else {
                    continue;
                };
                let tf = f64::from(doc.terms.get(term).copied().unwrap_or(0));
                let norm = BM25_K1 * (1.0 - BM25_B + BM25_B * f64::from(doc.length) / avg_len);
                *scores.entry(*id).or_default() += idf * (tf * (BM25_K1 + 1.0)) / (tf + norm);
            }
        }

        let mut hits: Vec<Hit> = scores
            .into_iter()
            .map(|(canonical_id, score)| Hit {
                canonical_id,
                score,
            })
            .collect();
        rank(&mut hits);
        hits.truncate(limit);
        hits
    }
}

/// Cosine similarity, 0 for empty, mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Exact nearest-neighbour index over head embeddings.
#[derive(Default)]
pub(crate) struct VectorIndex {
    vectors: HashMap<CanonicalId, Vec<f32>>,
}

impl VectorIndex {
    pub(crate) fn upsert(&mut self, obj: &GraphObject) {
        match (&obj.embedding, obj.is_deleted()) {
            (Some(v), false) if !v.is_empty() => {
                self.vectors.insert(obj.canonical_id, v.clone());
            }
            _ => {
                self.vectors.remove(&obj.canonical_id);
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Top `limit` embeddings by cosine similarity to `query` that pass
    /// `admit`. Embeddings of another dimension are skipped.
    pub(crate) fn nearest(
        &self,
        query: &[f32],
        limit: usize,
        mut admit: impl FnMut(CanonicalId) -> bool,
    ) -> Vec<Hit> {
        if query.is_empty() {
            return Vec::new();
        }
        let mut hits: Vec<Hit> = self
            .vectors
            .iter()
            .filter(|(_, v)| v.len() == query.len())
            .filter(|(id, _)| admit(**id))
            .map(|(id, v)| Hit {
                canonical_id: *id,
                score: cosine_similarity(query, v),
            })
            .collect();
        rank(&mut hits);
        hits.truncate(limit);
        hits
    }
}
