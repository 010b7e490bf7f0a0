//! Semantic retrieval behind a narrow insert/query contract.
//!
//! The composer only ever inserts documents and asks for the top-k nearest
//! to a query string; everything else about embeddings is an implementation
//! detail behind [`VectorSearch`]. Both operations are best-effort: an
//! implementation that loses documents or returns nothing degrades retrieval
//! quality, never correctness.
//!
//! [`LocalVectorIndex`] is the in-tree fallback: term-frequency bags over
//! lowercase tokens, compared by cosine similarity. Crude next to a learned
//! embedding, but dependency-free and good enough to surface "the turn that
//! mentioned the amulet" when a remote index is not configured.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::weight::STOP_WORDS;

/// A document stored for later retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorDoc {
    /// Stable identity; re-inserting an ID replaces the old document.
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl VectorDoc {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: HashMap::new(),
        }
    }

    /// Attach one metadata entry.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// One retrieval result. `score` is cosine similarity in [0, 1].
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub text: String,
    pub score: f64,
    pub metadata: HashMap<String, String>,
}

/// Narrow semantic-search contract. Implementations must be best-effort:
/// swallow their own failures and return what they can.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn insert(&mut self, collection: &str, doc: VectorDoc);

    async fn query(&self, collection: &str, text: &str, top_k: usize) -> Vec<VectorHit>;
}

/// In-memory bag-of-words index used when no remote index is configured.
#[derive(Debug, Default)]
pub struct LocalVectorIndex {
    collections: HashMap<String, Vec<StoredDoc>>,
}

#[derive(Debug)]
struct StoredDoc {
    doc: VectorDoc,
    terms: HashMap<String, f64>,
    norm: f64,
}

impl LocalVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Documents held in one collection.
    pub fn len(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

#[async_trait]
impl VectorSearch for LocalVectorIndex {
    async fn insert(&mut self, collection: &str, doc: VectorDoc) {
        let terms = term_bag(&doc.text);
        let norm = bag_norm(&terms);
        let docs = self.collections.entry(collection.to_string()).or_default();

        // Same ID replaces in place.
        if let Some(existing) = docs.iter_mut().find(|d| d.doc.id == doc.id) {
            *existing = StoredDoc { doc, terms, norm };
        } else {
            docs.push(StoredDoc { doc, terms, norm });
        }
    }

    async fn query(&self, collection: &str, text: &str, top_k: usize) -> Vec<VectorHit> {
        let Some(docs) = self.collections.get(collection) else {
            return Vec::new();
        };

        let query_terms = term_bag(text);
        let query_norm = bag_norm(&query_terms);
        if query_norm == 0.0 {
            return Vec::new();
        }

        let mut hits: Vec<VectorHit> = docs
            .iter()
            .filter_map(|stored| {
                let score = cosine(&query_terms, query_norm, &stored.terms, stored.norm);
                (score > 0.0).then(|| VectorHit {
                    text: stored.doc.text.clone(),
                    score,
                    metadata: stored.doc.metadata.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.text.cmp(&b.text))
        });
        hits.truncate(top_k);
        hits
    }
}

/// Term-frequency bag over lowercase alphanumeric tokens, stop words and
/// short tokens skipped.
fn term_bag(text: &str) -> HashMap<String, f64> {
    let mut terms: HashMap<String, f64> = HashMap::new();
    for token in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
        if token.len() < 3 || STOP_WORDS.contains(&token) {
            continue;
        }
        *terms.entry(token.to_string()).or_insert(0.0) += 1.0;
    }
    terms
}

fn bag_norm(terms: &HashMap<String, f64>) -> f64 {
    terms.values().map(|v| v * v).sum::<f64>().sqrt()
}

fn cosine(a: &HashMap<String, f64>, a_norm: f64, b: &HashMap<String, f64>, b_norm: f64) -> f64 {
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    let dot: f64 = a
        .iter()
        .filter_map(|(term, weight)| b.get(term).map(|other| weight * other))
        .sum();
    dot / (a_norm * b_norm)
}
