//! In-memory Okapi BM25 index
//!
//! Built fresh for every query over the documents fetched for one
//! table source, then discarded. Never shared across requests.
//!
//! Uses the Lucene IDF variant `ln(1 + (N - df + 0.5)/(df + 0.5))`,
//! which is non-negative for all `0 <= df <= N`.

use crate::tokenizer::Tokenizer;
use std::collections::HashMap;

/// Term-frequency saturation parameter
pub const DEFAULT_K1: f64 = 1.2;

/// Length-normalization parameter
pub const DEFAULT_B: f64 = 0.75;

/// A scored document id
#[derive(Debug, Clone, PartialEq)]
pub struct Bm25Hit {
    pub id: String,
    pub score: f32,
}

struct IndexedDoc {
    id: String,
    term_freq: HashMap<String, usize>,
    len: usize,
}

/// Per-query BM25 index
pub struct Bm25Index {
    k1: f64,
    b: f64,
    tokenizer: Tokenizer,
    docs: Vec<IndexedDoc>,
    doc_freq: HashMap<String, usize>,
    total_len: usize,
}

impl Bm25Index {
    pub fn new(tokenizer: Tokenizer) -> Self {
        Self::with_params(tokenizer, DEFAULT_K1, DEFAULT_B)
    }

    pub fn with_params(tokenizer: Tokenizer, k1: f64, b: f64) -> Self {
        Self {
            k1,
            b,
            tokenizer,
            docs: Vec::new(),
            doc_freq: HashMap::new(),
            total_len: 0,
        }
    }

    /// Drop all indexed documents
    pub fn clear(&mut self) {
        self.docs.clear();
        self.doc_freq.clear();
        self.total_len = 0;
    }

    /// Index one document
    pub fn add(&mut self, id: impl Into<String>, content: &str) {
        let term_freq = self.tokenizer.frequencies(content);
        let len: usize = term_freq.values().sum();

        for term in term_freq.keys() {
            *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
        }
        self.total_len += len;
        self.docs.push(IndexedDoc {
            id: id.into(),
            term_freq,
            len,
        });
    }

    /// Number of indexed documents
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    fn idf(&self, df: usize) -> f64 {
        let n = self.docs.len() as f64;
        let df = df as f64;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    /// Rank indexed documents against a query
    ///
    /// Documents scoring zero are omitted. Ties keep insertion order.
    pub fn search(&self, query: &str, top_n: usize) -> Vec<Bm25Hit> {
        if self.docs.is_empty() || top_n == 0 {
            return Vec::new();
        }

        // Query terms are scored as a set
        let mut terms = self.tokenizer.tokenize(query);
        let mut seen = std::collections::HashSet::new();
        terms.retain(|t| seen.insert(t.clone()));
        if terms.is_empty() {
            return Vec::new();
        }

        let avg_len = self.total_len as f64 / self.docs.len() as f64;

        let mut hits: Vec<Bm25Hit> = self
            .docs
            .iter()
            .filter_map(|doc| {
                let mut score = 0.0;
                for term in &terms {
                    let tf = *doc.term_freq.get(term).unwrap_or(&0) as f64;
                    if tf == 0.0 {
                        continue;
                    }
                    let df = *self.doc_freq.get(term).unwrap_or(&0);
                    let norm = tf * (self.k1 + 1.0)
                        / (tf + self.k1 * (1.0 - self.b + self.b * doc.len as f64 / avg_len));
                    score += self.idf(df) * norm;
                }
                (score > 0.0).then(|| Bm25Hit {
                    id: doc.id.clone(),
                    score: score as f32,
                })
            })
            .collect();

        // Stable sort keeps insertion order among equal scores
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_n);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(docs: &[(&str, &str)]) -> Bm25Index {
        let mut idx = Bm25Index::new(Tokenizer::new());
        for (id, content) in docs {
            idx.add(*id, content);
        }
        idx
    }

    #[test]
    fn idf_is_non_negative_for_all_df() {
        let idx = index(&[("1", "alpha"), ("2", "beta"), ("3", "gamma"), ("4", "delta")]);
        for df in 0..=idx.len() {
            assert!(idx.idf(df) >= 0.0, "idf({df}) was negative");
        }
    }

    #[test]
    fn matching_documents_rank_by_term_frequency() {
        let idx = index(&[
            ("low", "rust once among other words here"),
            ("high", "rust rust rust"),
        ]);
        let hits = idx.search("rust", 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "high");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn rarer_terms_score_higher() {
        let idx = index(&[
            ("1", "common rare"),
            ("2", "common"),
            ("3", "common"),
            ("4", "common"),
        ]);
        let common = idx.search("common", 10);
        let rare = idx.search("rare", 10);
        assert!(rare[0].score > common[0].score);
    }

    #[test]
    fn zero_score_documents_are_omitted() {
        let idx = index(&[("1", "alpha beta"), ("2", "gamma delta")]);
        let hits = idx.search("alpha", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "1");
    }

    #[test]
    fn ties_keep_insertion_order() {
        let idx = index(&[("first", "token filler"), ("second", "token filler")]);
        let hits = idx.search("token", 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "first");
        assert_eq!(hits[1].id, "second");
    }

    #[test]
    fn longer_documents_are_penalized() {
        let idx = index(&[
            ("short", "needle haystack"),
            (
                "long",
                "needle haystack haystack haystack haystack haystack haystack haystack",
            ),
        ]);
        let hits = idx.search("needle", 10);
        assert_eq!(hits[0].id, "short");
    }

    #[test]
    fn clear_resets_all_state() {
        let mut idx = index(&[("1", "alpha"), ("2", "alpha beta")]);
        idx.clear();
        assert!(idx.is_empty());
        assert!(idx.search("alpha", 10).is_empty());

        idx.add("3", "alpha");
        let hits = idx.search("alpha", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "3");
    }

    #[test]
    fn repeated_query_terms_do_not_double_count() {
        let idx = index(&[("1", "alpha beta")]);
        let once = idx.search("alpha", 10);
        let twice = idx.search("alpha alpha", 10);
        assert_eq!(once[0].score, twice[0].score);
    }

    #[test]
    fn truncates_to_top_n() {
        let idx = index(&[("1", "x1 shared"), ("2", "x2 shared"), ("3", "x3 shared")]);
        assert_eq!(idx.search("shared", 2).len(), 2);
    }
}
