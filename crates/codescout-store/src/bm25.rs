//! Okapi BM25 over tokenized documents.
//!
//! The whole index is serializable so it can ride along in the lexical
//! cache file; scoring it fresh from a few thousand chunks is cheap enough
//! that a cache miss just rebuilds.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const DEFAULT_K1: f32 = 1.5;
pub const DEFAULT_B: f32 = 0.75;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bm25Index {
    k1: f32,
    b: f32,
    avgdl: f32,
    doc_len: Vec<u32>,
    term_freqs: Vec<HashMap<String, u32>>,
    doc_freq: HashMap<String, u32>,
}

impl Bm25Index {
    /// Build from pre-tokenized documents, positionally aligned with the
    /// caller's document list.
    pub fn build(docs: &[Vec<String>]) -> Self {
        Self::with_params(docs, DEFAULT_K1, DEFAULT_B)
    }

    pub fn with_params(docs: &[Vec<String>], k1: f32, b: f32) -> Self {
        let mut doc_len = Vec::with_capacity(docs.len());
        let mut term_freqs = Vec::with_capacity(docs.len());
        let mut doc_freq: HashMap<String, u32> = HashMap::new();

        for tokens in docs {
            doc_len.push(tokens.len() as u32);
            let mut freqs: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *freqs.entry(token.clone()).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            term_freqs.push(freqs);
        }

        let avgdl = if doc_len.is_empty() {
            0.0
        } else {
            doc_len.iter().sum::<u32>() as f32 / doc_len.len() as f32
        };

        Self {
            k1,
            b,
            avgdl,
            doc_len,
            term_freqs,
            doc_freq,
        }
    }

    pub fn len(&self) -> usize {
        self.doc_len.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_len.is_empty()
    }

    /// Smoothed idf; always positive, even for terms in most documents.
    fn idf(&self, term: &str) -> f32 {
        let n = self.len() as f32;
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f32;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    /// BM25 score of the query against every document, by position.
    pub fn scores(&self, query: &[String]) -> Vec<f32> {
        let mut scores = vec![0.0f32; self.len()];
        if query.is_empty() || self.is_empty() {
            return scores;
        }

        for term in query {
            let idf = self.idf(term);
            for (i, freqs) in self.term_freqs.iter().enumerate() {
                let tf = freqs.get(term).copied().unwrap_or(0) as f32;
                if tf == 0.0 {
                    continue;
                }
                let len_norm = 1.0 - self.b + self.b * self.doc_len[i] as f32 / self.avgdl;
                scores[i] += idf * tf * (self.k1 + 1.0) / (tf + self.k1 * len_norm);
            }
        }
        scores
    }

    /// Indices of the `n` best-matching documents with positive score,
    /// best first.
    pub fn top_n(&self, query: &[String], n: usize) -> Vec<(usize, f32)> {
        let scores = self.scores(query);
        let mut ranked: Vec<(usize, f32)> = scores
            .into_iter()
            .enumerate()
            .filter(|&(_, s)| s > 0.0)
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(n);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_string).collect()
    }

    fn corpus() -> Vec<Vec<String>> {
        vec![
            tokens("parse config file and return settings"),
            tokens("open socket and bind listener"),
            tokens("config parser handles missing config file"),
            tokens("the the the the the common words"),
        ]
    }

    #[test]
    fn rare_terms_outweigh_common_ones() {
        let index = Bm25Index::build(&corpus());
        let ranked = index.top_n(&tokens("socket"), 4);
        assert_eq!(ranked[0].0, 1);
        assert_eq!(ranked.len(), 1);
    }

    #[test]
    fn repeated_query_terms_favor_matching_docs() {
        let index = Bm25Index::build(&corpus());
        let ranked = index.top_n(&tokens("config file"), 4);
        assert!(!ranked.is_empty());
        // Doc 2 mentions config twice.
        assert_eq!(ranked[0].0, 2);
        assert!(ranked.iter().all(|&(i, _)| i == 0 || i == 2));
    }

    #[test]
    fn idf_stays_positive_for_ubiquitous_terms() {
        let docs = vec![tokens("shared term"), tokens("shared term"), tokens("shared term")];
        let index = Bm25Index::build(&docs);
        let scores = index.scores(&tokens("shared"));
        assert!(scores.iter().all(|&s| s > 0.0));
    }

    #[test]
    fn empty_query_scores_nothing() {
        let index = Bm25Index::build(&corpus());
        assert!(index.scores(&[]).iter().all(|&s| s == 0.0));
        assert!(index.top_n(&[], 10).is_empty());
    }

    #[test]
    fn empty_index_is_harmless() {
        let index = Bm25Index::build(&[]);
        assert!(index.is_empty());
        assert!(index.top_n(&tokens("anything"), 5).is_empty());
    }

    #[test]
    fn scoring_survives_serialization() {
        let index = Bm25Index::build(&corpus());
        let query = tokens("config file");
        let json = serde_json::to_string(&index).unwrap();
        let restored: Bm25Index = serde_json::from_str(&json).unwrap();
        assert_eq!(index.scores(&query), restored.scores(&query));
    }
}
