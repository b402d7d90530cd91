//! Reciprocal rank fusion of vector and lexical result lists.
//!
//! Each list contributes `weight / (k + rank)` per document, rank 1-based;
//! raw scores from the two retrievers never mix, only ranks do. Vector rank
//! breaks ties so that, at equal fused score, the semantically closer
//! document wins.

use std::collections::HashMap;

use codescout_store::{Document, ScoredDocument};
use serde::Serialize;

pub const RRF_K: f32 = 60.0;
pub const VECTOR_WEIGHT: f32 = 1.0;
pub const LEXICAL_WEIGHT: f32 = 0.3;

/// How much wider than `top_k` each retriever's candidate list is.
pub const OVERSAMPLE_FACTOR: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Vector,
    Lexical,
    Hybrid,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub document: Document,
    /// Fused RRF score, not a similarity; only comparable within one query.
    pub score: f32,
    pub source: ResultSource,
}

struct Fused {
    document: Document,
    score: f32,
    vector_rank: Option<usize>,
    lexical_rank: Option<usize>,
}

/// Fuse two ranked candidate lists into the final top `limit`.
pub fn rrf_fuse(
    vector: Vec<ScoredDocument>,
    lexical: Vec<ScoredDocument>,
    limit: usize,
) -> Vec<SearchResult> {
    let mut by_id: HashMap<String, Fused> = HashMap::new();

    for (rank0, hit) in vector.into_iter().enumerate() {
        let rank = rank0 + 1;
        by_id.insert(
            hit.document.id.clone(),
            Fused {
                document: hit.document,
                score: VECTOR_WEIGHT / (RRF_K + rank as f32),
                vector_rank: Some(rank),
                lexical_rank: None,
            },
        );
    }

    for (rank0, hit) in lexical.into_iter().enumerate() {
        let rank = rank0 + 1;
        let contribution = LEXICAL_WEIGHT / (RRF_K + rank as f32);
        by_id
            .entry(hit.document.id.clone())
            .and_modify(|f| {
                f.score += contribution;
                f.lexical_rank = Some(rank);
            })
            .or_insert(Fused {
                document: hit.document,
                score: contribution,
                vector_rank: None,
                lexical_rank: Some(rank),
            });
    }

    let mut fused: Vec<Fused> = by_id.into_values().collect();
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let a_rank = a.vector_rank.unwrap_or(usize::MAX);
                let b_rank = b.vector_rank.unwrap_or(usize::MAX);
                a_rank.cmp(&b_rank)
            })
    });
    fused.truncate(limit);

    fused
        .into_iter()
        .map(|f| {
            let source = match (f.vector_rank, f.lexical_rank) {
                (Some(_), Some(_)) => ResultSource::Hybrid,
                (Some(_), None) => ResultSource::Vector,
                _ => ResultSource::Lexical,
            };
            SearchResult {
                document: f.document,
                score: f.score,
                source,
            }
        })
        .collect()
}
