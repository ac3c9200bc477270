//! Hybrid retrieval over stored chunks.
//!
//! Every stored chunk is scored on two channels:
//!
//! - **vector**: `max(0, cosine(query, chunk))`, or 0 when either side has no vector
//! - **keyword**: the lexical backend's normalized score, or 0 when the chunk did not match
//!
//! and the channels are blended linearly:
//!
//! ```text
//! score = vector_weight * vector + keyword_weight * keyword   (query embedded)
//! score = keyword                                              (query not embedded)
//! ```
//!
//! Hits below `min_score` are dropped. The rest are sorted by score
//! descending; ties keep storage order. Nothing here is fatal to the caller
//! when embeddings or the lexical backend misbehave: the affected channel
//! just contributes zero.

use anyhow::Result;
use std::collections::HashMap;

use crate::config::RetrievalConfig;
use crate::embedding::client::Embedder;
use crate::embedding::{cosine_similarity, EmbedError};
use crate::models::{SearchHit, StoredChunk};
use crate::store::SqliteStore;

/// Ranking knobs for one query.
#[derive(Debug, Clone, Copy)]
pub struct SearchParams {
    pub top_k: usize,
    pub min_score: f64,
    pub vector_weight: f64,
    pub keyword_weight: f64,
}

impl SearchParams {
    pub fn from_config(retrieval: &RetrievalConfig) -> Self {
        Self {
            top_k: retrieval.top_k,
            min_score: retrieval.min_score,
            vector_weight: retrieval.vector_weight,
            keyword_weight: retrieval.keyword_weight,
        }
    }
}

/// Blend the two channel scores into `[0, 1]`.
pub fn blend_score(
    vector: f64,
    keyword: f64,
    query_embedded: bool,
    params: &SearchParams,
) -> f64 {
    let score = if query_embedded {
        params.vector_weight * vector + params.keyword_weight * keyword
    } else {
        keyword
    };
    score.clamp(0.0, 1.0)
}

pub async fn hybrid_search(
    store: &SqliteStore,
    embedder: &Embedder,
    query: &str,
    params: &SearchParams,
) -> Result<Vec<SearchHit>> {
    if query.trim().is_empty() || params.top_k == 0 {
        return Ok(Vec::new());
    }

    let query_vector = match embedder.embed(query).await {
        Ok(v) => Some(v),
        Err(EmbedError::Disabled) => None,
        Err(e) => {
            tracing::warn!(error = %e, "query embedding failed, ranking by keywords only");
            None
        }
    };

    let chunks = store.all_chunks().await?;
    if chunks.is_empty() {
        return Ok(Vec::new());
    }

    let keyword = match store.lexical().rank(store.pool(), query, &chunks).await {
        Ok(scores) => scores,
        Err(e) => {
            tracing::warn!(
                backend = store.lexical().name(),
                error = %e,
                "lexical ranking failed, ignoring keyword scores"
            );
            HashMap::new()
        }
    };

    Ok(rank_chunks(&chunks, query_vector.as_deref(), &keyword, params))
}

/// Score, filter, sort and truncate. Pure; `hybrid_search` minus the I/O.
pub fn rank_chunks(
    chunks: &[StoredChunk],
    query_vector: Option<&[f32]>,
    keyword: &HashMap<String, f64>,
    params: &SearchParams,
) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = chunks
        .iter()
        .filter_map(|sc| {
            let vector_score = match (query_vector, sc.vector.as_slice()) {
                (Some(q), Some(v)) => (cosine_similarity(q, v) as f64).max(0.0),
                _ => 0.0,
            };
            let keyword_score = keyword
                .get(&sc.chunk.id)
                .copied()
                .unwrap_or(0.0)
                .clamp(0.0, 1.0);
            let score = blend_score(vector_score, keyword_score, query_vector.is_some(), params);

            (score >= params.min_score).then(|| SearchHit {
                path: sc.chunk.path.clone(),
                text: sc.chunk.text.clone(),
                score,
                start_line: sc.chunk.start_line,
                end_line: sc.chunk.end_line,
                vector_score,
                keyword_score,
            })
        })
        .collect();

    // sort_by is stable, so equal scores keep storage order
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(params.top_k);
    hits
}

/// Print hits for the CLI, as text or as a JSON array.
pub fn print_hits(hits: &[SearchHit], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.2}] {}:{}-{}",
            i + 1,
            hit.score,
            hit.path,
            hit.start_line,
            hit.end_line
        );
        println!(
            "    vector: {:.2}  keyword: {:.2}",
            hit.vector_score, hit.keyword_score
        );
        println!(
            "    excerpt: \"{}\"",
            crate::context::excerpt(&hit.text, 160).replace('\n', " ")
        );
        println!();
    }
    Ok(())
}
