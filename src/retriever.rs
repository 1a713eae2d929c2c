//! Dense, keyword, and hybrid retrieval over a [`DocumentStore`].
//!
//! # Modes
//!
//! - **dense**: embed the query with the query encoder and rank chunks by
//!   cosine similarity to their passage vectors.
//! - **keyword**: the store's term-match ranking (FTS5 bm25 for SQLite).
//! - **hybrid**: both candidate lists are min-max normalised to `[0, 1]`
//!   and merged with `(1 - α)·keyword + α·dense`, where α is
//!   `retriever.hybrid_alpha`. A chunk missing from one list scores 0 there.
//!
//! Results are ordered by score descending, then chunk id ascending.

use anyhow::{bail, Result};
use std::collections::HashMap;

use crate::config::RetrieverConfig;
use crate::embedding::{self, EmbeddingRole};
use crate::models::RetrievedChunk;
use crate::progress::{ProgressEvent, ProgressReporter, Stage};
use crate::store::{rank_order, DocumentStore};

/// Each channel fetches this many times `top_k` candidates before merging.
const HYBRID_CANDIDATE_FACTOR: usize = 4;

/// Tag stored with every vector; a change of model or width invalidates
/// previously stored vectors.
pub fn embedding_tag(config: &RetrieverConfig) -> Result<String> {
    let provider = embedding::create_provider(config)?;
    Ok(format!("{}:{}", provider.model_name(), provider.dims()))
}

/// Embed every chunk lacking a vector for the current passage model.
///
/// Works in `retriever.batch_size` batches. Any batch failure aborts the
/// update; vectors written by earlier batches are kept. Returns the number of
/// chunks embedded.
pub async fn update_embeddings(
    store: &dyn DocumentStore,
    config: &RetrieverConfig,
    progress: &dyn ProgressReporter,
) -> Result<usize> {
    if !config.is_enabled() {
        bail!("Embedding provider is disabled. Set [retriever] provider in config.");
    }

    let tag = embedding_tag(config)?;
    let pending = store.chunks_missing_embeddings(&tag).await?;
    if pending.is_empty() {
        tracing::info!("all chunks already embedded");
        return Ok(0);
    }

    let total = pending.len() as u64;
    let mut done = 0usize;
    tracing::info!(chunks = pending.len(), model = %tag, "embedding chunks");

    for batch in pending.chunks(config.batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedding::embed_texts(config, EmbeddingRole::Passage, &texts).await?;

        for (chunk, vector) in batch.iter().zip(vectors.iter()) {
            store.update_embedding(&chunk.chunk_id, vector, &tag).await?;
        }

        done += batch.len();
        progress.report(ProgressEvent {
            stage: Stage::Embed,
            n: done as u64,
            total,
        });
    }

    Ok(done)
}

/// Retrieve the `top_k` chunks most relevant to `query`, optionally limited
/// to one article. An empty query yields no results.
pub async fn retrieve(
    store: &dyn DocumentStore,
    config: &RetrieverConfig,
    query: &str,
    top_k: usize,
    article_id: Option<&str>,
) -> Result<Vec<RetrievedChunk>> {
    if query.trim().is_empty() || top_k == 0 {
        return Ok(Vec::new());
    }

    match config.mode.as_str() {
        "keyword" => store.keyword_search(query, top_k, article_id).await,
        "dense" => dense_search(store, config, query, top_k, article_id).await,
        "hybrid" => {
            let candidate_k = top_k * HYBRID_CANDIDATE_FACTOR;
            let keyword = store.keyword_search(query, candidate_k, article_id).await?;
            let dense = dense_search(store, config, query, candidate_k, article_id).await?;
            Ok(merge_hybrid(&keyword, &dense, config.hybrid_alpha, top_k))
        }
        other => bail!(
            "Unknown retriever mode: {}. Use dense, keyword, or hybrid.",
            other
        ),
    }
}

async fn dense_search(
    store: &dyn DocumentStore,
    config: &RetrieverConfig,
    query: &str,
    top_k: usize,
    article_id: Option<&str>,
) -> Result<Vec<RetrievedChunk>> {
    if !config.is_enabled() {
        bail!(
            "Mode '{}' requires embeddings. Set [retriever] provider in config.",
            config.mode
        );
    }

    let tag = embedding_tag(config)?;
    let missing = store.chunks_missing_embeddings(&tag).await?.len();
    if missing > 0 {
        bail!(
            "{} chunks have no embedding for model {}; update embeddings before querying",
            missing,
            tag
        );
    }

    let query_vec = embedding::embed_query(config, query).await?;
    store.vector_search(&query_vec, top_k, article_id).await
}

/// Min-max normalize scores to `[0, 1]`. A list whose scores are all equal
/// normalises to 1.0 throughout.
fn normalize_scores(candidates: &[RetrievedChunk]) -> Vec<(&RetrievedChunk, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

fn merge_hybrid(
    keyword: &[RetrievedChunk],
    dense: &[RetrievedChunk],
    alpha: f64,
    top_k: usize,
) -> Vec<RetrievedChunk> {
    let norm_keyword = normalize_scores(keyword);
    let norm_dense = normalize_scores(dense);

    let kw_map: HashMap<&str, f64> = norm_keyword
        .iter()
        .map(|(c, s)| (c.chunk_id.as_str(), *s))
        .collect();
    let vec_map: HashMap<&str, f64> = norm_dense
        .iter()
        .map(|(c, s)| (c.chunk_id.as_str(), *s))
        .collect();

    let mut all_chunks: HashMap<&str, &RetrievedChunk> = HashMap::new();
    for c in keyword.iter().chain(dense.iter()) {
        all_chunks.entry(c.chunk_id.as_str()).or_insert(c);
    }

    let mut merged: Vec<RetrievedChunk> = all_chunks
        .into_iter()
        .map(|(chunk_id, cand)| {
            let k = kw_map.get(chunk_id).copied().unwrap_or(0.0);
            let v = vec_map.get(chunk_id).copied().unwrap_or(0.0);
            RetrievedChunk {
                score: (1.0 - alpha) * k + alpha * v,
                ..cand.clone()
            }
        })
        .collect();

    merged.sort_by(rank_order);
    merged.truncate(top_k);
    merged
}
