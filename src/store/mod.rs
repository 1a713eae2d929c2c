//! Vector index abstraction.
//!
//! The [`DocumentStore`] trait covers everything the retriever needs from a
//! backend: writing chunks, attaching embedding vectors, and answering
//! vector and keyword queries. Two backends are provided:
//!
//! - [`SqliteStore`]: persistent, sqlx SQLite with an FTS5 index over chunk
//!   text and embedding vectors stored as BLOBs.
//! - [`InMemoryStore`]: `RwLock`-guarded vectors for tests and one-shot runs.
//!
//! Both rank vector candidates by brute-force cosine similarity and break
//! score ties by ascending chunk id, so results are deterministic.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::models::{ChunkRecord, RetrievedChunk};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Abstract storage backend for chunk text and embeddings.
///
/// All methods take `&self`; implementations handle their own locking.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`clear`](DocumentStore::clear) | Drop every chunk and vector |
/// | [`retain_chunks`](DocumentStore::retain_chunks) | Drop chunks no longer in the corpus |
/// | [`write_chunks`](DocumentStore::write_chunks) | Insert or replace chunks by id |
/// | [`update_embedding`](DocumentStore::update_embedding) | Attach a vector to a chunk |
/// | [`chunks_missing_embeddings`](DocumentStore::chunks_missing_embeddings) | Chunks needing (re)embedding |
/// | [`vector_search`](DocumentStore::vector_search) | Cosine top-k |
/// | [`keyword_search`](DocumentStore::keyword_search) | Term-match top-k |
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn clear(&self) -> Result<()>;

    /// Delete every chunk, with its vector, whose id is not in `keep`.
    /// Returns the number of chunks removed.
    async fn retain_chunks(&self, keep: &HashSet<String>) -> Result<usize>;

    /// Insert chunks, replacing any stored chunk with the same id. A replaced
    /// chunk keeps its vector only if its text hash is unchanged.
    async fn write_chunks(&self, chunks: &[ChunkRecord]) -> Result<()>;

    async fn update_embedding(&self, chunk_id: &str, vector: &[f32], model: &str) -> Result<()>;

    /// Chunks with no vector, or with a vector produced by a different model,
    /// ordered by chunk id.
    async fn chunks_missing_embeddings(&self, model: &str) -> Result<Vec<ChunkRecord>>;

    async fn count(&self) -> Result<usize>;

    async fn vector_search(
        &self,
        query_vec: &[f32],
        top_k: usize,
        article_id: Option<&str>,
    ) -> Result<Vec<RetrievedChunk>>;

    async fn keyword_search(
        &self,
        query: &str,
        top_k: usize,
        article_id: Option<&str>,
    ) -> Result<Vec<RetrievedChunk>>;
}

/// Lowercase alphanumeric words of a query, deduplicated in order.
pub(crate) fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let word = word.to_lowercase();
        if !terms.contains(&word) {
            terms.push(word);
        }
    }
    terms
}

/// Score descending, then chunk id ascending.
pub(crate) fn rank_order(a: &RetrievedChunk, b: &RetrievedChunk) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_terms() {
        assert_eq!(
            query_terms("What is the sample-size? the SAMPLE"),
            vec!["what", "is", "the", "sample", "size"]
        );
        assert!(query_terms("  ?! ").is_empty());
    }
}
