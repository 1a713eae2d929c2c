//! In-memory [`DocumentStore`] for tests and single-run sessions.
//!
//! Chunks and vectors live behind `std::sync::RwLock`. Vector search is
//! brute-force cosine similarity; keyword search scores a chunk by how many
//! distinct query terms occur among its words.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{ChunkRecord, RetrievedChunk};

use super::{query_terms, rank_order, DocumentStore};

struct StoredVector {
    vector: Vec<f32>,
    model: String,
}

#[derive(Default)]
pub struct InMemoryStore {
    chunks: RwLock<Vec<ChunkRecord>>,
    vectors: RwLock<HashMap<String, StoredVector>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

fn to_retrieved(chunk: &ChunkRecord, score: f64) -> RetrievedChunk {
    RetrievedChunk {
        chunk_id: chunk.chunk_id.clone(),
        article_id: chunk.article_id.clone(),
        filename: chunk.filename.clone(),
        text: chunk.text.clone(),
        score,
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn clear(&self) -> Result<()> {
        self.chunks.write().map_err(poisoned)?.clear();
        self.vectors.write().map_err(poisoned)?.clear();
        Ok(())
    }

    async fn retain_chunks(&self, keep: &HashSet<String>) -> Result<usize> {
        let mut stored = self.chunks.write().map_err(poisoned)?;
        let mut vectors = self.vectors.write().map_err(poisoned)?;
        let before = stored.len();
        stored.retain(|c| keep.contains(&c.chunk_id));
        vectors.retain(|id, _| keep.contains(id));
        Ok(before - stored.len())
    }

    async fn write_chunks(&self, chunks: &[ChunkRecord]) -> Result<()> {
        let mut stored = self.chunks.write().map_err(poisoned)?;
        let mut vectors = self.vectors.write().map_err(poisoned)?;
        for chunk in chunks {
            match stored.iter_mut().find(|c| c.chunk_id == chunk.chunk_id) {
                Some(existing) => {
                    if existing.hash != chunk.hash {
                        vectors.remove(&chunk.chunk_id);
                    }
                    *existing = chunk.clone();
                }
                None => stored.push(chunk.clone()),
            }
        }
        Ok(())
    }

    async fn update_embedding(&self, chunk_id: &str, vector: &[f32], model: &str) -> Result<()> {
        let known = self
            .chunks
            .read()
            .map_err(poisoned)?
            .iter()
            .any(|c| c.chunk_id == chunk_id);
        if !known {
            return Err(anyhow!("unknown chunk: {}", chunk_id));
        }
        self.vectors.write().map_err(poisoned)?.insert(
            chunk_id.to_string(),
            StoredVector {
                vector: vector.to_vec(),
                model: model.to_string(),
            },
        );
        Ok(())
    }

    async fn chunks_missing_embeddings(&self, model: &str) -> Result<Vec<ChunkRecord>> {
        let chunks = self.chunks.read().map_err(poisoned)?;
        let vectors = self.vectors.read().map_err(poisoned)?;
        let mut missing: Vec<ChunkRecord> = chunks
            .iter()
            .filter(|c| match vectors.get(&c.chunk_id) {
                Some(v) => v.model != model,
                None => true,
            })
            .cloned()
            .collect();
        missing.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));
        Ok(missing)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.chunks.read().map_err(poisoned)?.len())
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        top_k: usize,
        article_id: Option<&str>,
    ) -> Result<Vec<RetrievedChunk>> {
        let chunks = self.chunks.read().map_err(poisoned)?;
        let vectors = self.vectors.read().map_err(poisoned)?;
        let mut candidates: Vec<RetrievedChunk> = chunks
            .iter()
            .filter(|c| article_id.map_or(true, |id| c.article_id == id))
            .filter_map(|c| {
                let stored = vectors.get(&c.chunk_id)?;
                let sim = cosine_similarity(query_vec, &stored.vector) as f64;
                Some(to_retrieved(c, sim))
            })
            .collect();
        candidates.sort_by(rank_order);
        candidates.truncate(top_k);
        Ok(candidates)
    }

    async fn keyword_search(
        &self,
        query: &str,
        top_k: usize,
        article_id: Option<&str>,
    ) -> Result<Vec<RetrievedChunk>> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let chunks = self.chunks.read().map_err(poisoned)?;
        let mut candidates: Vec<RetrievedChunk> = chunks
            .iter()
            .filter(|c| article_id.map_or(true, |id| c.article_id == id))
            .filter_map(|c| {
                let words: HashSet<String> = query_terms(&c.text).into_iter().collect();
                let matches = terms.iter().filter(|t| words.contains(*t)).count();
                (matches > 0).then(|| to_retrieved(c, matches as f64))
            })
            .collect();
        candidates.sort_by(rank_order);
        candidates.truncate(top_k);
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn chunk(id: &str, article: &str, text: &str) -> ChunkRecord {
        ChunkRecord {
            chunk_id: id.to_string(),
            article_id: article.to_string(),
            text: text.to_string(),
            filename: format!("{}.json", article),
            meta: Map::new(),
            hash: format!("h-{}", text.len()),
        }
    }

    #[tokio::test]
    async fn test_write_and_count() {
        let store = InMemoryStore::new();
        store
            .write_chunks(&[chunk("a_0", "a", "one"), chunk("a_1", "a", "two")])
            .await
            .unwrap();
        store.write_chunks(&[chunk("a_0", "a", "one")]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
        store.clear().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_embeddings_tracks_model_and_hash() {
        let store = InMemoryStore::new();
        store
            .write_chunks(&[chunk("a_0", "a", "one"), chunk("a_1", "a", "two")])
            .await
            .unwrap();
        store.update_embedding("a_0", &[1.0, 0.0], "m1").await.unwrap();

        let missing = store.chunks_missing_embeddings("m1").await.unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].chunk_id, "a_1");

        // Different model: everything needs embedding
        assert_eq!(store.chunks_missing_embeddings("m2").await.unwrap().len(), 2);

        // Changed text drops the vector
        store.write_chunks(&[chunk("a_0", "a", "uno!")]).await.unwrap();
        assert_eq!(store.chunks_missing_embeddings("m1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_retain_keeps_vectors_of_kept_chunks() {
        let store = InMemoryStore::new();
        store
            .write_chunks(&[chunk("a_0", "a", "one"), chunk("b_0", "b", "two")])
            .await
            .unwrap();
        store.update_embedding("a_0", &[1.0], "m").await.unwrap();
        store.update_embedding("b_0", &[1.0], "m").await.unwrap();

        let keep: HashSet<String> = ["a_0".to_string()].into_iter().collect();
        assert_eq!(store.retain_chunks(&keep).await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.chunks_missing_embeddings("m").await.unwrap().is_empty());
        assert!(store.vector_search(&[1.0], 5, Some("b")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_unknown_chunk_is_error() {
        let store = InMemoryStore::new();
        assert!(store.update_embedding("nope", &[1.0], "m").await.is_err());
    }

    #[tokio::test]
    async fn test_vector_search_ranking_and_filter() {
        let store = InMemoryStore::new();
        store
            .write_chunks(&[
                chunk("a_0", "a", "x"),
                chunk("a_1", "a", "y"),
                chunk("b_0", "b", "z"),
            ])
            .await
            .unwrap();
        store.update_embedding("a_0", &[1.0, 0.0], "m").await.unwrap();
        store.update_embedding("a_1", &[0.0, 1.0], "m").await.unwrap();
        store.update_embedding("b_0", &[1.0, 0.0], "m").await.unwrap();

        let hits = store.vector_search(&[1.0, 0.0], 2, None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        // a_0 and b_0 tie; chunk id breaks the tie
        assert_eq!(ids, vec!["a_0", "b_0"]);

        let hits = store.vector_search(&[1.0, 0.0], 5, Some("a")).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a_0", "a_1"]);
    }

    #[tokio::test]
    async fn test_keyword_search() {
        let store = InMemoryStore::new();
        store
            .write_chunks(&[
                chunk("a_0", "a", "the sample size was 120"),
                chunk("a_1", "a", "funding was public"),
                chunk("b_0", "b", "sample collection"),
            ])
            .await
            .unwrap();
        let hits = store.keyword_search("sample size", 10, None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a_0", "b_0"]);
        assert_eq!(hits[0].score, 2.0);
        assert!(store.keyword_search("", 10, None).await.unwrap().is_empty());
    }
}
