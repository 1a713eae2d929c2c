//! SQLite-backed [`DocumentStore`].
//!
//! Chunks live in `chunks`, their text is mirrored into the `chunks_fts`
//! FTS5 table for keyword search, and vectors are stored as little-endian
//! f32 BLOBs in `chunk_vectors`. Cosine similarity is computed in Rust over
//! every stored vector.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;

use crate::config::Config;
use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::migrate;
use crate::models::{ChunkRecord, RetrievedChunk};

use super::{query_terms, rank_order, DocumentStore};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to `db.path`, creating the database and tables if needed.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// `"t1" OR "t2" ...` over the query's words, so FTS5 syntax characters in
/// user input are never interpreted.
fn fts_query(query: &str) -> Option<String> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

fn row_to_chunk(row: &SqliteRow) -> ChunkRecord {
    let meta_json: String = row.get("meta_json");
    ChunkRecord {
        chunk_id: row.get("chunk_id"),
        article_id: row.get("article_id"),
        text: row.get("text"),
        filename: row.get("filename"),
        meta: serde_json::from_str::<Map<String, Value>>(&meta_json).unwrap_or_default(),
        hash: row.get("hash"),
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunk_vectors")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks_fts").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn retain_chunks(&self, keep: &HashSet<String>) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let ids: Vec<String> = sqlx::query_scalar("SELECT chunk_id FROM chunks")
            .fetch_all(&mut *tx)
            .await?;
        let stale: Vec<String> = ids.into_iter().filter(|id| !keep.contains(id)).collect();

        for chunk_id in &stale {
            sqlx::query("DELETE FROM chunk_vectors WHERE chunk_id = ?")
                .bind(chunk_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
                .bind(chunk_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM chunks WHERE chunk_id = ?")
                .bind(chunk_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(stale.len())
    }

    async fn write_chunks(&self, chunks: &[ChunkRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for chunk in chunks {
            let meta_json = serde_json::to_string(&chunk.meta)?;
            let existing: Option<String> =
                sqlx::query_scalar("SELECT hash FROM chunks WHERE chunk_id = ?")
                    .bind(&chunk.chunk_id)
                    .fetch_optional(&mut *tx)
                    .await?;

            if existing.as_deref() == Some(chunk.hash.as_str()) {
                sqlx::query(
                    "UPDATE chunks SET article_id = ?, filename = ?, meta_json = ? WHERE chunk_id = ?",
                )
                .bind(&chunk.article_id)
                .bind(&chunk.filename)
                .bind(&meta_json)
                .bind(&chunk.chunk_id)
                .execute(&mut *tx)
                .await?;
                continue;
            }

            if existing.is_some() {
                sqlx::query("DELETE FROM chunk_vectors WHERE chunk_id = ?")
                    .bind(&chunk.chunk_id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
                    .bind(&chunk.chunk_id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM chunks WHERE chunk_id = ?")
                    .bind(&chunk.chunk_id)
                    .execute(&mut *tx)
                    .await?;
            }

            sqlx::query(
                "INSERT INTO chunks (chunk_id, article_id, text, filename, meta_json, hash) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&chunk.chunk_id)
            .bind(&chunk.article_id)
            .bind(&chunk.text)
            .bind(&chunk.filename)
            .bind(&meta_json)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO chunks_fts (chunk_id, article_id, text) VALUES (?, ?, ?)")
                .bind(&chunk.chunk_id)
                .bind(&chunk.article_id)
                .bind(&chunk.text)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_embedding(&self, chunk_id: &str, vector: &[f32], model: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let blob = vec_to_blob(vector);

        sqlx::query(
            r#"
            INSERT INTO chunk_vectors (chunk_id, embedding, model, dims, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                embedding = excluded.embedding,
                model = excluded.model,
                dims = excluded.dims,
                created_at = excluded.created_at
            "#,
        )
        .bind(chunk_id)
        .bind(&blob)
        .bind(model)
        .bind(vector.len() as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn chunks_missing_embeddings(&self, model: &str) -> Result<Vec<ChunkRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT c.chunk_id, c.article_id, c.text, c.filename, c.meta_json, c.hash
            FROM chunks c
            LEFT JOIN chunk_vectors v ON v.chunk_id = c.chunk_id
            WHERE v.chunk_id IS NULL OR v.model != ?
            ORDER BY c.chunk_id ASC
            "#,
        )
        .bind(model)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_chunk).collect())
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        top_k: usize,
        article_id: Option<&str>,
    ) -> Result<Vec<RetrievedChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.chunk_id, c.article_id, c.filename, c.text, v.embedding
            FROM chunk_vectors v
            JOIN chunks c ON c.chunk_id = v.chunk_id
            WHERE (? IS NULL OR c.article_id = ?)
            "#,
        )
        .bind(article_id)
        .bind(article_id)
        .fetch_all(&self.pool)
        .await?;

        let mut candidates: Vec<RetrievedChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64;
                RetrievedChunk {
                    chunk_id: row.get("chunk_id"),
                    article_id: row.get("article_id"),
                    filename: row.get("filename"),
                    text: row.get("text"),
                    score: similarity,
                }
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
        let Some(match_expr) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            r#"
            SELECT c.chunk_id, c.article_id, c.filename, c.text, chunks_fts.rank AS rank
            FROM chunks_fts
            JOIN chunks c ON c.chunk_id = chunks_fts.chunk_id
            WHERE chunks_fts MATCH ? AND (? IS NULL OR c.article_id = ?)
            ORDER BY rank, c.chunk_id
            LIMIT ?
            "#,
        )
        .bind(&match_expr)
        .bind(article_id)
        .bind(article_id)
        .bind(top_k as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut candidates: Vec<RetrievedChunk> = rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                RetrievedChunk {
                    chunk_id: row.get("chunk_id"),
                    article_id: row.get("article_id"),
                    filename: row.get("filename"),
                    text: row.get("text"),
                    score: -rank, // bm25 rank: lower is better
                }
            })
            .collect();

        candidates.sort_by(rank_order);
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, article: &str, text: &str) -> ChunkRecord {
        let mut meta = Map::new();
        meta.insert("chunk_id".to_string(), Value::String(id.to_string()));
        ChunkRecord {
            chunk_id: id.to_string(),
            article_id: article.to_string(),
            text: text.to_string(),
            filename: format!("{}.json", article),
            meta,
            hash: format!("h-{}", text),
        }
    }

    async fn open_temp(dir: &tempfile::TempDir) -> SqliteStore {
        let mut config = Config::minimal();
        config.db.path = dir.path().join("data").join("test.sqlite");
        SqliteStore::open(&config).await.unwrap()
    }

    #[test]
    fn test_fts_query_quotes_terms() {
        assert_eq!(
            fts_query("sample-size AND \"x\"").as_deref(),
            Some("\"sample\" OR \"size\" OR \"and\" OR \"x\"")
        );
        assert_eq!(fts_query("***"), None);
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_temp(&dir).await;
        store.close().await;
        let store = open_temp(&dir).await;
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_write_roundtrip_and_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_temp(&dir).await;
        store
            .write_chunks(&[chunk("a_0", "a", "alpha beta"), chunk("a_1", "a", "gamma")])
            .await
            .unwrap();
        store.update_embedding("a_0", &[1.0, 0.0], "hash").await.unwrap();
        store.update_embedding("a_1", &[0.0, 1.0], "hash").await.unwrap();
        assert!(store.chunks_missing_embeddings("hash").await.unwrap().is_empty());

        // Unchanged text keeps its vector, changed text loses it
        store
            .write_chunks(&[chunk("a_0", "a", "alpha beta"), chunk("a_1", "a", "delta")])
            .await
            .unwrap();
        let missing = store.chunks_missing_embeddings("hash").await.unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].chunk_id, "a_1");
        assert_eq!(missing[0].meta["chunk_id"], "a_1");
        assert_eq!(store.count().await.unwrap(), 2);

        let hits = store.keyword_search("gamma", 5, None).await.unwrap();
        assert!(hits.is_empty());

        store.clear().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_retain_drops_stale_chunks_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_temp(&dir).await;
        store
            .write_chunks(&[chunk("a_0", "a", "alpha"), chunk("b_0", "b", "beta")])
            .await
            .unwrap();
        store.update_embedding("a_0", &[1.0, 0.0], "m").await.unwrap();
        store.update_embedding("b_0", &[0.0, 1.0], "m").await.unwrap();

        let keep: HashSet<String> = ["a_0".to_string()].into_iter().collect();
        assert_eq!(store.retain_chunks(&keep).await.unwrap(), 1);
        // rewriting the kept chunk unchanged keeps its vector
        store.write_chunks(&[chunk("a_0", "a", "alpha")]).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.chunks_missing_embeddings("m").await.unwrap().is_empty());
        assert!(store.keyword_search("beta", 5, None).await.unwrap().is_empty());
        let hits = store.vector_search(&[0.0, 1.0], 5, None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a_0"]);
    }

    #[tokio::test]
    async fn test_vector_and_keyword_search() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_temp(&dir).await;
        store
            .write_chunks(&[
                chunk("a_0", "a", "randomised trial of aspirin"),
                chunk("b_0", "b", "observational cohort of statins"),
            ])
            .await
            .unwrap();
        store.update_embedding("a_0", &[1.0, 0.0], "m").await.unwrap();
        store.update_embedding("b_0", &[0.6, 0.8], "m").await.unwrap();

        let hits = store.vector_search(&[1.0, 0.0], 1, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "a_0");
        assert!((hits[0].score - 1.0).abs() < 1e-6);

        let hits = store.vector_search(&[1.0, 0.0], 5, Some("b")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].article_id, "b");

        let hits = store.keyword_search("statins cohort", 5, None).await.unwrap();
        assert_eq!(hits[0].chunk_id, "b_0");
        assert_eq!(hits[0].filename, "b.json");
        assert!(store
            .keyword_search("statins", 5, Some("a"))
            .await
            .unwrap()
            .is_empty());
    }
}
