//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]** returns errors; used when dense retrieval is off.
//! - **[`HashProvider`]** feature-hashes words into a fixed number of
//!   dimensions. Fully offline and deterministic, used for tests and for
//!   corpora where keyword-like similarity is good enough.
//! - **[`OpenAIProvider`]** calls the OpenAI embeddings API with retry and backoff.
//! - **[`OllamaProvider`]** calls a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalProvider`** runs models in-process via fastembed
//!   (`--features local-embeddings`).
//!
//! Dense passage retrieval encodes passages and queries with separate models.
//! [`EmbeddingRole`] picks `retriever.passage_model` or `retriever.query_model`
//! (the latter falls back to the passage model).
//!
//! Also provides vector utilities for the SQLite store:
//! - [`cosine_similarity`] computes similarity between two vectors
//! - [`vec_to_blob`] encodes a `Vec<f32>` as little-endian bytes
//! - [`blob_to_vec`] decodes a BLOB back into a `Vec<f32>`
//!
//! The OpenAI and Ollama providers retry 429, 5xx and network errors with
//! exponential backoff (1s, 2s, ... capped at 32s) and fail fast on other 4xx.

use anyhow::{bail, Result};
use std::hash::Hasher;
use std::time::Duration;
use twox_hash::XxHash64;

use crate::config::RetrieverConfig;
use crate::http::send_with_retry;

/// Which encoder of a dual-encoder retriever to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingRole {
    Passage,
    Query,
}

impl EmbeddingRole {
    /// Model name for this role, if one is configured.
    pub fn model<'a>(&self, config: &'a RetrieverConfig) -> Option<&'a str> {
        match self {
            EmbeddingRole::Passage => config.passage_model.as_deref(),
            EmbeddingRole::Query => config
                .query_model
                .as_deref()
                .or(config.passage_model.as_deref()),
        }
    }
}

/// Trait for embedding providers.
///
/// The actual embedding computation is performed by [`embed_texts`],
/// which dispatches on the configured provider name.
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality.
    fn dims(&self) -> usize;
}

/// Embed a batch of texts using the configured provider.
///
/// Returns one vector per input text, in input order.
pub async fn embed_texts(
    config: &RetrieverConfig,
    role: EmbeddingRole,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let vectors = match config.provider.as_str() {
        "hash" => {
            let dims = config
                .dims
                .ok_or_else(|| anyhow::anyhow!("retriever.dims required for hash provider"))?;
            Ok(texts.iter().map(|t| hash_embedding(t, dims)).collect())
        }
        "openai" => embed_openai(config, role, texts).await,
        "ollama" => embed_ollama(config, role, texts).await,
        #[cfg(feature = "local-embeddings")]
        "local" => embed_local(config, role, texts).await,
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        "disabled" => bail!("Embedding provider is disabled"),
        other => bail!("Unknown embedding provider: {}", other),
    }?;

    if vectors.len() != texts.len() {
        bail!(
            "Embedding provider returned {} vectors for {} texts",
            vectors.len(),
            texts.len()
        );
    }
    Ok(vectors)
}

/// Embed a single query text with the query encoder.
pub async fn embed_query(config: &RetrieverConfig, text: &str) -> Result<Vec<f32>> {
    let results = embed_texts(config, EmbeddingRole::Query, &[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

// ============ Disabled Provider ============

/// A no-op embedding provider; any attempt to embed fails.
pub struct DisabledProvider;

impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
}

// ============ Hash Provider ============

/// Signed feature hashing over lowercase alphanumeric words.
pub struct HashProvider {
    dims: usize,
}

impl HashProvider {
    pub fn new(config: &RetrieverConfig) -> Result<Self> {
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("retriever.dims required for hash provider"))?;
        if dims == 0 {
            bail!("retriever.dims must be > 0");
        }
        Ok(Self { dims })
    }
}

impl EmbeddingProvider for HashProvider {
    fn model_name(&self) -> &str {
        "hash"
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

/// L2-normalised bag-of-words vector. Text without words maps to the zero vector.
pub fn hash_embedding(text: &str, dims: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dims];
    if dims == 0 {
        return v;
    }

    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(word.to_lowercase().as_bytes());
        let h = hasher.finish();
        let idx = (h % dims as u64) as usize;
        let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
        v[idx] += sign;
    }

    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls `POST /v1/embeddings`. Requires the `OPENAI_API_KEY` environment
/// variable.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
}

impl OpenAIProvider {
    pub fn new(config: &RetrieverConfig) -> Result<Self> {
        let model = config
            .passage_model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("retriever.passage_model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("retriever.dims required for OpenAI provider"))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        Ok(Self { model, dims })
    }
}

impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

async fn embed_openai(
    config: &RetrieverConfig,
    role: EmbeddingRole,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let api_key =
        std::env::var("OPENAI_API_KEY").map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

    let model = role
        .model(config)
        .ok_or_else(|| anyhow::anyhow!("retriever.passage_model required"))?;
    let url = config.url.as_deref().unwrap_or("https://api.openai.com");

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let request = || {
        client
            .post(format!("{}/v1/embeddings", url))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
    };
    let json = send_with_retry(request, config.max_retries, "OpenAI").await?;
    parse_openai_response(&json)
}

/// Extracts `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());

    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance (default
/// `http://localhost:11434`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
}

impl OllamaProvider {
    pub fn new(config: &RetrieverConfig) -> Result<Self> {
        let model = config
            .passage_model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("retriever.passage_model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("retriever.dims required for Ollama provider"))?;

        Ok(Self { model, dims })
    }
}

impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

async fn embed_ollama(
    config: &RetrieverConfig,
    role: EmbeddingRole,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let model = role
        .model(config)
        .ok_or_else(|| anyhow::anyhow!("retriever.passage_model required"))?;

    let url = config.url.as_deref().unwrap_or("http://localhost:11434");

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let request = || client.post(format!("{}/api/embed", url)).json(&body);
    let json = send_with_retry(request, config.max_retries, "Ollama").await?;
    parse_ollama_response(&json)
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());

    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }

    Ok(result)
}

// ============ Local Provider (fastembed) ============

/// In-process embeddings; models are downloaded from Hugging Face on first
/// use and cached.
#[cfg(feature = "local-embeddings")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
}

#[cfg(feature = "local-embeddings")]
impl LocalProvider {
    pub fn new(config: &RetrieverConfig) -> Result<Self> {
        let model_name = EmbeddingRole::Passage
            .model(config)
            .unwrap_or("all-minilm-l6-v2")
            .to_string();
        let dims = config.dims.unwrap_or(match model_name.as_str() {
            "bge-base-en-v1.5" | "nomic-embed-text-v1.5" => 768,
            "bge-large-en-v1.5" => 1024,
            _ => 384,
        });
        Ok(Self { model_name, dims })
    }
}

#[cfg(feature = "local-embeddings")]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

#[cfg(feature = "local-embeddings")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5",
            other
        ),
    }
}

#[cfg(feature = "local-embeddings")]
async fn embed_local(
    config: &RetrieverConfig,
    role: EmbeddingRole,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let model_name = role.model(config).unwrap_or("all-minilm-l6-v2");
    let fastembed_model = config_to_fastembed_model(model_name)?;
    let batch_size = config.batch_size;
    let texts = texts.to_vec();

    tokio::task::spawn_blocking(move || {
        let mut model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;

        model
            .embed(texts, Some(batch_size))
            .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
    })
    .await?
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"hash"` | [`HashProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"local"` | `LocalProvider` (requires `local-embeddings`) |
pub fn create_provider(config: &RetrieverConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "hash" => Ok(Box::new(HashProvider::new(config)?)),
        "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Box::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Box::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector. Trailing partial values are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, zero vectors, or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_config(dims: usize) -> RetrieverConfig {
        RetrieverConfig {
            provider: "hash".to_string(),
            dims: Some(dims),
            ..Default::default()
        }
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_hash_embedding_normalised_and_deterministic() {
        let a = hash_embedding("Retrieval augmented generation", 64);
        let b = hash_embedding("retrieval AUGMENTED generation!", 64);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_embedding_empty_text_is_zero() {
        assert!(hash_embedding("  --  ", 16).iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_hash_embedding_similarity_tracks_overlap() {
        let q = hash_embedding("sample size of the trial", 256);
        let near = hash_embedding("the trial enrolled a sample size of 120", 256);
        let far = hash_embedding("funding came from a national grant", 256);
        assert!(cosine_similarity(&q, &near) > cosine_similarity(&q, &far));
    }

    #[test]
    fn test_role_model_fallback() {
        let mut config = hash_config(8);
        config.passage_model = Some("ctx-encoder".to_string());
        assert_eq!(EmbeddingRole::Query.model(&config), Some("ctx-encoder"));
        config.query_model = Some("question-encoder".to_string());
        assert_eq!(EmbeddingRole::Query.model(&config), Some("question-encoder"));
        assert_eq!(EmbeddingRole::Passage.model(&config), Some("ctx-encoder"));
    }

    #[test]
    fn test_create_provider() {
        let p = create_provider(&hash_config(32)).unwrap();
        assert_eq!(p.model_name(), "hash");
        assert_eq!(p.dims(), 32);
        assert_eq!(
            create_provider(&RetrieverConfig::default()).unwrap().model_name(),
            "disabled"
        );
        let mut bad = RetrieverConfig::default();
        bad.provider = "magic".to_string();
        assert!(create_provider(&bad).is_err());
    }

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vecs = parse_openai_response(&json).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({"embeddings": [[0.5, 0.5]]});
        assert_eq!(parse_ollama_response(&json).unwrap(), vec![vec![0.5, 0.5]]);
        assert!(parse_ollama_response(&serde_json::json!({})).is_err());
    }

    #[tokio::test]
    async fn test_embed_texts_disabled_errors() {
        let err = embed_texts(
            &RetrieverConfig::default(),
            EmbeddingRole::Passage,
            &["x".to_string()],
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    #[tokio::test]
    async fn test_embed_query_hash() {
        let v = embed_query(&hash_config(16), "a query").await.unwrap();
        assert_eq!(v.len(), 16);
    }

    #[tokio::test]
    async fn test_unreachable_ollama_uses_shared_retry() {
        let config = RetrieverConfig {
            provider: "ollama".to_string(),
            passage_model: Some("nomic-embed-text".to_string()),
            dims: Some(768),
            url: Some("http://127.0.0.1:9".to_string()),
            max_retries: 0,
            timeout_secs: 2,
            ..Default::default()
        };
        let err = embed_texts(&config, EmbeddingRole::Passage, &["x".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Ollama connection error"));
    }
}
