//! Core data models used throughout Rapid Review.
//!
//! These types represent the articles, chunks, and answers that flow
//! through the extract → chunk → retrieve → generate pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::budget::ContextPlan;

/// Text extracted from one source (a PDF, a DOCX, or a reference record).
///
/// Serialized as one JSON object per file in the corpus directory. Any keys
/// beyond `article_id` and `extracted_text` are kept in `metadata` and copied
/// onto every chunk cut from the article.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedArticle {
    #[serde(default, alias = "article id")]
    pub article_id: String,
    #[serde(default, alias = "extracted text")]
    pub extracted_text: String,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl ExtractedArticle {
    pub fn new(article_id: impl Into<String>, extracted_text: impl Into<String>) -> Self {
        Self {
            article_id: article_id.into(),
            extracted_text: extracted_text.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// A bounded slice of an article's text, as written to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// `"{article_id}_{counter}"`, counter starting at 0 per article.
    pub chunk_id: String,
    pub article_id: String,
    pub text: String,
    /// Basename of the corpus file the article was read from.
    pub filename: String,
    pub meta: Map<String, Value>,
    /// SHA-256 of `text`, lowercase hex.
    pub hash: String,
}

/// A chunk returned by the retriever, with its relevance score.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub article_id: String,
    pub filename: String,
    pub text: String,
    pub score: f64,
}

/// One generated answer.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub query: String,
    /// Chunks that were placed in the prompt, in prompt order.
    pub document_ids: Vec<String>,
    pub model: String,
}

/// Result of a single [`run_query`](crate::session::RapidReviewSession::run_query).
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutput {
    pub run_id: Uuid,
    pub query: String,
    pub plan: ContextPlan,
    pub retrieved: Vec<RetrievedChunk>,
    pub answers: Vec<Answer>,
}

impl QueryOutput {
    /// Query → answers, the shape callers of the session consume.
    pub fn answers_by_query(&self) -> Map<String, Value> {
        let answers = self
            .answers
            .iter()
            .map(|a| Value::String(a.answer.clone()))
            .collect();
        let mut out = Map::new();
        out.insert(self.query.clone(), Value::Array(answers));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_article_accepts_legacy_keys() {
        let json = r#"{"article id": "a1", "extracted text": "body", "year": 2021}"#;
        let article: ExtractedArticle = serde_json::from_str(json).unwrap();
        assert_eq!(article.article_id, "a1");
        assert_eq!(article.extracted_text, "body");
        assert_eq!(article.metadata.get("year"), Some(&Value::from(2021)));
    }

    #[test]
    fn test_article_metadata_is_flattened() {
        let article = ExtractedArticle::new("a1", "text").with_meta("title", "On Rust");
        let json = serde_json::to_value(&article).unwrap();
        assert_eq!(json["article_id"], "a1");
        assert_eq!(json["title"], "On Rust");
        assert!(json.get("metadata").is_none());
    }
}
