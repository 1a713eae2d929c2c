//! Prompt templates and answer parsing.
//!
//! A template is plain text with two placeholders: `{query}` and
//! `{documents}` (`{join(documents)}` is accepted as an alias). Retrieved
//! chunks are rendered as numbered `Document [n]: text` lines.

use crate::models::{Answer, RetrievedChunk};

const QUERY: &str = "{query}";
const DOCUMENTS: &str = "{documents}";
const JOIN_DOCUMENTS: &str = "{join(documents)}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    text: String,
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into().replace(JOIN_DOCUMENTS, DOCUMENTS),
        }
    }

    pub fn has_documents_placeholder(&self) -> bool {
        self.text.contains(DOCUMENTS)
    }

    /// Template text with placeholders removed; this is what the context
    /// budget counts as prompt tokens.
    pub fn static_text(&self) -> String {
        self.text.replace(QUERY, "").replace(DOCUMENTS, "")
    }

    pub fn render(&self, query: &str, chunks: &[RetrievedChunk]) -> String {
        let documents = format_documents(chunks);
        if self.has_documents_placeholder() {
            self.text
                .replace(QUERY, query)
                .replace(DOCUMENTS, &documents)
        } else if documents.is_empty() {
            self.text.replace(QUERY, query)
        } else {
            format!("{}\n\n{}", documents, self.text.replace(QUERY, query))
        }
    }
}

fn format_documents(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, c)| format!("Document [{}]: {}", i + 1, c.text.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Turns raw generator output into an [`Answer`].
pub struct AnswerParser;

impl AnswerParser {
    pub fn parse(raw: &str, query: &str, chunk_ids: &[String], model: &str) -> Answer {
        let trimmed = raw.trim();
        let answer = match trimmed.get(..7) {
            Some(label) if label.eq_ignore_ascii_case("answer:") => trimmed[7..].trim_start(),
            _ => trimmed,
        };
        Answer {
            answer: answer.to_string(),
            query: query.to_string(),
            document_ids: chunk_ids.to_vec(),
            model: model.to_string(),
        }
    }
}
