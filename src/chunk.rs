//! Token-window text chunker.
//!
//! Splits an article's extracted text into [`ChunkRecord`]s of at most
//! `chunk_size` tokens, measured with the generator's tokenizer so every
//! chunk fits the context budget. Windows start at token 0 and advance by
//! `chunk_size`; the last window takes whatever remains.
//!
//! Chunk text is sliced from the original article text between the first
//! token's start and the last token's end, so whitespace and punctuation
//! inside a chunk are preserved verbatim. Each chunk receives the
//! deterministic id `"{article_id}_{counter}"` plus a SHA-256 hash of its
//! text.

use anyhow::{bail, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::corpus::CorpusEntry;
use crate::models::{ChunkRecord, ExtractedArticle};
use crate::progress::{ProgressEvent, ProgressReporter, Stage};
use crate::tokenize::TokenCounter;

/// Split one article into chunks of at most `chunk_size` tokens.
/// Returns chunks with contiguous counters starting at 0; an article with no
/// tokens yields no chunks.
pub fn chunk_article(
    article: &ExtractedArticle,
    filename: &str,
    tokenizer: &dyn TokenCounter,
    chunk_size: usize,
) -> Result<Vec<ChunkRecord>> {
    if chunk_size == 0 {
        bail!("chunk_size must be > 0");
    }

    let text = article.extracted_text.as_str();
    let spans = tokenizer.token_spans(text)?;

    let mut chunks = Vec::with_capacity(spans.len().div_ceil(chunk_size));
    for (counter, window) in spans.chunks(chunk_size).enumerate() {
        let start = window.iter().map(|s| s.start).min().unwrap_or(0);
        let end = window.iter().map(|s| s.end).max().unwrap_or(start);
        let piece = char_slice(text, start, end);
        chunks.push(make_chunk(article, filename, counter, piece));
    }

    Ok(chunks)
}

/// `text[start..end]` widened to the enclosing char boundaries. Byte-level
/// tokenizers may report offsets inside a multibyte character.
fn char_slice(text: &str, start: usize, end: usize) -> &str {
    let mut start = start.min(text.len());
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = end.clamp(start, text.len());
    while !text.is_char_boundary(end) {
        end += 1;
    }
    &text[start..end]
}

/// Chunk every article of the corpus, preserving corpus order.
///
/// Chunk ids must be unique across the corpus, so an `article_id` seen
/// earlier in the corpus is renamed to `{article_id}_{n}` with a warning.
pub fn chunk_corpus(
    entries: &[CorpusEntry],
    tokenizer: &dyn TokenCounter,
    chunk_size: usize,
    progress: &dyn ProgressReporter,
) -> Result<Vec<ChunkRecord>> {
    let total = entries.len() as u64;
    let article_ids = unique_article_ids(entries);
    let mut chunks = Vec::new();

    for (i, (entry, article_id)) in entries.iter().zip(&article_ids).enumerate() {
        let renamed;
        let article = if *article_id == entry.article.article_id {
            &entry.article
        } else {
            tracing::warn!(
                article_id = %entry.article.article_id,
                renamed = %article_id,
                path = %entry.path.display(),
                "duplicate article id"
            );
            renamed = ExtractedArticle {
                article_id: article_id.clone(),
                ..entry.article.clone()
            };
            &renamed
        };

        let filename = entry.filename();
        let article_chunks = chunk_article(article, &filename, tokenizer, chunk_size)?;
        if article_chunks.is_empty() {
            tracing::warn!(article_id = %article.article_id, "article has no text; no chunks");
        }
        chunks.extend(article_chunks);
        progress.report(ProgressEvent {
            stage: Stage::Chunk,
            n: i as u64 + 1,
            total,
        });
    }

    Ok(chunks)
}

/// One id per entry; repeats get the first free `_<n>` suffix that no other
/// article in the corpus uses.
fn unique_article_ids(entries: &[CorpusEntry]) -> Vec<String> {
    let original: HashSet<&str> = entries
        .iter()
        .map(|e| e.article.article_id.as_str())
        .collect();
    let mut used: HashSet<String> = HashSet::new();

    entries
        .iter()
        .map(|e| {
            let id = &e.article.article_id;
            if used.insert(id.clone()) {
                return id.clone();
            }
            let mut n = 1;
            loop {
                let candidate = format!("{}_{}", id, n);
                if !original.contains(candidate.as_str()) && used.insert(candidate.clone()) {
                    return candidate;
                }
                n += 1;
            }
        })
        .collect()
}

fn make_chunk(
    article: &ExtractedArticle,
    filename: &str,
    counter: usize,
    text: &str,
) -> ChunkRecord {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let chunk_id = format!("{}_{}", article.article_id, counter);

    let mut meta = article.metadata.clone();
    meta.insert("chunk_id".to_string(), Value::String(chunk_id.clone()));
    meta.insert("filename".to_string(), Value::String(filename.to_string()));

    ChunkRecord {
        chunk_id,
        article_id: article.article_id.clone(),
        text: text.to_string(),
        filename: filename.to_string(),
        meta,
        hash,
    }
}
