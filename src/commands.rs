//! Implementations of the `rrc` subcommands.
//!
//! Each `run_*` function performs one command and prints a human-readable
//! report to stdout. Progress and logs go to stderr.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::corpus::scan_articles;
use crate::extract::{sample_paths, PdfExtractor};
use crate::models::{QueryOutput, RetrievedChunk};
use crate::progress::ProgressReporter;
use crate::refs::{read_references, references_to_articles, write_articles, ReferenceFormat};
use crate::session::{QueryParams, RapidReviewSession};
use crate::store::{InMemoryStore, SqliteStore};

const EXCERPT_CHARS: usize = 240;

pub async fn run_init(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    store.close().await;
    println!("Database initialized successfully.");
    Ok(())
}

/// Options for `rrc extract` when file paths come from a metadata CSV.
#[derive(Debug, Clone, Default)]
pub struct MetadataSource {
    pub path: PathBuf,
    pub paths_col: Option<String>,
    pub id_col: Option<String>,
}

pub fn run_extract(
    config: &Config,
    src_dir: &Path,
    out_dir: &Path,
    metadata: Option<MetadataSource>,
    include_meta: bool,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    let mut extractor = PdfExtractor::new(src_dir, config.extraction.clone())?;
    if let Some(meta) = metadata {
        extractor = extractor.with_metadata(meta.path, meta.paths_col, meta.id_col);
    }

    let summary = extractor.mass_extract(include_meta, progress)?;
    let written = extractor.persist(out_dir)?;

    println!("Extraction complete: {}", src_dir.display());
    println!("  extracted: {}", summary.extracted);
    println!("  failed: {}", summary.failed);
    println!("  skipped (too large): {}", summary.skipped_too_large);
    println!("  written: {} → {}", written, out_dir.display());
    Ok(())
}

pub fn run_refs(path: &Path, out_dir: &Path, format: Option<&str>) -> Result<()> {
    let format = match format {
        Some(name) => ReferenceFormat::parse(name)?,
        None => ReferenceFormat::from_path(path)?,
    };
    let records = read_references(path, format)?;
    let articles = references_to_articles(&records);
    let skipped = records.iter().filter(|r| !r.has_text()).count();
    let written = write_articles(&articles, out_dir)?;

    println!("References: {}", path.display());
    println!("  records: {}", records.len());
    println!("  skipped (no title or abstract): {}", skipped);
    println!("  written: {} → {}", written, out_dir.display());
    Ok(())
}

pub fn run_sample(dir: &Path, extension: &str, n: usize) -> Result<()> {
    let entries = scan_articles(dir, extension)?;
    let chosen = sample_paths(entries.iter().map(|e| e.path.clone()).collect(), n);

    if chosen.is_empty() {
        println!("No articles.");
        return Ok(());
    }

    for path in &chosen {
        if let Some(entry) = entries.iter().find(|e| &e.path == path) {
            println!("{} ({})", entry.article.article_id, entry.filename());
            println!("    excerpt: \"{}\"", excerpt(&entry.article.extracted_text));
        }
    }
    Ok(())
}

async fn open_session(
    config: &Config,
    progress: Box<dyn ProgressReporter>,
) -> Result<RapidReviewSession> {
    let store = SqliteStore::open(config).await?;
    Ok(RapidReviewSession::new(config.clone(), Box::new(store))?.with_progress(progress))
}

pub fn run_plan(config: &Config, prompt: &str, query: &str, top_k: Option<usize>) -> Result<()> {
    let session = RapidReviewSession::new(config.clone(), Box::new(InMemoryStore::new()))?;
    let top_k = top_k.unwrap_or(config.retriever.top_k);
    let plan = session.plan(prompt, query, top_k)?;

    println!("Context plan");
    println!("  prompt tokens: {}", plan.prompt_tokens);
    println!("  query tokens: {}", plan.query_tokens);
    println!("  context size: {}", plan.context_size);
    println!("  top_k: {}", plan.top_k);
    println!("  chunk size: {}", plan.chunk_size);
    Ok(())
}

pub async fn run_retrieve(
    config: &Config,
    prompt: &str,
    query: &str,
    params: &QueryParams,
    article_id: Option<&str>,
    progress: Box<dyn ProgressReporter>,
) -> Result<()> {
    let session = open_session(config, progress).await?;
    let output = session
        .retrieve_only(prompt, query, article_id, params)
        .await?;
    print_retrieved(&output.retrieved);
    Ok(())
}

pub async fn run_ask(
    config: &Config,
    prompt: &str,
    query: &str,
    params: &QueryParams,
    article_id: Option<&str>,
    json: bool,
    progress: Box<dyn ProgressReporter>,
) -> Result<()> {
    let session = open_session(config, progress).await?;
    let output = session.run_query(prompt, query, article_id, params).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("Failed to serialize output")?
        );
    } else {
        print_answer(&output);
    }
    Ok(())
}

fn print_retrieved(results: &[RetrievedChunk]) {
    if results.is_empty() {
        println!("No results.");
        return;
    }
    for (i, r) in results.iter().enumerate() {
        println!("{}. [{:.2}] {} / {}", i + 1, r.score, r.article_id, r.filename);
        println!("    chunk: {}", r.chunk_id);
        println!("    excerpt: \"{}\"", excerpt(&r.text));
        println!();
    }
}

fn print_answer(output: &QueryOutput) {
    println!("Q: {}", output.query);
    for answer in &output.answers {
        println!("A: {}", answer.answer);
        println!("   model: {}", answer.model);
    }
    println!();
    println!("Sources:");
    print_retrieved(&output.retrieved);
}

fn excerpt(text: &str) -> String {
    let flat = text.replace('\n', " ");
    let trimmed = flat.trim();
    if trimmed.chars().count() > EXCERPT_CHARS {
        format!("{}...", trimmed.chars().take(EXCERPT_CHARS).collect::<String>())
    } else {
        trimmed.to_string()
    }
}
