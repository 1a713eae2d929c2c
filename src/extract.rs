//! Text extraction from PDFs (and DOCX attachments) into corpus articles.
//!
//! Two layers:
//!
//! - [`extract_text`] turns bytes + content-type into plain UTF-8 text.
//!   Failures are returned as [`ExtractError`], never panics, so a batch run
//!   can skip the offending file.
//! - [`PdfExtractor`] walks a source directory (or the paths column of a
//!   reference-manager CSV), extracts every file into a temporary staging
//!   directory as `<article_id>.json`, and offers sampling, batching, and
//!   persisting of the staged articles.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rand::seq::SliceRandom;
use serde_json::{Map, Value};
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::ExtractionConfig;
use crate::corpus::read_article;
use crate::models::ExtractedArticle;
use crate::progress::{ProgressEvent, ProgressReporter, Stage};

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_TEXT: &str = "text/plain";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
}

/// Content type for a file, from its extension.
pub fn content_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    match ext.as_str() {
        "pdf" => Some(MIME_PDF),
        "docx" => Some(MIME_DOCX),
        "txt" | "md" => Some(MIME_TEXT),
        _ => None,
    }
}

/// Extracts plain text from binary content.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => extract_docx(bytes),
        MIME_TEXT => Ok(String::from_utf8_lossy(bytes).into_owned()),
        _ => Err(ExtractError::UnsupportedContentType(
            content_type.to_string(),
        )),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract panics on some malformed documents
    std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
        .map_err(|_| ExtractError::Pdf("parser panicked".to_string()))?
        .map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    extract_paragraph_text(&doc_xml)
}

/// Collect `<w:t>` runs, one line per `<w:p>` paragraph.
fn extract_paragraph_text(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

/// Normalise extracted text before it enters the corpus.
///
/// Line endings become `\n`, words hyphenated across a line break are
/// re-joined, and runs of blank lines collapse to one. With
/// `filter_tables`, lines that look like table rows are dropped.
pub fn clean_text(text: &str, filter_tables: bool) -> String {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<String> = Vec::new();

    for raw in normalized.lines() {
        let line = raw.trim_end();
        if filter_tables && looks_like_table_row(line) {
            continue;
        }
        if let Some(prev) = lines.last_mut() {
            if ends_with_hyphenated_word(prev) && line.starts_with(char::is_lowercase) {
                prev.pop();
                prev.push_str(line);
                continue;
            }
        }
        lines.push(line.to_string());
    }

    let mut out = String::with_capacity(normalized.len());
    let mut blank_run = true; // drops leading blank lines
    for line in lines {
        if line.trim().is_empty() {
            if !blank_run {
                out.push('\n');
            }
            blank_run = true;
            continue;
        }
        if !out.is_empty() && !out.ends_with("\n\n") {
            out.push('\n');
        }
        out.push_str(&line);
        blank_run = false;
    }
    out.trim_end().to_string()
}

fn ends_with_hyphenated_word(line: &str) -> bool {
    let mut rev = line.chars().rev();
    matches!((rev.next(), rev.next()), (Some('-'), Some(c)) if c.is_alphabetic())
}

/// Three or more fields, more than half of them numeric.
fn looks_like_table_row(line: &str) -> bool {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 3 {
        return false;
    }
    let numeric = fields
        .iter()
        .filter(|f| {
            let core = f.trim_matches(|c: char| matches!(c, '%' | '(' | ')' | ',' | ';' | '±'));
            !core.is_empty() && core.replace(',', "").parse::<f64>().is_ok()
        })
        .count();
    numeric * 2 > fields.len()
}

/// A file to extract, plus the metadata row it came from (if any).
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub row: Option<Map<String, Value>>,
}

/// Counts from [`PdfExtractor::mass_extract`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub extracted: u64,
    pub failed: u64,
    pub skipped_too_large: u64,
}

/// Batch extractor over a directory of PDFs or a reference-manager export.
pub struct PdfExtractor {
    src_dir: PathBuf,
    metadata_path: Option<PathBuf>,
    paths_col: Option<String>,
    id_col: Option<String>,
    options: ExtractionConfig,
    staging: tempfile::TempDir,
}

impl PdfExtractor {
    pub fn new(src_dir: impl Into<PathBuf>, options: ExtractionConfig) -> Result<Self> {
        let staging = tempfile::Builder::new()
            .prefix("rrc-extract-")
            .tempdir()
            .context("Failed to create staging directory")?;
        Ok(Self {
            src_dir: src_dir.into(),
            metadata_path: None,
            paths_col: None,
            id_col: None,
            options,
            staging,
        })
    }

    /// Read file paths (and optionally article ids) from a metadata CSV.
    pub fn with_metadata(
        mut self,
        metadata_path: impl Into<PathBuf>,
        paths_col: Option<String>,
        id_col: Option<String>,
    ) -> Self {
        self.metadata_path = Some(metadata_path.into());
        self.paths_col = paths_col;
        self.id_col = id_col;
        self
    }

    pub fn staging_dir(&self) -> &Path {
        self.staging.path()
    }

    /// Files to extract.
    ///
    /// With a metadata CSV and a paths column, each row's path is used
    /// (relative paths are joined to `src_dir`; for `;`-separated attachment
    /// lists the first PDF or DOCX wins). Otherwise every supported file
    /// under `src_dir`, sorted.
    pub fn paths(&self) -> Result<Vec<SourceFile>> {
        match (&self.metadata_path, &self.paths_col) {
            (Some(metadata_path), Some(paths_col)) => {
                let rows = read_metadata_rows(metadata_path)?;
                let mut files = Vec::new();
                for row in rows {
                    let cell = row.get(paths_col).and_then(|v| v.as_str()).unwrap_or("");
                    match pick_attachment(cell) {
                        Some(p) => files.push(SourceFile {
                            path: self.resolve(p),
                            row: Some(row),
                        }),
                        None => tracing::warn!(column = %paths_col, "metadata row has no usable path"),
                    }
                }
                Ok(files)
            }
            (Some(_), None) => bail!("paths_col must be set when a metadata file is given"),
            _ => {
                if !self.src_dir.is_dir() {
                    bail!("Source directory does not exist: {}", self.src_dir.display());
                }
                let mut files: Vec<SourceFile> = WalkDir::new(&self.src_dir)
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file())
                    .filter(|e| {
                        matches!(content_type_for(e.path()), Some(MIME_PDF) | Some(MIME_DOCX))
                    })
                    .map(|e| SourceFile {
                        path: e.into_path(),
                        row: None,
                    })
                    .collect();
                files.sort_by(|a, b| a.path.cmp(&b.path));
                Ok(files)
            }
        }
    }

    fn resolve(&self, p: &str) -> PathBuf {
        let path = PathBuf::from(p);
        if path.is_absolute() {
            path
        } else {
            self.src_dir.join(path)
        }
    }

    /// Extract one file into an article.
    pub fn extract(&self, source: &SourceFile) -> Result<ExtractedArticle> {
        let path = &source.path;
        let content_type = content_type_for(path)
            .ok_or_else(|| ExtractError::UnsupportedContentType(path.display().to_string()))?;
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let text = extract_text(&bytes, content_type)?;

        let article_id = self
            .id_col
            .as_ref()
            .and_then(|col| source.row.as_ref()?.get(col)?.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| file_stem(path));

        Ok(
            ExtractedArticle::new(article_id, clean_text(&text, self.options.filter_tables))
                .with_meta("source_path", path.display().to_string())
                .with_meta("content_type", content_type)
                .with_meta("extracted_at", Utc::now().to_rfc3339()),
        )
    }

    /// Extract every path into the staging directory.
    ///
    /// With `include_meta`, the metadata row's columns are merged into each
    /// article (existing keys are not overwritten). Files that fail to
    /// extract are logged and counted, not fatal.
    pub fn mass_extract(
        &self,
        include_meta: bool,
        progress: &dyn ProgressReporter,
    ) -> Result<ExtractSummary> {
        let sources = self.paths()?;
        let total = sources.len() as u64;
        let mut summary = ExtractSummary::default();

        for (i, source) in sources.iter().enumerate() {
            progress.report(ProgressEvent {
                stage: Stage::Extract,
                n: i as u64 + 1,
                total,
            });

            let size = std::fs::metadata(&source.path).map(|m| m.len()).unwrap_or(0);
            if size > self.options.max_file_bytes {
                tracing::warn!(path = %source.path.display(), size, "file exceeds max_file_bytes; skipped");
                summary.skipped_too_large += 1;
                continue;
            }

            let mut article = match self.extract(source) {
                Ok(a) => a,
                Err(e) => {
                    tracing::warn!(path = %source.path.display(), error = %e, "extraction failed; skipped");
                    summary.failed += 1;
                    continue;
                }
            };

            if include_meta {
                if let Some(row) = &source.row {
                    for (k, v) in row {
                        article.metadata.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                }
            }

            self.stage(&mut article)?;
            summary.extracted += 1;
        }

        Ok(summary)
    }

    /// Write `article` into staging. A repeated id gets a `_<n>` suffix on
    /// both the file name and the id itself.
    fn stage(&self, article: &mut ExtractedArticle) -> Result<PathBuf> {
        let base_id = article.article_id.clone();
        let stem = sanitize_file_stem(&base_id);
        let mut dest = self.staging.path().join(format!("{}.json", stem));
        let mut n = 1;
        while dest.exists() {
            dest = self.staging.path().join(format!("{}_{}.json", stem, n));
            article.article_id = format!("{}_{}", base_id, n);
            n += 1;
        }
        if article.article_id != base_id {
            tracing::warn!(article_id = %base_id, renamed = %article.article_id, "duplicate article id in staging");
        }
        std::fs::write(&dest, serde_json::to_string_pretty(article)?)?;
        Ok(dest)
    }

    /// Staged article files, sorted.
    pub fn staged_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(self.staging.path())?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Load staged articles: the given `paths` (relative paths resolve inside
    /// the staging directory), or `sample_size` chosen at random.
    pub fn load_sample(
        &self,
        paths: Option<&[PathBuf]>,
        sample_size: usize,
    ) -> Result<Vec<ExtractedArticle>> {
        let chosen: Vec<PathBuf> = match paths {
            Some(paths) => paths
                .iter()
                .map(|p| {
                    if p.is_absolute() {
                        p.clone()
                    } else {
                        self.staging.path().join(p)
                    }
                })
                .collect(),
            None => sample_paths(self.staged_paths()?, sample_size),
        };
        chosen.iter().map(|p| read_article(p)).collect()
    }

    /// Iterate staged articles in batches of `batch_size`.
    pub fn extract_batches(
        &self,
        batch_size: usize,
    ) -> Result<impl Iterator<Item = Result<Vec<ExtractedArticle>>>> {
        if batch_size == 0 {
            bail!("batch_size must be > 0");
        }
        let batches: Vec<Vec<PathBuf>> = self
            .staged_paths()?
            .chunks(batch_size)
            .map(|c| c.to_vec())
            .collect();
        Ok(batches
            .into_iter()
            .map(|batch| batch.iter().map(|p| read_article(p)).collect()))
    }

    /// Copy every staged article into `dest_dir`. Returns the number copied.
    pub fn persist(&self, dest_dir: &Path) -> Result<usize> {
        std::fs::create_dir_all(dest_dir)
            .with_context(|| format!("Failed to create {}", dest_dir.display()))?;
        let staged = self.staged_paths()?;
        for path in &staged {
            if let Some(name) = path.file_name() {
                std::fs::copy(path, dest_dir.join(name))?;
            }
        }
        Ok(staged.len())
    }
}

/// Choose up to `n` paths at random.
pub fn sample_paths(mut paths: Vec<PathBuf>, n: usize) -> Vec<PathBuf> {
    let mut rng = rand::thread_rng();
    paths.shuffle(&mut rng);
    paths.truncate(n);
    paths
}

fn read_metadata_rows(path: &Path) -> Result<Vec<Map<String, Value>>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open metadata file {}", path.display()))?;
    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: Map<String, Value> = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.to_string(), Value::String(v.to_string())))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

/// First PDF/DOCX in a `;`-separated attachment list, else the first entry.
fn pick_attachment(cell: &str) -> Option<&str> {
    let entries: Vec<&str> = cell
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    entries
        .iter()
        .copied()
        .find(|e| matches!(content_type_for(Path::new(e)), Some(MIME_PDF) | Some(MIME_DOCX)))
        .or_else(|| entries.first().copied())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

pub(crate) fn sanitize_file_stem(id: &str) -> String {
    let s: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if s.is_empty() {
        "article".to_string()
    } else {
        s
    }
}
