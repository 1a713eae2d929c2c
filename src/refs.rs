//! Reference-manager metadata export.
//!
//! Reads a Zotero CSV export or a CSL-JSON export and turns each reference
//! into an [`ExtractedArticle`] whose text is the title and abstract, so
//! metadata-only corpora can be queried the same way as extracted PDFs.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use thiserror::Error;

use crate::extract::sanitize_file_stem;
use crate::models::ExtractedArticle;

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("cannot infer reference format from '{0}'; use csv or json")]
    UnknownFormat(String),
    #[error("CSV export is missing the '{0}' column")]
    MissingColumn(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceFormat {
    ZoteroCsv,
    CslJson,
}

impl ReferenceFormat {
    pub fn from_path(path: &Path) -> Result<Self, ReferenceError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        Self::parse(&ext).map_err(|_| ReferenceError::UnknownFormat(path.display().to_string()))
    }

    pub fn parse(name: &str) -> Result<Self, ReferenceError> {
        match name {
            "csv" | "zotero" => Ok(Self::ZoteroCsv),
            "json" | "csl" | "csl-json" => Ok(Self::CslJson),
            other => Err(ReferenceError::UnknownFormat(other.to_string())),
        }
    }
}

/// One bibliographic record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceRecord {
    pub key: String,
    pub title: String,
    pub abstract_note: String,
    pub authors: Vec<String>,
    pub year: Option<String>,
    pub doi: Option<String>,
    pub url: Option<String>,
    pub attachments: Vec<String>,
}

impl ReferenceRecord {
    /// Whether the record carries a title or an abstract.
    pub fn has_text(&self) -> bool {
        !self.title.trim().is_empty() || !self.abstract_note.trim().is_empty()
    }

    /// `None` when the record has neither title nor abstract.
    pub fn to_article(&self) -> Option<ExtractedArticle> {
        let text = match (self.title.trim(), self.abstract_note.trim()) {
            ("", "") => return None,
            (t, "") => t.to_string(),
            ("", a) => a.to_string(),
            (t, a) => format!("{}\n\n{}", t, a),
        };

        let mut article = ExtractedArticle::new(self.key.clone(), text)
            .with_meta("title", self.title.clone())
            .with_meta("authors", self.authors.clone());
        if let Some(year) = &self.year {
            article = article.with_meta("year", year.clone());
        }
        if let Some(doi) = &self.doi {
            article = article.with_meta("doi", doi.clone());
        }
        if let Some(url) = &self.url {
            article = article.with_meta("url", url.clone());
        }
        if !self.attachments.is_empty() {
            article = article.with_meta("attachments", self.attachments.clone());
        }
        Some(article)
    }
}

pub fn read_references(path: &Path, format: ReferenceFormat) -> Result<Vec<ReferenceRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read reference export {}", path.display()))?;
    match format {
        ReferenceFormat::ZoteroCsv => parse_zotero_csv(&content),
        ReferenceFormat::CslJson => parse_csl_json(&content),
    }
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    (!t.is_empty()).then(|| t.to_string())
}

fn split_list(s: &str) -> Vec<String> {
    s.split(';').filter_map(non_empty).collect()
}

fn parse_zotero_csv(content: &str) -> Result<Vec<ReferenceRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(content.as_bytes());
    let headers = reader.headers()?.clone();
    let col = |name: &str| headers.iter().position(|h| h.trim_start_matches('\u{feff}') == name);

    let key_col = col("Key").ok_or(ReferenceError::MissingColumn("Key"))?;
    let title_col = col("Title").ok_or(ReferenceError::MissingColumn("Title"))?;
    let abstract_col = col("Abstract Note");
    let author_col = col("Author");
    let year_col = col("Publication Year");
    let doi_col = col("DOI");
    let url_col = col("Url");
    let files_col = col("File Attachments");

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let get = |i: Option<usize>| i.and_then(|i| row.get(i)).unwrap_or("");
        records.push(ReferenceRecord {
            key: get(Some(key_col)).trim().to_string(),
            title: get(Some(title_col)).trim().to_string(),
            abstract_note: get(abstract_col).trim().to_string(),
            authors: split_list(get(author_col)),
            year: non_empty(get(year_col)),
            doi: non_empty(get(doi_col)),
            url: non_empty(get(url_col)),
            attachments: split_list(get(files_col)),
        });
    }
    Ok(records)
}

#[derive(Debug, Deserialize)]
struct CslItem {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, rename = "abstract")]
    abstract_note: Option<String>,
    #[serde(default)]
    author: Vec<CslName>,
    #[serde(default)]
    issued: Option<CslDate>,
    #[serde(default, rename = "DOI")]
    doi: Option<String>,
    #[serde(default, rename = "URL")]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CslName {
    #[serde(default)]
    family: Option<String>,
    #[serde(default)]
    given: Option<String>,
    #[serde(default)]
    literal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CslDate {
    #[serde(default, rename = "date-parts")]
    date_parts: Vec<Vec<Value>>,
}

fn parse_csl_json(content: &str) -> Result<Vec<ReferenceRecord>> {
    let items: Vec<CslItem> =
        serde_json::from_str(content).context("Failed to parse CSL-JSON export")?;

    Ok(items
        .into_iter()
        .map(|item| {
            let key = match &item.id {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            let authors = item
                .author
                .iter()
                .filter_map(|n| match (&n.family, &n.given, &n.literal) {
                    (Some(f), Some(g), _) => Some(format!("{}, {}", f, g)),
                    (Some(f), None, _) => Some(f.clone()),
                    (None, _, Some(l)) => Some(l.clone()),
                    _ => None,
                })
                .collect();
            let year = item
                .issued
                .as_ref()
                .and_then(|d| d.date_parts.first())
                .and_then(|parts| parts.first())
                .map(|y| match y {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
            ReferenceRecord {
                key,
                title: item.title.unwrap_or_default(),
                abstract_note: item.abstract_note.unwrap_or_default(),
                authors,
                year,
                doi: item.doi,
                url: item.url,
                attachments: Vec::new(),
            }
        })
        .collect())
}

/// Convert references to articles. Records without text are skipped; records
/// without a key get a positional id `ref_<n>`.
pub fn references_to_articles(records: &[ReferenceRecord]) -> Vec<ExtractedArticle> {
    records
        .iter()
        .enumerate()
        .filter_map(|(i, r)| {
            let mut article = r.to_article()?;
            if article.article_id.is_empty() {
                article.article_id = format!("ref_{}", i);
            }
            Some(article)
        })
        .collect()
}

/// Write each article to `dest_dir/<article_id>.json`. Returns the count.
pub fn write_articles(articles: &[ExtractedArticle], dest_dir: &Path) -> Result<usize> {
    std::fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create {}", dest_dir.display()))?;
    for article in articles {
        let dest = dest_dir.join(format!("{}.json", sanitize_file_stem(&article.article_id)));
        std::fs::write(&dest, serde_json::to_string_pretty(article)?)
            .with_context(|| format!("Failed to write {}", dest.display()))?;
    }
    Ok(articles.len())
}
