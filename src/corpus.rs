//! Loading the session corpus: one extracted-article JSON file per source.

use anyhow::{bail, Result};
use globset::Glob;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::models::ExtractedArticle;

/// An article together with the corpus file it was read from.
#[derive(Debug, Clone)]
pub struct CorpusEntry {
    pub path: PathBuf,
    pub article: ExtractedArticle,
}

impl CorpusEntry {
    /// Basename of the corpus file, e.g. `some_title.json`.
    pub fn filename(&self) -> String {
        let resolved = std::fs::canonicalize(&self.path).unwrap_or_else(|_| self.path.clone());
        resolved
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Read every `*.{extension}` file directly inside `src_dir`.
///
/// Files are returned sorted by path. Files that cannot be read or parsed
/// are skipped with a warning; an empty `article_id` is replaced by the
/// file stem.
pub fn scan_articles(src_dir: &Path, extension: &str) -> Result<Vec<CorpusEntry>> {
    if !src_dir.is_dir() {
        bail!("Corpus directory does not exist: {}", src_dir.display());
    }

    let matcher = Glob::new(&format!("*.{}", extension))?.compile_matcher();

    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(src_dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if matcher.is_match(entry.file_name()) {
            paths.push(entry.into_path());
        }
    }
    paths.sort();

    let mut entries = Vec::with_capacity(paths.len());
    for path in paths {
        match read_article(&path) {
            Ok(article) => entries.push(CorpusEntry { path, article }),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping corpus file"),
        }
    }

    Ok(entries)
}

/// Parse one article file, defaulting `article_id` to the file stem.
pub fn read_article(path: &Path) -> Result<ExtractedArticle> {
    let content = std::fs::read_to_string(path)?;
    let mut article: ExtractedArticle = serde_json::from_str(&content)?;
    if article.article_id.trim().is_empty() {
        article.article_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
    }
    Ok(article)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_scan_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("b.json"),
            r#"{"article_id": "b", "extracted_text": "beta"}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("a.json"),
            r#"{"article_id": "a", "extracted_text": "alpha"}"#,
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let entries = scan_articles(dir.path(), "json").unwrap();
        let ids: Vec<&str> = entries.iter().map(|e| e.article.article_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(entries[0].filename(), "a.json");
    }

    #[test]
    fn test_scan_skips_malformed_and_nested() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(
            dir.path().join("nested").join("deep.json"),
            r#"{"article_id": "deep", "extracted_text": "x"}"#,
        )
        .unwrap();
        fs::write(dir.path().join("ok.json"), r#"{"extracted_text": "x"}"#).unwrap();

        let entries = scan_articles(dir.path(), "json").unwrap();
        assert_eq!(entries.len(), 1);
        // Missing id falls back to the file stem
        assert_eq!(entries[0].article.article_id, "ok");
    }

    #[test]
    fn test_missing_dir_is_error() {
        assert!(scan_articles(Path::new("/nonexistent/corpus"), "json").is_err());
    }
}
