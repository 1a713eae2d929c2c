//! Token counting for context budgets and chunk slicing.
//!
//! The budget arithmetic and the chunker only need two things from a
//! tokenizer: how many tokens a string costs, and where each token sits in
//! the original text. [`TokenCounter`] exposes both as byte spans so chunk
//! text can be sliced from the source instead of being decoded back from
//! token ids.
//!
//! | Kind | Implementation |
//! |------|----------------|
//! | `"approx"` | [`ApproxTokenizer`]: word pieces of at most 4 chars |
//! | `"huggingface"` | [`HfTokenizer`]: a `tokenizer.json` loaded with `tokenizers` |

use anyhow::{bail, Context, Result};
use std::ops::Range;
use std::path::Path;

use crate::config::TokenizerConfig;

/// Approximate chars-per-token ratio for the built-in tokenizer.
const CHARS_PER_TOKEN: usize = 4;

/// Fallback when neither config nor `tokenizer_config.json` names a limit.
const DEFAULT_MODEL_MAX_LENGTH: usize = 512;

pub trait TokenCounter: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Maximum input length of the model this tokenizer belongs to.
    fn model_max_length(&self) -> usize;

    /// Byte spans of every token in `text`, in order. Special tokens are not
    /// included.
    fn token_spans(&self, text: &str) -> Result<Vec<Range<usize>>>;

    fn count_tokens(&self, text: &str) -> Result<usize> {
        Ok(self.token_spans(text)?.len())
    }
}

/// Dependency-free tokenizer approximating subword vocabularies.
///
/// Runs of alphanumeric characters are cut into pieces of at most
/// [`CHARS_PER_TOKEN`] characters; every other non-whitespace character is a
/// token of its own.
#[derive(Debug, Clone)]
pub struct ApproxTokenizer {
    model_max_length: usize,
}

impl ApproxTokenizer {
    pub fn new(model_max_length: usize) -> Self {
        Self { model_max_length }
    }
}

impl TokenCounter for ApproxTokenizer {
    fn name(&self) -> &str {
        "approx"
    }

    fn model_max_length(&self) -> usize {
        self.model_max_length
    }

    fn token_spans(&self, text: &str) -> Result<Vec<Range<usize>>> {
        let mut spans = Vec::new();
        // (start byte, chars so far) of the word piece being built
        let mut piece: Option<(usize, usize)> = None;

        for (idx, ch) in text.char_indices() {
            if ch.is_alphanumeric() {
                piece = match piece {
                    Some((start, n)) if n < CHARS_PER_TOKEN => Some((start, n + 1)),
                    Some((start, _)) => {
                        spans.push(start..idx);
                        Some((idx, 1))
                    }
                    None => Some((idx, 1)),
                };
                continue;
            }

            if let Some((start, _)) = piece.take() {
                spans.push(start..idx);
            }
            if !ch.is_whitespace() {
                spans.push(idx..idx + ch.len_utf8());
            }
        }

        if let Some((start, _)) = piece {
            spans.push(start..text.len());
        }

        Ok(spans)
    }
}

/// Tokenizer backed by a Hugging Face `tokenizer.json`.
pub struct HfTokenizer {
    name: String,
    inner: tokenizers::Tokenizer,
    model_max_length: usize,
}

impl HfTokenizer {
    /// Load `tokenizer.json` from `path`.
    ///
    /// `model_max_length` wins when given; otherwise the value is read from
    /// a sibling `tokenizer_config.json`, then [`DEFAULT_MODEL_MAX_LENGTH`].
    pub fn from_file(path: &Path, model_max_length: Option<usize>) -> Result<Self> {
        let mut inner = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer {}: {}", path.display(), e))?;

        // Counting must see the whole text, not what the model would keep.
        inner
            .with_truncation(None)
            .map_err(|e| anyhow::anyhow!("Failed to disable truncation: {}", e))?;
        inner.with_padding(None);

        let model_max_length = match model_max_length {
            Some(n) => n,
            None => read_model_max_length(path)?.unwrap_or(DEFAULT_MODEL_MAX_LENGTH),
        };

        let name = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "huggingface".to_string());

        Ok(Self {
            name,
            inner,
            model_max_length,
        })
    }
}

impl TokenCounter for HfTokenizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn model_max_length(&self) -> usize {
        self.model_max_length
    }

    fn token_spans(&self, text: &str) -> Result<Vec<Range<usize>>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;
        Ok(encoding
            .get_offsets()
            .iter()
            .map(|&(start, end)| start..end)
            .collect())
    }
}

/// Reads `model_max_length` from the `tokenizer_config.json` next to
/// `tokenizer_path`, if there is one.
fn read_model_max_length(tokenizer_path: &Path) -> Result<Option<usize>> {
    let config_path = match tokenizer_path.parent() {
        Some(dir) => dir.join("tokenizer_config.json"),
        None => return Ok(None),
    };
    if !config_path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read {}", config_path.display()))?;
    let json: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", config_path.display()))?;

    // Some configs carry a sentinel of ~1e30 meaning "unbounded".
    Ok(json
        .get("model_max_length")
        .and_then(|v| v.as_u64())
        .filter(|&n| n > 0 && n < 1_000_000)
        .map(|n| n as usize))
}

/// Build the tokenizer described by `config`.
///
/// `default_max_length` is the model limit used when the config carries no
/// override (the generator's `max_seq_length` for the generator tokenizer).
pub fn create_tokenizer(
    config: &TokenizerConfig,
    default_max_length: usize,
) -> Result<Box<dyn TokenCounter>> {
    match config.kind.as_str() {
        "approx" => Ok(Box::new(ApproxTokenizer::new(
            config.model_max_length.unwrap_or(default_max_length),
        ))),
        "huggingface" => {
            let path = config
                .path
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("tokenizer.path required for huggingface"))?;
            let max = config.model_max_length.or(Some(default_max_length));
            Ok(Box::new(HfTokenizer::from_file(path, max)?))
        }
        other => bail!("Unknown tokenizer kind: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slices<'a>(text: &'a str, spans: &[Range<usize>]) -> Vec<&'a str> {
        spans.iter().map(|r| &text[r.clone()]).collect()
    }

    #[test]
    fn test_short_words_are_single_tokens() {
        let tok = ApproxTokenizer::new(512);
        let text = "the cat sat";
        let spans = tok.token_spans(text).unwrap();
        assert_eq!(slices(text, &spans), vec!["the", "cat", "sat"]);
    }

    #[test]
    fn test_long_words_split_into_pieces() {
        let tok = ApproxTokenizer::new(512);
        let text = "retrieval";
        let spans = tok.token_spans(text).unwrap();
        assert_eq!(slices(text, &spans), vec!["retr", "ieva", "l"]);
    }

    #[test]
    fn test_punctuation_is_its_own_token() {
        let tok = ApproxTokenizer::new(512);
        let text = "Hello, world!";
        let spans = tok.token_spans(text).unwrap();
        assert_eq!(
            slices(text, &spans),
            vec!["Hell", "o", ",", "worl", "d", "!"]
        );
    }

    #[test]
    fn test_empty_and_whitespace() {
        let tok = ApproxTokenizer::new(512);
        assert_eq!(tok.count_tokens("").unwrap(), 0);
        assert_eq!(tok.count_tokens("  \n\t ").unwrap(), 0);
    }

    #[test]
    fn test_multibyte_spans_are_char_boundaries() {
        let tok = ApproxTokenizer::new(512);
        let text = "naïve café — résumé";
        let spans = tok.token_spans(text).unwrap();
        for span in &spans {
            assert!(text.get(span.clone()).is_some(), "bad span {:?}", span);
        }
        assert_eq!(slices(text, &spans)[0], "naïv");
    }

    #[test]
    fn test_create_approx_uses_default_max_length() {
        let tok = create_tokenizer(&TokenizerConfig::default(), 1024).unwrap();
        assert_eq!(tok.model_max_length(), 1024);
        assert_eq!(tok.name(), "approx");
    }

    #[test]
    fn test_create_approx_override() {
        let config = TokenizerConfig {
            model_max_length: Some(2048),
            ..TokenizerConfig::default()
        };
        let tok = create_tokenizer(&config, 1024).unwrap();
        assert_eq!(tok.model_max_length(), 2048);
    }

    #[test]
    fn test_huggingface_missing_file_errors() {
        let config = TokenizerConfig {
            kind: "huggingface".to_string(),
            path: Some("/nonexistent/tokenizer.json".into()),
            model_max_length: None,
        };
        assert!(create_tokenizer(&config, 512).is_err());
    }

    #[test]
    fn test_reads_model_max_length_from_sibling_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("tokenizer_config.json"),
            r#"{"model_max_length": 384}"#,
        )
        .unwrap();
        let n = read_model_max_length(&dir.path().join("tokenizer.json")).unwrap();
        assert_eq!(n, Some(384));
    }

    #[test]
    fn test_ignores_unbounded_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("tokenizer_config.json"),
            r#"{"model_max_length": 1000000000000000019884624838656}"#,
        )
        .unwrap();
        let n = read_model_max_length(&dir.path().join("tokenizer.json")).unwrap();
        assert_eq!(n, None);
    }
}
