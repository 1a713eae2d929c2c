use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub session: SessionConfig,
    pub db: DbConfig,
    #[serde(default)]
    pub tokenizer: TokenizerConfig,
    #[serde(default)]
    pub retriever: RetrieverConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Directory holding one extracted-article JSON file per source.
    pub src_dir: PathBuf,
    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_extension() -> String {
    "json".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TokenizerConfig {
    #[serde(default = "default_tokenizer_kind")]
    pub kind: String,
    /// Path to a `tokenizer.json` when `kind = "huggingface"`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub model_max_length: Option<usize>,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            kind: default_tokenizer_kind(),
            path: None,
            model_max_length: None,
        }
    }
}

fn default_tokenizer_kind() -> String {
    "approx".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrieverConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Encoder for stored chunks.
    #[serde(default)]
    pub passage_model: Option<String>,
    /// Encoder for queries; falls back to `passage_model`.
    #[serde(default)]
    pub query_model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_retriever_max_seq_length")]
    pub max_seq_length: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            passage_model: None,
            query_model: None,
            dims: None,
            max_seq_length: default_retriever_max_seq_length(),
            top_k: default_top_k(),
            mode: default_mode(),
            hybrid_alpha: default_hybrid_alpha(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

impl RetrieverConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_retriever_max_seq_length() -> usize {
    512
}
fn default_top_k() -> usize {
    3
}
fn default_mode() -> String {
    "dense".to_string()
}
fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_generator_max_seq_length")]
    pub max_seq_length: usize,
    #[serde(default = "default_max_answer_tokens")]
    pub max_answer_tokens: usize,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generator_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            max_seq_length: default_generator_max_seq_length(),
            max_answer_tokens: default_max_answer_tokens(),
            temperature: None,
            max_retries: default_max_retries(),
            timeout_secs: default_generator_timeout_secs(),
            url: None,
        }
    }
}

fn default_generator_max_seq_length() -> usize {
    1024
}
fn default_max_answer_tokens() -> usize {
    256
}
fn default_generator_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct BudgetConfig {
    #[serde(default = "default_seq_length_buffer")]
    pub seq_length_buffer: usize,
    #[serde(default = "default_min_context_size")]
    pub min_context_size: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            seq_length_buffer: default_seq_length_buffer(),
            min_context_size: default_min_context_size(),
        }
    }
}

fn default_seq_length_buffer() -> usize {
    50
}
fn default_min_context_size() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default)]
    pub filter_tables: bool,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            filter_tables: false,
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}

impl Config {
    /// Configuration for commands that never touch the store or the models
    /// (`extract`, `refs`, `sample`) when no config file is present.
    pub fn minimal() -> Self {
        Self {
            session: SessionConfig {
                src_dir: PathBuf::from("./corpus"),
                extension: default_extension(),
            },
            db: DbConfig {
                path: PathBuf::from("./data/rrc.sqlite"),
            },
            tokenizer: TokenizerConfig::default(),
            retriever: RetrieverConfig::default(),
            generator: GeneratorConfig::default(),
            budget: BudgetConfig::default(),
            extraction: ExtractionConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate retriever
    let retriever = &config.retriever;
    if retriever.top_k < 1 {
        anyhow::bail!("retriever.top_k must be >= 1");
    }
    if retriever.max_seq_length == 0 {
        anyhow::bail!("retriever.max_seq_length must be > 0");
    }
    if retriever.batch_size == 0 {
        anyhow::bail!("retriever.batch_size must be > 0");
    }
    if !(0.0..=1.0).contains(&retriever.hybrid_alpha) {
        anyhow::bail!("retriever.hybrid_alpha must be in [0.0, 1.0]");
    }

    match retriever.mode.as_str() {
        "dense" | "keyword" | "hybrid" => {}
        other => anyhow::bail!(
            "Unknown retriever mode: '{}'. Must be dense, keyword, or hybrid.",
            other
        ),
    }

    match retriever.provider.as_str() {
        "disabled" => {}
        "hash" => {
            if retriever.dims.is_none() || retriever.dims == Some(0) {
                anyhow::bail!("retriever.dims must be > 0 when provider is 'hash'");
            }
        }
        "openai" | "ollama" | "local" => {
            if retriever.provider != "local"
                && (retriever.dims.is_none() || retriever.dims == Some(0))
            {
                anyhow::bail!(
                    "retriever.dims must be > 0 when provider is '{}'",
                    retriever.provider
                );
            }
            if retriever.passage_model.is_none() {
                anyhow::bail!(
                    "retriever.passage_model must be specified when provider is '{}'",
                    retriever.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown retriever provider: '{}'. Must be disabled, hash, openai, ollama, or local.",
            other
        ),
    }

    // Validate generator
    let generator = &config.generator;
    if generator.max_seq_length == 0 {
        anyhow::bail!("generator.max_seq_length must be > 0");
    }
    match generator.provider.as_str() {
        "disabled" => {}
        "openai" | "ollama" => {
            if generator.model.is_none() {
                anyhow::bail!(
                    "generator.model must be specified when provider is '{}'",
                    generator.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown generator provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    // Validate tokenizer
    match config.tokenizer.kind.as_str() {
        "approx" => {}
        "huggingface" => {
            if config.tokenizer.path.is_none() {
                anyhow::bail!("tokenizer.path must be specified when kind is 'huggingface'");
            }
        }
        other => anyhow::bail!(
            "Unknown tokenizer kind: '{}'. Must be approx or huggingface.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[session]
src_dir = "./corpus"

[db]
path = "./data/rrc.sqlite"
"#;

    fn parse(extra: &str) -> Result<Config> {
        let config: Config = toml::from_str(&format!("{}{}", MINIMAL, extra))?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.session.extension, "json");
        assert_eq!(config.retriever.top_k, 3);
        assert_eq!(config.retriever.max_seq_length, 512);
        assert_eq!(config.generator.max_seq_length, 1024);
        assert_eq!(config.budget.seq_length_buffer, 50);
        assert_eq!(config.budget.min_context_size, 200);
        assert_eq!(config.tokenizer.kind, "approx");
        assert!(!config.retriever.is_enabled());
    }

    #[test]
    fn test_hash_provider_requires_dims() {
        let err = parse("[retriever]\nprovider = \"hash\"\n").unwrap_err();
        assert!(err.to_string().contains("dims"));
        assert!(parse("[retriever]\nprovider = \"hash\"\ndims = 64\n").is_ok());
    }

    #[test]
    fn test_openai_requires_passage_model() {
        let err = parse("[retriever]\nprovider = \"openai\"\ndims = 1536\n").unwrap_err();
        assert!(err.to_string().contains("passage_model"));
    }

    #[test]
    fn test_rejects_zero_top_k() {
        let err = parse("[retriever]\ntop_k = 0\n").unwrap_err();
        assert!(err.to_string().contains("top_k"));
    }

    #[test]
    fn test_rejects_unknown_mode() {
        assert!(parse("[retriever]\nmode = \"sparse\"\n").is_err());
    }

    #[test]
    fn test_generator_requires_model() {
        let err = parse("[generator]\nprovider = \"ollama\"\n").unwrap_err();
        assert!(err.to_string().contains("generator.model"));
    }

    #[test]
    fn test_huggingface_tokenizer_requires_path() {
        assert!(parse("[tokenizer]\nkind = \"huggingface\"\n").is_err());
    }

    #[test]
    fn test_minimal_is_valid() {
        assert!(validate(&Config::minimal()).is_ok());
    }
}
