//! Answer generation.
//!
//! The [`Generator`] trait turns a rendered prompt into answer text.
//! [`create_generator`] selects a backend from `[generator] provider`:
//!
//! | Config Value | Backend |
//! |-------------|---------|
//! | `"disabled"` | [`DisabledGenerator`] (errors on use) |
//! | `"openai"` | [`OpenAIGenerator`], `POST /v1/chat/completions` |
//! | `"ollama"` | [`OllamaGenerator`], `POST /api/generate` with `stream: false` |
//!
//! HTTP backends retry 429, 5xx, and network errors with exponential backoff
//! (1s, 2s, 4s, ... capped at 32s) and fail immediately on other 4xx.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::config::GeneratorConfig;
use crate::http::send_with_retry;

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    /// Generate at most `max_tokens` tokens of answer for `prompt`.
    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String>;
}

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str, _max_tokens: usize) -> Result<String> {
        bail!("Generator is disabled. Set [generator] provider in config.")
    }
}

pub struct OpenAIGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
    temperature: Option<f32>,
    max_retries: u32,
}

impl OpenAIGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generator.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": max_tokens,
        });
        if let Some(t) = self.temperature {
            body["temperature"] = serde_json::json!(t);
        }

        let request = || {
            self.client
                .post(format!("{}/v1/chat/completions", self.url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
        };
        let json = send_with_retry(request, self.max_retries, "OpenAI").await?;
        parse_openai_completion(&json)
    }
}

fn parse_openai_completion(json: &Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

pub struct OllamaGenerator {
    client: reqwest::Client,
    model: String,
    url: String,
    temperature: Option<f32>,
    max_retries: u32,
}

impl OllamaGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generator.model required for Ollama provider"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            model,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String> {
        let mut options = serde_json::json!({ "num_predict": max_tokens });
        if let Some(t) = self.temperature {
            options["temperature"] = serde_json::json!(t);
        }
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": options,
        });

        let request = || {
            self.client
                .post(format!("{}/api/generate", self.url))
                .json(&body)
        };
        let json = send_with_retry(request, self.max_retries, "Ollama").await?;
        json.get("response")
            .and_then(|r| r.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing response"))
    }
}

pub fn create_generator(config: &GeneratorConfig) -> Result<Box<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledGenerator)),
        "openai" => Ok(Box::new(OpenAIGenerator::new(config)?)),
        "ollama" => Ok(Box::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generator provider: {}", other),
    }
}
