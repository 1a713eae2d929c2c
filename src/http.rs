//! JSON-over-HTTP calls to model APIs with retry.
//!
//! Both the embedding providers and the generators talk to remote model
//! servers through [`send_with_retry`]:
//! - HTTP 429 and 5xx → retry
//! - other 4xx → fail immediately
//! - network errors → retry
//! - backoff 1s, 2s, 4s, ... capped at 32s

use anyhow::{bail, Result};
use serde_json::Value;
use std::time::Duration;

/// Send the request built by `request` until it succeeds or `max_retries`
/// retries are spent, and decode the JSON body. `label` names the API in
/// errors and logs.
pub(crate) async fn send_with_retry<F>(request: F, max_retries: u32, label: &str) -> Result<Value>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(attempt, delay_secs = delay.as_secs(), api = label, "retrying request");
            tokio::time::sleep(delay).await;
        }

        match request().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow::anyhow!(
                        "{} API error {}: {}",
                        label,
                        status,
                        body_text
                    ));
                    continue;
                }

                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!("{} connection error: {}", label, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} request failed after retries", label)))
}
