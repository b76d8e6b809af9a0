//! Mistral chat-completions metadata provider.
//!
//! Implements [`MetadataProvider`] by querying the Mistral `v1/chat/completions`
//! endpoint.
//!
//! Features:
//! - Token-bucket rate limiting via [`governor`], quota from config.
//! - Automatic retry on HTTP 429 with `Retry-After` header support (max 3 retries).
//! - 60-second request timeout, sized for slow inference.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::{prompt, ImageMetadata, MediaContext, MetadataProvider, ProviderError};
use crate::config::MistralConfig;

const MISTRAL_API_URL: &str = "https://api.mistral.ai/v1/chat/completions";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_RETRIES: u32 = 3;
/// Ceiling on a server-supplied `Retry-After`; the header is advisory and a
/// worker must not sit out an arbitrarily long wait on its say-so.
const RETRY_AFTER_CAP: Duration = Duration::from_secs(30);

fn retry_wait(header_secs: Option<u64>) -> Duration {
    Duration::from_secs(header_secs.unwrap_or(1)).min(RETRY_AFTER_CAP)
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Mistral metadata provider.
pub struct MistralProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    rate_limiter: RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl MistralProvider {
    pub fn new(config: &MistralConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        let rpm = NonZeroU32::new(config.requests_per_minute.max(1)).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_minute(rpm));

        Self {
            client,
            api_key: config.api_key.clone().unwrap_or_default(),
            model: config.model.clone(),
            rate_limiter,
        }
    }

    /// Execute the chat request with rate limiting and 429-retry logic.
    async fn post_chat(&self, body: &serde_json::Value) -> Result<ChatResponse, ProviderError> {
        let mut retries = 0u32;
        loop {
            self.rate_limiter.until_ready().await;

            let resp = self
                .client
                .post(MISTRAL_API_URL)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await?;

            if resp.status() == StatusCode::TOO_MANY_REQUESTS {
                if retries >= MAX_RETRIES {
                    return Err(ProviderError::RateLimited);
                }
                retries += 1;
                let wait = retry_wait(
                    resp.headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok()),
                );
                warn!(
                    retry = retries,
                    wait_secs = wait.as_secs(),
                    "Mistral returned 429, backing off"
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            if !resp.status().is_success() {
                return Err(ProviderError::Status(resp.status()));
            }

            return Ok(resp.json().await?);
        }
    }
}

#[async_trait]
impl MetadataProvider for MistralProvider {
    fn name(&self) -> &'static str {
        "mistral"
    }

    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn generate(
        &self,
        context: &MediaContext,
        language: &str,
    ) -> Result<ImageMetadata, ProviderError> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt::build_prompt(context, language)}],
            "temperature": 0.7,
            "max_tokens": 300,
        });

        debug!(model = %self.model, image = %context.image_url, "Mistral generate");

        let response = self.post_chat(&body).await?;
        let content = response
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or(ProviderError::Malformed)?;

        prompt::parse_metadata(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_is_available_with_key() {
        let provider = MistralProvider::new(&MistralConfig {
            api_key: Some("key".to_string()),
            ..Default::default()
        });
        assert!(provider.is_available());
        assert_eq!(provider.name(), "mistral");
    }

    #[test]
    fn provider_unavailable_without_key() {
        let provider = MistralProvider::new(&MistralConfig::default());
        assert!(!provider.is_available());
    }

    #[test]
    fn retry_wait_clamps_server_hint() {
        assert_eq!(retry_wait(None), Duration::from_secs(1));
        assert_eq!(retry_wait(Some(5)), Duration::from_secs(5));
        // A hostile or buggy header cannot park the worker for hours.
        assert_eq!(retry_wait(Some(86_400)), RETRY_AFTER_CAP);
    }
}
