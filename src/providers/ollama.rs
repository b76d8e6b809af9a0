//! Local LLM metadata provider (Ollama-compatible `/api/generate`).
//!
//! A self-hosted fallback for operators who would rather not ship page
//! content to a SaaS API. Anything speaking the Ollama generate protocol
//! works.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{prompt, ImageMetadata, MediaContext, MetadataProvider, ProviderError};
use crate::config::OllamaConfig;

// Local models can be very slow on CPU-only hosts
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Local LLM metadata provider.
pub struct OllamaProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    rate_limiter: RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl OllamaProvider {
    pub fn new(config: &OllamaConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        let rpm = NonZeroU32::new(config.requests_per_minute.max(1)).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_minute(rpm));

        let url = config
            .url
            .as_deref()
            .map(|u| format!("{}/api/generate", u.trim_end_matches('/')))
            .unwrap_or_default();

        Self {
            client,
            url,
            model: config.model.clone(),
            rate_limiter,
        }
    }
}

#[async_trait]
impl MetadataProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn is_available(&self) -> bool {
        !self.url.is_empty()
    }

    async fn generate(
        &self,
        context: &MediaContext,
        language: &str,
    ) -> Result<ImageMetadata, ProviderError> {
        let full_prompt = format!(
            "{}{}",
            prompt::build_prompt(context, language),
            prompt::JSON_ONLY_SUFFIX
        );
        let body = json!({
            "model": self.model,
            "prompt": full_prompt,
            "stream": false,
            "options": {
                "temperature": 0.7,
            },
        });

        debug!(url = %self.url, model = %self.model, image = %context.image_url, "Ollama generate");

        self.rate_limiter.until_ready().await;

        let resp = self.client.post(&self.url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(ProviderError::Status(resp.status()));
        }

        let output: GenerateResponse = resp.json().await?;
        prompt::parse_metadata(&output.response)
    }
}
