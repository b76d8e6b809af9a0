//! Hugging Face Inference API metadata provider.
//!
//! Implements [`MetadataProvider`] against the hosted inference endpoint for
//! a configurable text-generation model. Cold models answer 503 while they
//! load, which is treated like throttling and retried.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{prompt, ImageMetadata, MediaContext, MetadataProvider, ProviderError};
use crate::config::HuggingFaceConfig;

const HF_API_BASE: &str = "https://api-inference.huggingface.co/models";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Deserialize)]
struct GeneratedText {
    generated_text: String,
}

/// Hugging Face metadata provider.
pub struct HuggingFaceProvider {
    client: reqwest::Client,
    api_key: String,
    url: String,
    rate_limiter: RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl HuggingFaceProvider {
    pub fn new(config: &HuggingFaceConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        let rpm = NonZeroU32::new(config.requests_per_minute.max(1)).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_minute(rpm));

        Self {
            client,
            api_key: config.api_key.clone().unwrap_or_default(),
            url: format!("{HF_API_BASE}/{}", config.model),
            rate_limiter,
        }
    }

    async fn post_inference(
        &self,
        body: &serde_json::Value,
    ) -> Result<Vec<GeneratedText>, ProviderError> {
        let mut retries = 0u32;
        loop {
            self.rate_limiter.until_ready().await;

            let resp = self
                .client
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await?;

            // 503 = model still loading; treat it like throttling
            let throttled = resp.status() == StatusCode::TOO_MANY_REQUESTS
                || resp.status() == StatusCode::SERVICE_UNAVAILABLE;
            if throttled {
                if retries >= MAX_RETRIES {
                    return Err(ProviderError::RateLimited);
                }
                retries += 1;
                let wait = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(2);
                warn!(
                    retry = retries,
                    wait_secs = wait,
                    status = %resp.status(),
                    "Hugging Face busy, backing off"
                );
                tokio::time::sleep(Duration::from_secs(wait)).await;
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
impl MetadataProvider for HuggingFaceProvider {
    fn name(&self) -> &'static str {
        "huggingface"
    }

    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
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
            "inputs": full_prompt,
            "parameters": {
                "max_new_tokens": 300,
                "temperature": 0.7,
                "return_full_text": false,
            },
        });

        debug!(url = %self.url, image = %context.image_url, "Hugging Face generate");

        let outputs = self.post_inference(&body).await?;
        let text = outputs
            .first()
            .map(|o| o.generated_text.as_str())
            .ok_or(ProviderError::Malformed)?;

        prompt::parse_metadata(text)
    }
}
