//! HTTP client for one WordPress site.
//!
//! Features:
//! - Application-password Basic auth on every request.
//! - Automatic retry with exponential backoff (500ms doubling, capped at 30s,
//!   max 5 attempts) on timeouts, 429, and 5xx. 401/403 never retry.
//! - Media listing via `per_page`/`page` pagination.
//! - Best-effort context lookup: posts first, then pages.

use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, warn};

use super::types::{strip_html, MediaAsset, MediaItem, PostItem, WpError};
use crate::config::WordPressConfig;
use crate::providers::{ImageMetadata, MediaContext};

const MAX_RETRIES: u32 = 5;
const RETRY_BASE: Duration = Duration::from_millis(500);
const RETRY_CAP: Duration = Duration::from_secs(30);

/// Maximum characters of page content handed to providers.
const CONTEXT_CONTENT_CHARS: usize = 300;

/// REST client bound to one site and one credential.
pub struct WordPressClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    app_password: String,
    page_size: u32,
    retry_base: Duration,
    retry_cap: Duration,
}

impl WordPressClient {
    /// Create a client for a site. `base_url` is the site root without a
    /// trailing slash (one is stripped if present).
    pub fn new(base_url: &str, username: &str, app_password: &str, config: &WordPressConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            app_password: app_password.to_string(),
            page_size: config.page_size,
            retry_base: RETRY_BASE,
            retry_cap: RETRY_CAP,
        }
    }

    /// Shrink the retry backoff; used by tests to keep them fast.
    #[doc(hidden)]
    pub fn with_retry_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.retry_base = base;
        self.retry_cap = cap;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/wp-json/wp/v2{}", self.base_url, path)
    }

    /// Send a request, retrying transient failures with exponential backoff.
    ///
    /// Returns the response for any status except auth rejections and
    /// exhausted throttling; callers decide what the remaining statuses mean.
    async fn send_with_retry<F>(&self, build: F) -> Result<reqwest::Response, WpError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0u32;
        let mut delay = self.retry_base;
        loop {
            attempt += 1;
            let result = build()
                .basic_auth(&self.username, Some(&self.app_password))
                .send()
                .await;

            match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        return Err(WpError::Auth(status));
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        if attempt > MAX_RETRIES {
                            return Err(if status == StatusCode::TOO_MANY_REQUESTS {
                                WpError::RateLimited
                            } else {
                                WpError::Status(status)
                            });
                        }
                        let wait = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .map(Duration::from_secs)
                            .unwrap_or(delay);
                        warn!(
                            attempt,
                            status = %status,
                            wait_ms = wait.as_millis() as u64,
                            "WordPress request throttled or failed, backing off"
                        );
                        tokio::time::sleep(wait.min(self.retry_cap)).await;
                        delay = (delay * 2).min(self.retry_cap);
                        continue;
                    }
                    return Ok(resp);
                }
                Err(e) if attempt <= MAX_RETRIES && (e.is_timeout() || e.is_connect()) => {
                    warn!(attempt, error = %e, "WordPress request failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.retry_cap);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// List every image in the site's media library.
    ///
    /// Pages through `/media` until an empty batch. WordPress answers 400
    /// past the last page, which also ends the walk. Non-image attachments
    /// are dropped.
    pub async fn list_media(&self) -> Result<Vec<MediaAsset>, WpError> {
        let url = self.api_url("/media");
        let mut assets = Vec::new();
        let mut page: u32 = 1;

        loop {
            let per_page = self.page_size.to_string();
            let page_param = page.to_string();
            let resp = self
                .send_with_retry(|| {
                    self.http
                        .get(&url)
                        .query(&[("per_page", per_page.as_str()), ("page", page_param.as_str())])
                })
                .await?;

            // Past the end of the collection
            if resp.status() == StatusCode::BAD_REQUEST && page > 1 {
                break;
            }
            if !resp.status().is_success() {
                return Err(WpError::Status(resp.status()));
            }

            let batch: Vec<MediaItem> = resp
                .json()
                .await
                .map_err(|e| WpError::Decode(e.to_string()))?;
            if batch.is_empty() {
                break;
            }

            assets.extend(
                batch
                    .into_iter()
                    .filter(MediaItem::is_image)
                    .map(MediaAsset::from),
            );
            page += 1;
        }

        debug!(site = %self.base_url, images = assets.len(), "listed media library");
        Ok(assets)
    }

    /// Build the generation context for one asset.
    ///
    /// Looks up the attached post (trying `/posts/{id}` then `/pages/{id}`)
    /// for its title and leading content. Lookup failures degrade to an
    /// image-only context rather than failing the job.
    pub async fn fetch_context(&self, asset: &MediaAsset) -> MediaContext {
        let mut context = MediaContext {
            image_url: asset.source_url.clone(),
            image_title: asset.title.clone(),
            page_title: String::new(),
            page_content: String::new(),
        };

        let Some(post_id) = asset.post else {
            return context;
        };

        for endpoint in ["posts", "pages"] {
            let url = self.api_url(&format!("/{endpoint}/{post_id}"));
            let resp = match self.send_with_retry(|| self.http.get(&url)).await {
                Ok(resp) => resp,
                Err(e) => {
                    debug!(asset = %asset.id, error = %e, "context lookup failed");
                    return context;
                }
            };
            if !resp.status().is_success() {
                continue;
            }
            if let Ok(post) = resp.json::<PostItem>().await {
                context.page_title = post.title.rendered;
                context.page_content = strip_html(&post.content.rendered)
                    .chars()
                    .take(CONTEXT_CONTENT_CHARS)
                    .collect();
                break;
            }
        }

        context
    }

    /// Write generated metadata back onto the attachment.
    pub async fn update_metadata(
        &self,
        asset: &MediaAsset,
        metadata: &ImageMetadata,
    ) -> Result<(), WpError> {
        let url = self.api_url(&format!("/media/{}", asset.id));
        let body = serde_json::json!({
            "alt_text": metadata.alt_text,
            "title": metadata.title,
            "caption": metadata.caption,
            "description": metadata.description,
        });

        let resp = self
            .send_with_retry(|| self.http.post(&url).json(&body))
            .await?;
        if !resp.status().is_success() {
            return Err(WpError::Status(resp.status()));
        }

        debug!(asset = %asset.id, site = %self.base_url, "metadata written back");
        Ok(())
    }
}
