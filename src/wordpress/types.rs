//! Wire types and error taxonomy for the WordPress REST API.

use altsmith_common::{AssetId, FailureKind};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

/// Error from a WordPress request, classified for retry decisions.
#[derive(Debug, thiserror::Error)]
pub enum WpError {
    /// Transport-level failure (connect, timeout, TLS).
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The site rejected the credential. Permanent until the registration
    /// is updated; processing for the client stops.
    #[error("authentication rejected (status {0})")]
    Auth(reqwest::StatusCode),

    /// The site asked us to slow down and retries ran out.
    #[error("rate limited by site")]
    RateLimited,

    /// Unexpected HTTP status.
    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),

    /// Response body did not match the expected shape.
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl WpError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Auth(_) => FailureKind::Auth,
            Self::Request(_) | Self::RateLimited => FailureKind::Transient,
            Self::Status(code) if code.is_server_error() => FailureKind::Transient,
            Self::Status(_) | Self::Decode(_) => FailureKind::Content,
        }
    }

    /// Whether a same-request retry can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        self.failure_kind() == FailureKind::Transient
    }
}

/// One attachment as returned by `GET /wp-json/wp/v2/media`.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaItem {
    pub id: i64,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub alt_text: String,
    #[serde(default)]
    pub title: Rendered,
    #[serde(default)]
    pub media_type: String,
    /// ID of the post the attachment belongs to, when WordPress knows it.
    #[serde(default)]
    pub post: Option<i64>,
    #[serde(default)]
    pub modified_gmt: String,
}

impl MediaItem {
    pub fn is_image(&self) -> bool {
        self.media_type == "image"
    }
}

/// WordPress's `{ "rendered": ... }` wrapper.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Rendered {
    #[serde(default)]
    pub rendered: String,
}

/// One post or page, as much of it as context building needs.
#[derive(Debug, Clone, Deserialize)]
pub struct PostItem {
    #[serde(default)]
    pub title: Rendered,
    #[serde(default)]
    pub content: Rendered,
}

/// A media item reduced to what the pipeline needs.
#[derive(Debug, Clone)]
pub struct MediaAsset {
    pub id: AssetId,
    pub source_url: String,
    pub title: String,
    pub alt_text: String,
    pub post: Option<i64>,
    /// Identity of the current content revision; the dedup ledger keys on it.
    pub content_hash: String,
}

impl From<MediaItem> for MediaAsset {
    fn from(item: MediaItem) -> Self {
        let content_hash = content_hash(&item.source_url, &item.modified_gmt);
        Self {
            id: AssetId::new(item.id),
            source_url: item.source_url,
            title: item.title.rendered,
            alt_text: item.alt_text,
            post: item.post,
            content_hash,
        }
    }
}

/// Hash identifying one revision of an asset's content.
///
/// WordPress exposes no binary digest over REST, so the source URL plus the
/// last-modified stamp stands in: re-uploading or editing an image bumps
/// `modified_gmt`, which changes the hash and readmits the asset.
pub fn content_hash(source_url: &str, modified_gmt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_url.as_bytes());
    hasher.update(b"\n");
    hasher.update(modified_gmt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Strip HTML tags from rendered post content.
pub fn strip_html(html: &str) -> String {
    static TAG: OnceLock<regex::Regex> = OnceLock::new();
    let re = TAG.get_or_init(|| regex::Regex::new(r"<[^>]*>").unwrap());
    re.replace_all(html, "").trim().to_string()
}
