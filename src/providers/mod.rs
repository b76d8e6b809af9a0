//! Trait definition and types for AI metadata providers.
//!
//! This module defines the [`MetadataProvider`] trait that all generation
//! backends (Mistral, Hugging Face, local LLM) must implement, along with the
//! shared data types exchanged with providers.

pub mod huggingface;
pub mod mistral;
pub mod ollama;
pub mod prompt;
pub mod router;

pub use huggingface::HuggingFaceProvider;
pub use mistral::MistralProvider;
pub use ollama::OllamaProvider;
pub use router::{GeneratedMetadata, ProviderRouter, RouterError};

use altsmith_common::FailureKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Field length caps
// ---------------------------------------------------------------------------

/// Maximum character length for alt text.
pub const MAX_ALT_TEXT: usize = 125;
/// Maximum character length for the SEO title.
pub const MAX_TITLE: usize = 60;
/// Maximum character length for the caption.
pub const MAX_CAPTION: usize = 160;
/// Maximum character length for the long description.
pub const MAX_DESCRIPTION: usize = 300;

// ---------------------------------------------------------------------------
// Context and output types
// ---------------------------------------------------------------------------

/// Everything a provider gets to see about one image.
///
/// The page fields come from the post or page the image is attached to and
/// are already stripped of HTML; a detached image carries only its own URL
/// and title.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaContext {
    /// Public URL of the image file.
    pub image_url: String,
    /// Title WordPress currently holds for the attachment.
    pub image_title: String,
    /// Title of the post or page the image is attached to, if any.
    pub page_title: String,
    /// Leading text of that post or page, trimmed to a few hundred characters.
    pub page_content: String,
}

/// The four SEO fields a provider generates for one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    #[serde(default)]
    pub alt_text: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub description: String,
}

impl ImageMetadata {
    /// Truncate every field to its cap, cutting on a char boundary.
    pub fn enforce_limits(mut self) -> Self {
        self.alt_text = truncate_chars(&self.alt_text, MAX_ALT_TEXT);
        self.title = truncate_chars(&self.title, MAX_TITLE);
        self.caption = truncate_chars(&self.caption, MAX_CAPTION);
        self.description = truncate_chars(&self.description, MAX_DESCRIPTION);
        self
    }

    /// A usable result needs at least alt text; the other fields are optional
    /// extras as far as accessibility is concerned.
    pub fn validate(self) -> Result<Self, ProviderError> {
        if self.alt_text.trim().is_empty() {
            return Err(ProviderError::Invalid("empty alt_text".to_string()));
        }
        Ok(self)
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect::<String>().trim_end().to_string()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure of a single provider attempt.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Transport-level failure (connect, timeout, TLS).
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider asked us to slow down and retries ran out.
    #[error("rate limited by provider")]
    RateLimited,

    /// Unexpected HTTP status from the provider.
    #[error("provider returned status {0}")]
    Status(reqwest::StatusCode),

    /// The model output held no parseable JSON object.
    #[error("no JSON object in provider output")]
    Malformed,

    /// The parsed metadata failed validation.
    #[error("metadata failed validation: {0}")]
    Invalid(String),
}

impl ProviderError {
    /// Map a provider failure onto the retry taxonomy.
    ///
    /// Network trouble, throttling, and server errors are worth retrying;
    /// a model that keeps emitting garbage is not.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Request(_) | Self::RateLimited => FailureKind::Transient,
            Self::Status(code) if code.is_server_error() => FailureKind::Transient,
            Self::Status(_) => FailureKind::Content,
            Self::Malformed | Self::Invalid(_) => FailureKind::Content,
        }
    }
}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Async trait that all metadata providers must implement.
///
/// Each provider wraps a single inference API and exposes a uniform
/// interface. Providers are wrapped in an `Arc` so they can be shared across
/// worker tasks.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Short, lowercase identifier for this provider (e.g. `"mistral"`).
    fn name(&self) -> &'static str;

    /// Returns `true` when the provider has been configured with the
    /// credentials or endpoint it needs.
    fn is_available(&self) -> bool;

    /// Generate SEO metadata for one image from its context.
    ///
    /// `language` is the BCP 47 tag the output text should be written in.
    async fn generate(
        &self,
        context: &MediaContext,
        language: &str,
    ) -> Result<ImageMetadata, ProviderError>;
}
