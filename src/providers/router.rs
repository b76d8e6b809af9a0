//! Provider router: ordered fallback across [`MetadataProvider`] backends.
//!
//! The [`ProviderRouter`] holds every registered provider and walks a
//! configured order until one of them produces usable metadata. Unlike a
//! merge-and-rank registry, only one provider's output is ever used per
//! image, and the winning provider's name is recorded for attribution.

use std::sync::Arc;

use altsmith_common::FailureKind;
use tracing::{debug, warn};

use super::{ImageMetadata, MediaContext, MetadataProvider, ProviderError};

/// Metadata together with the name of the provider that produced it.
#[derive(Debug, Clone)]
pub struct GeneratedMetadata {
    pub metadata: ImageMetadata,
    pub provider: String,
}

/// Failure of the whole fallback chain.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// No provider in the requested order is registered and available.
    #[error("no metadata provider available")]
    NoneAvailable,

    /// Every provider in the chain was tried and failed.
    #[error("all providers failed, last: {last}")]
    AllFailed { last: ProviderError },
}

impl RouterError {
    /// Map onto the retry taxonomy. An empty chain is transient: the operator
    /// may add a key and the job should come back around.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::NoneAvailable => FailureKind::Transient,
            Self::AllFailed { last } => last.failure_kind(),
        }
    }
}

/// Routes generation requests through an ordered provider chain.
pub struct ProviderRouter {
    providers: Vec<Arc<dyn MetadataProvider>>,
    default_order: Vec<String>,
}

impl ProviderRouter {
    /// Create an empty router with the given global fallback order.
    pub fn new(default_order: Vec<String>) -> Self {
        Self {
            providers: Vec::new(),
            default_order,
        }
    }

    /// Register a provider. Registration order does not matter; the
    /// configured order decides precedence.
    pub fn register(&mut self, provider: Arc<dyn MetadataProvider>) {
        self.providers.push(provider);
    }

    /// Look up a provider by its [`MetadataProvider::name`].
    pub fn get(&self, name: &str) -> Option<&dyn MetadataProvider> {
        self.providers
            .iter()
            .find(|p| p.name() == name)
            .map(|p| p.as_ref())
    }

    /// Names of registered providers that are currently available.
    pub fn available_names(&self) -> Vec<&'static str> {
        self.providers
            .iter()
            .filter(|p| p.is_available())
            .map(|p| p.name())
            .collect()
    }

    /// Generate metadata for one image, walking the fallback chain.
    ///
    /// `order_override` is the per-client order when the client has one;
    /// otherwise the global default order applies. Providers named in the
    /// order but unregistered or unavailable are skipped. The first provider
    /// to return valid metadata wins and is credited in the result.
    pub async fn generate(
        &self,
        context: &MediaContext,
        language: &str,
        order_override: Option<&[String]>,
    ) -> Result<GeneratedMetadata, RouterError> {
        let order: &[String] = order_override.unwrap_or(&self.default_order);

        let mut last_error: Option<ProviderError> = None;
        for name in order {
            let Some(provider) = self.get(name) else {
                continue;
            };
            if !provider.is_available() {
                debug!(provider = %name, "provider not configured, skipping");
                continue;
            }

            match provider.generate(context, language).await {
                Ok(metadata) => {
                    return Ok(GeneratedMetadata {
                        metadata,
                        provider: provider.name().to_string(),
                    });
                }
                Err(e) => {
                    warn!(provider = %name, error = %e, "provider failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(last) => Err(RouterError::AllFailed { last }),
            None => Err(RouterError::NoneAvailable),
        }
    }
}
