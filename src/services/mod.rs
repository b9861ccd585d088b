//! Services layer: remote scoring providers
//!
//! One provider variant is active at a time; [`build_provider`] picks it from
//! configuration.

pub mod anthropic;
pub mod openai;
pub mod provider;

use crate::config::{ProviderKind, ProviderSettings};
use crate::error::Result;
use std::sync::Arc;

pub use anthropic::{AnthropicConfig, AnthropicProvider};
pub use openai::{OpenAiConfig, OpenAiProvider};
pub use provider::{
    ProviderAssessment, ProviderClient, ProviderResponse, RateLimitInfo, MAX_ADVISORY_WAIT,
};

/// Construct the configured provider client
pub fn build_provider(settings: &ProviderSettings) -> Result<Arc<dyn ProviderClient>> {
    let provider: Arc<dyn ProviderClient> = match settings.kind {
        ProviderKind::Anthropic => {
            let mut config = AnthropicConfig {
                model: settings.model(),
                max_tokens: settings.max_tokens,
                timeout: settings.timeout(),
                ..Default::default()
            };
            if let Some(url) = &settings.base_url {
                config.base_url = url.trim_end_matches('/').to_string();
            }
            Arc::new(AnthropicProvider::new(config)?)
        }
        ProviderKind::OpenAi => {
            let mut config = OpenAiConfig {
                model: settings.model(),
                max_tokens: settings.max_tokens,
                timeout: settings.timeout(),
                ..Default::default()
            };
            if let Some(url) = &settings.base_url {
                config.base_url = url.trim_end_matches('/').to_string();
            }
            Arc::new(OpenAiProvider::new(config)?)
        }
    };

    tracing::debug!(
        "Using provider {} with model {}",
        provider.provider_id(),
        provider.model()
    );
    Ok(provider)
}
