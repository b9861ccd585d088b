//! Anthropic Messages API provider
//!
//! Sends the image as a base64 content block followed by the evaluation prompt,
//! and expects a single JSON object back in the text reply.

use super::provider::{
    header_u64, map_status, parse_assessment, retry_after_from_headers, ModelPricing,
    ProviderClient, ProviderResponse, RateLimitInfo,
};
use crate::error::{ApertureError, ProviderError, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

/// Anthropic provider configuration
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub model: String,
    pub base_url: String,
    pub max_tokens: usize,
    pub timeout: Duration,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_tokens: 2048,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Anthropic Messages API client
pub struct AnthropicProvider {
    config: AnthropicConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: Vec<ContentBlock<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock<'a> {
    Image { source: ImageSource<'a> },
    Text { text: &'a str },
}

#[derive(Debug, Serialize)]
struct ImageSource<'a> {
    #[serde(rename = "type")]
    source_type: &'static str,
    media_type: &'static str,
    data: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApertureError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Pricing per model family; unknown models are priced as Sonnet
    fn pricing(model: &str) -> ModelPricing {
        if model.contains("opus") {
            ModelPricing::new(15.0, 75.0)
        } else if model.contains("haiku") {
            ModelPricing::new(0.80, 4.0)
        } else {
            ModelPricing::new(3.0, 15.0)
        }
    }
}

#[async_trait]
impl ProviderClient for AnthropicProvider {
    fn provider_id(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn evaluate(
        &self,
        encoded_artifact: &str,
        prompt: &str,
        credential: &SecretString,
        model: &str,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        debug!("Calling Anthropic API (model: {})", model);

        let request = MessagesRequest {
            model,
            max_tokens: self.config.max_tokens,
            messages: vec![Message {
                role: "user",
                content: vec![
                    ContentBlock::Image {
                        source: ImageSource {
                            source_type: "base64",
                            media_type: "image/jpeg",
                            data: encoded_artifact,
                        },
                    },
                    ContentBlock::Text { text: prompt },
                ],
            }],
        };

        let response = self
            .client
            .post(format!("{}/messages", self.config.base_url))
            .header("x-api-key", credential.expose_secret())
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| match ProviderError::from(e) {
                ProviderError::Timeout(_) => ProviderError::Timeout(self.config.timeout),
                other => other,
            })?;

        let status = response.status();
        let rate_limit = self.extract_rate_limit_info(response.headers());

        if !status.is_success() {
            let retry_after = rate_limit.and_then(|r| r.retry_after);
            let body = response.text().await.unwrap_or_default();
            warn!("Anthropic API returned {}", status);
            return Err(map_status(status.as_u16(), retry_after, &body));
        }

        let raw = response.text().await?;
        let parsed: MessagesResponse = serde_json::from_str(&raw)
            .map_err(|e| ProviderError::MalformedResponse(format!("Failed to parse response: {}", e)))?;

        let text = parsed
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");
        if text.trim().is_empty() {
            return Err(ProviderError::MalformedResponse(
                "Empty response from API".to_string(),
            ));
        }

        let assessment = parse_assessment(&text)?;

        debug!(
            "Anthropic usage: {} input / {} output tokens",
            parsed.usage.input_tokens, parsed.usage.output_tokens
        );

        Ok(ProviderResponse {
            assessment,
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
            raw_response: text,
            rate_limit,
        })
    }

    fn calculate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        Self::pricing(&self.config.model).cost(input_tokens, output_tokens)
    }

    fn extract_rate_limit_info(&self, headers: &HeaderMap) -> Option<RateLimitInfo> {
        let info = RateLimitInfo {
            remaining: header_u64(headers, "anthropic-ratelimit-requests-remaining"),
            retry_after: retry_after_from_headers(headers),
        };
        (info != RateLimitInfo::default()).then_some(info)
    }
}
