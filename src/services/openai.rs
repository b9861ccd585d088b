//! OpenAI Chat Completions provider

use super::provider::{
    advisory_wait, header_u64, map_status, parse_assessment, retry_after_from_headers, ModelPricing,
    ProviderClient, ProviderResponse, RateLimitInfo,
};
use crate::error::{ApertureError, ProviderError, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub model: String,
    pub base_url: String,
    pub max_tokens: usize,
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_tokens: 2048,
            timeout: Duration::from_secs(120),
        }
    }
}

pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    messages: Vec<serde_json::Value>,
    response_format: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApertureError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn pricing(model: &str) -> ModelPricing {
        if model.contains("mini") {
            ModelPricing::new(0.15, 0.60)
        } else {
            ModelPricing::new(2.50, 10.0)
        }
    }
}

/// Parse OpenAI reset durations such as `"1s"`, `"6m0s"` or `"250ms"`
pub fn parse_reset_duration(value: &str) -> Option<Duration> {
    let mut total = 0f64;
    let mut number = String::new();
    let mut chars = value.trim().chars().peekable();
    let mut seen_unit = false;

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }
        let amount: f64 = number.parse().ok()?;
        number.clear();
        let factor = match c {
            'h' => 3600.0,
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                0.001
            }
            'm' => 60.0,
            's' => 1.0,
            _ => return None,
        };
        total += amount * factor;
        seen_unit = true;
    }

    if !seen_unit || !number.is_empty() {
        return None;
    }
    advisory_wait(total)
}

#[async_trait]
impl ProviderClient for OpenAiProvider {
    fn provider_id(&self) -> &str {
        "openai"
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
        debug!("Calling OpenAI API (model: {})", model);

        let request = ChatRequest {
            model,
            max_tokens: self.config.max_tokens,
            messages: vec![json!({
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    {
                        "type": "image_url",
                        "image_url": { "url": format!("data:image/jpeg;base64,{}", encoded_artifact) }
                    }
                ]
            })],
            response_format: json!({ "type": "json_object" }),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(credential.expose_secret())
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
            warn!("OpenAI API returned {}", status);
            return Err(map_status(status.as_u16(), retry_after, &body));
        }

        let raw = response.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&raw)
            .map_err(|e| ProviderError::MalformedResponse(format!("Failed to parse response: {}", e)))?;

        let text = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ProviderError::MalformedResponse("Empty response from API".to_string()))?;

        let assessment = parse_assessment(&text)?;

        Ok(ProviderResponse {
            assessment,
            input_tokens: parsed.usage.prompt_tokens,
            output_tokens: parsed.usage.completion_tokens,
            raw_response: text,
            rate_limit,
        })
    }

    fn calculate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        Self::pricing(&self.config.model).cost(input_tokens, output_tokens)
    }

    fn extract_rate_limit_info(&self, headers: &HeaderMap) -> Option<RateLimitInfo> {
        let retry_after = retry_after_from_headers(headers).or_else(|| {
            headers
                .get("x-ratelimit-reset-requests")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_reset_duration)
        });
        let info = RateLimitInfo {
            remaining: header_u64(headers, "x-ratelimit-remaining-requests"),
            retry_after,
        };
        (info != RateLimitInfo::default()).then_some(info)
    }
}
