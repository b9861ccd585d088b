//! Provider client contract shared by all remote scoring services
//!
//! A provider takes an encoded image plus prompt and returns rubric scores,
//! narrative, listing metadata and token usage. Implementations map their HTTP
//! failures onto [`ProviderError`] so the retry policy can classify them.

use crate::error::ProviderError;
use crate::types::{CommerceMetadata, Narrative, Placement};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use secrecy::SecretString;
use serde::Deserialize;
use std::time::Duration;

/// Longest advisory wait honoured from provider headers
pub const MAX_ADVISORY_WAIT: Duration = Duration::from_secs(3600);

/// Rate-limit telemetry extracted from response headers
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RateLimitInfo {
    /// Requests left in the current window
    pub remaining: Option<u64>,

    /// Advisory wait before the next request
    pub retry_after: Option<Duration>,
}

/// Structured assessment parsed from the model's reply
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderAssessment {
    pub technical_quality: f64,
    pub composition: f64,
    pub commercial_potential: f64,
    pub artistic_merit: f64,
    pub placement: Placement,
    pub narrative: Narrative,
    pub commerce: CommerceMetadata,
}

/// Successful provider call
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub assessment: ProviderAssessment,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Model text exactly as returned
    pub raw_response: String,
    pub rate_limit: Option<RateLimitInfo>,
}

/// Remote scoring service; exactly one variant is active per engine
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Identifier stored on results ("anthropic", "openai", ...)
    fn provider_id(&self) -> &str;

    /// Model used when the caller does not override it
    fn model(&self) -> &str;

    /// Score one base64-encoded JPEG
    async fn evaluate(
        &self,
        encoded_artifact: &str,
        prompt: &str,
        credential: &SecretString,
        model: &str,
    ) -> Result<ProviderResponse, ProviderError>;

    /// Cost in USD for a call with the given token counts
    fn calculate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64;

    /// Pull rate-limit telemetry out of response headers
    fn extract_rate_limit_info(&self, headers: &HeaderMap) -> Option<RateLimitInfo>;
}

/// Per-million-token prices in USD
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl ModelPricing {
    pub const fn new(input_per_mtok: f64, output_per_mtok: f64) -> Self {
        Self {
            input_per_mtok,
            output_per_mtok,
        }
    }

    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * self.input_per_mtok + output_tokens as f64 * self.output_per_mtok)
            / 1_000_000.0
    }
}

/// Parse a `retry-after` header given in seconds
pub fn retry_after_from_headers(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .and_then(advisory_wait)
}

/// Seconds from a provider header as a wait, capped at [`MAX_ADVISORY_WAIT`]
pub fn advisory_wait(secs: f64) -> Option<Duration> {
    if secs.is_nan() || secs < 0.0 {
        return None;
    }
    Some(
        Duration::try_from_secs_f64(secs)
            .map_or(MAX_ADVISORY_WAIT, |d| d.min(MAX_ADVISORY_WAIT)),
    )
}

/// Read an integer header
pub fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Map a non-success HTTP status onto the provider error taxonomy
pub fn map_status(status: u16, retry_after: Option<Duration>, body: &str) -> ProviderError {
    let message = error_message_from_body(body);
    match status {
        429 => ProviderError::RateLimited {
            retry_after,
            message,
        },
        500 | 502 | 503 | 529 => ProviderError::Overloaded { status, message },
        401 | 403 => ProviderError::Authentication(message),
        400 | 404 | 413 | 422 => ProviderError::InvalidRequest { status, message },
        _ => ProviderError::Unexpected { status, message },
    }
}

/// Both providers wrap errors as `{"error": {"message": ...}}`
fn error_message_from_body(body: &str) -> String {
    #[derive(Deserialize)]
    struct Envelope {
        error: Detail,
    }
    #[derive(Deserialize)]
    struct Detail {
        message: String,
    }

    match serde_json::from_str::<Envelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) if body.trim().is_empty() => "no response body".to_string(),
        Err(_) => body.chars().take(500).collect(),
    }
}

#[derive(Debug, Deserialize)]
struct AssessmentPayload {
    technical_quality: f64,
    composition: f64,
    commercial_potential: f64,
    artistic_merit: f64,
    placement: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    improvements: Vec<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    keywords: Vec<String>,
}

/// Parse the JSON assessment out of a model reply
///
/// Models sometimes wrap the object in prose or code fences, so the outermost
/// `{...}` span is used.
pub fn parse_assessment(text: &str) -> Result<ProviderAssessment, ProviderError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if e > s => &text[s..=e],
        _ => {
            return Err(ProviderError::MalformedResponse(
                "no JSON object in model reply".to_string(),
            ))
        }
    };

    let payload: AssessmentPayload = serde_json::from_str(json)
        .map_err(|e| ProviderError::MalformedResponse(format!("invalid assessment JSON: {}", e)))?;

    let placement = payload
        .placement
        .parse::<Placement>()
        .map_err(ProviderError::MalformedResponse)?;

    Ok(ProviderAssessment {
        technical_quality: payload.technical_quality,
        composition: payload.composition,
        commercial_potential: payload.commercial_potential,
        artistic_merit: payload.artistic_merit,
        placement,
        narrative: Narrative {
            summary: payload.summary,
            strengths: payload.strengths,
            improvements: payload.improvements,
        },
        commerce: CommerceMetadata {
            title: payload.title,
            description: payload.description,
            keywords: payload.keywords,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_parse_assessment_inside_code_fence() {
        let reply = r#"Here is my evaluation:
```json
{"technical_quality": 8, "composition": 7.5, "commercial_potential": 6,
 "artistic_merit": 7, "placement": "both", "summary": "Crisp alpine scene",
 "strengths": ["light"], "keywords": ["mountain", "snow"]}
```"#;

        let assessment = parse_assessment(reply).unwrap();
        assert_eq!(assessment.placement, Placement::Both);
        assert_eq!(assessment.composition, 7.5);
        assert_eq!(assessment.commerce.keywords, vec!["mountain", "snow"]);
        assert!(assessment.narrative.improvements.is_empty());
    }

    #[test]
    fn test_parse_assessment_rejects_prose() {
        let err = parse_assessment("I cannot evaluate this image.").unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse(_)));
    }

    #[test]
    fn test_retry_after_is_capped() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("1e30"));
        assert_eq!(retry_after_from_headers(&headers), Some(MAX_ADVISORY_WAIT));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("inf"));
        assert_eq!(retry_after_from_headers(&headers), Some(MAX_ADVISORY_WAIT));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("NaN"));
        assert_eq!(retry_after_from_headers(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("-3"));
        assert_eq!(retry_after_from_headers(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("2.5"));
        assert_eq!(retry_after_from_headers(&headers), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_status_mapping() {
        let body = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        assert_eq!(
            map_status(529, None, body),
            ProviderError::Overloaded {
                status: 529,
                message: "Overloaded".to_string()
            }
        );

        let limited = map_status(429, Some(Duration::from_secs(5)), "");
        assert!(matches!(
            limited,
            ProviderError::RateLimited { retry_after: Some(d), .. } if d == Duration::from_secs(5)
        ));

        assert!(matches!(map_status(401, None, ""), ProviderError::Authentication(_)));
        assert!(matches!(
            map_status(400, None, "bad"),
            ProviderError::InvalidRequest { status: 400, .. }
        ));
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(retry_after_from_headers(&headers), Some(Duration::from_secs(12)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(retry_after_from_headers(&headers), None);
    }

    #[test]
    fn test_pricing() {
        let pricing = ModelPricing::new(3.0, 15.0);
        let cost = pricing.cost(1_000_000, 100_000);
        assert!((cost - 4.5).abs() < 1e-9);
    }
}
