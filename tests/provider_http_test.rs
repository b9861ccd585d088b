//! Provider clients against a mocked HTTP API.
//!
//! Covers request shape, success parsing, status mapping and a full engine run
//! over real image analysis.

mod common;

use aperture_core::config::{ApertureConfig, ProviderKind};
use aperture_core::credentials::StaticCredentialStore;
use aperture_core::orchestration::EngineState;
use aperture_core::services::{
    AnthropicConfig, AnthropicProvider, OpenAiConfig, OpenAiProvider, ProviderClient,
    MAX_ADVISORY_WAIT,
};
use aperture_core::{EvaluationEngine, EvaluationStore, Placement, ProviderError, Subject};
use image::{GrayImage, Luma};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ASSESSMENT_TEXT: &str = r#"{"technical_quality": 8, "composition": 7, "commercial_potential": 6, "artistic_merit": 9, "placement": "both", "summary": "Clean geometric study", "strengths": ["contrast"], "improvements": [], "title": "Concrete stairs", "keywords": ["architecture"]}"#;

fn anthropic_body() -> serde_json::Value {
    serde_json::json!({
        "id": "msg_01",
        "type": "message",
        "role": "assistant",
        "content": [{ "type": "text", "text": ASSESSMENT_TEXT }],
        "usage": { "input_tokens": 1600, "output_tokens": 220 }
    })
}

fn anthropic(server: &MockServer) -> AnthropicProvider {
    AnthropicProvider::new(AnthropicConfig {
        base_url: server.uri(),
        timeout: Duration::from_secs(5),
        ..Default::default()
    })
    .expect("failed to create client")
}

fn key() -> SecretString {
    SecretString::from("sk-test".to_string())
}

#[tokio::test]
async fn test_anthropic_success() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(header("x-api-key", "sk-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(anthropic_body())
                .insert_header("anthropic-ratelimit-requests-remaining", "41"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let provider = anthropic(&server);
    let response = provider
        .evaluate("aGVsbG8=", "rate this", &key(), "claude-sonnet-4-5")
        .await
        .expect("evaluate failed");

    assert_eq!(response.assessment.placement, Placement::Both);
    assert_eq!(response.assessment.commerce.keywords, vec!["architecture"]);
    assert_eq!((response.input_tokens, response.output_tokens), (1600, 220));
    assert_eq!(response.rate_limit.and_then(|r| r.remaining), Some(41));

    let cost = provider.calculate_cost(response.input_tokens, response.output_tokens);
    assert!((cost - (1600.0 * 3.0 + 220.0 * 15.0) / 1_000_000.0).abs() < 1e-12);
}

#[tokio::test]
async fn test_anthropic_429_carries_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "7")
                .set_body_json(serde_json::json!({
                    "type": "error",
                    "error": { "type": "rate_limit_error", "message": "Number of requests has exceeded your rate limit" }
                })),
        )
        .mount(&server)
        .await;

    let err = anthropic(&server)
        .evaluate("aGVsbG8=", "rate this", &key(), "claude-sonnet-4-5")
        .await
        .unwrap_err();

    match err {
        ProviderError::RateLimited {
            retry_after,
            message,
        } => {
            assert_eq!(retry_after, Some(Duration::from_secs(7)));
            assert!(message.contains("rate limit"));
        }
        other => panic!("expected RateLimited, got {:?}", other),
    }
}

#[tokio::test]
async fn test_anthropic_status_mapping() {
    for (status, expected_code) in [
        (529, "overloaded_529"),
        (503, "overloaded_503"),
        (401, "authentication_failed"),
        (413, "invalid_request_413"),
    ] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;

        let err = anthropic(&server)
            .evaluate("aGVsbG8=", "rate this", &key(), "claude-sonnet-4-5")
            .await
            .unwrap_err();
        assert_eq!(err.code(), expected_code, "status {}", status);
    }
}

#[tokio::test]
async fn test_anthropic_timeout_maps_to_timeout() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(anthropic_body())
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let provider = AnthropicProvider::new(AnthropicConfig {
        base_url: server.uri(),
        timeout: Duration::from_millis(200),
        ..Default::default()
    })
    .unwrap();

    let err = provider
        .evaluate("aGVsbG8=", "rate this", &key(), "claude-sonnet-4-5")
        .await
        .unwrap_err();
    assert_eq!(err, ProviderError::Timeout(Duration::from_millis(200)));
}

#[tokio::test]
async fn test_openai_success_and_rate_limit() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": ASSESSMENT_TEXT } }],
            "usage": { "prompt_tokens": 900, "completion_tokens": 180 }
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429).insert_header("x-ratelimit-reset-requests", "1m30s"),
        )
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(OpenAiConfig {
        base_url: server.uri(),
        ..Default::default()
    })
    .unwrap();

    let response = provider
        .evaluate("aGVsbG8=", "rate this", &key(), "gpt-4o")
        .await
        .unwrap();
    assert_eq!(response.input_tokens, 900);
    assert_eq!(response.assessment.artistic_merit, 9.0);

    let err = provider
        .evaluate("aGVsbG8=", "rate this", &key(), "gpt-4o")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProviderError::RateLimited { retry_after: Some(d), .. } if d == Duration::from_secs(90)
    ));
}

#[tokio::test]
async fn test_engine_end_to_end_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(anthropic_body()))
        .expect(2)
        .mount(&server)
        .await;

    let (store, dir) = common::create_test_store().await;
    let artifact_root = dir.path().join("artifacts");
    std::fs::create_dir_all(&artifact_root).unwrap();

    // A sharp checkerboard and a frame whose artifact was never written
    GrayImage::from_fn(64, 64, |x, y| {
        if (x / 8 + y / 8) % 2 == 0 {
            Luma([230])
        } else {
            Luma([20])
        }
    })
    .save(artifact_root.join("checker.png"))
    .unwrap();

    let present = Subject::new("checker.png", "DSC_0001.NEF");
    let again = Subject::new("checker.png", "DSC_0001_v2.NEF");
    let absent = Subject::new("missing.png", "DSC_0002.NEF");
    for s in [&present, &again, &absent] {
        store.insert_subject(s).await.unwrap();
    }

    let mut config = ApertureConfig::default();
    config.provider.kind = ProviderKind::Anthropic;
    config.provider.base_url = Some(server.uri());
    config.engine.inter_request_delay_secs = 0.0;
    config.storage.artifact_root = artifact_root;

    let engine = EvaluationEngine::from_config(
        &config,
        store.clone(),
        Arc::new(StaticCredentialStore::new().with("anthropic", "sk-test")),
    )
    .unwrap();

    engine
        .enqueue(vec![present.clone(), absent.clone(), again.clone()])
        .unwrap();
    engine.start().await.unwrap();
    let report = engine.wait().await.unwrap();

    assert_eq!((report.succeeded, report.failed), (2, 1));

    let ok = store.current_result(present.id).await.unwrap().unwrap();
    let scores = ok.scores.unwrap();
    // 8*0.30 + 7*0.25 + 6*0.25 + 9*0.20
    assert!((scores.overall - 7.45).abs() < 1e-9);
    assert_eq!(ok.provider, "anthropic");
    assert_eq!(ok.model, "claude-sonnet-4-5");
    assert!(ok.cost_usd > 0.0);

    let failed = store.current_result(absent.id).await.unwrap().unwrap();
    assert_eq!(failed.error_code.as_deref(), Some("artifact_not_found"));
}

#[tokio::test]
async fn test_huge_retry_after_is_capped_and_run_stays_controllable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1e30"))
        .mount(&server)
        .await;

    let err = anthropic(&server)
        .evaluate("aGVsbG8=", "rate this", &key(), "claude-sonnet-4-5")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProviderError::RateLimited { retry_after: Some(d), .. } if d == MAX_ADVISORY_WAIT
    ));

    let (store, dir) = common::create_test_store().await;
    let artifact_root = dir.path().join("artifacts");
    std::fs::create_dir_all(&artifact_root).unwrap();
    GrayImage::from_fn(32, 32, |x, _| Luma([(x * 8) as u8]))
        .save(artifact_root.join("ramp.png"))
        .unwrap();

    let first = Subject::new("ramp.png", "DSC_0100.NEF");
    let second = Subject::new("ramp.png", "DSC_0101.NEF");
    for s in [&first, &second] {
        store.insert_subject(s).await.unwrap();
    }

    let mut config = ApertureConfig::default();
    config.provider.kind = ProviderKind::Anthropic;
    config.provider.base_url = Some(server.uri());
    config.engine.inter_request_delay_secs = 0.0;
    config.storage.artifact_root = artifact_root;

    let engine = EvaluationEngine::from_config(
        &config,
        store.clone(),
        Arc::new(StaticCredentialStore::new().with("anthropic", "sk-test")),
    )
    .unwrap();

    engine.enqueue(vec![first.clone(), second.clone()]).unwrap();
    let mut updates = engine.subscribe();
    engine.start().await.unwrap();

    let waiting = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(status) = updates.next().await {
            if status.message.starts_with("Rate limited") {
                return status.message;
            }
        }
        String::new()
    })
    .await
    .expect("no rate-limit wait announced");
    assert!(waiting.contains("waiting 3600 seconds"));

    engine.cancel().unwrap();
    let report = engine.wait().await.unwrap();
    assert!(report.cancelled);
    assert_eq!(engine.status().state, EngineState::Cancelled);

    let session = &engine.sessions(1).await.unwrap()[0];
    assert!(session.is_closed());
    assert_eq!(session.failure_count, 1);

    let failed = store.current_result(first.id).await.unwrap().unwrap();
    assert_eq!(failed.error_code.as_deref(), Some("cancelled"));
    assert!(store.history(second.id).await.unwrap().is_empty());
}
