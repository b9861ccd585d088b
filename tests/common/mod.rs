//! Common test utilities and helpers

#![allow(dead_code)]

use aperture_core::analysis::{
    ArtifactStore, SaliencyAnalyzer, SaliencySummary, ShotIntent, StaticPromptSource,
    TechnicalAnalyzer, TechnicalMetrics,
};
use aperture_core::config::EngineSettings;
use aperture_core::credentials::StaticCredentialStore;
use aperture_core::error::{PipelineError, ProviderError};
use aperture_core::orchestration::{EvaluationEngine, EvaluationPipeline};
use aperture_core::services::{ProviderAssessment, ProviderClient, ProviderResponse, RateLimitInfo};
use aperture_core::types::{CommerceMetadata, Narrative, Placement, ScoreWeights};
use aperture_core::{EvaluationStore, SqliteStore, Subject};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use secrecy::SecretString;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Create a SQLite store in a fresh temporary directory
pub async fn create_test_store() -> (Arc<SqliteStore>, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = SqliteStore::open(temp_dir.path().join("aperture.db"))
        .await
        .expect("Failed to open test store");
    (Arc::new(store), temp_dir)
}

/// Insert `n` subjects named `img_<i>.jpg`
pub async fn import_subjects(store: &SqliteStore, n: usize) -> Vec<Subject> {
    let mut subjects = Vec::with_capacity(n);
    for i in 0..n {
        let subject = Subject::new(format!("img_{}.jpg", i), format!("IMG_{:04}.CR3", i));
        store.insert_subject(&subject).await.expect("insert subject");
        subjects.push(subject);
    }
    subjects
}

pub fn rate_limited(secs: u64) -> ProviderError {
    ProviderError::RateLimited {
        retry_after: Some(Duration::from_secs(secs)),
        message: "rate_limit_error".to_string(),
    }
}

pub fn overloaded() -> ProviderError {
    ProviderError::Overloaded {
        status: 529,
        message: "Overloaded".to_string(),
    }
}

pub fn unauthorized() -> ProviderError {
    ProviderError::Authentication("invalid x-api-key".to_string())
}

pub fn good_assessment() -> ProviderAssessment {
    ProviderAssessment {
        technical_quality: 8.0,
        composition: 7.0,
        commercial_potential: 6.0,
        artistic_merit: 9.0,
        placement: Placement::Portfolio,
        narrative: Narrative {
            summary: "Quiet harbour at dawn".to_string(),
            strengths: vec!["soft light".to_string()],
            improvements: vec!["straighten horizon".to_string()],
        },
        commerce: CommerceMetadata {
            title: Some("Harbour at dawn".to_string()),
            description: None,
            keywords: vec!["harbour".to_string(), "dawn".to_string()],
        },
    }
}

/// Provider that replays scripted failures, then succeeds
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<ProviderError>>,
    calls: Mutex<Vec<Instant>>,
    cancel_on_call: Mutex<Option<(usize, CancellationToken)>>,
    panic_on_call: Mutex<Option<usize>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls fail with these errors, in order; later calls succeed
    pub fn with_failures(failures: Vec<ProviderError>) -> Self {
        Self {
            script: Mutex::new(failures.into()),
            ..Default::default()
        }
    }

    /// Cancel `token` while the `n`th call (1-based) is in flight
    pub fn cancel_during_call(&self, n: usize, token: CancellationToken) {
        *self.cancel_on_call.lock().unwrap() = Some((n, token));
    }

    /// Panic inside the `n`th call (1-based)
    pub fn panic_on_call(&self, n: usize) {
        *self.panic_on_call.lock().unwrap() = Some(n);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Seconds between consecutive calls
    pub fn gaps(&self) -> Vec<u64> {
        self.calls
            .lock()
            .unwrap()
            .windows(2)
            .map(|w| (w[1] - w[0]).as_secs())
            .collect()
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    fn provider_id(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model-1"
    }

    async fn evaluate(
        &self,
        _encoded_artifact: &str,
        _prompt: &str,
        _credential: &SecretString,
        _model: &str,
    ) -> Result<ProviderResponse, ProviderError> {
        let call_number = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Instant::now());
            calls.len()
        };

        if let Some((n, token)) = self.cancel_on_call.lock().unwrap().as_ref() {
            if *n == call_number {
                token.cancel();
            }
        }

        let blow_up = *self.panic_on_call.lock().unwrap() == Some(call_number);
        if blow_up {
            panic!("provider blew up on call {}", call_number);
        }

        if let Some(err) = self.script.lock().unwrap().pop_front() {
            return Err(err);
        }

        Ok(ProviderResponse {
            assessment: good_assessment(),
            input_tokens: 1_000,
            output_tokens: 250,
            raw_response: "{}".to_string(),
            rate_limit: None,
        })
    }

    fn calculate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * 3.0 + output_tokens as f64 * 15.0) / 1_000_000.0
    }

    fn extract_rate_limit_info(&self, _headers: &HeaderMap) -> Option<RateLimitInfo> {
        None
    }
}

/// Artifact store serving fixed bytes, with optional missing artifacts
#[derive(Default)]
pub struct MemoryArtifacts {
    missing: HashSet<String>,
}

impl MemoryArtifacts {
    pub fn missing(paths: &[&str]) -> Self {
        Self {
            missing: paths.iter().map(|p| p.to_string()).collect(),
        }
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifacts {
    async fn load_processed_artifact(&self, subject: &Subject) -> Result<Vec<u8>, PipelineError> {
        let key = subject.artifact_path.to_string_lossy().to_string();
        if self.missing.contains(&key) {
            return Err(PipelineError::ArtifactNotFound(key));
        }
        Ok(b"processed-jpeg-bytes".to_vec())
    }
}

pub struct FixedTechnical;

impl TechnicalAnalyzer for FixedTechnical {
    fn analyze(&self, _artifact: &[u8]) -> Result<TechnicalMetrics, PipelineError> {
        Ok(TechnicalMetrics {
            sharpness: 250.0,
            is_blurry: false,
            exposure: 0.5,
            noise: 0.8,
            contrast: 0.4,
            intent: ShotIntent::Standard,
        })
    }
}

/// Analyzer that rejects every artifact
pub struct BrokenTechnical;

impl TechnicalAnalyzer for BrokenTechnical {
    fn analyze(&self, _artifact: &[u8]) -> Result<TechnicalMetrics, PipelineError> {
        Err(PipelineError::Analysis("unsupported image format".to_string()))
    }
}

pub struct NoSaliency;

impl SaliencyAnalyzer for NoSaliency {
    fn analyze(&self, _artifact: &[u8]) -> Result<Option<SaliencySummary>, PipelineError> {
        Ok(None)
    }
}

pub fn pipeline_with(
    provider: Arc<ScriptedProvider>,
    artifacts: MemoryArtifacts,
) -> Arc<EvaluationPipeline> {
    Arc::new(EvaluationPipeline::new(
        Arc::new(artifacts),
        Arc::new(FixedTechnical),
        Arc::new(NoSaliency),
        provider,
        ScoreWeights::default(),
    ))
}

/// Engine settings with the given batch size and delay, default retry policy
pub fn settings(batch_size: usize, delay_secs: f64) -> EngineSettings {
    EngineSettings {
        batch_size,
        inter_request_delay_secs: delay_secs,
        ..Default::default()
    }
}

pub fn engine_with(
    store: Arc<SqliteStore>,
    pipeline: Arc<EvaluationPipeline>,
    settings: EngineSettings,
) -> EvaluationEngine {
    EvaluationEngine::new(
        store,
        pipeline,
        Arc::new(StaticCredentialStore::new().with("scripted", "sk-test")),
        Arc::new(StaticPromptSource::default()),
        settings,
    )
}
