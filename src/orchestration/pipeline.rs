//! Single-subject evaluation pipeline
//!
//! artifact -> technical analysis -> saliency -> enriched prompt -> base64 ->
//! provider call -> cost. One attempt, no retries; errors come back unchanged
//! for the retry policy to classify.

use crate::analysis::{build_enriched_prompt, ArtifactStore, SaliencyAnalyzer, TechnicalAnalyzer};
use crate::error::{ApertureError, EvaluationError, PipelineError, Result};
use crate::orchestration::recorder::{Assessment, FailureDetails, Outcome, ResultRecorder};
use crate::services::ProviderClient;
use crate::types::{EvaluationResult, ScoreWeights, Scores, SessionId, Subject};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::SecretString;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Everything needed to evaluate one subject
pub struct EvaluationPipeline {
    artifacts: Arc<dyn ArtifactStore>,
    technical: Arc<dyn TechnicalAnalyzer>,
    saliency: Arc<dyn SaliencyAnalyzer>,
    provider: Arc<dyn ProviderClient>,
    weights: ScoreWeights,
}

impl EvaluationPipeline {
    pub fn new(
        artifacts: Arc<dyn ArtifactStore>,
        technical: Arc<dyn TechnicalAnalyzer>,
        saliency: Arc<dyn SaliencyAnalyzer>,
        provider: Arc<dyn ProviderClient>,
        weights: ScoreWeights,
    ) -> Self {
        Self {
            artifacts,
            technical,
            saliency,
            provider,
            weights,
        }
    }

    pub fn provider_id(&self) -> &str {
        self.provider.provider_id()
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    /// Run one evaluation attempt
    pub async fn attempt(
        &self,
        subject: &Subject,
        prompt: &str,
        credential: &SecretString,
    ) -> std::result::Result<Assessment, EvaluationError> {
        let started = Instant::now();

        let artifact = self.artifacts.load_processed_artifact(subject).await?;

        // Decoding and per-pixel passes stay off the async workers
        let technical = Arc::clone(&self.technical);
        let saliency = Arc::clone(&self.saliency);
        let (size, metrics, saliency, encoded) = tokio::task::spawn_blocking(move || {
            let metrics = technical.analyze(&artifact)?;
            let saliency = saliency.analyze(&artifact)?;
            let encoded = STANDARD.encode(&artifact);
            Ok::<_, PipelineError>((artifact.len(), metrics, saliency, encoded))
        })
        .await
        .map_err(|e| PipelineError::Analysis(format!("analysis task failed: {}", e)))??;

        let enriched = build_enriched_prompt(prompt, &metrics, saliency.as_ref());

        debug!(
            "Evaluating subject {} ({} bytes, sharpness {:.1})",
            subject.id, size, metrics.sharpness
        );

        let response = self
            .provider
            .evaluate(&encoded, &enriched, credential, self.model())
            .await?;

        if let Some(info) = response.rate_limit {
            if info.remaining == Some(0) {
                warn!("Provider reports no requests remaining in the current window");
            }
        }

        let cost_usd = self
            .provider
            .calculate_cost(response.input_tokens, response.output_tokens);

        let a = &response.assessment;
        let scores = Scores::weighted(
            a.technical_quality,
            a.composition,
            a.commercial_potential,
            a.artistic_merit,
            &self.weights,
        );

        Ok(Assessment {
            scores,
            placement: a.placement,
            narrative: a.narrative.clone(),
            commerce: a.commerce.clone(),
            provider: self.provider_id().to_string(),
            model: self.model().to_string(),
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            cost_usd,
            processing_time_ms: started.elapsed().as_millis() as u64,
            retry_count: 0,
        })
    }

    /// Evaluate one subject outside a scheduled run and record the outcome.
    ///
    /// A failed attempt is recorded as a failed result and then returned as
    /// [`ApertureError::Evaluation`].
    pub async fn evaluate(
        &self,
        recorder: &ResultRecorder,
        subject: &Subject,
        prompt: &str,
        credential: &SecretString,
        session_id: Option<SessionId>,
    ) -> Result<EvaluationResult> {
        let started = Instant::now();
        match self.attempt(subject, prompt, credential).await {
            Ok(assessment) => {
                recorder
                    .record(subject.id, Outcome::Success(assessment), session_id)
                    .await
            }
            Err(err) => {
                let details = FailureDetails::from_error(
                    &err,
                    self.provider_id(),
                    self.model(),
                    0,
                    started.elapsed().as_millis() as u64,
                );
                recorder
                    .record(subject.id, Outcome::Failure(details), session_id)
                    .await?;
                Err(ApertureError::Evaluation(err))
            }
        }
    }
}
