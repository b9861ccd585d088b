//! Batch scheduler
//!
//! Walks the queue in ordered batches on a single task, one provider call at
//! a time. Cancellation is checked before each batch and each subject; a call
//! already in flight finishes and is recorded first.

use crate::error::Result;
use crate::orchestration::classifier::RetryPolicy;
use crate::orchestration::pipeline::EvaluationPipeline;
use crate::orchestration::recorder::{FailureDetails, Outcome, ResultRecorder};
use crate::types::{SessionId, Subject};
use secrecy::SecretString;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Progress after one subject
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressEvent {
    /// 1-based batch index
    pub batch: usize,
    pub total_batches: usize,
    /// 1-based subject index across all batches
    pub index: usize,
    pub total: usize,
    /// `index / total`
    pub fraction: f64,
}

/// Events published while a run is in progress
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Progress(ProgressEvent),
    /// Human-readable status line ("waiting 60 seconds (retry 1/3)")
    Status(String),
}

/// Tally of a finished (or cancelled) run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RunReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Per-run inputs shared by every subject
pub struct RunContext {
    pub session_id: Option<SessionId>,
    pub prompt: String,
    pub credential: SecretString,
    pub cancel: CancellationToken,
}

/// Split `subjects` into ordered batches of at most `batch_size`
pub fn plan_batches(subjects: &[Subject], batch_size: usize) -> Vec<&[Subject]> {
    subjects.chunks(batch_size.max(1)).collect()
}

pub struct BatchScheduler {
    pipeline: Arc<EvaluationPipeline>,
    recorder: ResultRecorder,
    policy: RetryPolicy,
}

impl BatchScheduler {
    pub fn new(pipeline: Arc<EvaluationPipeline>, recorder: ResultRecorder, policy: RetryPolicy) -> Self {
        Self {
            pipeline,
            recorder,
            policy,
        }
    }

    /// Evaluate `subjects` in batches.
    ///
    /// Per-subject failures become failed results and the run continues. A
    /// persistence error aborts the run and is returned.
    pub async fn run(
        &self,
        subjects: &[Subject],
        batch_size: usize,
        inter_request_delay: Duration,
        ctx: &RunContext,
        events: mpsc::UnboundedSender<RunEvent>,
    ) -> Result<RunReport> {
        let batches = plan_batches(subjects, batch_size);
        let total_batches = batches.len();
        let total = subjects.len();
        let mut report = RunReport::default();

        info!(
            "Starting run: {} subjects in {} batches",
            total, total_batches
        );

        'batches: for (batch_idx, batch) in batches.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            debug!("Batch {}/{}", batch_idx + 1, total_batches);

            for (pos, subject) in batch.iter().enumerate() {
                if ctx.cancel.is_cancelled() {
                    report.cancelled = true;
                    break 'batches;
                }

                let index = report.processed + 1;
                let _ = events.send(RunEvent::Status(format!(
                    "Evaluating {} ({}/{})",
                    subject.original_filename, index, total
                )));

                let outcome = self.evaluate_one(subject, ctx, &events).await;
                let succeeded = outcome.is_success();
                self.recorder
                    .record(subject.id, outcome, ctx.session_id)
                    .await?;

                report.processed += 1;
                if succeeded {
                    report.succeeded += 1;
                } else {
                    report.failed += 1;
                }

                let _ = events.send(RunEvent::Progress(ProgressEvent {
                    batch: batch_idx + 1,
                    total_batches,
                    index,
                    total,
                    fraction: index as f64 / total as f64,
                }));

                let is_last = batch_idx + 1 == total_batches && pos + 1 == batch.len();
                if !is_last && !inter_request_delay.is_zero() {
                    tokio::select! {
                        _ = ctx.cancel.cancelled() => {}
                        _ = tokio::time::sleep(inter_request_delay) => {}
                    }
                }
            }
        }

        if report.cancelled {
            info!(
                "Run cancelled after {} of {} subjects",
                report.processed, total
            );
        } else {
            info!(
                "Run finished: {} succeeded, {} failed",
                report.succeeded, report.failed
            );
        }
        Ok(report)
    }

    /// Run one subject through the retry policy and build its final outcome
    async fn evaluate_one(
        &self,
        subject: &Subject,
        ctx: &RunContext,
        events: &mpsc::UnboundedSender<RunEvent>,
    ) -> Outcome {
        let started = Instant::now();
        let attempted = self
            .policy
            .execute(
                || self.pipeline.attempt(subject, &ctx.prompt, &ctx.credential),
                &ctx.cancel,
                |message| {
                    let _ = events.send(RunEvent::Status(message));
                },
            )
            .await;

        match attempted.outcome {
            Ok(mut assessment) => {
                assessment.retry_count = attempted.retry_count;
                Outcome::Success(assessment)
            }
            Err(err) => {
                warn!(
                    "Subject {} failed after {} retries: {}",
                    subject.id, attempted.retry_count, err
                );
                Outcome::Failure(FailureDetails::from_error(
                    &err,
                    self.pipeline.provider_id(),
                    self.pipeline.model(),
                    attempted.retry_count,
                    started.elapsed().as_millis() as u64,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subjects(n: usize) -> Vec<Subject> {
        (0..n)
            .map(|i| Subject::new(format!("{}.jpg", i), format!("{}.jpg", i)))
            .collect()
    }

    #[test]
    fn test_plan_batches_sizes() {
        let all = subjects(37);
        let sizes: Vec<usize> = plan_batches(&all, 15).iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![15, 15, 7]);
    }

    #[test]
    fn test_plan_batches_preserves_order() {
        let all = subjects(5);
        let flat: Vec<_> = plan_batches(&all, 2)
            .into_iter()
            .flat_map(|b| b.iter().map(|s| s.id))
            .collect();
        let expected: Vec<_> = all.iter().map(|s| s.id).collect();
        assert_eq!(flat, expected);
    }

    #[test]
    fn test_plan_batches_edges() {
        assert!(plan_batches(&[], 15).is_empty());
        assert_eq!(plan_batches(&subjects(15), 15).len(), 1);
        assert_eq!(plan_batches(&subjects(16), 15).len(), 2);
    }
}
