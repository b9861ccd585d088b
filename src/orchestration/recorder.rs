//! Result recorder: writes one evaluation outcome into the entity graph
//!
//! The recording rules live in [`Recorder::apply`], which runs against an open
//! store transaction through [`RecordTransaction`]. Stores call it inside a
//! single commit, so either every step lands or none does.
//!
//! Rules, in order:
//! 1. The new result is current if it succeeded, or if the subject has no
//!    current result yet. A failure never displaces an existing current.
//! 2. If the new result becomes current, the previous current is cleared.
//! 3. A result following a failed current points at it via `parent_result_id`.
//! 4. The subject's evaluation count and timestamps are bumped.
//! 5. With an active session, the result is attached and the session's
//!    success/failure counter incremented.
//! 6. Successful results add their tokens and cost to the usage totals.

use crate::error::{ApertureError, EvaluationError, Result};
use crate::storage::EvaluationStore;
use crate::types::{
    CommerceMetadata, EvaluationResult, EvaluationStatus, Narrative, Placement, ResultId, Scores,
    SessionId, SubjectId,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

/// Successful evaluation, ready to persist
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub scores: Scores,
    pub placement: Placement,
    pub narrative: Narrative,
    pub commerce: CommerceMetadata,
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub processing_time_ms: u64,
    pub retry_count: u32,
}

/// Terminal failure, ready to persist
#[derive(Debug, Clone, PartialEq)]
pub struct FailureDetails {
    pub error_code: String,
    pub error_message: String,
    pub provider: String,
    pub model: String,
    pub retry_count: u32,
    pub processing_time_ms: u64,
}

impl FailureDetails {
    pub fn from_error(
        err: &EvaluationError,
        provider: &str,
        model: &str,
        retry_count: u32,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            error_code: err.code(),
            error_message: err.to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
            retry_count,
            processing_time_ms,
        }
    }
}

/// Final outcome of one subject after the retry policy resolved
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Assessment),
    Failure(FailureDetails),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

/// Everything needed to record one outcome
#[derive(Debug, Clone)]
pub struct RecordRequest {
    pub subject_id: SubjectId,
    pub outcome: Outcome,
    pub session_id: Option<SessionId>,
    pub recorded_at: DateTime<Utc>,
}

/// Reference to a subject's current result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentRef {
    pub id: ResultId,
    pub status: EvaluationStatus,
}

/// Primitive operations a store exposes inside an open transaction
pub trait RecordTransaction {
    fn subject_exists(&mut self, subject_id: SubjectId) -> Result<bool>;

    fn current_result(&mut self, subject_id: SubjectId) -> Result<Option<CurrentRef>>;

    fn clear_current(&mut self, result_id: ResultId) -> Result<()>;

    /// Append a result to its subject's history
    fn insert_result(&mut self, result: &EvaluationResult) -> Result<()>;

    /// Bump evaluation count and first/last evaluated timestamps
    fn touch_subject(&mut self, subject_id: SubjectId, at: DateTime<Utc>) -> Result<()>;

    /// Attach a result to an open session and bump its counters.
    /// Must fail if the session is missing or already closed.
    fn attach_to_session(&mut self, session_id: SessionId, result: &EvaluationResult)
        -> Result<()>;

    fn add_usage(
        &mut self,
        input_tokens: u64,
        output_tokens: u64,
        cost_usd: f64,
        at: DateTime<Utc>,
    ) -> Result<()>;
}

/// Stateless rule set applied inside a store transaction
pub struct Recorder;

impl Recorder {
    /// Apply one outcome. Any error must abort the surrounding transaction.
    pub fn apply(
        tx: &mut dyn RecordTransaction,
        request: &RecordRequest,
    ) -> Result<EvaluationResult> {
        let subject_id = request.subject_id;
        if !tx.subject_exists(subject_id)? {
            return Err(ApertureError::NotFound(format!("subject {}", subject_id)));
        }

        let previous = tx.current_result(subject_id)?;
        let is_current = request.outcome.is_success() || previous.is_none();

        if is_current {
            if let Some(prev) = previous {
                tx.clear_current(prev.id)?;
            }
        }

        let parent_result_id = previous
            .filter(|p| p.status == EvaluationStatus::Failed)
            .map(|p| p.id);

        let result = Self::build_result(request, is_current, parent_result_id);

        tx.insert_result(&result)?;
        tx.touch_subject(subject_id, request.recorded_at)?;

        if let Some(session_id) = request.session_id {
            tx.attach_to_session(session_id, &result)?;
        }

        if let Outcome::Success(assessment) = &request.outcome {
            tx.add_usage(
                assessment.input_tokens,
                assessment.output_tokens,
                assessment.cost_usd,
                request.recorded_at,
            )?;
        }

        debug!(
            "Recorded {} result {} for subject {} (current: {})",
            result.status.as_str(),
            result.id,
            subject_id,
            result.is_current
        );
        Ok(result)
    }

    fn build_result(
        request: &RecordRequest,
        is_current: bool,
        parent_result_id: Option<ResultId>,
    ) -> EvaluationResult {
        let base = EvaluationResult {
            id: ResultId::new(),
            subject_id: request.subject_id,
            session_id: request.session_id,
            evaluated_at: request.recorded_at,
            scores: None,
            placement: None,
            narrative: Narrative::default(),
            commerce: CommerceMetadata::default(),
            provider: String::new(),
            model: String::new(),
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
            processing_time_ms: 0,
            status: EvaluationStatus::Failed,
            error_code: None,
            error_message: None,
            retry_count: 0,
            parent_result_id,
            is_current,
        };

        match &request.outcome {
            Outcome::Success(a) => EvaluationResult {
                scores: Some(a.scores),
                placement: Some(a.placement),
                narrative: a.narrative.clone(),
                commerce: a.commerce.clone(),
                provider: a.provider.clone(),
                model: a.model.clone(),
                input_tokens: a.input_tokens,
                output_tokens: a.output_tokens,
                cost_usd: a.cost_usd,
                processing_time_ms: a.processing_time_ms,
                status: EvaluationStatus::Completed,
                retry_count: a.retry_count,
                ..base
            },
            Outcome::Failure(f) => EvaluationResult {
                provider: f.provider.clone(),
                model: f.model.clone(),
                processing_time_ms: f.processing_time_ms,
                error_code: Some(f.error_code.clone()),
                error_message: Some(f.error_message.clone()),
                retry_count: f.retry_count,
                ..base
            },
        }
    }
}

/// Store-backed recorder used by the scheduler and pipeline
#[derive(Clone)]
pub struct ResultRecorder {
    store: Arc<dyn EvaluationStore>,
}

impl ResultRecorder {
    pub fn new(store: Arc<dyn EvaluationStore>) -> Self {
        Self { store }
    }

    /// Record an outcome atomically. Errors are always persistence errors.
    pub async fn record(
        &self,
        subject_id: SubjectId,
        outcome: Outcome,
        session_id: Option<SessionId>,
    ) -> Result<EvaluationResult> {
        let request = RecordRequest {
            subject_id,
            outcome,
            session_id,
            recorded_at: Utc::now(),
        };

        self.store.record(request).await.map_err(|e| match e {
            ApertureError::Persistence(_) => e,
            other => ApertureError::Persistence(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    /// In-memory transaction for exercising the rules without a database
    #[derive(Default)]
    struct FakeTx {
        subjects: HashMap<SubjectId, (u32, Option<DateTime<Utc>>, Option<DateTime<Utc>>)>,
        results: Vec<EvaluationResult>,
        open_sessions: HashSet<SessionId>,
        session_counts: HashMap<SessionId, (u32, u32)>,
        usage: (u64, u64, f64),
    }

    impl RecordTransaction for FakeTx {
        fn subject_exists(&mut self, subject_id: SubjectId) -> Result<bool> {
            Ok(self.subjects.contains_key(&subject_id))
        }

        fn current_result(&mut self, subject_id: SubjectId) -> Result<Option<CurrentRef>> {
            Ok(self
                .results
                .iter()
                .find(|r| r.subject_id == subject_id && r.is_current)
                .map(|r| CurrentRef {
                    id: r.id,
                    status: r.status,
                }))
        }

        fn clear_current(&mut self, result_id: ResultId) -> Result<()> {
            for r in self.results.iter_mut().filter(|r| r.id == result_id) {
                r.is_current = false;
            }
            Ok(())
        }

        fn insert_result(&mut self, result: &EvaluationResult) -> Result<()> {
            self.results.push(result.clone());
            Ok(())
        }

        fn touch_subject(&mut self, subject_id: SubjectId, at: DateTime<Utc>) -> Result<()> {
            let entry = self.subjects.get_mut(&subject_id).unwrap();
            entry.0 += 1;
            entry.1.get_or_insert(at);
            entry.2 = Some(at);
            Ok(())
        }

        fn attach_to_session(
            &mut self,
            session_id: SessionId,
            result: &EvaluationResult,
        ) -> Result<()> {
            if !self.open_sessions.contains(&session_id) {
                return Err(ApertureError::Persistence("session closed".to_string()));
            }
            let counts = self.session_counts.entry(session_id).or_default();
            if result.is_success() {
                counts.0 += 1;
            } else {
                counts.1 += 1;
            }
            Ok(())
        }

        fn add_usage(&mut self, i: u64, o: u64, c: f64, _at: DateTime<Utc>) -> Result<()> {
            self.usage.0 += i;
            self.usage.1 += o;
            self.usage.2 += c;
            Ok(())
        }
    }

    fn success() -> Outcome {
        Outcome::Success(Assessment {
            scores: Scores::default(),
            placement: Placement::Portfolio,
            narrative: Narrative::default(),
            commerce: CommerceMetadata::default(),
            provider: "anthropic".to_string(),
            model: "test-model".to_string(),
            input_tokens: 1000,
            output_tokens: 200,
            cost_usd: 0.006,
            processing_time_ms: 1500,
            retry_count: 0,
        })
    }

    fn failure() -> Outcome {
        Outcome::Failure(FailureDetails {
            error_code: "authentication_failed".to_string(),
            error_message: "bad key".to_string(),
            provider: "anthropic".to_string(),
            model: "test-model".to_string(),
            retry_count: 0,
            processing_time_ms: 10,
        })
    }

    fn request(subject_id: SubjectId, outcome: Outcome) -> RecordRequest {
        RecordRequest {
            subject_id,
            outcome,
            session_id: None,
            recorded_at: Utc::now(),
        }
    }

    fn tx_with_subject() -> (FakeTx, SubjectId) {
        let mut tx = FakeTx::default();
        let id = SubjectId::new();
        tx.subjects.insert(id, (0, None, None));
        (tx, id)
    }

    fn current_count(tx: &FakeTx, id: SubjectId) -> usize {
        tx.results
            .iter()
            .filter(|r| r.subject_id == id && r.is_current)
            .count()
    }

    #[test]
    fn test_first_failure_becomes_current() {
        let (mut tx, id) = tx_with_subject();
        let result = Recorder::apply(&mut tx, &request(id, failure())).unwrap();

        assert!(result.is_current);
        assert_eq!(result.error_code.as_deref(), Some("authentication_failed"));
        assert_eq!(tx.usage, (0, 0, 0.0));
    }

    #[test]
    fn test_failure_never_displaces_success() {
        let (mut tx, id) = tx_with_subject();
        let first = Recorder::apply(&mut tx, &request(id, success())).unwrap();
        let second = Recorder::apply(&mut tx, &request(id, failure())).unwrap();

        assert!(!second.is_current);
        assert_eq!(second.parent_result_id, None);
        assert!(tx.results.iter().any(|r| r.id == first.id && r.is_current));
        assert_eq!(current_count(&tx, id), 1);
        assert_eq!(tx.subjects[&id].0, 2);
    }

    #[test]
    fn test_failure_never_displaces_failure() {
        let (mut tx, id) = tx_with_subject();
        let first = Recorder::apply(&mut tx, &request(id, failure())).unwrap();
        let second = Recorder::apply(&mut tx, &request(id, failure())).unwrap();

        assert!(first.is_current);
        assert!(!second.is_current);
        assert_eq!(second.parent_result_id, Some(first.id));
        assert!(tx.results.iter().any(|r| r.id == first.id && r.is_current));
        assert_eq!(current_count(&tx, id), 1);
    }

    #[test]
    fn test_success_after_failure_links_parent() {
        let (mut tx, id) = tx_with_subject();
        let failed = Recorder::apply(&mut tx, &request(id, failure())).unwrap();
        let ok = Recorder::apply(&mut tx, &request(id, success())).unwrap();

        assert!(ok.is_current);
        assert_eq!(ok.parent_result_id, Some(failed.id));
        assert_eq!(current_count(&tx, id), 1);
        assert_eq!(tx.usage.0, 1000);
    }

    #[test]
    fn test_session_counters() {
        let (mut tx, id) = tx_with_subject();
        let session = SessionId::new();
        tx.open_sessions.insert(session);

        for outcome in [success(), failure(), success()] {
            let mut req = request(id, outcome);
            req.session_id = Some(session);
            Recorder::apply(&mut tx, &req).unwrap();
        }

        assert_eq!(tx.session_counts[&session], (2, 1));
    }

    #[test]
    fn test_unknown_subject_rejected() {
        let mut tx = FakeTx::default();
        let err = Recorder::apply(&mut tx, &request(SubjectId::new(), success())).unwrap_err();
        assert!(matches!(err, ApertureError::NotFound(_)));
        assert!(tx.results.is_empty());
    }
}
