//! Storage layer for subjects, evaluation history, sessions and usage totals
//!
//! All writes to the subject/result/session graph go through one logical
//! writer. [`EvaluationStore::record`] is the only way to add a result and
//! must be atomic.

pub mod sqlite;

use crate::error::Result;
use crate::orchestration::recorder::RecordRequest;
use crate::types::{
    EvaluationResult, ResultId, Session, SessionId, Subject, SubjectId, UsageStats,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use sqlite::SqliteStore;

/// Persistent store backing the evaluation engine
#[async_trait]
pub trait EvaluationStore: Send + Sync {
    /// Store a newly imported subject
    async fn insert_subject(&self, subject: &Subject) -> Result<()>;

    async fn get_subject(&self, id: SubjectId) -> Result<Subject>;

    /// All subjects, oldest import first
    async fn list_subjects(&self) -> Result<Vec<Subject>>;

    /// Update user-owned metadata (favorite flag, notes)
    async fn update_subject_metadata(
        &self,
        id: SubjectId,
        is_favorite: bool,
        notes: Option<String>,
    ) -> Result<()>;

    /// Delete a subject together with its entire history
    async fn delete_subject(&self, id: SubjectId) -> Result<()>;

    /// Result history of a subject, oldest first
    async fn history(&self, id: SubjectId) -> Result<Vec<EvaluationResult>>;

    async fn current_result(&self, id: SubjectId) -> Result<Option<EvaluationResult>>;

    async fn get_result(&self, id: ResultId) -> Result<EvaluationResult>;

    /// Apply the recorder rules for one outcome in a single transaction
    async fn record(&self, request: RecordRequest) -> Result<EvaluationResult>;

    /// Persist a freshly opened session
    async fn create_session(&self, session: &Session) -> Result<()>;

    async fn get_session(&self, id: SessionId) -> Result<Session>;

    /// Most recent sessions first
    async fn list_sessions(&self, limit: usize) -> Result<Vec<Session>>;

    /// Results attached to a session, oldest first
    async fn session_results(&self, id: SessionId) -> Result<Vec<EvaluationResult>>;

    /// Set the end timestamp and recompute aggregates from attached results
    async fn close_session(&self, id: SessionId, ended_at: DateTime<Utc>) -> Result<Session>;

    /// Delete a session, detaching (not deleting) its results
    async fn delete_session(&self, id: SessionId) -> Result<()>;

    async fn usage_stats(&self) -> Result<UsageStats>;
}
