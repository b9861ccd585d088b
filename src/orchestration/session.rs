//! Session tracker: one aggregate record per batch run
//!
//! `NotStarted -> Active -> Closed`. Running counters are maintained by the
//! recorder while the session is active; closing recomputes cost and average
//! processing time from the attached results and freezes the row.

use crate::error::{ApertureError, Result};
use crate::storage::EvaluationStore;
use crate::types::{Session, SessionId};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    NotStarted,
    Active(SessionId),
    Closed(Session),
}

pub struct SessionTracker {
    store: Arc<dyn EvaluationStore>,
    state: SessionState,
}

impl SessionTracker {
    pub fn new(store: Arc<dyn EvaluationStore>) -> Self {
        Self {
            store,
            state: SessionState::NotStarted,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Id of the active session, if any
    pub fn active_id(&self) -> Option<SessionId> {
        match self.state {
            SessionState::Active(id) => Some(id),
            _ => None,
        }
    }

    /// Create the session row for a run over `total_subjects`
    pub async fn open(&mut self, total_subjects: u32) -> Result<SessionId> {
        if self.state != SessionState::NotStarted {
            return Err(ApertureError::InvalidState(
                "session tracker already used".to_string(),
            ));
        }

        let session = Session {
            id: SessionId::new(),
            started_at: Utc::now(),
            ended_at: None,
            total_subjects,
            success_count: 0,
            failure_count: 0,
            total_cost_usd: 0.0,
            average_processing_time_ms: 0.0,
            providers: BTreeSet::new(),
            result_ids: Vec::new(),
        };
        self.store.create_session(&session).await?;

        info!(
            "Opened session {} for {} subjects",
            session.id, total_subjects
        );
        self.state = SessionState::Active(session.id);
        Ok(session.id)
    }

    /// Close the active session and return its final aggregates
    pub async fn close(&mut self) -> Result<Session> {
        let id = self.active_id().ok_or_else(|| {
            ApertureError::InvalidState("no active session to close".to_string())
        })?;

        let session = self.store.close_session(id, Utc::now()).await?;
        info!(
            "Closed session {}: {} succeeded, {} failed, ${:.4}",
            id, session.success_count, session.failure_count, session.total_cost_usd
        );

        self.state = SessionState::Closed(session.clone());
        Ok(session)
    }
}
