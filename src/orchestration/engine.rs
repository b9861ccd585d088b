//! Orchestration facade
//!
//! `Idle -> Queued -> Evaluating -> {Completed | Cancelled | Failed}`.
//!
//! The engine owns the queue and the run state. A run is driven by one
//! spawned task that runs the scheduler, forwards its events into a `watch`
//! channel and closes the session however the run ends.

use crate::analysis::{
    ArtifactStore, FilePromptSource, FsArtifactStore, GradientSaliencyAnalyzer,
    LumaTechnicalAnalyzer, PromptSource, StaticPromptSource,
};
use crate::config::{ApertureConfig, EngineSettings};
use crate::credentials::CredentialStore;
use crate::error::{ApertureError, Result};
use crate::orchestration::classifier::RetryPolicy;
use crate::orchestration::pipeline::EvaluationPipeline;
use crate::orchestration::recorder::ResultRecorder;
use crate::orchestration::scheduler::{BatchScheduler, ProgressEvent, RunContext, RunEvent, RunReport};
use crate::orchestration::session::SessionTracker;
use crate::services::build_provider;
use crate::storage::EvaluationStore;
use crate::types::{Session, SessionId, Subject, UsageStats};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Public run state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Queued,
    Evaluating,
    Completed,
    Cancelled,
    Failed(String),
}

impl EngineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EngineState::Completed | EngineState::Cancelled | EngineState::Failed(_)
        )
    }
}

/// Snapshot published on every state, progress or message change
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub state: EngineState,
    pub message: String,
    pub progress: Option<ProgressEvent>,
    pub session_id: Option<SessionId>,
    pub last_report: Option<RunReport>,
}

impl Default for EngineStatus {
    fn default() -> Self {
        Self {
            state: EngineState::Idle,
            message: String::new(),
            progress: None,
            session_id: None,
            last_report: None,
        }
    }
}

/// Entry point for queueing and running evaluations
pub struct EvaluationEngine {
    store: Arc<dyn EvaluationStore>,
    scheduler: Arc<BatchScheduler>,
    provider_id: String,
    credentials: Arc<dyn CredentialStore>,
    prompts: Arc<dyn PromptSource>,
    settings: EngineSettings,
    queue: Mutex<Vec<Subject>>,
    cancel: Mutex<Option<CancellationToken>>,
    run: tokio::sync::Mutex<Option<JoinHandle<Result<RunReport>>>>,
    status: Arc<watch::Sender<EngineStatus>>,
}

impl EvaluationEngine {
    pub fn new(
        store: Arc<dyn EvaluationStore>,
        pipeline: Arc<EvaluationPipeline>,
        credentials: Arc<dyn CredentialStore>,
        prompts: Arc<dyn PromptSource>,
        settings: EngineSettings,
    ) -> Self {
        let provider_id = pipeline.provider_id().to_string();
        let recorder = ResultRecorder::new(Arc::clone(&store));
        let scheduler = BatchScheduler::new(pipeline, recorder, RetryPolicy::from_settings(&settings));
        let (status, _) = watch::channel(EngineStatus::default());

        Self {
            store,
            scheduler: Arc::new(scheduler),
            provider_id,
            credentials,
            prompts,
            settings,
            queue: Mutex::new(Vec::new()),
            cancel: Mutex::new(None),
            run: tokio::sync::Mutex::new(None),
            status: Arc::new(status),
        }
    }

    /// Wire the default collaborators from configuration
    pub fn from_config(
        config: &ApertureConfig,
        store: Arc<dyn EvaluationStore>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self> {
        config.validate()?;

        let provider = build_provider(&config.provider)?;
        let artifacts: Arc<dyn ArtifactStore> =
            Arc::new(FsArtifactStore::new(&config.storage.artifact_root));
        let pipeline = EvaluationPipeline::new(
            artifacts,
            Arc::new(LumaTechnicalAnalyzer::new()),
            Arc::new(GradientSaliencyAnalyzer::new()),
            provider,
            config.scoring,
        );

        let prompts: Arc<dyn PromptSource> = match &config.storage.prompt_path {
            Some(path) => Arc::new(FilePromptSource::new(path)),
            None => Arc::new(StaticPromptSource::default()),
        };

        Ok(Self::new(
            store,
            Arc::new(pipeline),
            credentials,
            prompts,
            config.engine.clone(),
        ))
    }

    fn lock_queue(&self) -> Result<std::sync::MutexGuard<'_, Vec<Subject>>> {
        self.queue
            .lock()
            .map_err(|_| ApertureError::InvalidState("engine queue lock poisoned".to_string()))
    }

    fn set_message(&self, message: impl Into<String>) {
        let message = message.into();
        self.status.send_modify(|s| s.message = message);
    }

    /// Add subjects to the queue; returns the queue length
    pub fn enqueue(&self, subjects: impl IntoIterator<Item = Subject>) -> Result<usize> {
        if self.status.borrow().state == EngineState::Evaluating {
            return Err(ApertureError::InvalidState(
                "cannot enqueue while evaluating".to_string(),
            ));
        }

        let mut queue = self.lock_queue()?;
        queue.extend(subjects);
        let len = queue.len();
        drop(queue);

        if len > 0 {
            self.status.send_modify(|s| {
                s.state = EngineState::Queued;
                s.message = format!("{} subjects queued", len);
            });
        }
        Ok(len)
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Start evaluating the queue in the background.
    ///
    /// An empty queue is a no-op that only updates the status message. A
    /// missing credential or unreadable prompt fails with
    /// [`ApertureError::Configuration`] before anything is dequeued.
    pub async fn start(&self) -> Result<()> {
        let mut run = self.run.lock().await;
        if self.status.borrow().state == EngineState::Evaluating {
            return Err(ApertureError::InvalidState(
                "evaluation already running".to_string(),
            ));
        }

        if self.lock_queue()?.is_empty() {
            self.set_message("No subjects queued");
            return Ok(());
        }

        let credential = self.credentials.get_credential(&self.provider_id)?;
        let prompt = self.prompts.load_evaluation_prompt().await?;

        let subjects = std::mem::take(&mut *self.lock_queue()?);

        let mut tracker = SessionTracker::new(Arc::clone(&self.store));
        let session_id = match tracker.open(subjects.len() as u32).await {
            Ok(id) => id,
            Err(e) => {
                self.lock_queue()?.splice(0..0, subjects);
                self.status.send_modify(|s| {
                    s.state = EngineState::Failed(e.to_string());
                    s.message = format!("Could not open session: {}", e);
                });
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        *self
            .cancel
            .lock()
            .map_err(|_| ApertureError::InvalidState("engine lock poisoned".to_string()))? =
            Some(cancel.clone());

        let total = subjects.len();
        self.status.send_modify(|s| {
            s.state = EngineState::Evaluating;
            s.message = format!("Evaluating {} subjects", total);
            s.progress = None;
            s.session_id = Some(session_id);
            s.last_report = None;
        });

        let ctx = RunContext {
            session_id: Some(session_id),
            prompt,
            credential,
            cancel,
        };

        *run = Some(tokio::spawn(drive(
            Arc::clone(&self.scheduler),
            tracker,
            subjects,
            self.settings.clone(),
            ctx,
            Arc::clone(&self.status),
        )));
        Ok(())
    }

    /// Request cooperative cancellation. Only valid while evaluating.
    pub fn cancel(&self) -> Result<()> {
        if self.status.borrow().state != EngineState::Evaluating {
            return Err(ApertureError::InvalidState(
                "cancel is only valid while evaluating".to_string(),
            ));
        }

        let token = self
            .cancel
            .lock()
            .map_err(|_| ApertureError::InvalidState("engine lock poisoned".to_string()))?
            .clone();

        if let Some(token) = token {
            info!("Cancellation requested");
            token.cancel();
            self.set_message("Cancelling after the current subject");
        }
        Ok(())
    }

    /// Wait for the running evaluation to finish
    pub async fn wait(&self) -> Result<RunReport> {
        let handle = self
            .run
            .lock()
            .await
            .take()
            .ok_or_else(|| ApertureError::InvalidState("no evaluation started".to_string()))?;

        handle
            .await
            .map_err(|e| ApertureError::InvalidState(format!("evaluation task failed: {}", e)))?
    }

    pub fn status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    /// Stream of status snapshots, starting with the current one
    pub fn subscribe(&self) -> WatchStream<EngineStatus> {
        WatchStream::new(self.status.subscribe())
    }

    pub async fn usage_stats(&self) -> Result<UsageStats> {
        self.store.usage_stats().await
    }

    /// Most recent sessions first
    pub async fn sessions(&self, limit: usize) -> Result<Vec<Session>> {
        self.store.list_sessions(limit).await
    }
}

fn publish(status: &watch::Sender<EngineStatus>, event: RunEvent) {
    status.send_modify(|s| match event {
        RunEvent::Progress(progress) => s.progress = Some(progress),
        RunEvent::Status(message) => s.message = message,
    });
}

/// Body of the run task
async fn drive(
    scheduler: Arc<BatchScheduler>,
    mut tracker: SessionTracker,
    subjects: Vec<Subject>,
    settings: EngineSettings,
    ctx: RunContext,
    status: Arc<watch::Sender<EngineStatus>>,
) -> Result<RunReport> {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();

    // Own task: a scheduler panic comes back as a JoinError
    let mut run = tokio::spawn(async move {
        scheduler
            .run(
                &subjects,
                settings.batch_size,
                settings.inter_request_delay(),
                &ctx,
                events_tx,
            )
            .await
    });

    let outcome = loop {
        tokio::select! {
            Some(event) = events_rx.recv() => publish(&status, event),
            joined = &mut run => {
                break joined.unwrap_or_else(|e| {
                    Err(ApertureError::InvalidState(format!("evaluation task failed: {}", e)))
                });
            }
        }
    };
    while let Ok(event) = events_rx.try_recv() {
        publish(&status, event);
    }

    let closed = tracker.close().await;

    let (state, message, result) = match (outcome, closed) {
        (Ok(report), Ok(session)) => {
            let state = if report.cancelled {
                EngineState::Cancelled
            } else {
                EngineState::Completed
            };
            let message = format!(
                "{} {} subjects: {} succeeded, {} failed (${:.4})",
                if report.cancelled { "Cancelled after" } else { "Evaluated" },
                report.processed,
                session.success_count,
                session.failure_count,
                session.total_cost_usd
            );
            (state, message, Ok(report))
        }
        (Err(e), closed) => {
            if let Err(close_err) = closed {
                error!("Failed to close session after aborted run: {}", close_err);
            }
            error!("Run aborted: {}", e);
            (
                EngineState::Failed(e.to_string()),
                format!("Run aborted: {}", e),
                Err(e),
            )
        }
        (Ok(_), Err(e)) => {
            error!("Failed to close session: {}", e);
            (
                EngineState::Failed(e.to_string()),
                format!("Failed to close session: {}", e),
                Err(e),
            )
        }
    };

    let report = result.as_ref().ok().copied();
    status.send_modify(|s| {
        s.state = state;
        s.message = message;
        s.last_report = report;
    });
    result
}
