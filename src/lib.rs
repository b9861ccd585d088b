//! Aperture - rate-limited photo evaluation engine
//!
//! Evaluates photographs against a multi-criteria rubric by combining local
//! technical analysis with one remote provider call per image, and keeps every
//! attempt in an append-only history with exactly one current result per
//! subject.
//!
//! # Architecture
//!
//! - **Types**: subjects, results, sessions, usage totals
//! - **Analysis**: artifact loading, technical and saliency analysis, prompts
//! - **Services**: provider clients (Anthropic, OpenAI)
//! - **Storage**: transactional SQLite store
//! - **Orchestration**: scheduler, retry policy, recorder, sessions, facade
//!
//! # Example
//!
//! ```ignore
//! use aperture_core::{ApertureConfig, EvaluationEngine, SqliteStore, Subject};
//! use aperture_core::credentials::ChainedCredentialStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ApertureConfig::load(&ApertureConfig::default_path())?;
//!     let store = Arc::new(SqliteStore::open(&config.storage.database_path).await?);
//!     let engine = EvaluationEngine::from_config(
//!         &config,
//!         store,
//!         Arc::new(ChainedCredentialStore::system_default()),
//!     )?;
//!
//!     engine.enqueue(vec![Subject::new("2024/IMG_0042.jpg", "IMG_0042.CR3")])?;
//!     engine.start().await?;
//!     let report = engine.wait().await?;
//!     println!("{} succeeded, {} failed", report.succeeded, report.failed);
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod config;
pub mod credentials;
pub mod error;
pub mod orchestration;
pub mod services;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use config::ApertureConfig;
pub use error::{ApertureError, EvaluationError, PipelineError, ProviderError, Result};
pub use orchestration::{
    EngineState, EngineStatus, EvaluationEngine, EvaluationPipeline, ProgressEvent, RunReport,
};
pub use services::ProviderClient;
pub use storage::{EvaluationStore, SqliteStore};
pub use types::{
    EvaluationResult, EvaluationStatus, Placement, ResultId, Scores, Session, SessionId, Subject,
    SubjectId, UsageStats,
};
