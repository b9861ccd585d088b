//! Evaluation orchestration
//!
//! Turns a queue of subjects into a sequence of provider calls under a shared
//! rate limit:
//!
//! - [`scheduler`]: ordered batches, inter-request delay, progress events
//! - [`classifier`]: failure classes and the retry policy
//! - [`pipeline`]: one evaluation attempt for one subject
//! - [`recorder`]: atomic write of an outcome into the entity graph
//! - [`session`]: per-run aggregate record
//! - [`engine`]: public facade owning queue, run state and cancellation

pub mod classifier;
pub mod engine;
pub mod pipeline;
pub mod recorder;
pub mod scheduler;
pub mod session;

pub use classifier::{Attempted, FailureClass, RetryPolicy};
pub use engine::{EngineState, EngineStatus, EvaluationEngine};
pub use pipeline::EvaluationPipeline;
pub use recorder::{Assessment, FailureDetails, Outcome, RecordRequest, Recorder, ResultRecorder};
pub use scheduler::{plan_batches, BatchScheduler, ProgressEvent, RunContext, RunEvent, RunReport};
pub use session::{SessionState, SessionTracker};
