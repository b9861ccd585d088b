//! Core data types for the Aperture evaluation engine
//!
//! Subjects are the images tracked across repeated evaluations, results are the
//! append-only history of attempts, and sessions aggregate one batch run. These
//! shapes are what any persistence layer has to preserve.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random ID
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse an ID from its string form
            pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Identifier of an imported image
    SubjectId
);
entity_id!(
    /// Identifier of a single evaluation attempt
    ResultId
);
entity_id!(
    /// Identifier of a batch run
    SessionId
);

/// An imported image tracked across evaluation attempts
///
/// Only the result recorder mutates the evaluation counters; the favorite and
/// notes fields belong to whoever manages the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub created_at: DateTime<Utc>,

    /// Locally processed artifact (resized JPEG), relative to the artifact root
    pub artifact_path: PathBuf,

    /// File name the image was imported from
    pub original_filename: String,

    pub evaluation_count: u32,
    pub first_evaluated_at: Option<DateTime<Utc>>,
    pub last_evaluated_at: Option<DateTime<Utc>>,

    pub is_favorite: bool,
    pub notes: Option<String>,
}

impl Subject {
    /// Create a never-evaluated subject for an artifact
    pub fn new(artifact_path: impl Into<PathBuf>, original_filename: impl Into<String>) -> Self {
        Self {
            id: SubjectId::new(),
            created_at: Utc::now(),
            artifact_path: artifact_path.into(),
            original_filename: original_filename.into(),
            evaluation_count: 0,
            first_evaluated_at: None,
            last_evaluated_at: None,
            is_favorite: false,
            notes: None,
        }
    }
}

/// Relative weights used to compute the overall score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub technical_quality: f64,
    pub composition: f64,
    pub commercial_potential: f64,
    pub artistic_merit: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            technical_quality: 0.30,
            composition: 0.25,
            commercial_potential: 0.25,
            artistic_merit: 0.20,
        }
    }
}

impl ScoreWeights {
    pub fn total(&self) -> f64 {
        self.technical_quality + self.composition + self.commercial_potential + self.artistic_merit
    }
}

/// Rubric scores on a 0-10 scale
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Scores {
    pub technical_quality: f64,
    pub composition: f64,
    pub commercial_potential: f64,
    pub artistic_merit: f64,
    pub overall: f64,
}

impl Scores {
    /// Build scores from the four sub-scores, deriving the weighted overall
    pub fn weighted(
        technical_quality: f64,
        composition: f64,
        commercial_potential: f64,
        artistic_merit: f64,
        weights: &ScoreWeights,
    ) -> Self {
        let clamp = |v: f64| v.clamp(0.0, 10.0);
        let (t, c, m, a) = (
            clamp(technical_quality),
            clamp(composition),
            clamp(commercial_potential),
            clamp(artistic_merit),
        );

        let total = weights.total();
        let overall = if total > 0.0 {
            (t * weights.technical_quality
                + c * weights.composition
                + m * weights.commercial_potential
                + a * weights.artistic_merit)
                / total
        } else {
            0.0
        };

        Self {
            technical_quality: t,
            composition: c,
            commercial_potential: m,
            artistic_merit: a,
            overall: (overall * 100.0).round() / 100.0,
        }
    }
}

/// Where the evaluated image should go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    Portfolio,
    Store,
    Both,
    Archive,
}

impl Placement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Placement::Portfolio => "portfolio",
            Placement::Store => "store",
            Placement::Both => "both",
            Placement::Archive => "archive",
        }
    }
}

impl FromStr for Placement {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "portfolio" => Ok(Placement::Portfolio),
            "store" | "stock" => Ok(Placement::Store),
            "both" => Ok(Placement::Both),
            "archive" => Ok(Placement::Archive),
            other => Err(format!("unknown placement: {}", other)),
        }
    }
}

/// Free-text critique returned by the provider
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Narrative {
    pub summary: String,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
}

/// Listing metadata suggested for stock sites
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommerceMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Vec<String>,
}

/// Outcome status of a single attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    Completed,
    Failed,
}

impl EvaluationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationStatus::Completed => "completed",
            EvaluationStatus::Failed => "failed",
        }
    }
}

impl FromStr for EvaluationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(EvaluationStatus::Completed),
            "failed" => Ok(EvaluationStatus::Failed),
            other => Err(format!("unknown evaluation status: {}", other)),
        }
    }
}

/// One evaluation attempt, successful or failed
///
/// Immutable once written except for `is_current`, which the recorder clears
/// when a newer result takes over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub id: ResultId,
    pub subject_id: SubjectId,
    pub session_id: Option<SessionId>,
    pub evaluated_at: DateTime<Utc>,

    /// Absent on failed attempts
    pub scores: Option<Scores>,
    pub placement: Option<Placement>,
    pub narrative: Narrative,
    pub commerce: CommerceMetadata,

    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub processing_time_ms: u64,

    pub status: EvaluationStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,

    /// Failed result this attempt supersedes
    pub parent_result_id: Option<ResultId>,
    pub is_current: bool,
}

impl EvaluationResult {
    pub fn is_success(&self) -> bool {
        self.status == EvaluationStatus::Completed
    }
}

/// Aggregate record of one batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_subjects: u32,
    pub success_count: u32,
    pub failure_count: u32,
    pub total_cost_usd: f64,
    pub average_processing_time_ms: f64,
    pub providers: BTreeSet<String>,

    /// Results produced during the run (non-owning)
    pub result_ids: Vec<ResultId>,
}

impl Session {
    pub fn is_closed(&self) -> bool {
        self.ended_at.is_some()
    }

    pub fn processed(&self) -> u32 {
        self.success_count + self.failure_count
    }
}

/// Process-wide running totals of provider usage
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UsageStats {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost_usd: f64,
    pub images_evaluated: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_overall() {
        let scores = Scores::weighted(8.0, 6.0, 7.0, 5.0, &ScoreWeights::default());
        // 8*0.3 + 6*0.25 + 7*0.25 + 5*0.2 = 6.65
        assert!((scores.overall - 6.65).abs() < 1e-9);
    }

    #[test]
    fn test_scores_are_clamped() {
        let scores = Scores::weighted(14.0, -2.0, 5.0, 5.0, &ScoreWeights::default());
        assert_eq!(scores.technical_quality, 10.0);
        assert_eq!(scores.composition, 0.0);
    }

    #[test]
    fn test_placement_parsing() {
        assert_eq!("Portfolio".parse::<Placement>(), Ok(Placement::Portfolio));
        assert_eq!(" stock ".parse::<Placement>(), Ok(Placement::Store));
        assert!("gallery".parse::<Placement>().is_err());
    }

    #[test]
    fn test_id_roundtrip_display() {
        let id = SubjectId::new();
        assert_eq!(SubjectId::from_string(&id.to_string()).unwrap(), id);
    }
}
