//! Local collaborators of the evaluation pipeline
//!
//! The pipeline needs four things before it can call a provider: the processed
//! artifact bytes, technical metrics, an optional saliency summary and the base
//! prompt. Each is a trait so hosts can plug in their own implementations.

pub mod artifacts;
pub mod prompt;
pub mod saliency;
pub mod technical;

use crate::error::{PipelineError, Result};
use crate::types::Subject;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use artifacts::FsArtifactStore;
pub use prompt::{build_enriched_prompt, FilePromptSource, StaticPromptSource};
pub use saliency::GradientSaliencyAnalyzer;
pub use technical::LumaTechnicalAnalyzer;

/// Loads the locally processed artifact for a subject
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn load_processed_artifact(
        &self,
        subject: &Subject,
    ) -> std::result::Result<Vec<u8>, PipelineError>;
}

/// What the photographer appears to be going for, so deliberate choices are not penalised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShotIntent {
    Standard,
    HighKey,
    LowKey,
}

/// Measurements from local technical analysis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TechnicalMetrics {
    /// Variance of the Laplacian; higher is sharper
    pub sharpness: f64,
    pub is_blurry: bool,
    /// Mean luminance, 0.0 (black) to 1.0 (white)
    pub exposure: f64,
    /// Estimated noise level in luminance units
    pub noise: f64,
    /// Luminance standard deviation normalised to 0..1
    pub contrast: f64,
    pub intent: ShotIntent,
}

/// Side-effect free image measurement
pub trait TechnicalAnalyzer: Send + Sync {
    fn analyze(&self, artifact: &[u8]) -> std::result::Result<TechnicalMetrics, PipelineError>;
}

/// Region attracting attention, in normalised image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hotspot {
    pub x: f64,
    pub y: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositionPattern {
    RuleOfThirds,
    Centered,
    Balanced,
    OffCenter,
}

/// Where attention falls in the frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaliencySummary {
    pub hotspots: Vec<Hotspot>,
    pub composition_pattern: CompositionPattern,
    /// Energy-weighted centre, normalised (0,0) top-left to (1,1) bottom-right
    pub center_of_mass: (f64, f64),
}

/// Attention analysis; may legitimately find nothing
pub trait SaliencyAnalyzer: Send + Sync {
    fn analyze(&self, artifact: &[u8]) -> std::result::Result<Option<SaliencySummary>, PipelineError>;
}

/// Provides the base evaluation prompt
#[async_trait]
pub trait PromptSource: Send + Sync {
    async fn load_evaluation_prompt(&self) -> Result<String>;
}

/// Decode artifact bytes to a downscaled luminance buffer
pub(crate) fn decode_luma(
    artifact: &[u8],
    max_dimension: u32,
) -> std::result::Result<image::GrayImage, PipelineError> {
    let img = image::load_from_memory(artifact)
        .map_err(|e| PipelineError::Analysis(format!("Failed to decode image: {}", e)))?;
    let img = if img.width() > max_dimension || img.height() > max_dimension {
        img.thumbnail(max_dimension, max_dimension)
    } else {
        img
    };
    Ok(img.to_luma8())
}
