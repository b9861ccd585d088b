//! Evaluation prompt sources and enrichment

use super::{PromptSource, SaliencySummary, TechnicalMetrics};
use crate::error::{ApertureError, Result};
use async_trait::async_trait;
use std::fmt::Write as _;
use std::path::PathBuf;

/// Built-in prompt used when no prompt file is configured
pub const DEFAULT_EVALUATION_PROMPT: &str = r#"You are an experienced photo editor reviewing an image for a photographer's portfolio and for stock sale.

Score the image from 0 to 10 on technical_quality, composition, commercial_potential and artistic_merit.
Choose a placement: "portfolio", "store", "both" or "archive".

Respond with a single JSON object and nothing else:
{"technical_quality": <number>, "composition": <number>, "commercial_potential": <number>,
 "artistic_merit": <number>, "placement": "<placement>", "summary": "<two sentences>",
 "strengths": ["..."], "improvements": ["..."],
 "title": "<stock title>", "description": "<stock description>", "keywords": ["..."]}"#;

/// Fixed prompt text
#[derive(Debug, Clone)]
pub struct StaticPromptSource {
    prompt: String,
}

impl StaticPromptSource {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

impl Default for StaticPromptSource {
    fn default() -> Self {
        Self::new(DEFAULT_EVALUATION_PROMPT)
    }
}

#[async_trait]
impl PromptSource for StaticPromptSource {
    async fn load_evaluation_prompt(&self) -> Result<String> {
        Ok(self.prompt.clone())
    }
}

/// Prompt read from disk on every run, so edits apply without a restart
#[derive(Debug, Clone)]
pub struct FilePromptSource {
    path: PathBuf,
}

impl FilePromptSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PromptSource for FilePromptSource {
    async fn load_evaluation_prompt(&self) -> Result<String> {
        let prompt = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ApertureError::Configuration(format!(
                "Failed to read prompt file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        if prompt.trim().is_empty() {
            return Err(ApertureError::Configuration(format!(
                "Prompt file {} is empty",
                self.path.display()
            )));
        }
        Ok(prompt)
    }
}

/// Append local analysis to the base prompt
pub fn build_enriched_prompt(
    base: &str,
    metrics: &TechnicalMetrics,
    saliency: Option<&SaliencySummary>,
) -> String {
    let mut prompt = String::with_capacity(base.len() + 512);
    prompt.push_str(base.trim_end());
    prompt.push_str("\n\nLocal technical analysis (use it to ground your technical_quality score):\n");

    let _ = writeln!(
        prompt,
        "- sharpness (Laplacian variance): {:.1}{}",
        metrics.sharpness,
        if metrics.is_blurry { " (likely blurry)" } else { "" }
    );
    let _ = writeln!(prompt, "- exposure (mean luminance 0-1): {:.2}", metrics.exposure);
    let _ = writeln!(prompt, "- contrast (0-1): {:.2}", metrics.contrast);
    let _ = writeln!(prompt, "- noise estimate: {:.2}", metrics.noise);
    let _ = writeln!(
        prompt,
        "- apparent intent: {}",
        serde_json::to_value(metrics.intent)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "standard".to_string())
    );

    if let Some(summary) = saliency {
        prompt.push_str("\nAttention analysis:\n");
        let _ = writeln!(
            prompt,
            "- center of attention: ({:.2}, {:.2})",
            summary.center_of_mass.0, summary.center_of_mass.1
        );
        let _ = writeln!(
            prompt,
            "- composition pattern: {:?}",
            summary.composition_pattern
        );
        for hotspot in summary.hotspots.iter().take(3) {
            let _ = writeln!(
                prompt,
                "- hotspot at ({:.2}, {:.2}) weight {:.2}",
                hotspot.x, hotspot.y, hotspot.weight
            );
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{CompositionPattern, ShotIntent};

    fn metrics() -> TechnicalMetrics {
        TechnicalMetrics {
            sharpness: 42.0,
            is_blurry: true,
            exposure: 0.81,
            noise: 1.2,
            contrast: 0.2,
            intent: ShotIntent::HighKey,
        }
    }

    #[test]
    fn test_enriched_prompt_includes_metrics() {
        let prompt = build_enriched_prompt("BASE", &metrics(), None);
        assert!(prompt.starts_with("BASE\n\n"));
        assert!(prompt.contains("(likely blurry)"));
        assert!(prompt.contains("apparent intent: high_key"));
        assert!(!prompt.contains("Attention analysis"));
    }

    #[test]
    fn test_enriched_prompt_includes_saliency() {
        let summary = SaliencySummary {
            hotspots: vec![],
            composition_pattern: CompositionPattern::RuleOfThirds,
            center_of_mass: (0.33, 0.66),
        };
        let prompt = build_enriched_prompt("BASE", &metrics(), Some(&summary));
        assert!(prompt.contains("center of attention: (0.33, 0.66)"));
        assert!(prompt.contains("RuleOfThirds"));
    }

    #[tokio::test]
    async fn test_empty_prompt_file_is_configuration_error() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let err = FilePromptSource::new(temp.path())
            .load_evaluation_prompt()
            .await
            .unwrap_err();
        assert!(matches!(err, ApertureError::Configuration(_)));
    }
}
