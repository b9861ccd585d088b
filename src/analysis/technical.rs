//! Luminance-based technical analysis
//!
//! Works on a downscaled grayscale copy of the artifact. Sharpness is the
//! variance of the 4-neighbour Laplacian; noise is the mean deviation from the
//! local 3x3 mean, measured only where the image is locally flat.

use super::{decode_luma, ShotIntent, TechnicalAnalyzer, TechnicalMetrics};
use crate::error::PipelineError;

/// Longest edge the analysis runs at
const ANALYSIS_DIMENSION: u32 = 768;

/// Laplacian variance below which a frame is reported as blurry
const BLUR_THRESHOLD: f64 = 100.0;

/// Local gradient under which a pixel counts as "flat" for noise estimation
const FLAT_GRADIENT: f64 = 8.0;

#[derive(Debug, Clone, Default)]
pub struct LumaTechnicalAnalyzer;

impl LumaTechnicalAnalyzer {
    pub fn new() -> Self {
        Self
    }

    fn intent(exposure: f64, contrast: f64) -> ShotIntent {
        if exposure > 0.72 && contrast < 0.35 {
            ShotIntent::HighKey
        } else if exposure < 0.28 {
            ShotIntent::LowKey
        } else {
            ShotIntent::Standard
        }
    }
}

impl TechnicalAnalyzer for LumaTechnicalAnalyzer {
    fn analyze(&self, artifact: &[u8]) -> Result<TechnicalMetrics, PipelineError> {
        let luma = decode_luma(artifact, ANALYSIS_DIMENSION)?;
        let (width, height) = (luma.width() as usize, luma.height() as usize);
        if width < 3 || height < 3 {
            return Err(PipelineError::Analysis(format!(
                "image too small for analysis ({}x{})",
                width, height
            )));
        }

        let px = luma.as_raw();
        let at = |x: usize, y: usize| px[y * width + x] as f64;

        let count = px.len() as f64;
        let mean = px.iter().map(|&p| p as f64).sum::<f64>() / count;
        let variance = px.iter().map(|&p| (p as f64 - mean).powi(2)).sum::<f64>() / count;

        let mut lap_sum = 0.0;
        let mut lap_sq_sum = 0.0;
        let mut noise_sum = 0.0;
        let mut flat_pixels = 0usize;
        let interior = ((width - 2) * (height - 2)) as f64;

        for y in 1..height - 1 {
            for x in 1..width - 1 {
                let c = at(x, y);
                let (l, r, u, d) = (at(x - 1, y), at(x + 1, y), at(x, y - 1), at(x, y + 1));

                let lap = l + r + u + d - 4.0 * c;
                lap_sum += lap;
                lap_sq_sum += lap * lap;

                let gradient = ((r - l).abs() + (d - u).abs()) / 2.0;
                if gradient < FLAT_GRADIENT {
                    let mut local = 0.0;
                    for dy in 0..3 {
                        for dx in 0..3 {
                            local += at(x + dx - 1, y + dy - 1);
                        }
                    }
                    noise_sum += (c - local / 9.0).abs();
                    flat_pixels += 1;
                }
            }
        }

        let lap_mean = lap_sum / interior;
        let sharpness = lap_sq_sum / interior - lap_mean * lap_mean;
        let exposure = mean / 255.0;
        let contrast = (variance.sqrt() / 128.0).min(1.0);
        let noise = if flat_pixels > 0 {
            noise_sum / flat_pixels as f64
        } else {
            0.0
        };

        Ok(TechnicalMetrics {
            sharpness,
            is_blurry: sharpness < BLUR_THRESHOLD,
            exposure,
            noise,
            contrast,
            intent: Self::intent(exposure, contrast),
        })
    }
}
