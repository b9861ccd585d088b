//! Gradient-energy saliency
//!
//! Attention is approximated by local gradient energy. The frame is split into
//! a 3x3 grid; cells well above average energy become hotspots and the
//! energy-weighted centroid decides the composition pattern.

use super::{decode_luma, CompositionPattern, Hotspot, SaliencyAnalyzer, SaliencySummary};
use crate::error::PipelineError;

const ANALYSIS_DIMENSION: u32 = 384;
const GRID: usize = 3;

/// Mean gradient per pixel below which the frame has nothing to look at
const MIN_MEAN_ENERGY: f64 = 1.0;

/// A cell is a hotspot when its energy exceeds the mean cell energy by this factor
const HOTSPOT_FACTOR: f64 = 1.5;

/// Distance (normalised) within which the centroid snaps to a pattern
const SNAP_DISTANCE: f64 = 0.08;

#[derive(Debug, Clone, Default)]
pub struct GradientSaliencyAnalyzer;

impl GradientSaliencyAnalyzer {
    pub fn new() -> Self {
        Self
    }

    fn classify(center: (f64, f64)) -> CompositionPattern {
        let near = |a: (f64, f64), b: (f64, f64)| {
            ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt() <= SNAP_DISTANCE
        };

        if near(center, (0.5, 0.5)) {
            return CompositionPattern::Centered;
        }

        let thirds = [1.0 / 3.0, 2.0 / 3.0];
        for &x in &thirds {
            for &y in &thirds {
                if near(center, (x, y)) {
                    return CompositionPattern::RuleOfThirds;
                }
            }
        }

        if (center.0 - 0.5).abs() < 0.15 && (center.1 - 0.5).abs() < 0.15 {
            CompositionPattern::Balanced
        } else {
            CompositionPattern::OffCenter
        }
    }
}

impl SaliencyAnalyzer for GradientSaliencyAnalyzer {
    fn analyze(&self, artifact: &[u8]) -> Result<Option<SaliencySummary>, PipelineError> {
        let luma = decode_luma(artifact, ANALYSIS_DIMENSION)?;
        let (width, height) = (luma.width() as usize, luma.height() as usize);
        if width < GRID + 2 || height < GRID + 2 {
            return Ok(None);
        }

        let px = luma.as_raw();
        let at = |x: usize, y: usize| px[y * width + x] as f64;

        let mut cells = [[0.0f64; GRID]; GRID];
        let mut total = 0.0;
        let (mut cx, mut cy) = (0.0, 0.0);

        for y in 1..height - 1 {
            for x in 1..width - 1 {
                let gx = at(x + 1, y) - at(x - 1, y);
                let gy = at(x, y + 1) - at(x, y - 1);
                let energy = (gx * gx + gy * gy).sqrt();
                if energy == 0.0 {
                    continue;
                }

                let col = (x * GRID / width).min(GRID - 1);
                let row = (y * GRID / height).min(GRID - 1);
                cells[row][col] += energy;

                total += energy;
                cx += energy * (x as f64 + 0.5) / width as f64;
                cy += energy * (y as f64 + 0.5) / height as f64;
            }
        }

        let mean_energy = total / ((width - 2) * (height - 2)) as f64;
        if mean_energy < MIN_MEAN_ENERGY {
            return Ok(None);
        }

        let center_of_mass = (cx / total, cy / total);
        let mean_cell = total / (GRID * GRID) as f64;

        let mut hotspots: Vec<Hotspot> = Vec::new();
        for (row, cols) in cells.iter().enumerate() {
            for (col, &energy) in cols.iter().enumerate() {
                if energy > mean_cell * HOTSPOT_FACTOR {
                    hotspots.push(Hotspot {
                        x: (col as f64 + 0.5) / GRID as f64,
                        y: (row as f64 + 0.5) / GRID as f64,
                        weight: energy / total,
                    });
                }
            }
        }
        hotspots.sort_by(|a, b| b.weight.total_cmp(&a.weight));

        Ok(Some(SaliencySummary {
            hotspots,
            composition_pattern: Self::classify(center_of_mass),
            center_of_mass,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::technical::tests::encode_png;
    use image::{GrayImage, Luma};

    #[test]
    fn test_flat_frame_has_no_saliency() {
        let bytes = encode_png(GrayImage::from_pixel(60, 60, Luma([90])));
        assert_eq!(GradientSaliencyAnalyzer::new().analyze(&bytes).unwrap(), None);
    }

    #[test]
    fn test_centered_square() {
        let img = GrayImage::from_fn(90, 90, |x, y| {
            if (35..55).contains(&x) && (35..55).contains(&y) {
                Luma([250])
            } else {
                Luma([10])
            }
        });

        let summary = GradientSaliencyAnalyzer::new()
            .analyze(&encode_png(img))
            .unwrap()
            .unwrap();

        assert_eq!(summary.composition_pattern, CompositionPattern::Centered);
        assert_eq!(summary.hotspots.len(), 1);
        assert!((summary.hotspots[0].x - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_subject_on_thirds_intersection() {
        // Small bright square around (1/3, 1/3)
        let img = GrayImage::from_fn(90, 90, |x, y| {
            if (26..34).contains(&x) && (26..34).contains(&y) {
                Luma([250])
            } else {
                Luma([10])
            }
        });

        let summary = GradientSaliencyAnalyzer::new()
            .analyze(&encode_png(img))
            .unwrap()
            .unwrap();

        assert_eq!(summary.composition_pattern, CompositionPattern::RuleOfThirds);
    }
}
