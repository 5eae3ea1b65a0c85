//! Point-source detection used by the detection-assisted extraction path.
//!
//! Detection is a collaborator of the patch engine: anything implementing
//! [`SourceDetector`] can feed [`PatchStore::find_stars_and_create`]. The
//! built-in [`ThresholdDetector`] estimates a global background and noise
//! level, thresholds the image and reports flux-weighted centroids of
//! 8-connected components.
//!
//! [`PatchStore::find_stars_and_create`]: crate::PatchStore::find_stars_and_create

use crate::util::math::nan_median;
use crate::util::{PsfPatchError, PsfPatchResult};
use ndarray::ArrayView2;

/// Scale from median absolute deviation to Gaussian standard deviation.
const MAD_TO_SIGMA: f64 = 1.4826;

/// A detected point source.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Source {
    /// Centroid column (axis 1), in pixels.
    pub x: f64,
    /// Centroid row (axis 0), in pixels.
    pub y: f64,
    /// Background-subtracted flux summed over the component.
    pub flux: f64,
    /// Brightest background-subtracted sample in the component.
    pub peak: f64,
    /// Number of pixels in the component.
    pub area: usize,
    /// Peak over noise.
    pub significance: f64,
}

/// Sources found in one image together with the background estimate.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Detections {
    /// Sources sorted by descending flux.
    pub sources: Vec<Source>,
    /// Global background level.
    pub background: f64,
    /// Global noise estimate (standard deviation).
    pub noise: f64,
}

/// Finds point sources in a single image.
pub trait SourceDetector {
    /// Returns the sources in `image` and the background/noise estimate.
    fn detect(&self, image: ArrayView2<'_, f64>) -> PsfPatchResult<Detections>;
}

impl<F> SourceDetector for F
where
    F: Fn(ArrayView2<'_, f64>) -> PsfPatchResult<Detections>,
{
    fn detect(&self, image: ArrayView2<'_, f64>) -> PsfPatchResult<Detections> {
        self(image)
    }
}

/// Configuration for [`ThresholdDetector`].
#[derive(Clone, Copy, Debug)]
pub struct DetectConfig {
    /// Detection threshold in units of the noise estimate.
    pub threshold: f64,
    /// Components smaller than this many pixels are discarded.
    pub min_area: usize,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            threshold: 3.0,
            min_area: 3,
        }
    }
}

/// Global-background threshold detector.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThresholdDetector {
    cfg: DetectConfig,
}

impl ThresholdDetector {
    /// Creates a detector with the given configuration.
    pub fn new(cfg: DetectConfig) -> Self {
        Self { cfg }
    }

    /// Returns the active configuration.
    pub fn config(&self) -> &DetectConfig {
        &self.cfg
    }
}

/// Median background and MAD-based noise of the finite samples.
fn background_and_noise(image: ArrayView2<'_, f64>) -> (f64, f64) {
    let mut values: Vec<f64> = image.iter().copied().filter(|v| v.is_finite()).collect();
    let background = nan_median(&mut values);
    let mut deviations: Vec<f64> = values.iter().map(|v| (v - background).abs()).collect();
    let noise = nan_median(&mut deviations) * MAD_TO_SIGMA;
    (background, noise)
}

impl SourceDetector for ThresholdDetector {
    fn detect(&self, image: ArrayView2<'_, f64>) -> PsfPatchResult<Detections> {
        let (rows, cols) = image.dim();
        if rows == 0 || cols == 0 {
            return Err(PsfPatchError::InvalidDimensions { rows, cols });
        }
        if !(self.cfg.threshold.is_finite() && self.cfg.threshold > 0.0) {
            return Err(PsfPatchError::InvalidInput("threshold must be positive"));
        }

        let (background, noise) = background_and_noise(image);
        if !background.is_finite() {
            return Ok(Detections::default());
        }
        // A flat image has zero MAD; any sample above the background is then significant.
        let level = background + self.cfg.threshold * noise;

        let mask: Vec<bool> = image
            .iter()
            .map(|&v| v.is_finite() && v > level)
            .collect();
        let mut visited = vec![false; rows * cols];
        let mut stack = Vec::new();
        let mut sources = Vec::new();

        for start in 0..rows * cols {
            if !mask[start] || visited[start] {
                continue;
            }
            visited[start] = true;
            stack.push(start);

            let mut area = 0usize;
            let mut flux = 0.0f64;
            let mut sum_x = 0.0f64;
            let mut sum_y = 0.0f64;
            let mut peak = f64::NEG_INFINITY;

            while let Some(idx) = stack.pop() {
                let (r, c) = (idx / cols, idx % cols);
                let value = image[[r, c]] - background;
                area += 1;
                flux += value;
                sum_x += value * c as f64;
                sum_y += value * r as f64;
                peak = peak.max(value);

                for dr in -1i64..=1 {
                    for dc in -1i64..=1 {
                        if dr == 0 && dc == 0 {
                            continue;
                        }
                        let nr = r as i64 + dr;
                        let nc = c as i64 + dc;
                        if nr < 0 || nc < 0 || nr >= rows as i64 || nc >= cols as i64 {
                            continue;
                        }
                        let nidx = nr as usize * cols + nc as usize;
                        if mask[nidx] && !visited[nidx] {
                            visited[nidx] = true;
                            stack.push(nidx);
                        }
                    }
                }
            }

            if area < self.cfg.min_area || flux <= 0.0 {
                continue;
            }
            let significance = if noise > 0.0 { peak / noise } else { f64::INFINITY };
            sources.push(Source {
                x: sum_x / flux,
                y: sum_y / flux,
                flux,
                peak,
                area,
                significance,
            });
        }

        sources.sort_by(|a, b| b.flux.total_cmp(&a.flux));
        Ok(Detections {
            sources,
            background,
            noise,
        })
    }
}
