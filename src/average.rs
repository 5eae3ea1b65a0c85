//! Region-based stacking of patches into spatially binned templates.
//!
//! Each source patch is peak-normalized, zero-padded up to the requested
//! size and accumulated into every bin whose half-open box
//! `[corner, corner + step)` contains the patch center on both axes. The
//! center is measured in the source frame: `corner + source_size / 2`.
//! Every requested corner appears in the output, keyed by
//! [`SpatialKey::from_corner`]; a bin that received nothing is all zero.

use crate::patch::{Patch, PatchStore, SpatialKey};
use crate::trace::{trace_event, trace_span, trace_warn};
use crate::util::math::{nan_max, nan_median, pad_constant};
use crate::util::{PsfPatchError, PsfPatchResult};
use ndarray::{Array2, Zip};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Reduction applied to the patches collected in one bin.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AverageMode {
    /// NaN-ignoring running sum divided by the contribution count.
    Mean,
    /// Elementwise NaN-ignoring median over the stack.
    #[default]
    Median,
}

impl AverageMode {
    /// Accepted spellings, in parse order.
    pub const VALID: &'static [&'static str] = &["median", "mean"];
}

impl FromStr for AverageMode {
    type Err = PsfPatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "median" => Ok(AverageMode::Median),
            "mean" => Ok(AverageMode::Mean),
            _ => Err(PsfPatchError::InvalidMode {
                found: s.to_string(),
                valid: Self::VALID,
            }),
        }
    }
}

impl fmt::Display for AverageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AverageMode::Mean => f.write_str("mean"),
            AverageMode::Median => f.write_str("median"),
        }
    }
}

/// Corners of `step`-sized bins tiling a `rows x cols` frame.
///
/// The last row and column of bins may extend past the frame.
pub fn regular_corners(rows: usize, cols: usize, step: usize) -> Vec<(i64, i64)> {
    if step == 0 {
        return Vec::new();
    }
    let mut corners = Vec::new();
    for x in (0..rows).step_by(step) {
        for y in (0..cols).step_by(step) {
            corners.push((x as i64, y as i64));
        }
    }
    corners
}

/// Pad applied to each side to grow `current` into `requested`.
fn pad_per_side(current: usize, requested: usize) -> PsfPatchResult<usize> {
    if requested < current {
        return Err(PsfPatchError::TargetTooSmall { requested, current });
    }
    let pad_amount = requested - current;
    if pad_amount % 2 != 0 {
        return Err(PsfPatchError::ParityMismatch { requested, current });
    }
    Ok(pad_amount / 2)
}

fn in_bin(corner: (i64, i64), step: i64, center: (i64, i64)) -> bool {
    corner.0 <= center.0
        && center.0 < corner.0.saturating_add(step)
        && corner.1 <= center.1
        && center.1 < corner.1.saturating_add(step)
}

enum Accumulator {
    Mean { sum: Array2<f64>, count: usize },
    Median { stack: Vec<Patch> },
}

impl Accumulator {
    fn new(mode: AverageMode, size: usize) -> Self {
        match mode {
            AverageMode::Mean => Accumulator::Mean {
                sum: Array2::zeros((size, size)),
                count: 0,
            },
            AverageMode::Median => Accumulator::Median { stack: Vec::new() },
        }
    }

    fn push(&mut self, patch: &Patch) {
        match self {
            Accumulator::Mean { sum, count } => {
                Zip::from(sum).and(patch).for_each(|acc, &v| {
                    if !v.is_nan() {
                        *acc += v;
                    }
                });
                *count += 1;
            }
            Accumulator::Median { stack } => stack.push(patch.clone()),
        }
    }

    fn reduce(self, size: usize) -> Patch {
        match self {
            Accumulator::Mean { sum, count } => {
                if count == 0 {
                    sum
                } else {
                    sum / count as f64
                }
            }
            Accumulator::Median { stack } => {
                if stack.is_empty() {
                    return Array2::zeros((size, size));
                }
                let mut column = Vec::with_capacity(stack.len());
                Array2::from_shape_fn((size, size), |idx| {
                    column.clear();
                    column.extend(stack.iter().map(|patch| patch[idx]));
                    nan_median(&mut column)
                })
            }
        }
    }
}

impl<K: SpatialKey> PatchStore<K> {
    /// Stacks the collection into one template per bin corner.
    ///
    /// `size` must be at least the current patch size and differ from it by
    /// an even amount. Repeated corners are collapsed so each bin receives a
    /// patch at most once. Patches whose peak is not positive cannot be
    /// normalized and are skipped with a warning.
    pub fn average(
        &self,
        corners: &[(i64, i64)],
        step: usize,
        size: usize,
        mode: AverageMode,
    ) -> PsfPatchResult<PatchStore<K>> {
        let current = self.size().ok_or(PsfPatchError::EmptyCollection)?;
        let pad = pad_per_side(current, size)?;
        let step = match i64::try_from(step) {
            Ok(step) if step > 0 => step,
            Ok(_) => return Err(PsfPatchError::InvalidInput("bin step must be positive")),
            Err(_) => return Err(PsfPatchError::InvalidInput("bin step does not fit in i64")),
        };

        let _span = trace_span!(
            "average",
            patches = self.len(),
            bins = corners.len(),
            size = size
        )
        .entered();

        let mut unique: Vec<(i64, i64)> = Vec::with_capacity(corners.len());
        for corner in corners {
            if !unique.contains(corner) {
                unique.push(*corner);
            }
        }

        let mut bins: Vec<Accumulator> = unique
            .iter()
            .map(|_| Accumulator::new(mode, size))
            .collect();
        let half = (current / 2) as i64;
        let mut skipped = 0usize;

        for (key, patch) in self.iter() {
            let (x, y) = key.corner();
            let center = (x.saturating_add(half), y.saturating_add(half));
            let matches: Vec<usize> = unique
                .iter()
                .enumerate()
                .filter(|(_, corner)| in_bin(**corner, step, center))
                .map(|(idx, _)| idx)
                .collect();
            if matches.is_empty() {
                continue;
            }

            let Some(peak) = nan_max(patch.view()).filter(|peak| *peak > 0.0) else {
                trace_warn!(
                    "skipping patch without a positive peak",
                    key = key.to_string().as_str()
                );
                skipped += 1;
                continue;
            };
            let normalized = patch / peak;
            let padded = pad_constant(normalized.view(), pad);

            for idx in matches {
                bins[idx].push(&padded);
            }
        }

        let averages: HashMap<K, Patch> = unique
            .into_iter()
            .zip(bins)
            .map(|((x, y), acc)| (K::from_corner(x, y), acc.reduce(size)))
            .collect();
        trace_event!("average_done", bins = averages.len(), skipped = skipped);
        PatchStore::from_patches(averages)
    }
}
