//! Coordinate-based patch extraction.
//!
//! Each image behaves as if zero-padded on every side, so a window that
//! starts outside the image (or runs past its far edge) is still a full
//! `size x size` patch whose out-of-bounds samples are zero. Windows lying
//! entirely outside the image come back all zero; callers that need real
//! content must filter such coordinates themselves.

use crate::detect::SourceDetector;
use crate::patch::{CoordinateId, Patch, PatchStore};
use crate::trace::{trace_event, trace_span};
use crate::util::{PsfPatchError, PsfPatchResult};
use ndarray::{s, Array2, ArrayView2};

/// Copies the `size x size` window anchored at `(x, y)` out of `image`.
fn cut_window(image: ArrayView2<'_, f64>, x: i64, y: i64, size: usize) -> Patch {
    let mut patch = Array2::zeros((size, size));
    let (rows, cols) = image.dim();
    let span = size as i64;

    let r0 = x.max(0);
    let r1 = (x + span).min(rows as i64);
    let c0 = y.max(0);
    let c1 = (y + span).min(cols as i64);
    if r0 >= r1 || c0 >= c1 {
        return patch;
    }

    let src = image.slice(s![r0 as usize..r1 as usize, c0 as usize..c1 as usize]);
    let dr = (r0 - x) as usize;
    let dc = (c0 - y) as usize;
    patch
        .slice_mut(s![dr..dr + src.nrows(), dc..dc + src.ncols()])
        .assign(&src);
    patch
}

/// Converts a detected centroid (column `x`, row `y`) into a patch corner.
///
/// The fractional part is truncated toward zero.
pub fn corner_from_centroid(image_index: usize, x: f64, y: f64, size: usize) -> CoordinateId {
    let half = size as f64 / 2.0;
    CoordinateId::new(image_index, (y - half).trunc() as i64, (x - half).trunc() as i64)
}

impl PatchStore<CoordinateId> {
    /// Cuts one `size x size` patch per coordinate out of `images`.
    ///
    /// Every coordinate is validated before any patch is cut. Duplicate
    /// coordinates overwrite each other like any repeated `add`.
    pub fn extract(
        images: &[Array2<f64>],
        coordinates: &[CoordinateId],
        size: usize,
    ) -> PsfPatchResult<Self> {
        if size == 0 {
            return Err(PsfPatchError::InvalidDimensions { rows: 0, cols: 0 });
        }
        for coordinate in coordinates {
            let index = coordinate.image_index.ok_or(PsfPatchError::MissingImageIndex {
                x: coordinate.x,
                y: coordinate.y,
            })?;
            if index >= images.len() {
                return Err(PsfPatchError::ImageIndexOutOfRange {
                    index,
                    count: images.len(),
                });
            }
        }

        let _span = trace_span!(
            "extract",
            images = images.len(),
            coordinates = coordinates.len(),
            size = size
        )
        .entered();

        let mut out = Self::new();
        for coordinate in coordinates {
            let Some(index) = coordinate.image_index else {
                continue;
            };
            let patch = cut_window(images[index].view(), coordinate.x, coordinate.y, size);
            out.add(*coordinate, patch)?;
        }
        trace_event!("extract_done", patches = out.len());
        Ok(out)
    }

    /// Detects point sources in every image and extracts a patch around each.
    pub fn find_stars_and_create<D: SourceDetector + ?Sized>(
        images: &[Array2<f64>],
        size: usize,
        detector: &D,
    ) -> PsfPatchResult<Self> {
        let _span = trace_span!("find_stars_and_create", images = images.len()).entered();
        let mut coordinates = Vec::new();
        for (index, image) in images.iter().enumerate() {
            let detections = detector.detect(image.view())?;
            trace_event!(
                "sources_detected",
                image = index,
                sources = detections.sources.len(),
                noise = detections.noise
            );
            coordinates.extend(
                detections
                    .sources
                    .iter()
                    .map(|source| corner_from_centroid(index, source.x, source.y, size)),
            );
        }
        Self::extract(images, &coordinates, size)
    }
}

#[cfg(test)]
mod tests {
    use super::{corner_from_centroid, cut_window};
    use crate::patch::CoordinateId;
    use ndarray::Array2;

    #[test]
    fn cut_window_inside_matches_slice() {
        let image = Array2::from_shape_fn((6, 6), |(r, c)| (r * 6 + c) as f64);
        let patch = cut_window(image.view(), 1, 2, 3);
        assert_eq!(patch[[0, 0]], 8.0);
        assert_eq!(patch[[2, 2]], 22.0);
    }

    #[test]
    fn cut_window_far_outside_is_zero() {
        let image = Array2::from_elem((4, 4), 1.0);
        let patch = cut_window(image.view(), -100, 50, 3);
        assert_eq!(patch.dim(), (3, 3));
        assert!(patch.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn centroid_to_corner_swaps_axes() {
        let id = corner_from_centroid(1, 10.7, 20.2, 5);
        assert_eq!(id, CoordinateId::new(1, 17, 8));

        let edge = corner_from_centroid(0, 1.0, 0.5, 4);
        assert_eq!(edge, CoordinateId::new(0, -1, -1));
    }
}
