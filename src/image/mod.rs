//! Image buffers feeding the extractor.
//!
//! Images are `Array2<f64>` with rows on axis 0. `from_row_major` wraps raw
//! buffers coming from other sources (camera frames, FITS readers) after
//! checking that the buffer length matches the dimensions.

use crate::util::{PsfPatchError, PsfPatchResult};
use ndarray::Array2;

#[cfg(feature = "image-io")]
pub mod io;

/// Builds an image from a row-major buffer of exactly `rows * cols` samples.
pub fn from_row_major<T>(data: Vec<T>, rows: usize, cols: usize) -> PsfPatchResult<Array2<f64>>
where
    T: Into<f64>,
{
    if rows == 0 || cols == 0 {
        return Err(PsfPatchError::InvalidDimensions { rows, cols });
    }
    let needed = rows
        .checked_mul(cols)
        .ok_or(PsfPatchError::InvalidDimensions { rows, cols })?;
    if data.len() != needed {
        return Err(PsfPatchError::InvalidInput(
            "buffer length does not match image dimensions",
        ));
    }
    let samples: Vec<f64> = data.into_iter().map(Into::into).collect();
    Array2::from_shape_vec((rows, cols), samples)
        .map_err(|_| PsfPatchError::InvalidDimensions { rows, cols })
}
