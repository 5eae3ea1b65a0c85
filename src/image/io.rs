//! Convenience helpers for loading images via the `image` crate.
//!
//! Available when the `image-io` feature is enabled. Integer images keep
//! their raw 16-bit counts; floating-point images keep full `f32` precision.

use crate::image::from_row_major;
use crate::util::{PsfPatchError, PsfPatchResult};
use image::{DynamicImage, ImageBuffer, Luma};
use ndarray::Array2;
use std::path::Path;

/// Converts a 16-bit grayscale buffer into a sample array.
pub fn array_from_gray16(img: &ImageBuffer<Luma<u16>, Vec<u16>>) -> PsfPatchResult<Array2<f64>> {
    let cols = img.width() as usize;
    let rows = img.height() as usize;
    from_row_major(img.as_raw().clone(), rows, cols)
}

/// Converts a 32-bit float grayscale buffer into a sample array.
pub fn array_from_gray32f(img: &ImageBuffer<Luma<f32>, Vec<f32>>) -> PsfPatchResult<Array2<f64>> {
    let cols = img.width() as usize;
    let rows = img.height() as usize;
    from_row_major(img.as_raw().clone(), rows, cols)
}

/// Converts any decoded image to grayscale samples.
pub fn array_from_dynamic_image(img: &DynamicImage) -> PsfPatchResult<Array2<f64>> {
    match img {
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
            array_from_gray32f(&img.to_luma32f())
        }
        _ => array_from_gray16(&img.to_luma16()),
    }
}

/// Loads an image from disk as grayscale samples.
pub fn load_gray_image<P: AsRef<Path>>(path: P) -> PsfPatchResult<Array2<f64>> {
    let img = image::open(path).map_err(|err| PsfPatchError::ImageIo {
        reason: err.to_string(),
    })?;
    array_from_dynamic_image(&img)
}
