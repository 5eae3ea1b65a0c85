//! Numeric helpers shared by aggregation and detection.

use ndarray::{Array2, ArrayView2};

/// Maximum over the non-NaN samples, `None` if every sample is NaN.
pub(crate) fn nan_max(values: ArrayView2<'_, f64>) -> Option<f64> {
    values
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(None, |acc, v| match acc {
            Some(m) if m >= v => Some(m),
            _ => Some(v),
        })
}

/// Median of the non-NaN values, reordering `values` in place.
///
/// Returns NaN when no finite-comparable value remains.
pub(crate) fn nan_median(values: &mut Vec<f64>) -> f64 {
    values.retain(|v| !v.is_nan());
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        0.5 * (values[mid - 1] + values[mid])
    } else {
        values[mid]
    }
}

/// Zero-pads `src` by `pad` samples on every side.
pub(crate) fn pad_constant(src: ArrayView2<'_, f64>, pad: usize) -> Array2<f64> {
    let (rows, cols) = src.dim();
    let mut out = Array2::zeros((rows + 2 * pad, cols + 2 * pad));
    out.slice_mut(ndarray::s![pad..pad + rows, pad..pad + cols])
        .assign(&src);
    out
}
