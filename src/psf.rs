//! Parametric point-spread-function models consumed by the fitter.
//!
//! A model is a pure function of pixel position and an ordered list of named
//! parameters. Positions follow the stamp grid: the sample at `[row, col]`
//! is evaluated at `x = col`, `y = row`.

use crate::util::{PsfPatchError, PsfPatchResult};
use ndarray::Array2;

/// A parametric PSF evaluated over local patch coordinates.
pub trait PsfModel: Send + Sync {
    /// Parameter names, in the order `evaluate` expects their values.
    fn parameters(&self) -> &[&'static str];

    /// Intensity at `(x, y)` for the given parameter values.
    fn evaluate(&self, x: f64, y: f64, params: &[f64]) -> f64;

    /// Inclusive `(lower, upper)` bounds for parameter `index`.
    fn bounds(&self, _index: usize) -> (f64, f64) {
        (f64::NEG_INFINITY, f64::INFINITY)
    }

    /// Renders the model over a `size x size` grid.
    fn render(&self, size: usize, params: &[f64]) -> Array2<f64> {
        Array2::from_shape_fn((size, size), |(row, col)| {
            self.evaluate(col as f64, row as f64, params)
        })
    }

    /// Position of `name` in [`PsfModel::parameters`].
    fn parameter_index(&self, name: &str) -> Option<usize> {
        self.parameters().iter().position(|p| *p == name)
    }
}

/// Model built from a parameter list and a closure.
pub struct SimplePsf<F> {
    names: Vec<&'static str>,
    bounds: Vec<(f64, f64)>,
    func: F,
}

impl<F> SimplePsf<F>
where
    F: Fn(f64, f64, &[f64]) -> f64 + Send + Sync,
{
    /// Wraps `func`, which receives parameter values in the order of `names`.
    pub fn new(names: &[&'static str], func: F) -> Self {
        Self {
            names: names.to_vec(),
            bounds: vec![(f64::NEG_INFINITY, f64::INFINITY); names.len()],
            func,
        }
    }

    /// Restricts parameter `name` to `[lower, upper]`.
    pub fn with_bounds(mut self, name: &str, lower: f64, upper: f64) -> PsfPatchResult<Self> {
        if lower.is_nan() || upper.is_nan() || lower > upper {
            return Err(PsfPatchError::InvalidInput("bounds must satisfy lower <= upper"));
        }
        let index = self
            .names
            .iter()
            .position(|p| *p == name)
            .ok_or(PsfPatchError::InvalidInput("unknown parameter name"))?;
        self.bounds[index] = (lower, upper);
        Ok(self)
    }
}

impl<F> PsfModel for SimplePsf<F>
where
    F: Fn(f64, f64, &[f64]) -> f64 + Send + Sync,
{
    fn parameters(&self) -> &[&'static str] {
        &self.names
    }

    fn evaluate(&self, x: f64, y: f64, params: &[f64]) -> f64 {
        (self.func)(x, y, params)
    }

    fn bounds(&self, index: usize) -> (f64, f64) {
        self.bounds
            .get(index)
            .copied()
            .unwrap_or((f64::NEG_INFINITY, f64::INFINITY))
    }
}

const WIDTH_FLOOR: f64 = 1e-3;

/// Axis-aligned elliptical Gaussian on a constant background.
#[derive(Clone, Copy, Debug, Default)]
pub struct Gaussian2d;

impl Gaussian2d {
    const NAMES: [&'static str; 6] = ["amplitude", "x0", "y0", "sigma_x", "sigma_y", "background"];
}

impl PsfModel for Gaussian2d {
    fn parameters(&self) -> &[&'static str] {
        &Self::NAMES
    }

    fn evaluate(&self, x: f64, y: f64, params: &[f64]) -> f64 {
        let [amplitude, x0, y0, sigma_x, sigma_y, background] = match params {
            [a, b, c, d, e, f] => [*a, *b, *c, *d, *e, *f],
            _ => return f64::NAN,
        };
        let u = (x - x0) / sigma_x;
        let v = (y - y0) / sigma_y;
        background + amplitude * (-0.5 * (u * u + v * v)).exp()
    }

    fn bounds(&self, index: usize) -> (f64, f64) {
        match index {
            3 | 4 => (WIDTH_FLOOR, f64::INFINITY),
            _ => (f64::NEG_INFINITY, f64::INFINITY),
        }
    }
}

/// Circular Moffat profile on a constant background.
#[derive(Clone, Copy, Debug, Default)]
pub struct Moffat2d;

impl Moffat2d {
    const NAMES: [&'static str; 6] = ["amplitude", "x0", "y0", "alpha", "beta", "background"];
}

impl PsfModel for Moffat2d {
    fn parameters(&self) -> &[&'static str] {
        &Self::NAMES
    }

    fn evaluate(&self, x: f64, y: f64, params: &[f64]) -> f64 {
        let [amplitude, x0, y0, alpha, beta, background] = match params {
            [a, b, c, d, e, f] => [*a, *b, *c, *d, *e, *f],
            _ => return f64::NAN,
        };
        let r2 = (x - x0).powi(2) + (y - y0).powi(2);
        background + amplitude * (1.0 + r2 / (alpha * alpha)).powf(-beta)
    }

    fn bounds(&self, index: usize) -> (f64, f64) {
        match index {
            3 => (WIDTH_FLOOR, f64::INFINITY),
            4 => (0.1, f64::INFINITY),
            _ => (f64::NEG_INFINITY, f64::INFINITY),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Gaussian2d, Moffat2d, PsfModel, SimplePsf};

    #[test]
    fn gaussian_peaks_at_center() {
        let params = [5.0, 2.0, 3.0, 1.0, 1.5, 0.5];
        let img = Gaussian2d.render(7, &params);
        assert!((img[[3, 2]] - 5.5).abs() < 1e-12);
        assert!(img[[3, 3]] < img[[3, 2]]);
        assert_eq!(Gaussian2d.parameter_index("sigma_y"), Some(4));
    }

    #[test]
    fn moffat_half_width() {
        let params = [1.0, 0.0, 0.0, 2.0, 1.0, 0.0];
        assert!((Moffat2d.evaluate(2.0, 0.0, &params) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn simple_psf_bounds_by_name() {
        let model = SimplePsf::new(&["a", "b"], |x: f64, _y: f64, p: &[f64]| p[0] * x + p[1])
            .with_bounds("b", 0.0, 1.0)
            .unwrap();
        assert_eq!(model.bounds(1), (0.0, 1.0));
        assert_eq!(model.evaluate(2.0, 0.0, &[3.0, 1.0]), 7.0);
        assert!(SimplePsf::new(&["a"], |_x: f64, _y: f64, _p: &[f64]| 0.0)
            .with_bounds("z", 0.0, 1.0)
            .is_err());
    }
}
