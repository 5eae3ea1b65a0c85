//! Levenberg-Marquardt least squares over one patch.
//!
//! Residuals are `observed - model` over the stamp grid in row-major order.
//! The Jacobian is built with forward differences and the damped normal
//! equations `(JᵀJ + λ·diag(JᵀJ)) δ = -Jᵀr` are solved by Cholesky
//! factorization. Parameters are clamped to the model bounds after every
//! step.

use crate::fit::FitConfig;
use crate::patch::Patch;
use crate::psf::PsfModel;
use crate::util::{PsfPatchError, PsfPatchResult};
use nalgebra::{DMatrix, DVector};

/// Damping above which no step can reduce the cost any further.
const LAMBDA_CAP: f64 = 1e16;
const DIAG_FLOOR: f64 = 1e-12;

pub(crate) struct LmOutcome {
    pub(crate) params: Vec<f64>,
    pub(crate) cost: f64,
    pub(crate) samples: usize,
    pub(crate) iterations: usize,
    pub(crate) evaluations: usize,
    pub(crate) converged: bool,
}

fn failure(reason: impl Into<String>) -> PsfPatchError {
    PsfPatchError::SolverFailure {
        reason: reason.into(),
    }
}

struct Problem<'a, M: ?Sized> {
    model: &'a M,
    observed: DVector<f64>,
    coords: Vec<(f64, f64)>,
    bounds: Vec<(f64, f64)>,
    evaluations: usize,
}

impl<M: PsfModel + ?Sized> Problem<'_, M> {
    fn residuals(&mut self, params: &[f64]) -> DVector<f64> {
        self.evaluations += 1;
        DVector::from_iterator(
            self.coords.len(),
            self.coords
                .iter()
                .zip(self.observed.iter())
                .map(|(&(x, y), &obs)| obs - self.model.evaluate(x, y, params)),
        )
    }

    fn clamp(&self, params: &mut [f64]) {
        for (value, &(lower, upper)) in params.iter_mut().zip(self.bounds.iter()) {
            *value = value.clamp(lower, upper);
        }
    }

    fn jacobian(
        &mut self,
        params: &[f64],
        base: &DVector<f64>,
        rel_step: f64,
    ) -> PsfPatchResult<DMatrix<f64>> {
        let mut jac = DMatrix::zeros(base.len(), params.len());
        let mut shifted = params.to_vec();
        for j in 0..params.len() {
            let (_, upper) = self.bounds[j];
            let mut h = rel_step * params[j].abs().max(1.0);
            if params[j] + h > upper {
                h = -h;
            }
            shifted[j] = params[j] + h;
            let r = self.residuals(&shifted);
            shifted[j] = params[j];

            let column = (r - base) / h;
            if column.iter().any(|v| !v.is_finite()) {
                return Err(failure(format!(
                    "non-finite derivative for parameter {}",
                    self.model.parameters()[j]
                )));
            }
            jac.set_column(j, &column);
        }
        Ok(jac)
    }
}

pub(crate) fn solve<M: PsfModel + ?Sized>(
    model: &M,
    patch: &Patch,
    initial: &[f64],
    cfg: &FitConfig,
) -> PsfPatchResult<LmOutcome> {
    let n_params = initial.len();
    let samples = patch.len();
    if samples < n_params {
        return Err(failure(format!(
            "{samples} samples cannot constrain {n_params} parameters"
        )));
    }
    if patch.iter().any(|v| !v.is_finite()) {
        return Err(failure("patch contains non-finite samples"));
    }

    let coords = patch
        .indexed_iter()
        .map(|((row, col), _)| (col as f64, row as f64))
        .collect();
    let mut problem = Problem {
        model,
        observed: DVector::from_iterator(samples, patch.iter().copied()),
        coords,
        bounds: (0..n_params).map(|j| model.bounds(j)).collect(),
        evaluations: 0,
    };

    let mut params = initial.to_vec();
    problem.clamp(&mut params);
    let mut residuals = problem.residuals(&params);
    let mut cost = residuals.norm_squared();
    if !cost.is_finite() {
        return Err(failure("model is not finite at the initial guess"));
    }

    let scale = problem.observed.norm_squared().max(f64::MIN_POSITIVE);
    let mut lambda = cfg.initial_lambda;
    let mut converged = false;
    let mut iterations = 0;

    while iterations < cfg.max_iterations {
        if cost <= f64::EPSILON * scale {
            converged = true;
            break;
        }
        iterations += 1;

        let jac = problem.jacobian(&params, &residuals, cfg.diff_step)?;
        let jtj = jac.transpose() * &jac;
        let gradient = jac.transpose() * &residuals;
        if gradient.amax() <= cfg.gtol {
            converged = true;
            break;
        }

        let mut accepted = false;
        while lambda <= LAMBDA_CAP {
            let mut damped = jtj.clone();
            for i in 0..n_params {
                damped[(i, i)] += lambda * jtj[(i, i)].max(DIAG_FLOOR);
            }
            let Some(chol) = damped.cholesky() else {
                lambda *= cfg.lambda_factor;
                continue;
            };
            let step = chol.solve(&(-&gradient));

            let mut trial: Vec<f64> = params.iter().zip(step.iter()).map(|(p, d)| p + d).collect();
            problem.clamp(&mut trial);
            let trial_residuals = problem.residuals(&trial);
            let trial_cost = trial_residuals.norm_squared();

            if trial_cost.is_finite() && trial_cost < cost {
                let reduction = cost - trial_cost;
                let moved: f64 = params
                    .iter()
                    .zip(trial.iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f64>()
                    .sqrt();
                let norm: f64 = params.iter().map(|p| p * p).sum::<f64>().sqrt();

                params = trial;
                residuals = trial_residuals;
                cost = trial_cost;
                lambda = (lambda / cfg.lambda_factor).max(f64::MIN_POSITIVE);
                accepted = true;

                if reduction <= cfg.ftol * (cost + reduction)
                    || moved <= cfg.xtol * (norm + cfg.xtol)
                {
                    converged = true;
                }
                break;
            }
            lambda *= cfg.lambda_factor;
        }

        if !accepted {
            // No damping level lowers the cost: the current point is a minimum.
            converged = true;
        }
        if converged {
            break;
        }
    }

    Ok(LmOutcome {
        params,
        cost,
        samples,
        iterations,
        evaluations: problem.evaluations,
        converged,
    })
}

#[cfg(test)]
mod tests {
    use super::solve;
    use crate::fit::FitConfig;
    use crate::psf::SimplePsf;
    use ndarray::Array2;

    #[test]
    fn recovers_plane_exactly() {
        let model = SimplePsf::new(&["a", "b", "c"], |x: f64, y: f64, p: &[f64]| {
            p[0] * x + p[1] * y + p[2]
        });
        let patch = Array2::from_shape_fn((5, 5), |(r, c)| 2.0 * c as f64 - 0.5 * r as f64 + 3.0);
        let out = solve(&model, &patch, &[0.0, 0.0, 0.0], &FitConfig::default()).unwrap();
        assert!(out.converged);
        assert!((out.params[0] - 2.0).abs() < 1e-6);
        assert!((out.params[1] + 0.5).abs() < 1e-6);
        assert!((out.params[2] - 3.0).abs() < 1e-6);
        assert!(out.cost < 1e-10);
    }

    #[test]
    fn rejects_non_finite_samples() {
        let model = SimplePsf::new(&["a"], |_x: f64, _y: f64, p: &[f64]| p[0]);
        let mut patch = Array2::zeros((3, 3));
        patch[[1, 1]] = f64::NAN;
        assert!(solve(&model, &patch, &[0.0], &FitConfig::default()).is_err());
    }

    #[test]
    fn bounds_are_respected() {
        let model = SimplePsf::new(&["a"], |_x: f64, _y: f64, p: &[f64]| p[0])
            .with_bounds("a", 0.0, 1.0)
            .unwrap();
        let patch = Array2::from_elem((3, 3), 4.0);
        let out = solve(&model, &patch, &[0.5], &FitConfig::default()).unwrap();
        assert!((out.params[0] - 1.0).abs() < 1e-12);
    }
}
