//! Per-patch PSF fitting.
//!
//! Every patch is fitted independently against the same model, starting
//! from the same initial guess. A failure on one patch is recorded under its
//! identifier and never stops the batch. With the `rayon` feature and
//! `FitConfig::parallel` set, patches are fitted on the rayon thread pool.

mod lm;

use crate::patch::{Patch, PatchKey, PatchStore};
use crate::psf::PsfModel;
use crate::trace::{trace_event, trace_span};
use crate::util::{PsfPatchError, PsfPatchResult};
use std::collections::HashMap;

/// Solver configuration shared by every patch of a batch.
#[derive(Clone, Debug)]
pub struct FitConfig {
    /// Maximum number of accepted or attempted Jacobian updates.
    pub max_iterations: usize,
    /// Relative cost reduction below which the fit is converged.
    pub ftol: f64,
    /// Relative parameter change below which the fit is converged.
    pub xtol: f64,
    /// Largest gradient component treated as zero.
    pub gtol: f64,
    /// Starting Marquardt damping.
    pub initial_lambda: f64,
    /// Factor applied to the damping after a rejected or accepted step.
    pub lambda_factor: f64,
    /// Relative forward-difference step for the Jacobian.
    pub diff_step: f64,
    /// Fit patches on the rayon pool (requires the `rayon` feature).
    pub parallel: bool,
    /// Fit a spatially varying model across all patches. Not implemented.
    pub varied: bool,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-14,
            initial_lambda: 1e-3,
            lambda_factor: 10.0,
            diff_step: f64::EPSILON.sqrt(),
            parallel: false,
            varied: false,
        }
    }
}

impl FitConfig {
    /// Checks the solver settings before any patch is fitted.
    ///
    /// Tolerances must be finite and non-negative; `initial_lambda` and
    /// `diff_step` finite and positive; `lambda_factor` finite and above one.
    pub fn validate(&self) -> PsfPatchResult<()> {
        for tol in [self.ftol, self.xtol, self.gtol] {
            if !(tol.is_finite() && tol >= 0.0) {
                return Err(PsfPatchError::InvalidInput(
                    "tolerances must be finite and non-negative",
                ));
            }
        }
        if !(self.initial_lambda.is_finite() && self.initial_lambda > 0.0) {
            return Err(PsfPatchError::InvalidInput(
                "initial_lambda must be finite and positive",
            ));
        }
        if !(self.lambda_factor.is_finite() && self.lambda_factor > 1.0) {
            return Err(PsfPatchError::InvalidInput(
                "lambda_factor must be finite and greater than one",
            ));
        }
        if !(self.diff_step.is_finite() && self.diff_step > 0.0) {
            return Err(PsfPatchError::InvalidInput(
                "diff_step must be finite and positive",
            ));
        }
        Ok(())
    }
}

/// Outcome of fitting one patch.
#[derive(Clone, Debug, PartialEq)]
pub struct FitResult {
    /// Fitted values, in the model's parameter order.
    pub parameters: Vec<(&'static str, f64)>,
    /// Sum of squared residuals at the solution.
    pub chi_square: f64,
    /// `chi_square` divided by the degrees of freedom (NaN if there are none).
    pub reduced_chi_square: f64,
    /// Euclidean norm of the residual vector.
    pub residual_norm: f64,
    /// Jacobian updates performed.
    pub iterations: usize,
    /// Model evaluations over the full grid.
    pub evaluations: usize,
    /// True if a convergence criterion was met before the iteration cap.
    pub converged: bool,
}

impl FitResult {
    /// Fitted value of parameter `name`.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.parameters
            .iter()
            .find(|(p, _)| *p == name)
            .map(|(_, v)| *v)
    }
}

/// Orders `initial` by the model's declared parameters.
fn ordered_guesses<M: PsfModel + ?Sized>(
    model: &M,
    initial: &HashMap<String, f64>,
) -> PsfPatchResult<Vec<f64>> {
    model
        .parameters()
        .iter()
        .map(|name| {
            initial
                .get(*name)
                .copied()
                .ok_or_else(|| PsfPatchError::MissingInitialGuess {
                    parameter: (*name).to_string(),
                })
        })
        .collect()
}

fn fit_one<M: PsfModel + ?Sized>(
    model: &M,
    patch: &Patch,
    initial: &[f64],
    cfg: &FitConfig,
) -> PsfPatchResult<FitResult> {
    let out = lm::solve(model, patch, initial, cfg)?;
    let dof = out.samples - out.params.len();
    Ok(FitResult {
        parameters: model
            .parameters()
            .iter()
            .copied()
            .zip(out.params.iter().copied())
            .collect(),
        chi_square: out.cost,
        reduced_chi_square: if dof > 0 {
            out.cost / dof as f64
        } else {
            f64::NAN
        },
        residual_norm: out.cost.sqrt(),
        iterations: out.iterations,
        evaluations: out.evaluations,
        converged: out.converged,
    })
}

impl<K: PatchKey> PatchStore<K> {
    /// Fits `model` to every patch, starting from `initial`.
    ///
    /// Fails up front if `cfg` is invalid, if `initial` lacks a declared
    /// parameter or if the varied mode is requested; per-patch solver failures are returned in
    /// the map as `Err` entries.
    pub fn fit<M: PsfModel + ?Sized>(
        &self,
        model: &M,
        initial: &HashMap<String, f64>,
        cfg: &FitConfig,
    ) -> PsfPatchResult<HashMap<K, PsfPatchResult<FitResult>>> {
        if cfg.varied {
            // TODO: fit parameter laws across patch positions once a varied model contract exists.
            return Err(PsfPatchError::NotImplemented("spatially varying PSF fit"));
        }
        cfg.validate()?;
        let guesses = ordered_guesses(model, initial)?;

        let _span = trace_span!(
            "fit",
            patches = self.len(),
            parameters = guesses.len(),
            parallel = cfg.parallel
        )
        .entered();

        #[cfg(feature = "rayon")]
        let results: HashMap<K, PsfPatchResult<FitResult>> = if cfg.parallel {
            use rayon::prelude::*;
            let entries: Vec<(&K, &Patch)> = self.iter().collect();
            entries
                .into_par_iter()
                .map(|(key, patch)| (key.clone(), fit_one(model, patch, &guesses, cfg)))
                .collect()
        } else {
            self.iter()
                .map(|(key, patch)| (key.clone(), fit_one(model, patch, &guesses, cfg)))
                .collect()
        };

        #[cfg(not(feature = "rayon"))]
        let results: HashMap<K, PsfPatchResult<FitResult>> = self
            .iter()
            .map(|(key, patch)| (key.clone(), fit_one(model, patch, &guesses, cfg)))
            .collect();

        let failed = results.values().filter(|r| r.is_err()).count();
        trace_event!("fit_done", fitted = results.len() - failed, failed = failed);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::{ordered_guesses, FitConfig};
    use crate::patch::{CoordinateId, PatchStore};
    use crate::psf::{Gaussian2d, SimplePsf};
    use crate::util::PsfPatchError;
    use ndarray::Array2;
    use std::collections::HashMap;

    #[test]
    fn guesses_follow_model_order() {
        let initial: HashMap<String, f64> = [
            ("background", 6.0),
            ("amplitude", 1.0),
            ("x0", 2.0),
            ("y0", 3.0),
            ("sigma_x", 4.0),
            ("sigma_y", 5.0),
            ("unused", 9.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        assert_eq!(
            ordered_guesses(&Gaussian2d, &initial).unwrap(),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
        );
    }

    #[test]
    fn default_config_is_valid() {
        assert!(FitConfig::default().validate().is_ok());
    }

    #[test]
    fn invalid_damping_schedule_is_rejected() {
        let rejected = [
            FitConfig {
                lambda_factor: 1.0,
                ..FitConfig::default()
            },
            FitConfig {
                lambda_factor: 0.0,
                ..FitConfig::default()
            },
            FitConfig {
                lambda_factor: f64::NAN,
                ..FitConfig::default()
            },
            FitConfig {
                initial_lambda: f64::NAN,
                ..FitConfig::default()
            },
            FitConfig {
                initial_lambda: 0.0,
                ..FitConfig::default()
            },
            FitConfig {
                initial_lambda: f64::INFINITY,
                ..FitConfig::default()
            },
        ];
        for cfg in rejected {
            assert!(
                matches!(cfg.validate(), Err(PsfPatchError::InvalidInput(_))),
                "{cfg:?}"
            );
        }
    }

    #[test]
    fn invalid_step_and_tolerances_are_rejected() {
        let rejected = [
            FitConfig {
                diff_step: 0.0,
                ..FitConfig::default()
            },
            FitConfig {
                diff_step: -1e-8,
                ..FitConfig::default()
            },
            FitConfig {
                diff_step: f64::NAN,
                ..FitConfig::default()
            },
            FitConfig {
                ftol: -1.0,
                ..FitConfig::default()
            },
            FitConfig {
                xtol: f64::NAN,
                ..FitConfig::default()
            },
            FitConfig {
                gtol: f64::INFINITY,
                ..FitConfig::default()
            },
        ];
        for cfg in rejected {
            assert!(
                matches!(cfg.validate(), Err(PsfPatchError::InvalidInput(_))),
                "{cfg:?}"
            );
        }
    }

    #[test]
    fn fit_rejects_config_before_fitting_any_patch() {
        let model = SimplePsf::new(&["a"], |_x: f64, _y: f64, p: &[f64]| p[0])
            .with_bounds("a", 0.0, 1.0)
            .unwrap();
        let mut store = PatchStore::new();
        store
            .add(CoordinateId::new(0, 0, 0), Array2::from_elem((3, 3), 4.0))
            .unwrap();
        let initial: HashMap<String, f64> = [("a".to_string(), 0.5)].into_iter().collect();
        let cfg = FitConfig {
            lambda_factor: 1.0,
            ..FitConfig::default()
        };
        let err = store.fit(&model, &initial, &cfg).unwrap_err();
        assert!(matches!(err, PsfPatchError::InvalidInput(_)));
    }

    #[test]
    fn varied_mode_is_not_implemented() {
        let store = PatchStore::<CoordinateId>::new();
        let cfg = FitConfig {
            varied: true,
            ..FitConfig::default()
        };
        let err = store.fit(&Gaussian2d, &HashMap::new(), &cfg).unwrap_err();
        assert_eq!(err, PsfPatchError::NotImplemented("spatially varying PSF fit"));
    }
}
