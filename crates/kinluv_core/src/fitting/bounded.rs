//! Box-constrained nonlinear least squares.
//!
//! Levenberg–Marquardt works on unconstrained parameters, so every bounded
//! parameter `x ∈ [lo, hi]` is driven through an internal coordinate `u`
//! with `x = lo + (hi − lo)(sin u + 1)/2`. The soft-L1 loss is applied by
//! rescaling residuals so that the plain sum of squares equals
//! `Σ 2(√(1 + r²) − 1)`.

use crate::error::{KineticsError, Result};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use nalgebra::{DMatrix, DVector, Dyn, Owned};
use serde::{Deserialize, Serialize};

/// Fraction of the bound width that keeps a start point off the bounds.
const INTERIOR_MARGIN: f64 = 1e-4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Result<Self> {
        if lower.len() != upper.len() {
            return Err(KineticsError::infeasible(format!(
                "{} lower bounds for {} upper bounds",
                lower.len(),
                upper.len()
            )));
        }
        for (i, (lo, hi)) in lower.iter().zip(&upper).enumerate() {
            if !(lo.is_finite() && hi.is_finite() && lo < hi) {
                return Err(KineticsError::infeasible(format!(
                    "parameter {i} has empty bounds [{lo:e}, {hi:e}]"
                )));
            }
        }
        Ok(Self { lower, upper })
    }

    pub fn dimension(&self) -> usize {
        self.lower.len()
    }

    pub fn width(&self, i: usize) -> f64 {
        self.upper[i] - self.lower[i]
    }

    pub fn contains(&self, x: &[f64]) -> bool {
        x.len() == self.dimension()
            && x
                .iter()
                .zip(self.lower.iter().zip(&self.upper))
                .all(|(v, (lo, hi))| (*lo..=*hi).contains(v))
    }

    pub fn clamp(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(self.lower.iter().zip(&self.upper))
            .map(|(v, (lo, hi))| v.clamp(*lo, *hi))
            .collect()
    }

    /// Maps `x` into the unit cube.
    pub fn to_unit(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .enumerate()
            .map(|(i, v)| (v - self.lower[i]) / self.width(i))
            .collect()
    }

    pub fn from_unit(&self, unit: &[f64]) -> Vec<f64> {
        unit.iter()
            .enumerate()
            .map(|(i, v)| self.lower[i] + v * self.width(i))
            .collect()
    }

    fn to_internal(&self, x: &[f64]) -> DVector<f64> {
        DVector::from_iterator(
            x.len(),
            x.iter().enumerate().map(|(i, &v)| {
                let margin = INTERIOR_MARGIN * self.width(i);
                let v = v.clamp(self.lower[i] + margin, self.upper[i] - margin);
                (2.0 * (v - self.lower[i]) / self.width(i) - 1.0).asin()
            }),
        )
    }

    fn to_external(&self, u: &DVector<f64>) -> Vec<f64> {
        u.iter()
            .enumerate()
            .map(|(i, &v)| self.lower[i] + 0.5 * self.width(i) * (v.sin() + 1.0))
            .collect()
    }

    fn derivative(&self, u: &DVector<f64>) -> Vec<f64> {
        u.iter()
            .enumerate()
            .map(|(i, &v)| 0.5 * self.width(i) * v.cos())
            .collect()
    }
}

/// Residual vector of a curve model with an analytic Jacobian.
pub trait ResidualModel {
    fn parameter_count(&self) -> usize;

    fn residual_count(&self) -> usize;

    /// Writes r(x) into `out`.
    fn residuals(&self, x: &[f64], out: &mut [f64]);

    /// Writes ∂r/∂x into `out` (residuals × parameters).
    fn jacobian(&self, x: &[f64], out: &mut DMatrix<f64>);

    fn sum_of_squares(&self, x: &[f64]) -> f64 {
        let mut r = vec![0.0; self.residual_count()];
        self.residuals(x, &mut r);
        r.iter().map(|v| v * v).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Loss {
    Linear,
    SoftL1,
}

impl Loss {
    /// Returns the rescaled residual and its derivative with respect to `r`.
    fn apply(self, r: f64) -> (f64, f64) {
        match self {
            Loss::Linear => (r, 1.0),
            Loss::SoftL1 => {
                let s = (1.0 + r * r).sqrt();
                let scale = (2.0 / (s + 1.0)).sqrt();
                (r * scale, scale * (1.0 - r * r / (2.0 * s * (s + 1.0))))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalFitSettings {
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
    /// Evaluation budget, in multiples of (parameters + 1).
    pub patience: usize,
}

impl Default for LocalFitSettings {
    fn default() -> Self {
        Self {
            ftol: 1e-12,
            xtol: 1e-12,
            gtol: 1e-12,
            patience: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalFit {
    pub params: Vec<f64>,
    /// Half the loss-weighted sum of squares at `params`.
    pub cost: f64,
    pub evaluations: usize,
    pub termination: String,
    pub converged: bool,
}

struct SineProblem<'a, M> {
    model: &'a M,
    bounds: &'a Bounds,
    loss: Loss,
    u: DVector<f64>,
}

impl<'a, M: ResidualModel> SineProblem<'a, M> {
    fn raw_residuals(&self, x: &[f64]) -> Vec<f64> {
        let mut r = vec![0.0; self.model.residual_count()];
        self.model.residuals(x, &mut r);
        r
    }
}

impl<'a, M: ResidualModel> LeastSquaresProblem<f64, Dyn, Dyn> for SineProblem<'a, M> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, u: &DVector<f64>) {
        self.u.copy_from(u);
    }

    fn params(&self) -> DVector<f64> {
        self.u.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let x = self.bounds.to_external(&self.u);
        let r = self.raw_residuals(&x);
        if r.iter().any(|v| !v.is_finite()) {
            return None;
        }
        Some(DVector::from_iterator(
            r.len(),
            r.into_iter().map(|v| self.loss.apply(v).0),
        ))
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let x = self.bounds.to_external(&self.u);
        let r = self.raw_residuals(&x);
        let dx_du = self.bounds.derivative(&self.u);
        let mut jac = DMatrix::<f64>::zeros(r.len(), x.len());
        self.model.jacobian(&x, &mut jac);
        for (row, &value) in r.iter().enumerate() {
            let weight = self.loss.apply(value).1;
            for (col, &chain) in dx_du.iter().enumerate() {
                jac[(row, col)] *= weight * chain;
            }
        }
        if jac.iter().any(|v| !v.is_finite()) {
            return None;
        }
        Some(jac)
    }
}

fn describe(reason: &TerminationReason) -> (String, bool) {
    let converged = matches!(
        reason,
        TerminationReason::Converged { .. }
            | TerminationReason::ResidualsZero
            | TerminationReason::Orthogonal
    );
    (format!("{reason:?}"), converged)
}

/// Minimizes the loss-weighted residuals of `model` within `bounds`,
/// starting from `start` (moved strictly inside the box first).
pub fn minimize_bounded<M: ResidualModel>(
    model: &M,
    bounds: &Bounds,
    start: &[f64],
    loss: Loss,
    settings: &LocalFitSettings,
) -> Result<LocalFit> {
    if start.len() != bounds.dimension() || model.parameter_count() != bounds.dimension() {
        return Err(KineticsError::infeasible(format!(
            "{} start values and {} bounds for a {}-parameter model",
            start.len(),
            bounds.dimension(),
            model.parameter_count()
        )));
    }
    if model.residual_count() < model.parameter_count() {
        return Err(KineticsError::infeasible(format!(
            "{} data points cannot determine {} parameters",
            model.residual_count(),
            model.parameter_count()
        )));
    }

    let problem = SineProblem {
        model,
        bounds,
        loss,
        u: bounds.to_internal(start),
    };
    let (solved, report) = LevenbergMarquardt::new()
        .with_ftol(settings.ftol)
        .with_xtol(settings.xtol)
        .with_gtol(settings.gtol)
        .with_patience(settings.patience)
        .minimize(problem);

    let params = bounds.to_external(&solved.u);
    let (termination, converged) = describe(&report.termination);
    Ok(LocalFit {
        params,
        cost: report.objective_function,
        evaluations: report.number_of_evaluations,
        termination,
        converged,
    })
}
