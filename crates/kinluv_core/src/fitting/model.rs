use super::bounded::ResidualModel;
use crate::error::KineticsError;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::f64::consts::LN_10;

/// Sum of exponentials with an optional constant offset.
///
/// Search coordinates are `[A1, log10 τ1, A2, log10 τ2, …, C]`; time
/// constants are searched in log10 so one bound spans many decades.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialModel {
    pub components: usize,
    pub offset: bool,
}

impl ExponentialModel {
    pub const BI_EXPONENTIAL: Self = Self {
        components: 2,
        offset: true,
    };
    pub const TAIL: Self = Self {
        components: 1,
        offset: true,
    };
    pub const PULSE: Self = Self {
        components: 1,
        offset: false,
    };

    pub fn parameter_count(&self) -> usize {
        2 * self.components + usize::from(self.offset)
    }

    pub fn evaluate(&self, x: &[f64], t: f64) -> f64 {
        let mut y = if self.offset {
            x[2 * self.components]
        } else {
            0.0
        };
        for k in 0..self.components {
            let tau = 10f64.powf(x[2 * k + 1]);
            y += x[2 * k] * (-t / tau).exp();
        }
        y
    }

    /// ∂y/∂x at time `t`.
    pub fn gradient(&self, x: &[f64], t: f64, out: &mut [f64]) {
        for k in 0..self.components {
            let tau = 10f64.powf(x[2 * k + 1]);
            let e = (-t / tau).exp();
            out[2 * k] = e;
            out[2 * k + 1] = x[2 * k] * e * (t / tau) * LN_10;
        }
        if self.offset {
            out[2 * self.components] = 1.0;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Domain {
    Linear,
    /// ln(max(y, floor)); populations below `floor` are indistinguishable.
    Log { floor: f64 },
}

/// Residuals `model − data`, in the linear or log domain.
#[derive(Debug, Clone)]
pub struct CurveResiduals<'a> {
    pub model: ExponentialModel,
    pub times: &'a [f64],
    pub data: &'a [f64],
    pub domain: Domain,
    log_data: Vec<f64>,
}

impl<'a> CurveResiduals<'a> {
    pub fn new(model: ExponentialModel, times: &'a [f64], data: &'a [f64], domain: Domain) -> Self {
        let log_data = match domain {
            Domain::Linear => Vec::new(),
            Domain::Log { floor } => data.iter().map(|d| d.max(floor).ln()).collect(),
        };
        Self {
            model,
            times,
            data,
            domain,
            log_data,
        }
    }
}

impl ResidualModel for CurveResiduals<'_> {
    fn parameter_count(&self) -> usize {
        self.model.parameter_count()
    }

    fn residual_count(&self) -> usize {
        self.times.len()
    }

    fn residuals(&self, x: &[f64], out: &mut [f64]) {
        for (i, &t) in self.times.iter().enumerate() {
            let y = self.model.evaluate(x, t);
            out[i] = match self.domain {
                Domain::Linear => y - self.data[i],
                Domain::Log { floor } => y.max(floor).ln() - self.log_data[i],
            };
        }
    }

    fn jacobian(&self, x: &[f64], out: &mut DMatrix<f64>) {
        let mut gradient = vec![0.0; self.parameter_count()];
        for (i, &t) in self.times.iter().enumerate() {
            self.model.gradient(x, t, &mut gradient);
            let factor = match self.domain {
                Domain::Linear => 1.0,
                Domain::Log { floor } => {
                    let y = self.model.evaluate(x, t);
                    // Clipped model values do not respond to the parameters.
                    if y > floor {
                        1.0 / y
                    } else {
                        0.0
                    }
                }
            };
            for (j, g) in gradient.iter().enumerate() {
                out[(i, j)] = g * factor;
            }
        }
    }
}

/// y(t) = A1·exp(−t/τ1) + A2·exp(−t/τ2) + C
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiExponential {
    pub a1: f64,
    pub tau1: f64,
    pub a2: f64,
    pub tau2: f64,
    pub offset: f64,
}

impl BiExponential {
    pub fn from_search(x: &[f64; 5]) -> Self {
        Self {
            a1: x[0],
            tau1: 10f64.powf(x[1]),
            a2: x[2],
            tau2: 10f64.powf(x[3]),
            offset: x[4],
        }
    }

    pub fn to_search(&self) -> [f64; 5] {
        [
            self.a1,
            self.tau1.log10(),
            self.a2,
            self.tau2.log10(),
            self.offset,
        ]
    }

    pub fn evaluate(&self, t: f64) -> f64 {
        self.a1 * (-t / self.tau1).exp() + self.a2 * (-t / self.tau2).exp() + self.offset
    }

    /// Puts the shorter lifetime first.
    pub fn ordered(self) -> Self {
        if self.tau1 > self.tau2 {
            Self {
                a1: self.a2,
                tau1: self.tau2,
                a2: self.a1,
                tau2: self.tau1,
                offset: self.offset,
            }
        } else {
            self
        }
    }
}

impl TryFrom<&[f64]> for BiExponential {
    type Error = KineticsError;

    /// Reads search coordinates of unchecked length.
    fn try_from(x: &[f64]) -> Result<Self, Self::Error> {
        let coordinates: &[f64; 5] = x.try_into().map_err(|_| {
            KineticsError::invalid(
                "parameters",
                format!("expected 5 search coordinates, got {}", x.len()),
            )
        })?;
        Ok(Self::from_search(coordinates))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitMetrics {
    pub mse: f64,
    pub rmse: f64,
    pub r_squared: f64,
}

impl FitMetrics {
    /// Goodness of fit in the linear domain.
    pub fn compute(model: &BiExponential, times: &[f64], data: &[f64]) -> Self {
        let n = data.len().max(1) as f64;
        let mean = data.iter().sum::<f64>() / n;
        let (ss_res, ss_tot) = times.iter().zip(data).fold((0.0, 0.0), |(res, tot), (&t, &d)| {
            let r = d - model.evaluate(t);
            (res + r * r, tot + (d - mean) * (d - mean))
        });
        let mse = ss_res / n;
        let r_squared = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };
        Self {
            mse,
            rmse: mse.sqrt(),
            r_squared,
        }
    }
}
