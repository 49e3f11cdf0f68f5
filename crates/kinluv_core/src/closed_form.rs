//! Exact propagator for the 2- and 3-state topologies.
//!
//! With the conserved total eliminated the excited manifold is at most
//! 2-dimensional, so `dy/dt = M y + f` is solved through the spectral
//! decomposition of the small matrix `M`:
//!
//! ```text
//! y(t) = E(t) y0 + Φ(t) f,   E(t) = Σ e^{λt} P,   Φ(t) = Σ φ(λ, t) P
//! ```
//!
//! where `P` are the spectral projectors and `φ(λ, t) = (e^{λt} − 1)/λ`.
//! A nearly repeated eigenvalue switches to the confluent form
//! `E(t) = e^{st}(I + tN)` with `N = M − sI`.

use crate::error::{KineticsError, Result};
use crate::model::{KineticsMatrix, ReducedSystem};
use nalgebra::{DMatrix, DVector};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

const ZERO_EIGENVALUE: f64 = 1e-12;
const REPEATED_EIGENVALUE: f64 = 1e-8;
const SERIES_CUTOFF: f64 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplexNumber {
    pub re: f64,
    pub im: f64,
}

impl From<Complex<f64>> for ComplexNumber {
    fn from(value: Complex<f64>) -> Self {
        Self {
            re: value.re,
            im: value.im,
        }
    }
}

#[derive(Debug, Clone)]
enum Spectrum {
    Diagonalizable {
        eigenvalues: Vec<Complex<f64>>,
        projectors: Vec<DMatrix<Complex<f64>>>,
    },
    Defective {
        shift: f64,
        nilpotent: DMatrix<f64>,
    },
}

#[derive(Debug, Clone)]
pub struct ClosedFormSolution {
    reduced: ReducedSystem,
    initial: DVector<f64>,
    spectrum: Spectrum,
    scale: f64,
}

impl ClosedFormSolution {
    pub fn new(matrix: &KineticsMatrix, initial: &[f64]) -> Result<Self> {
        let states = matrix.variant().state_count();
        if !matrix.variant().is_closed_form() {
            return Err(KineticsError::UnsupportedVariant { states });
        }
        if initial.len() != states {
            return Err(KineticsError::invalid(
                "initial_state",
                format!("expected {states} populations, got {}", initial.len()),
            ));
        }

        let total: f64 = initial.iter().sum();
        let reduced = matrix.reduced(total);
        let initial = reduced.project(initial);
        let scale = reduced
            .generator
            .iter()
            .fold(0.0_f64, |acc, v| acc.max(v.abs()));
        let spectrum = decompose(&reduced.generator, scale);

        Ok(Self {
            reduced,
            initial,
            spectrum,
            scale,
        })
    }

    pub fn eigenvalues(&self) -> Vec<Complex<f64>> {
        match &self.spectrum {
            Spectrum::Diagonalizable { eigenvalues, .. } => eigenvalues.clone(),
            Spectrum::Defective { shift, .. } => {
                vec![Complex::new(*shift, 0.0); self.reduced.dimension()]
            }
        }
    }

    /// Full population vector (S0 first) at time `t` after the phase start.
    pub fn population_at(&self, t: f64) -> Vec<f64> {
        let y0 = &self.initial;
        let f = &self.reduced.forcing;
        let excited = match &self.spectrum {
            Spectrum::Diagonalizable {
                eigenvalues,
                projectors,
            } => {
                let mut acc = DVector::<Complex<f64>>::zeros(y0.len());
                let y0c = y0.map(|v| Complex::new(v, 0.0));
                let fc = f.map(|v| Complex::new(v, 0.0));
                for (lambda, p) in eigenvalues.iter().zip(projectors) {
                    let decay = (*lambda * t).exp();
                    acc += p * (&y0c * decay + &fc * phi(*lambda, t));
                }
                acc.map(|v| v.re)
            }
            Spectrum::Defective { shift, nilpotent } => {
                let s = *shift;
                let e = (s * t).exp();
                let flow = (y0 + nilpotent * y0 * t) * e;
                let phi_s = phi(Complex::new(s, 0.0), t).re;
                flow + f * phi_s + nilpotent * f * psi(s, t)
            }
        };
        self.reduced.expand(&excited)
    }

    /// Populations as t → ∞.
    pub fn limits(&self) -> Result<Vec<f64>> {
        let zero = ZERO_EIGENVALUE * self.scale;
        let y0 = &self.initial;
        let f = &self.reduced.forcing;
        let f_norm = f.amax();

        let excited = match &self.spectrum {
            Spectrum::Diagonalizable {
                eigenvalues,
                projectors,
            } => {
                let mut acc = DVector::<Complex<f64>>::zeros(y0.len());
                let y0c = y0.map(|v| Complex::new(v, 0.0));
                let fc = f.map(|v| Complex::new(v, 0.0));
                for (lambda, p) in eigenvalues.iter().zip(projectors) {
                    if lambda.norm() <= zero {
                        let drift = p * &fc;
                        if drift.iter().any(|v| v.norm() > 1e-9 * f_norm.max(f64::MIN_POSITIVE)) {
                            return Err(unbounded());
                        }
                        acc += p * &y0c;
                    } else if lambda.re < 0.0 {
                        acc -= p * &fc / *lambda;
                    } else {
                        return Err(unbounded());
                    }
                }
                acc.map(|v| v.re)
            }
            Spectrum::Defective { shift, nilpotent } => {
                if *shift < -zero {
                    let lu = self.reduced.generator.clone().lu();
                    let solved = lu
                        .solve(f)
                        .ok_or_else(|| KineticsError::invalid("rates", "singular generator"))?;
                    -solved
                } else if shift.abs() <= zero && nilpotent.amax() <= zero && f_norm == 0.0 {
                    y0.clone()
                } else {
                    return Err(unbounded());
                }
            }
        };
        Ok(self.reduced.expand(&excited))
    }
}

fn unbounded() -> KineticsError {
    KineticsError::invalid("rates", "excited populations have no bounded limit")
}

fn decompose(m: &DMatrix<f64>, scale: f64) -> Spectrum {
    if m.nrows() == 1 {
        return Spectrum::Diagonalizable {
            eigenvalues: vec![Complex::new(m[(0, 0)], 0.0)],
            projectors: vec![DMatrix::from_element(1, 1, Complex::new(1.0, 0.0))],
        };
    }

    let (a, b, c, d) = (m[(0, 0)], m[(0, 1)], m[(1, 0)], m[(1, 1)]);
    let trace = a + d;
    let det = a * d - b * c;
    let disc = (a - d) * (a - d) + 4.0 * b * c;

    let (l1, l2) = if disc >= 0.0 {
        let root = disc.sqrt();
        let q = 0.5 * (trace + trace.signum() * root);
        if q == 0.0 {
            (Complex::new(0.0, 0.0), Complex::new(0.0, 0.0))
        } else {
            (Complex::new(q, 0.0), Complex::new(det / q, 0.0))
        }
    } else {
        let im = 0.5 * (-disc).sqrt();
        (Complex::new(0.5 * trace, im), Complex::new(0.5 * trace, -im))
    };

    if (l1 - l2).norm() <= REPEATED_EIGENVALUE * scale {
        let shift = 0.5 * trace;
        let nilpotent = m - DMatrix::<f64>::identity(2, 2) * shift;
        return Spectrum::Defective { shift, nilpotent };
    }

    let mc = m.map(|v| Complex::new(v, 0.0));
    let identity = DMatrix::<Complex<f64>>::identity(2, 2);
    let p1 = (&mc - &identity * l2) / (l1 - l2);
    let p2 = (&mc - &identity * l1) / (l2 - l1);
    Spectrum::Diagonalizable {
        eigenvalues: vec![l1, l2],
        projectors: vec![p1, p2],
    }
}

/// ∫₀ᵗ e^{λu} du.
fn phi(lambda: Complex<f64>, t: f64) -> Complex<f64> {
    let z = lambda * t;
    if z.norm() < SERIES_CUTOFF {
        return (Complex::new(1.0, 0.0) + z / 2.0 + z * z / 6.0) * t;
    }
    if lambda.im == 0.0 {
        return Complex::new(z.re.exp_m1() / lambda.re, 0.0);
    }
    (z.exp() - 1.0) / lambda
}

/// ∫₀ᵗ u e^{su} du.
fn psi(s: f64, t: f64) -> f64 {
    let z = s * t;
    if z.abs() < SERIES_CUTOFF {
        return t * t * (0.5 + z / 3.0 + z * z / 8.0);
    }
    (z.exp() * (z - 1.0) + 1.0) / (s * s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Phase;
    use crate::rates::{RateModel, ThreeStateRates, TwoStateRates};

    fn two_state() -> RateModel {
        RateModel::Two(TwoStateRates {
            k_abss0s1: 1e13,
            k_fls1s0: 1e7,
            k_ics1s0: 1e7,
        })
    }

    fn three_state() -> RateModel {
        RateModel::Three(ThreeStateRates {
            k_abss0s1: 1e13,
            k_fls1s0: 5e7,
            k_ics1s0: 1e7,
            k_iscs1t1: 1e8,
            k_risct1s1: 1e6,
            k_isct1s0: 1e4,
            k_pht1s0: 1e3,
        })
    }

    #[test]
    fn two_state_excitation_matches_analytic_solution() {
        let matrix = KineticsMatrix::build(&two_state(), Phase::Excitation);
        let solution = ClosedFormSolution::new(&matrix, &[1.0, 0.0]).unwrap();

        let k = 1e13 + 2e7;
        for &t in &[1e-15, 1e-13, 1e-11, 1e-9] {
            let x = solution.population_at(t);
            let expected_s1 = 1e13 / k * (1.0 - (-k * t).exp());
            assert!((x[1] - expected_s1).abs() <= 1e-12 * expected_s1.max(1e-300));
            assert!((x[0] + x[1] - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn decay_limit_returns_everything_to_ground() {
        let matrix = KineticsMatrix::build(&three_state(), Phase::Decay);
        let solution = ClosedFormSolution::new(&matrix, &[0.2, 0.5, 0.3]).unwrap();
        let limits = solution.limits().unwrap();
        assert!((limits[0] - 1.0).abs() < 1e-6);
        assert!(limits[1].abs() < 1e-6);
        assert!(limits[2].abs() < 1e-6);
    }

    #[test]
    fn excitation_limit_is_the_pumped_steady_state() {
        let matrix = KineticsMatrix::build(&three_state(), Phase::Excitation);
        let solution = ClosedFormSolution::new(&matrix, &[1.0, 0.0, 0.0]).unwrap();
        let limits = solution.limits().unwrap();

        let mut derivative = [0.0; 3];
        crate::traits::DynamicalSystem::apply(&matrix, 0.0, &limits, &mut derivative);
        for value in derivative {
            assert!(value.abs() < 1e-6 * 1e13);
        }
        assert!((limits.iter().sum::<f64>() - 1.0).abs() < 1e-12);

        let late = solution.population_at(1.0);
        for (a, b) in late.iter().zip(&limits) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn three_state_conserves_population() {
        let matrix = KineticsMatrix::build(&three_state(), Phase::Decay);
        let solution = ClosedFormSolution::new(&matrix, &[0.0, 0.7, 0.3]).unwrap();
        for exponent in -12..-2 {
            let x = solution.population_at(10f64.powi(exponent));
            assert!((x.iter().sum::<f64>() - 1.0).abs() < 1e-12);
            assert!(x.iter().all(|v| *v > -1e-12));
        }
    }

    #[test]
    fn propagator_satisfies_the_ode() {
        let matrix = KineticsMatrix::build(&three_state(), Phase::Decay);
        let solution = ClosedFormSolution::new(&matrix, &[0.0, 0.7, 0.3]).unwrap();
        let t = 2e-8;
        let h = 1e-13;
        let ahead = solution.population_at(t + h);
        let behind = solution.population_at(t - h);
        let here = solution.population_at(t);
        let mut derivative = [0.0; 3];
        crate::traits::DynamicalSystem::apply(&matrix, t, &here, &mut derivative);
        for i in 0..3 {
            let numeric = (ahead[i] - behind[i]) / (2.0 * h);
            assert!((numeric - derivative[i]).abs() <= 1e-4 * derivative[i].abs().max(1.0));
        }
    }

    #[test]
    fn repeated_eigenvalue_uses_confluent_form() {
        // S1 and T1 leave at identical rates with no back-transfer.
        let model = RateModel::Three(ThreeStateRates {
            k_abss0s1: 0.0,
            k_fls1s0: 5e6,
            k_ics1s0: 0.0,
            k_iscs1t1: 5e6,
            k_risct1s1: 0.0,
            k_isct1s0: 1e7,
            k_pht1s0: 0.0,
        });
        let matrix = KineticsMatrix::build(&model, Phase::Decay);
        let solution = ClosedFormSolution::new(&matrix, &[0.0, 1.0, 0.0]).unwrap();
        assert!(matches!(solution.spectrum, Spectrum::Defective { .. }));

        let k = 1e7;
        let t = 3e-7;
        let x = solution.population_at(t);
        assert!((x[1] - (-k * t).exp()).abs() < 1e-12);
        assert!((x[2] - 5e6 * t * (-k * t).exp()).abs() < 1e-12);
    }

    #[test]
    fn rejects_numeric_variants() {
        let model = RateModel::Four(crate::rates::FourStateRates {
            k_abss0s1: 1.0,
            k_iscs1t1: 1.0,
            k_iscs1t2: 1.0,
            k_isct1s0: 1.0,
            k_risct1s1: 1.0,
            k_risct2s1: 1.0,
            k_fls1s0: 1.0,
            k_ics1s0: 1.0,
            k_ict2t1: 1.0,
            k_ict1t2: 1.0,
            k_pht1s0: 1.0,
        });
        let matrix = KineticsMatrix::build(&model, Phase::Decay);
        assert_eq!(
            ClosedFormSolution::new(&matrix, &[1.0, 0.0, 0.0, 0.0]).unwrap_err(),
            KineticsError::UnsupportedVariant { states: 4 }
        );
    }
}
