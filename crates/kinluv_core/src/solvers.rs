use crate::error::{KineticsError, Result};
use crate::traits::{LinearSystem, Steppable};
use nalgebra::linalg::LU;
use nalgebra::{DMatrix, DVector, Dyn};
use num_complex::Complex;

const CACHE_CAPACITY: usize = 4;

/// Roots of the Radau IIA (order 5) stability denominator.
///
/// Returns the real root and the complex pair `α ± iβ`, computed from the
/// eigenvalues of the inverse collocation matrix.
fn stage_roots() -> (f64, f64, f64) {
    let c81 = 81f64.cbrt();
    let c9 = 9f64.cbrt();
    let u1 = (6.0 + c81 - c9) / 30.0;
    let alpha = (12.0 - c81 + c9) / 60.0;
    let beta = (c81 + c9) * 3f64.sqrt() / 60.0;
    let norm = alpha * alpha + beta * beta;
    (1.0 / u1, alpha / norm, beta / norm)
}

/// One factorized propagator `R(hA) = Q(hA)⁻¹ P(hA)` for a fixed step.
struct Propagator {
    h: f64,
    coefficients: DMatrix<f64>,
    numerator: DMatrix<f64>,
    real: LU<f64, Dyn, Dyn>,
    upper: LU<Complex<f64>, Dyn, Dyn>,
    lower: LU<Complex<f64>, Dyn, Dyn>,
}

impl Propagator {
    fn new(coefficients: &DMatrix<f64>, h: f64) -> Self {
        let (gamma, alpha, beta) = stage_roots();
        let n = coefficients.nrows();
        let z = coefficients * h;
        let identity = DMatrix::<f64>::identity(n, n);

        // P(Z) = I + 2Z/5 + Z²/20
        let numerator = &identity + &z * 0.4 + (&z * &z) * 0.05;

        let zc = z.map(|v| Complex::new(v, 0.0));
        let identity_c = DMatrix::<Complex<f64>>::identity(n, n);
        let shift = Complex::new(alpha, beta);

        Self {
            h,
            coefficients: coefficients.clone(),
            numerator,
            real: (&z - &identity * gamma).lu(),
            upper: (&zc - &identity_c * shift).lu(),
            lower: (&zc - &identity_c * shift.conj()).lu(),
        }
    }

    fn matches(&self, coefficients: &DMatrix<f64>, h: f64) -> bool {
        self.h == h && &self.coefficients == coefficients
    }

    /// Q(Z) = −(Z − γI)(Z − cI)(Z − c̄I)/60, so Q⁻¹ is three shifted solves.
    fn apply(&self, state: &[f64]) -> Option<Vec<f64>> {
        let x = DVector::from_column_slice(state);
        let v = self.real.solve(&(&self.numerator * x))?;
        let vc = v.map(|value| Complex::new(value, 0.0));
        let vc = self.upper.solve(&vc)?;
        let vc = self.lower.solve(&vc)?;
        Some(vc.iter().map(|value| -60.0 * value.re).collect())
    }
}

/// Radau IIA (order 5, L-stable) for autonomous linear systems.
///
/// For dx/dt = A x the collocation step collapses to the rational map
/// `x ← R(hA) x`, where `R` is the (2,3) Padé approximant of `exp`. The
/// Jacobian is `A` itself, so no Newton iteration is needed.
pub struct RadauIIA {
    dim: usize,
    cache: Vec<Propagator>,
}

impl RadauIIA {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            cache: Vec::with_capacity(CACHE_CAPACITY),
        }
    }

    fn propagator(&mut self, coefficients: DMatrix<f64>, h: f64) -> &Propagator {
        if let Some(index) = self.cache.iter().position(|p| p.matches(&coefficients, h)) {
            return &self.cache[index];
        }
        if self.cache.len() == CACHE_CAPACITY {
            self.cache.remove(0);
        }
        self.cache.push(Propagator::new(&coefficients, h));
        &self.cache[self.cache.len() - 1]
    }
}

fn snapshot(system: &impl LinearSystem<f64>, dim: usize) -> DMatrix<f64> {
    DMatrix::from_fn(dim, dim, |row, col| system.coefficient(row, col))
}

impl Steppable<f64> for RadauIIA {
    fn step(
        &mut self,
        system: &impl LinearSystem<f64>,
        t: &mut f64,
        state: &mut [f64],
        dt: f64,
    ) -> Result<()> {
        if system.dimension() != self.dim || state.len() != self.dim {
            return Err(KineticsError::invalid(
                "state",
                format!(
                    "dimension mismatch: solver {}, system {}, state {}",
                    self.dim,
                    system.dimension(),
                    state.len()
                ),
            ));
        }
        let coefficients = snapshot(system, self.dim);
        let next = self
            .propagator(coefficients, dt)
            .apply(state)
            .ok_or_else(|| KineticsError::SolverNotConverged {
                stage: "radau".to_string(),
                message: format!("singular stage matrix at h = {dt:e}"),
            })?;
        state.copy_from_slice(&next);
        *t += dt;
        Ok(())
    }
}
