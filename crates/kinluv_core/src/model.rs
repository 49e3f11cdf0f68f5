use crate::rates::{Channel, RateModel, Variant};
use crate::traits::{DynamicalSystem, LinearSystem};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Pulse on: the absorption channel pumps the ground state.
    Excitation,
    /// Pulse off: internal relaxation only.
    Decay,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Excitation => f.write_str("excitation"),
            Phase::Decay => f.write_str("decay"),
        }
    }
}

/// Generator of the linear population dynamics dx/dt = A x.
///
/// Columns are source states and rows destination states, both in the
/// variant's canonical order. Every transfer `from → to` with rate `k`
/// adds `k` at (to, from) and subtracts it at (from, from), so each
/// column sums to zero.
#[derive(Debug, Clone, PartialEq)]
pub struct KineticsMatrix {
    variant: Variant,
    phase: Phase,
    matrix: DMatrix<f64>,
}

impl KineticsMatrix {
    pub fn build(model: &RateModel, phase: Phase) -> Self {
        let variant = model.variant();
        let n = variant.state_count();
        let mut matrix = DMatrix::<f64>::zeros(n, n);

        for transition in model.transitions() {
            if phase == Phase::Decay && transition.channel == Channel::Absorption {
                continue;
            }
            // Every label of a transition belongs to its own variant.
            let (Some(from), Some(to)) = (
                variant.index_of(transition.from),
                variant.index_of(transition.to),
            ) else {
                continue;
            };
            matrix[(to, from)] += transition.rate;
            matrix[(from, from)] -= transition.rate;
        }

        Self {
            variant,
            phase,
            matrix,
        }
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Largest |column sum| relative to the largest entry of that column.
    pub fn column_imbalance(&self) -> f64 {
        self.matrix
            .column_iter()
            .map(|col| {
                let scale = col.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
                if scale == 0.0 {
                    0.0
                } else {
                    col.sum().abs() / scale
                }
            })
            .fold(0.0, f64::max)
    }

    /// Fastest depopulation rate of any state; sets the stiffness scale.
    pub fn max_rate(&self) -> f64 {
        self.matrix
            .diagonal()
            .iter()
            .fold(0.0_f64, |acc, v| acc.max(v.abs()))
    }

    /// Eliminates the ground state through S0 = N − Σ y.
    pub fn reduced(&self, total: f64) -> ReducedSystem {
        let n = self.matrix.nrows();
        let m = n - 1;
        let mut generator = DMatrix::<f64>::zeros(m, m);
        let mut forcing = DVector::<f64>::zeros(m);
        for i in 0..m {
            let pump = self.matrix[(i + 1, 0)];
            forcing[i] = pump * total;
            for j in 0..m {
                generator[(i, j)] = self.matrix[(i + 1, j + 1)] - pump;
            }
        }
        ReducedSystem {
            generator,
            forcing,
            total,
        }
    }
}

impl DynamicalSystem<f64> for KineticsMatrix {
    fn dimension(&self) -> usize {
        self.matrix.nrows()
    }

    fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
        let n = self.matrix.nrows();
        for (i, slot) in out.iter_mut().enumerate().take(n) {
            *slot = (0..n).map(|j| self.matrix[(i, j)] * x[j]).sum();
        }
    }
}

impl LinearSystem<f64> for KineticsMatrix {
    fn coefficient(&self, row: usize, col: usize) -> f64 {
        self.matrix[(row, col)]
    }
}

/// Excited-state dynamics with the conserved total eliminated:
/// dy/dt = M y + f, where y holds every state except S0.
#[derive(Debug, Clone, PartialEq)]
pub struct ReducedSystem {
    pub generator: DMatrix<f64>,
    pub forcing: DVector<f64>,
    pub total: f64,
}

impl ReducedSystem {
    pub fn dimension(&self) -> usize {
        self.generator.nrows()
    }

    /// Drops the ground-state entry of a full population vector.
    pub fn project(&self, full: &[f64]) -> DVector<f64> {
        DVector::from_iterator(self.dimension(), full.iter().skip(1).copied())
    }

    /// Restores S0 from the conserved total.
    pub fn expand(&self, reduced: &DVector<f64>) -> Vec<f64> {
        let mut full = Vec::with_capacity(reduced.len() + 1);
        full.push(self.total - reduced.sum());
        full.extend(reduced.iter().copied());
        full
    }
}
