use crate::rates::{StateLabel, Variant};
use serde::{Deserialize, Serialize};

/// Populations of every state of one variant, in canonical order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateVector {
    pub variant: Variant,
    pub values: Vec<f64>,
}

impl StateVector {
    pub fn new(variant: Variant, values: Vec<f64>) -> Self {
        debug_assert_eq!(values.len(), variant.state_count());
        Self { variant, values }
    }

    /// All of `total` in the ground state.
    pub fn ground(variant: Variant, total: f64) -> Self {
        let mut values = vec![0.0; variant.state_count()];
        values[0] = total;
        Self { variant, values }
    }

    pub fn get(&self, label: StateLabel) -> Option<f64> {
        self.variant.index_of(label).map(|i| self.values[i])
    }

    pub fn total(&self) -> f64 {
        self.values.iter().sum()
    }

    pub fn labelled(&self) -> impl Iterator<Item = (StateLabel, f64)> + '_ {
        self.variant
            .labels()
            .iter()
            .copied()
            .zip(self.values.iter().copied())
    }
}

/// Time-ascending samples of one phase; row `k` of `populations` is the
/// state vector at `times[k]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub variant: Variant,
    pub times: Vec<f64>,
    pub populations: Vec<Vec<f64>>,
}

impl Trajectory {
    pub fn new(variant: Variant) -> Self {
        Self {
            variant,
            times: Vec::new(),
            populations: Vec::new(),
        }
    }

    pub fn push(&mut self, time: f64, state: Vec<f64>) {
        debug_assert!(self.times.last().map_or(true, |&last| time >= last));
        self.times.push(time);
        self.populations.push(state);
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn labels(&self) -> &'static [StateLabel] {
        self.variant.labels()
    }

    pub fn sample(&self, index: usize) -> Option<StateVector> {
        self.populations
            .get(index)
            .map(|values| StateVector::new(self.variant, values.clone()))
    }

    /// Population of one state over the whole grid.
    pub fn series(&self, label: StateLabel) -> Option<Vec<f64>> {
        let index = self.variant.index_of(label)?;
        Some(self.populations.iter().map(|row| row[index]).collect())
    }

    /// Largest population of any state at any sample.
    pub fn max_population(&self) -> f64 {
        self.populations
            .iter()
            .flatten()
            .fold(f64::NEG_INFINITY, |acc, &v| acc.max(v))
    }

    /// Largest deviation of the per-sample total from `total`, relative to it.
    pub fn conservation_error(&self, total: f64) -> f64 {
        self.populations
            .iter()
            .map(|row| (row.iter().sum::<f64>() - total).abs() / total.abs().max(f64::MIN_POSITIVE))
            .fold(0.0, f64::max)
    }
}
