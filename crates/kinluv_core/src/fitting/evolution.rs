//! Differential evolution (`best1bin`) over a bounded box.
//!
//! Members live in the unit cube and are mapped onto the box only for
//! evaluation. Trials replace their parent as soon as they are at least as
//! good, so later trials in the same generation already see the update.

use super::bounded::Bounds;
use crate::error::{KineticsError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvolutionSettings {
    /// Number of members, seeds included.
    pub population: usize,
    pub max_generations: usize,
    /// Relative spread of the population energies that ends the search.
    pub tol: f64,
    pub atol: f64,
    /// Differential weight, redrawn uniformly from this range every generation.
    pub mutation: (f64, f64),
    pub recombination: f64,
    pub seed: u64,
}

impl Default for EvolutionSettings {
    fn default() -> Self {
        Self {
            population: 100,
            max_generations: 10_000,
            tol: 1e-8,
            atol: 0.0,
            mutation: (0.5, 1.0),
            recombination: 0.7,
            seed: 42,
        }
    }
}

impl EvolutionSettings {
    pub fn validate(&self) -> Result<()> {
        if self.population < 5 {
            return Err(KineticsError::invalid(
                "population",
                format!("{} members cannot drive best1bin, need at least 5", self.population),
            ));
        }
        if self.max_generations == 0 {
            return Err(KineticsError::invalid("max_generations", "must be positive"));
        }
        let (lo, hi) = self.mutation;
        if !(0.0..=2.0).contains(&lo) || !(lo..=2.0).contains(&hi) {
            return Err(KineticsError::invalid(
                "mutation",
                format!("({lo}, {hi}) is not an ordered range within [0, 2]"),
            ));
        }
        if !(0.0..=1.0).contains(&self.recombination) {
            return Err(KineticsError::invalid(
                "recombination",
                format!("{} is outside [0, 1]", self.recombination),
            ));
        }
        if !(self.tol >= 0.0 && self.atol >= 0.0) {
            return Err(KineticsError::invalid("tol", "tolerances must be non-negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionResult {
    pub best: Vec<f64>,
    pub energy: f64,
    pub generations: usize,
    pub evaluations: usize,
    pub converged: bool,
    /// Standard deviation of the final population energies.
    pub spread: f64,
}

fn energy_of<F: FnMut(&[f64]) -> f64>(objective: &mut F, bounds: &Bounds, unit: &[f64]) -> f64 {
    let value = objective(&bounds.from_unit(unit));
    if value.is_finite() {
        value
    } else {
        f64::INFINITY
    }
}

/// Latin hypercube start: one member per stratum in every dimension.
fn latin_hypercube(rng: &mut StdRng, members: usize, dim: usize) -> Vec<Vec<f64>> {
    let mut population = vec![vec![0.0; dim]; members];
    let segment = 1.0 / members as f64;
    for d in 0..dim {
        let mut strata: Vec<usize> = (0..members).collect();
        for i in (1..members).rev() {
            strata.swap(i, rng.gen_range(0..=i));
        }
        for (member, stratum) in population.iter_mut().zip(strata) {
            member[d] = (stratum as f64 + rng.gen::<f64>()) * segment;
        }
    }
    population
}

fn distinct(rng: &mut StdRng, members: usize, exclude: usize) -> (usize, usize) {
    let pick = |rng: &mut StdRng, taken: &[usize]| loop {
        let candidate = rng.gen_range(0..members);
        if !taken.contains(&candidate) {
            return candidate;
        }
    };
    let r1 = pick(rng, &[exclude]);
    let r2 = pick(rng, &[exclude, r1]);
    (r1, r2)
}

/// Standard deviation and mean of the population energies; infinite spread
/// while any member is non-finite.
fn spread(energies: &[f64]) -> (f64, f64) {
    if energies.iter().any(|e| !e.is_finite()) {
        return (f64::INFINITY, f64::INFINITY);
    }
    let n = energies.len() as f64;
    let mean = energies.iter().sum::<f64>() / n;
    let deviation = (energies.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / n).sqrt();
    (deviation, mean)
}

fn converged(energies: &[f64], settings: &EvolutionSettings) -> bool {
    let (deviation, mean) = spread(energies);
    deviation.is_finite() && deviation <= settings.atol + settings.tol * mean.abs()
}

/// Minimizes `objective` over `bounds`.
///
/// `seeds` (clamped into the box) replace the first members of the
/// initial population.
pub fn differential_evolution<F: FnMut(&[f64]) -> f64>(
    mut objective: F,
    bounds: &Bounds,
    seeds: &[Vec<f64>],
    settings: &EvolutionSettings,
) -> Result<EvolutionResult> {
    settings.validate()?;
    let dim = bounds.dimension();
    let members = settings.population;
    if seeds.iter().any(|seed| seed.len() != dim) {
        return Err(KineticsError::infeasible(format!(
            "seed points must have {dim} coordinates"
        )));
    }

    let mut rng = StdRng::seed_from_u64(settings.seed);
    let mut population = latin_hypercube(&mut rng, members, dim);
    for (member, seed) in population.iter_mut().zip(seeds) {
        *member = bounds.to_unit(&bounds.clamp(seed));
    }

    let mut energies: Vec<f64> = population
        .iter()
        .map(|member| energy_of(&mut objective, bounds, member))
        .collect();
    let mut evaluations = members;
    let mut best = (0..members)
        .min_by(|&a, &b| energies[a].total_cmp(&energies[b]))
        .unwrap_or(0);

    let (f_lo, f_hi) = settings.mutation;
    let mut generations = 0;
    let mut done = converged(&energies, settings);
    while !done && generations < settings.max_generations {
        generations += 1;
        let scale = if f_hi > f_lo {
            rng.gen_range(f_lo..f_hi)
        } else {
            f_lo
        };

        for candidate in 0..members {
            let (r1, r2) = distinct(&mut rng, members, candidate);
            let fill = rng.gen_range(0..dim);
            let mut trial = population[candidate].clone();
            for d in 0..dim {
                if d == fill || rng.gen::<f64>() < settings.recombination {
                    trial[d] = population[best][d] + scale * (population[r1][d] - population[r2][d]);
                }
            }
            for value in trial.iter_mut() {
                if !(0.0..=1.0).contains(&*value) {
                    *value = rng.gen::<f64>();
                }
            }

            let energy = energy_of(&mut objective, bounds, &trial);
            evaluations += 1;
            if energy <= energies[candidate] {
                population[candidate] = trial;
                energies[candidate] = energy;
                if energy <= energies[best] {
                    best = candidate;
                }
            }
        }
        done = converged(&energies, settings);
    }

    Ok(EvolutionResult {
        best: bounds.from_unit(&population[best]),
        energy: energies[best],
        generations,
        evaluations,
        converged: done,
        spread: spread(&energies).0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> EvolutionSettings {
        EvolutionSettings {
            population: 15,
            max_generations: 400,
            tol: 1e-10,
            ..EvolutionSettings::default()
        }
    }

    #[test]
    fn finds_the_minimum_of_a_shifted_bowl() {
        let bounds = Bounds::new(vec![-5.0, -5.0], vec![5.0, 5.0]).unwrap();
        let result = differential_evolution(
            |x| 1.0 + (x[0] - 1.5).powi(2) + 10.0 * (x[1] + 2.0).powi(2),
            &bounds,
            &[],
            &small(),
        )
        .unwrap();
        assert!((result.best[0] - 1.5).abs() < 1e-3, "{:?}", result.best);
        assert!((result.best[1] + 2.0).abs() < 1e-3, "{:?}", result.best);
        assert_eq!(result.evaluations, 15 * (result.generations + 1));
    }

    #[test]
    fn is_reproducible_for_a_fixed_seed() {
        let bounds = Bounds::new(vec![0.0; 3], vec![1.0; 3]).unwrap();
        let objective = |x: &[f64]| x.iter().map(|v| (v - 0.3).abs()).sum::<f64>();
        let settings = EvolutionSettings {
            max_generations: 20,
            ..small()
        };
        let a = differential_evolution(objective, &bounds, &[], &settings).unwrap();
        let b = differential_evolution(objective, &bounds, &[], &settings).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn seeded_optimum_is_kept() {
        let bounds = Bounds::new(vec![-1.0], vec![1.0]).unwrap();
        let settings = EvolutionSettings {
            max_generations: 1,
            ..small()
        };
        let result =
            differential_evolution(|x| (x[0] - 0.25).abs(), &bounds, &[vec![0.25]], &settings)
                .unwrap();
        assert_eq!(result.energy, 0.0);
        assert!((result.best[0] - 0.25).abs() < 1e-15);
    }

    #[test]
    fn non_finite_energies_lose() {
        let bounds = Bounds::new(vec![-1.0], vec![1.0]).unwrap();
        let result = differential_evolution(
            |x| if x[0] < 0.0 { f64::NAN } else { x[0] },
            &bounds,
            &[],
            &small(),
        )
        .unwrap();
        assert!(result.best[0] >= 0.0);
        assert!(result.energy.is_finite());
    }

    #[test]
    fn flat_objective_converges_before_the_first_generation() {
        let bounds = Bounds::new(vec![-1.0, -1.0], vec![1.0, 1.0]).unwrap();
        let result = differential_evolution(|_| 3.0, &bounds, &[], &small()).unwrap();
        assert!(result.converged);
        assert_eq!(result.generations, 0);
        assert_eq!(result.spread, 0.0);
        assert_eq!(result.evaluations, 15);
    }

    #[test]
    fn rejects_bad_settings() {
        let settings = EvolutionSettings {
            recombination: 1.5,
            ..EvolutionSettings::default()
        };
        assert!(settings.validate().is_err());
    }
}
