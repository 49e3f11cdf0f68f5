//! Quantum-yield branching fractions, in percent.
//!
//! The 2- and 3-state topologies use algebraic branching ratios of the rate
//! constants. The 4- and 5-state topologies solve the photostationary
//! balance of the decay generator with S1 as the reference population and
//! a unit-free injection into the pumped state standing in for absorption;
//! every yield is then a flux into the ground state divided by the total
//! flux into the ground state.

use crate::error::{KineticsError, Result};
use crate::events::{Stage, StageEvent};
use crate::model::{KineticsMatrix, Phase};
use crate::rates::{Channel, RateModel, StateLabel, ThreeStateRates, TwoStateRates};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum YieldMethod {
    Algebraic,
    Photostationary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantumYields {
    pub method: YieldMethod,
    pub fluorescence: f64,
    pub internal_conversion: f64,
    pub intersystem_crossing: f64,
    pub phosphorescence: f64,
    pub triplet_nonradiative: f64,
    /// S1 → T1 crossing, for topologies with two triplets.
    pub intersystem_crossing_t1: Option<f64>,
    /// S1 → T2 crossing, for topologies with two triplets.
    pub intersystem_crossing_t2: Option<f64>,
    /// Photostationary populations relative to S1 = 1.
    pub relative_populations: Vec<(StateLabel, f64)>,
}

impl QuantumYields {
    /// Fraction of the excitation that returns to the ground state, by any
    /// channel. 100 for every topology whose triplets can decay.
    pub fn ground_return(&self) -> f64 {
        self.fluorescence + self.internal_conversion + self.phosphorescence + self.triplet_nonradiative
    }

    /// Fluorescence, internal conversion and intersystem crossing out of the
    /// singlet manifold. Exactly 100 without reverse crossing; RISC returns
    /// crossed population to the singlets, so the channels then add up to
    /// more than 100 by [`Self::recycled_excess`].
    pub fn singlet_branching(&self) -> f64 {
        self.fluorescence + self.internal_conversion + self.intersystem_crossing
    }

    /// Percentage points by which the singlet channels exceed 100.
    pub fn recycled_excess(&self) -> f64 {
        self.singlet_branching() - 100.0
    }

    pub fn event(&self) -> StageEvent {
        let mut event = StageEvent::info(Stage::QuantumYield, "quantum yields (%)")
            .metric("singlet_branching", self.singlet_branching())
            .metric("fluorescence", self.fluorescence)
            .metric("internal_conversion", self.internal_conversion)
            .metric("intersystem_crossing", self.intersystem_crossing)
            .metric("phosphorescence", self.phosphorescence)
            .metric("triplet_nonradiative", self.triplet_nonradiative);
        if let Some(value) = self.intersystem_crossing_t1 {
            event = event.metric("intersystem_crossing_t1", value);
        }
        if let Some(value) = self.intersystem_crossing_t2 {
            event = event.metric("intersystem_crossing_t2", value);
        }
        for (label, value) in &self.relative_populations {
            event = event.metric(format!("{label}/S1"), *value);
        }
        event
    }
}

pub fn quantum_yields(model: &RateModel) -> Result<QuantumYields> {
    match model {
        RateModel::Two(rates) => two_state(rates),
        RateModel::Three(rates) => three_state(rates),
        RateModel::Four(_) | RateModel::Five(_) => photostationary(model),
    }
}

fn two_state(r: &TwoStateRates) -> Result<QuantumYields> {
    let total = r.k_fls1s0 + r.k_ics1s0;
    if total <= 0.0 {
        return Err(KineticsError::invalid(
            "k_fls1s0",
            "S1 has no channel back to the ground state",
        ));
    }
    Ok(QuantumYields {
        method: YieldMethod::Algebraic,
        fluorescence: r.k_fls1s0 / total * 100.0,
        internal_conversion: r.k_ics1s0 / total * 100.0,
        intersystem_crossing: 0.0,
        phosphorescence: 0.0,
        triplet_nonradiative: 0.0,
        intersystem_crossing_t1: None,
        intersystem_crossing_t2: None,
        relative_populations: Vec::new(),
    })
}

/// S1 loses population to fluorescence, IC and ISC, but a share
/// `k_risc / k_T` of every crossing returns by RISC.
fn three_state(r: &ThreeStateRates) -> Result<QuantumYields> {
    let k_triplet = r.k_risct1s1 + r.k_isct1s0 + r.k_pht1s0;
    let returned = if k_triplet > 0.0 {
        r.k_risct1s1 * r.k_iscs1t1 / k_triplet
    } else {
        0.0
    };
    let total = r.k_fls1s0 + r.k_ics1s0 + r.k_iscs1t1 - returned;
    if total <= 0.0 {
        return Err(KineticsError::invalid(
            "k_fls1s0",
            "S1 has no net channel out of the singlet manifold",
        ));
    }

    let fluorescence = r.k_fls1s0 / total * 100.0;
    let internal_conversion = r.k_ics1s0 / total * 100.0;
    let intersystem_crossing = r.k_iscs1t1 / total * 100.0;
    let (phosphorescence, triplet_nonradiative) = if k_triplet > 0.0 {
        (
            intersystem_crossing * r.k_pht1s0 / k_triplet,
            intersystem_crossing * r.k_isct1s0 / k_triplet,
        )
    } else {
        (0.0, 0.0)
    };
    let t1 = if k_triplet > 0.0 {
        r.k_iscs1t1 / k_triplet
    } else {
        0.0
    };

    Ok(QuantumYields {
        method: YieldMethod::Algebraic,
        fluorescence,
        internal_conversion,
        intersystem_crossing,
        phosphorescence,
        triplet_nonradiative,
        intersystem_crossing_t1: None,
        intersystem_crossing_t2: None,
        relative_populations: vec![(StateLabel::T1, t1)],
    })
}

fn photostationary(model: &RateModel) -> Result<QuantumYields> {
    let variant = model.variant();
    let labels = variant.labels();
    let decay = KineticsMatrix::build(model, Phase::Decay);
    let generator = decay.matrix();
    let n = labels.len() - 1;

    let s1 = variant
        .index_of(StateLabel::S1)
        .ok_or_else(|| KineticsError::UnsupportedVariant { states: labels.len() })?;
    let transitions = model.transitions();
    let pumped = transitions
        .iter()
        .find(|t| t.channel == Channel::Absorption)
        .and_then(|t| variant.index_of(t.to))
        .ok_or_else(|| KineticsError::MissingRateConstant {
            key: "absorption".to_string(),
        })?;

    // Unknowns are the excited populations in canonical order, except that
    // the S1 slot carries the injection rate J into the pumped state.
    let mut balance = DMatrix::<f64>::zeros(n, n);
    let mut rhs = DVector::<f64>::zeros(n);
    for row in 0..n {
        for col in 0..n {
            balance[(row, col)] = if col + 1 == s1 {
                if row + 1 == pumped {
                    1.0
                } else {
                    0.0
                }
            } else {
                generator[(row + 1, col + 1)]
            };
        }
        rhs[row] = -generator[(row + 1, s1)];
    }

    // A state cut off from the manifold leaves an exactly singular balance;
    // the minimum-norm solution then gives it zero population.
    let scale = balance.amax().max(f64::MIN_POSITIVE);
    let solution = match balance.clone().lu().solve(&rhs) {
        Some(solution) => solution,
        None => balance
            .clone()
            .svd(true, true)
            .solve(&rhs, f64::EPSILON * n as f64 * scale)
            .map_err(|reason| KineticsError::invalid("rates", reason.to_string()))?,
    };
    let residual = (&balance * &solution - &rhs).amax();
    if !(residual <= 1e-8 * (scale * solution.amax() + rhs.amax())) {
        return Err(KineticsError::invalid(
            "rates",
            format!("photostationary balance is inconsistent (residual {residual:e})"),
        ));
    }

    let mut population = vec![0.0; labels.len()];
    for (i, value) in solution.iter().enumerate() {
        population[i + 1] = *value;
    }
    let injection = population[s1];
    population[s1] = 1.0;

    let flux = |channel: Channel, to: Option<StateLabel>, from: Option<StateLabel>| -> f64 {
        transitions
            .iter()
            .filter(|t| t.channel == channel)
            .filter(|t| to.map_or(true, |label| t.to == label))
            .filter(|t| from.map_or(true, |label| t.from == label))
            .filter_map(|t| variant.index_of(t.from).map(|i| t.rate * population[i]))
            .sum()
    };

    let ground = Some(StateLabel::S0);
    let fluorescence = flux(Channel::Fluorescence, ground, None);
    let internal_conversion = flux(Channel::InternalConversion, ground, None);
    let phosphorescence = flux(Channel::Phosphorescence, ground, None);
    let triplet_nonradiative = flux(Channel::TripletNonradiative, ground, None);
    let denominator = fluorescence + internal_conversion + phosphorescence + triplet_nonradiative;
    if !(denominator > 0.0) {
        return Err(KineticsError::invalid(
            "rates",
            "no channel returns population to the ground state",
        ));
    }

    let percent = |value: f64| value / denominator * 100.0;
    let from_s1 = Some(StateLabel::S1);
    let mut relative_populations: Vec<(StateLabel, f64)> = labels
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(i, _)| *i != s1)
        .map(|(i, label)| (*label, population[i]))
        .collect();
    let absorption = model.absorption_rate();
    if absorption > 0.0 {
        relative_populations.insert(0, (StateLabel::S0, injection / absorption));
    }

    Ok(QuantumYields {
        method: YieldMethod::Photostationary,
        fluorescence: percent(fluorescence),
        internal_conversion: percent(internal_conversion),
        intersystem_crossing: percent(flux(Channel::IntersystemCrossing, None, None)),
        phosphorescence: percent(phosphorescence),
        triplet_nonradiative: percent(triplet_nonradiative),
        intersystem_crossing_t1: Some(percent(flux(
            Channel::IntersystemCrossing,
            Some(StateLabel::T1),
            from_s1,
        ))),
        intersystem_crossing_t2: Some(percent(flux(
            Channel::IntersystemCrossing,
            Some(StateLabel::T2),
            from_s1,
        ))),
        relative_populations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rates::{FiveStateRates, FourStateRates, RateConstantSet, Variant};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol * b.abs().max(1.0)
    }

    fn random_model(variant: Variant, rng: &mut StdRng) -> RateModel {
        let set: RateConstantSet = variant
            .required_keys()
            .iter()
            .map(|k| (*k, 10f64.powf(rng.gen_range(1.0..12.0))))
            .collect();
        RateModel::from_set(variant, &set).unwrap()
    }

    #[test]
    fn two_state_splits_evenly_for_equal_rates() {
        let yields = quantum_yields(&RateModel::Two(TwoStateRates {
            k_abss0s1: 1e13,
            k_fls1s0: 1e7,
            k_ics1s0: 1e7,
        }))
        .unwrap();
        assert_eq!(yields.fluorescence, 50.0);
        assert_eq!(yields.internal_conversion, 50.0);
        assert_eq!(yields.ground_return(), 100.0);
    }

    #[test]
    fn two_state_without_decay_is_rejected() {
        let result = quantum_yields(&RateModel::Two(TwoStateRates {
            k_abss0s1: 1e13,
            k_fls1s0: 0.0,
            k_ics1s0: 0.0,
        }));
        assert!(result.is_err());
    }

    #[test]
    fn ground_return_sums_to_one_hundred_for_every_topology() {
        let mut rng = StdRng::seed_from_u64(7);
        for states in 2..=5 {
            let variant = Variant::from_state_count(states).unwrap();
            for _ in 0..25 {
                let model = random_model(variant, &mut rng);
                let yields = quantum_yields(&model).unwrap();
                assert!(
                    close(yields.ground_return(), 100.0, 1e-9),
                    "{variant}: {} for {:?}",
                    yields.ground_return(),
                    model
                );
                assert!(yields.fluorescence >= 0.0 && yields.internal_conversion >= 0.0);
            }
        }
    }

    /// Random rates in 1e4..1e8 s⁻¹; with `risc`, every reverse crossing
    /// outruns triplet decay and every forward crossing competes with S1 decay.
    fn branching_model(variant: Variant, risc: bool, rng: &mut StdRng) -> RateModel {
        let set: RateConstantSet = variant
            .required_keys()
            .iter()
            .map(|key| {
                let value = if key.starts_with("k_risc") {
                    if risc {
                        1e9
                    } else {
                        0.0
                    }
                } else if risc && key.starts_with("k_iscs") {
                    1e8
                } else {
                    10f64.powf(rng.gen_range(4.0..8.0))
                };
                (*key, value)
            })
            .collect();
        RateModel::from_set(variant, &set).unwrap()
    }

    #[test]
    fn singlet_channels_sum_to_one_hundred_without_reverse_crossing() {
        let mut rng = StdRng::seed_from_u64(11);
        for states in 3..=5 {
            let variant = Variant::from_state_count(states).unwrap();
            for _ in 0..25 {
                let model = branching_model(variant, false, &mut rng);
                let yields = quantum_yields(&model).unwrap();
                assert!(
                    yields.recycled_excess().abs() < 1e-6 * 100.0,
                    "{variant}: singlet channels sum to {} for {:?}",
                    yields.singlet_branching(),
                    model
                );
            }
        }
    }

    #[test]
    fn reverse_crossing_pushes_singlet_channels_above_one_hundred() {
        let mut rng = StdRng::seed_from_u64(13);
        for states in 3..=5 {
            let variant = Variant::from_state_count(states).unwrap();
            for _ in 0..25 {
                let model = branching_model(variant, true, &mut rng);
                let yields = quantum_yields(&model).unwrap();
                assert!(
                    yields.recycled_excess() > 1.0,
                    "{variant}: recycled excess {} for {:?}",
                    yields.recycled_excess(),
                    model
                );
                assert!(close(yields.ground_return(), 100.0, 1e-9));
            }
        }

        // 3-state: the excess is the RISC share of S1's net loss.
        let r = three_state_rates();
        let k_triplet = r.k_risct1s1 + r.k_isct1s0 + r.k_pht1s0;
        let returned = r.k_risct1s1 * r.k_iscs1t1 / k_triplet;
        let net = r.k_fls1s0 + r.k_ics1s0 + r.k_iscs1t1 - returned;
        let yields = quantum_yields(&RateModel::Three(r)).unwrap();
        assert!(close(yields.recycled_excess(), returned / net * 100.0, 1e-12));
        assert_eq!(
            yields.event().metric_value("singlet_branching"),
            Some(yields.singlet_branching())
        );
    }

    fn three_state_rates() -> ThreeStateRates {
        ThreeStateRates {
            k_abss0s1: 1e13,
            k_fls1s0: 2e7,
            k_ics1s0: 5e6,
            k_iscs1t1: 8e7,
            k_risct1s1: 1e6,
            k_isct1s0: 1e4,
            k_pht1s0: 5e3,
        }
    }

    #[test]
    fn three_state_matches_disconnected_four_state() {
        let three = three_state_rates();
        let four = FourStateRates {
            k_abss0s1: three.k_abss0s1,
            k_iscs1t1: three.k_iscs1t1,
            k_iscs1t2: 0.0,
            k_isct1s0: three.k_isct1s0,
            k_risct1s1: three.k_risct1s1,
            k_risct2s1: 0.0,
            k_fls1s0: three.k_fls1s0,
            k_ics1s0: three.k_ics1s0,
            k_ict2t1: 0.0,
            k_ict1t2: 0.0,
            k_pht1s0: three.k_pht1s0,
        };
        let a = quantum_yields(&RateModel::Three(three)).unwrap();
        let b = quantum_yields(&RateModel::Four(four)).unwrap();

        assert!(close(a.fluorescence, b.fluorescence, 1e-9));
        assert!(close(a.internal_conversion, b.internal_conversion, 1e-9));
        assert!(close(a.phosphorescence, b.phosphorescence, 1e-9));
        assert!(close(a.triplet_nonradiative, b.triplet_nonradiative, 1e-9));
        assert!(close(a.intersystem_crossing, b.intersystem_crossing_t1.unwrap(), 1e-9));
        assert_eq!(b.intersystem_crossing_t2, Some(0.0));
    }

    #[test]
    fn five_state_counts_upper_singlet_fluorescence() {
        let rates = FiveStateRates {
            k_abss0s2: 1e13,
            k_iscs1t1: 1e7,
            k_iscs1t2: 1e6,
            k_iscs2t1: 1e6,
            k_iscs2t2: 1e6,
            k_isct1s0: 1e3,
            k_risct1s1: 1e5,
            k_risct1s2: 1e2,
            k_risct2s1: 1e6,
            k_risct2s2: 1e3,
            k_fls1s0: 5e7,
            k_fls2s0: 1e8,
            k_ics1s0: 1e6,
            k_ics2s1: 1e12,
            k_ics1s2: 1e2,
            k_ict2t1: 1e11,
            k_ict1t2: 1e1,
            k_pht1s0: 1e2,
        };
        let yields = quantum_yields(&RateModel::Five(rates)).unwrap();
        assert_eq!(yields.method, YieldMethod::Photostationary);
        assert!(close(yields.ground_return(), 100.0, 1e-9));

        // S2 drains into S1 at 1e12 s⁻¹.
        let s2 = yields
            .relative_populations
            .iter()
            .find(|(label, _)| *label == StateLabel::S2)
            .map(|(_, v)| *v)
            .unwrap();
        assert!(s2 > 0.0 && s2 < 1e-3);
        assert!(yields
            .relative_populations
            .iter()
            .any(|(label, _)| *label == StateLabel::S0));
    }

    #[test]
    fn event_carries_every_yield() {
        let yields = quantum_yields(&RateModel::Two(TwoStateRates {
            k_abss0s1: 1e13,
            k_fls1s0: 3e7,
            k_ics1s0: 1e7,
        }))
        .unwrap();
        let event = yields.event();
        assert_eq!(event.metric_value("fluorescence"), Some(75.0));
        assert_eq!(event.metric_value("internal_conversion"), Some(25.0));
    }
}
