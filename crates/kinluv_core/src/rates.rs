//! Rate-constant vocabulary and the typed per-topology rate records.
//!
//! A `RateConstantSet` is the loose name → value mapping that parameter files
//! and callers produce. It is validated once into a `RateModel`, which holds
//! one strongly typed record per supported topology and knows the transfer
//! channels of that topology.

use crate::error::{KineticsError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Electronic states that can appear in a topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StateLabel {
    S0,
    S1,
    S2,
    T1,
    T2,
}

impl StateLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            StateLabel::S0 => "S0",
            StateLabel::S1 => "S1",
            StateLabel::S2 => "S2",
            StateLabel::T1 => "T1",
            StateLabel::T2 => "T2",
        }
    }

    pub fn is_triplet(self) -> bool {
        matches!(self, StateLabel::T1 | StateLabel::T2)
    }
}

impl fmt::Display for StateLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported state-count topologies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    TwoState,
    ThreeState,
    FourState,
    FiveState,
}

impl Variant {
    pub fn from_state_count(states: usize) -> Result<Self> {
        match states {
            2 => Ok(Variant::TwoState),
            3 => Ok(Variant::ThreeState),
            4 => Ok(Variant::FourState),
            5 => Ok(Variant::FiveState),
            _ => Err(KineticsError::UnsupportedVariant { states }),
        }
    }

    pub fn state_count(self) -> usize {
        self.labels().len()
    }

    /// Canonical state order; index 0 is always the ground state.
    pub fn labels(self) -> &'static [StateLabel] {
        use StateLabel::*;
        match self {
            Variant::TwoState => &[S0, S1],
            Variant::ThreeState => &[S0, S1, T1],
            Variant::FourState => &[S0, S1, T1, T2],
            Variant::FiveState => &[S0, S1, S2, T1, T2],
        }
    }

    pub fn index_of(self, label: StateLabel) -> Option<usize> {
        self.labels().iter().position(|&l| l == label)
    }

    pub fn required_keys(self) -> &'static [&'static str] {
        match self {
            Variant::TwoState => TwoStateRates::KEYS,
            Variant::ThreeState => ThreeStateRates::KEYS,
            Variant::FourState => FourStateRates::KEYS,
            Variant::FiveState => FiveStateRates::KEYS,
        }
    }

    /// 2- and 3-state manifolds are small enough for an exact propagator.
    pub fn is_closed_form(self) -> bool {
        matches!(self, Variant::TwoState | Variant::ThreeState)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-state", self.state_count())
    }
}

/// Name → value mapping of rate constants in s⁻¹.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateConstantSet {
    values: BTreeMap<String, f64>,
}

impl RateConstantSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        self.values.insert(key.into(), value);
    }

    pub fn with(mut self, key: impl Into<String>, value: f64) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Looks up a required key; the value must be finite and non-negative.
    pub fn require(&self, key: &str) -> Result<f64> {
        let value = self
            .get(key)
            .ok_or_else(|| KineticsError::MissingRateConstant {
                key: key.to_string(),
            })?;
        if !value.is_finite() {
            return Err(KineticsError::invalid(key, format!("{value} is not finite")));
        }
        if value < 0.0 {
            return Err(KineticsError::invalid(key, format!("{value:e} is negative")));
        }
        Ok(value)
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for RateConstantSet {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Physical nature of a population-transfer channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    Absorption,
    Fluorescence,
    InternalConversion,
    IntersystemCrossing,
    ReverseIntersystemCrossing,
    TripletInternalConversion,
    Phosphorescence,
    TripletNonradiative,
}

/// One first-order transfer `from → to` with rate constant `rate`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Transition {
    pub key: &'static str,
    pub from: StateLabel,
    pub to: StateLabel,
    pub channel: Channel,
    pub rate: f64,
}

macro_rules! rate_record {
    ($(#[$meta:meta])* $name:ident { $($field:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            $(pub $field: f64,)+
        }

        impl $name {
            pub const KEYS: &'static [&'static str] = &[$(stringify!($field)),+];

            pub fn from_set(set: &RateConstantSet) -> Result<Self> {
                Ok(Self {
                    $($field: set.require(stringify!($field))?,)+
                })
            }

            pub fn to_set(&self) -> RateConstantSet {
                RateConstantSet::new()
                    $(.with(stringify!($field), self.$field))+
            }
        }
    };
}

rate_record!(
    /// S0 ⇄ S1 with radiative and non-radiative return.
    TwoStateRates {
        k_abss0s1,
        k_fls1s0,
        k_ics1s0,
    }
);

rate_record!(
    /// Adds a T1 reservoir coupled to S1 by ISC/RISC.
    ThreeStateRates {
        k_abss0s1,
        k_fls1s0,
        k_ics1s0,
        k_iscs1t1,
        k_risct1s1,
        k_isct1s0,
        k_pht1s0,
    }
);

rate_record!(
    /// Adds an upper triplet T2 with internal conversion to and from T1.
    FourStateRates {
        k_abss0s1,
        k_iscs1t1,
        k_iscs1t2,
        k_isct1s0,
        k_risct1s1,
        k_risct2s1,
        k_fls1s0,
        k_ics1s0,
        k_ict2t1,
        k_ict1t2,
        k_pht1s0,
    }
);

rate_record!(
    /// Adds an upper singlet S2; the pulse pumps S0 → S2.
    FiveStateRates {
        k_abss0s2,
        k_iscs1t1,
        k_iscs1t2,
        k_iscs2t1,
        k_iscs2t2,
        k_isct1s0,
        k_risct1s1,
        k_risct1s2,
        k_risct2s1,
        k_risct2s2,
        k_fls1s0,
        k_fls2s0,
        k_ics1s0,
        k_ics2s1,
        k_ics1s2,
        k_ict2t1,
        k_ict1t2,
        k_pht1s0,
    }
);

/// Validated rate constants for one topology.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variant", content = "rates")]
pub enum RateModel {
    Two(TwoStateRates),
    Three(ThreeStateRates),
    Four(FourStateRates),
    Five(FiveStateRates),
}

impl RateModel {
    pub fn from_set(variant: Variant, set: &RateConstantSet) -> Result<Self> {
        Ok(match variant {
            Variant::TwoState => RateModel::Two(TwoStateRates::from_set(set)?),
            Variant::ThreeState => RateModel::Three(ThreeStateRates::from_set(set)?),
            Variant::FourState => RateModel::Four(FourStateRates::from_set(set)?),
            Variant::FiveState => RateModel::Five(FiveStateRates::from_set(set)?),
        })
    }

    pub fn variant(&self) -> Variant {
        match self {
            RateModel::Two(_) => Variant::TwoState,
            RateModel::Three(_) => Variant::ThreeState,
            RateModel::Four(_) => Variant::FourState,
            RateModel::Five(_) => Variant::FiveState,
        }
    }

    pub fn to_set(&self) -> RateConstantSet {
        match self {
            RateModel::Two(r) => r.to_set(),
            RateModel::Three(r) => r.to_set(),
            RateModel::Four(r) => r.to_set(),
            RateModel::Five(r) => r.to_set(),
        }
    }

    /// Rate of the pump channel out of S0.
    pub fn absorption_rate(&self) -> f64 {
        match self {
            RateModel::Two(r) => r.k_abss0s1,
            RateModel::Three(r) => r.k_abss0s1,
            RateModel::Four(r) => r.k_abss0s1,
            RateModel::Five(r) => r.k_abss0s2,
        }
    }

    /// Every transfer channel of the topology, absorption first.
    pub fn transitions(&self) -> Vec<Transition> {
        use Channel::*;
        use StateLabel::*;

        let t = |key, from, to, channel, rate| Transition {
            key,
            from,
            to,
            channel,
            rate,
        };

        match self {
            RateModel::Two(r) => vec![
                t("k_abss0s1", S0, S1, Absorption, r.k_abss0s1),
                t("k_fls1s0", S1, S0, Fluorescence, r.k_fls1s0),
                t("k_ics1s0", S1, S0, InternalConversion, r.k_ics1s0),
            ],
            RateModel::Three(r) => vec![
                t("k_abss0s1", S0, S1, Absorption, r.k_abss0s1),
                t("k_fls1s0", S1, S0, Fluorescence, r.k_fls1s0),
                t("k_ics1s0", S1, S0, InternalConversion, r.k_ics1s0),
                t("k_iscs1t1", S1, T1, IntersystemCrossing, r.k_iscs1t1),
                t("k_risct1s1", T1, S1, ReverseIntersystemCrossing, r.k_risct1s1),
                t("k_isct1s0", T1, S0, TripletNonradiative, r.k_isct1s0),
                t("k_pht1s0", T1, S0, Phosphorescence, r.k_pht1s0),
            ],
            RateModel::Four(r) => vec![
                t("k_abss0s1", S0, S1, Absorption, r.k_abss0s1),
                t("k_fls1s0", S1, S0, Fluorescence, r.k_fls1s0),
                t("k_ics1s0", S1, S0, InternalConversion, r.k_ics1s0),
                t("k_iscs1t1", S1, T1, IntersystemCrossing, r.k_iscs1t1),
                t("k_iscs1t2", S1, T2, IntersystemCrossing, r.k_iscs1t2),
                t("k_risct1s1", T1, S1, ReverseIntersystemCrossing, r.k_risct1s1),
                t("k_risct2s1", T2, S1, ReverseIntersystemCrossing, r.k_risct2s1),
                t("k_isct1s0", T1, S0, TripletNonradiative, r.k_isct1s0),
                t("k_pht1s0", T1, S0, Phosphorescence, r.k_pht1s0),
                t("k_ict1t2", T1, T2, TripletInternalConversion, r.k_ict1t2),
                t("k_ict2t1", T2, T1, TripletInternalConversion, r.k_ict2t1),
            ],
            RateModel::Five(r) => vec![
                t("k_abss0s2", S0, S2, Absorption, r.k_abss0s2),
                t("k_fls1s0", S1, S0, Fluorescence, r.k_fls1s0),
                t("k_fls2s0", S2, S0, Fluorescence, r.k_fls2s0),
                t("k_ics1s0", S1, S0, InternalConversion, r.k_ics1s0),
                t("k_ics2s1", S2, S1, InternalConversion, r.k_ics2s1),
                t("k_ics1s2", S1, S2, InternalConversion, r.k_ics1s2),
                t("k_iscs1t1", S1, T1, IntersystemCrossing, r.k_iscs1t1),
                t("k_iscs1t2", S1, T2, IntersystemCrossing, r.k_iscs1t2),
                t("k_iscs2t1", S2, T1, IntersystemCrossing, r.k_iscs2t1),
                t("k_iscs2t2", S2, T2, IntersystemCrossing, r.k_iscs2t2),
                t("k_risct1s1", T1, S1, ReverseIntersystemCrossing, r.k_risct1s1),
                t("k_risct1s2", T1, S2, ReverseIntersystemCrossing, r.k_risct1s2),
                t("k_risct2s1", T2, S1, ReverseIntersystemCrossing, r.k_risct2s1),
                t("k_risct2s2", T2, S2, ReverseIntersystemCrossing, r.k_risct2s2),
                t("k_isct1s0", T1, S0, TripletNonradiative, r.k_isct1s0),
                t("k_pht1s0", T1, S0, Phosphorescence, r.k_pht1s0),
                t("k_ict1t2", T1, T2, TripletInternalConversion, r.k_ict1t2),
                t("k_ict2t1", T2, T1, TripletInternalConversion, r.k_ict2t1),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    #[test]
    fn variant_rejects_unsupported_state_counts() {
        assert_eq!(Variant::from_state_count(4).unwrap(), Variant::FourState);
        assert_eq!(
            Variant::from_state_count(6),
            Err(KineticsError::UnsupportedVariant { states: 6 })
        );
        assert_eq!(
            Variant::from_state_count(1),
            Err(KineticsError::UnsupportedVariant { states: 1 })
        );
    }

    #[test]
    fn labels_start_with_ground_state() {
        for states in 2..=5 {
            let variant = Variant::from_state_count(states).unwrap();
            assert_eq!(variant.labels()[0], StateLabel::S0);
            assert_eq!(variant.state_count(), states);
        }
        assert_eq!(Variant::FiveState.index_of(StateLabel::S2), Some(2));
        assert_eq!(Variant::ThreeState.index_of(StateLabel::T2), None);
    }

    #[test]
    fn missing_key_is_named() {
        let set = RateConstantSet::new()
            .with("k_abss0s1", 1e13)
            .with("k_fls1s0", 1e7);
        assert_err_contains(RateModel::from_set(Variant::TwoState, &set), "k_ics1s0");
    }

    #[test]
    fn negative_and_non_finite_values_are_rejected() {
        let set = RateConstantSet::new()
            .with("k_abss0s1", 1e13)
            .with("k_fls1s0", -1.0)
            .with("k_ics1s0", 1e7);
        assert_err_contains(TwoStateRates::from_set(&set), "k_fls1s0");

        let set = set.with("k_fls1s0", f64::NAN);
        assert_err_contains(TwoStateRates::from_set(&set), "not finite");
    }

    #[test]
    fn typed_record_round_trips_through_the_set() {
        let rates = ThreeStateRates {
            k_abss0s1: 1e13,
            k_fls1s0: 1e7,
            k_ics1s0: 1e7,
            k_iscs1t1: 1e7,
            k_risct1s1: 1e5,
            k_isct1s0: 1e4,
            k_pht1s0: 1e2,
        };
        let set = rates.to_set();
        assert_eq!(set.len(), ThreeStateRates::KEYS.len());
        assert_eq!(ThreeStateRates::from_set(&set).unwrap(), rates);
    }

    #[test]
    fn every_key_maps_to_one_transition() {
        for states in 2..=5 {
            let variant = Variant::from_state_count(states).unwrap();
            let set: RateConstantSet = variant
                .required_keys()
                .iter()
                .map(|k| (*k, 1.0))
                .collect();
            let model = RateModel::from_set(variant, &set).unwrap();
            let transitions = model.transitions();
            assert_eq!(transitions.len(), variant.required_keys().len());
            for key in variant.required_keys() {
                assert_eq!(transitions.iter().filter(|t| t.key == *key).count(), 1);
            }
            assert_eq!(transitions[0].channel, Channel::Absorption);
            assert!(transitions
                .iter()
                .all(|t| variant.index_of(t.from).is_some() && variant.index_of(t.to).is_some()));
        }
    }
}
