//! `key = value` parameter files.
//!
//! Blank lines and lines starting with `#` are skipped, a trailing comma
//! after the value is dropped, and lines without `=` are ignored. Every
//! value must parse as a float.

use crate::error::{KineticsError, Result};
use crate::rates::{RateConstantSet, Variant};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const NUM_PHOTON: &str = "num_photon";
pub const TIME_PULSE: &str = "time_pulse";
pub const TIME_EXCITATION: &str = "time_excitation";
pub const TIME_DECAY: &str = "time_decay";

const SCALARS: [&str; 4] = [NUM_PHOTON, TIME_PULSE, TIME_EXCITATION, TIME_DECAY];

/// Parses every `key = value` line into one flat set.
pub fn parse_parameters(text: &str) -> Result<RateConstantSet> {
    let mut set = RateConstantSet::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim().trim_end_matches(',').trim();
        let parsed = value.parse::<f64>().map_err(|_| {
            KineticsError::invalid(key, format!("`{value}` is not a number"))
        })?;
        set.insert(key, parsed);
    }
    Ok(set)
}

pub fn read_parameters(path: impl AsRef<Path>) -> Result<RateConstantSet> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|err| KineticsError::Io {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;
    parse_parameters(&text)
}

/// Rate constants plus the run scalars of one simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParameters {
    pub rates: RateConstantSet,
    pub num_photon: f64,
    pub time_pulse: f64,
    pub time_excitation: f64,
    pub time_decay: f64,
}

fn scalar(set: &RateConstantSet, key: &str) -> Result<f64> {
    let value = set
        .get(key)
        .ok_or_else(|| KineticsError::invalid(key, "missing run parameter"))?;
    if !(value.is_finite() && value > 0.0) {
        return Err(KineticsError::invalid(key, format!("{value:e} must be positive")));
    }
    Ok(value)
}

impl RunParameters {
    /// Splits a parsed set into run scalars and rate constants. Keys the
    /// variant does not use are dropped.
    pub fn from_set(variant: Variant, set: &RateConstantSet) -> Result<Self> {
        let rates: RateConstantSet = variant
            .required_keys()
            .iter()
            .filter_map(|key| set.get(key).map(|value| (*key, value)))
            .collect();
        Ok(Self {
            rates,
            num_photon: scalar(set, NUM_PHOTON)?,
            time_pulse: scalar(set, TIME_PULSE)?,
            time_excitation: scalar(set, TIME_EXCITATION)?,
            time_decay: scalar(set, TIME_DECAY)?,
        })
    }

    pub fn parse(variant: Variant, text: &str) -> Result<Self> {
        Self::from_set(variant, &parse_parameters(text)?)
    }

    pub fn read(variant: Variant, path: impl AsRef<Path>) -> Result<Self> {
        Self::from_set(variant, &read_parameters(path)?)
    }

    /// Keys present in `set` that neither the variant nor the run uses.
    pub fn unused_keys(variant: Variant, set: &RateConstantSet) -> Vec<String> {
        set.iter()
            .map(|(key, _)| key)
            .filter(|key| {
                !SCALARS.iter().any(|known| known == key)
                    && !variant.required_keys().iter().any(|known| known == key)
            })
            .map(str::to_string)
            .collect()
    }
}
