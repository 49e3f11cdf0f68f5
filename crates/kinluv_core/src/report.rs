//! Fixed-width kinetics tables and plot panel ranges.

use crate::state::Trajectory;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

const TIME_WIDTH: usize = 15;
const STATE_WIDTH: usize = 20;
const TIME_DIGITS: usize = 4;
const STATE_DIGITS: usize = 6;

/// Scientific notation with a signed, at least two-digit exponent
/// (`1.0000e-12`, `2.500000e+03`).
pub fn sci(value: f64, digits: usize) -> String {
    if !value.is_finite() {
        return if value.is_nan() {
            "nan".to_string()
        } else if value > 0.0 {
            "inf".to_string()
        } else {
            "-inf".to_string()
        };
    }
    let formatted = format!("{value:.digits$e}");
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, magnitude) = match exponent.strip_prefix('-') {
                Some(rest) => ('-', rest),
                None => ('+', exponent),
            };
            format!("{mantissa}e{sign}{magnitude:0>2}")
        }
        None => formatted,
    }
}

/// One titled table: header row, `-` rule, one row per sample.
pub fn kinetics_table(title: &str, trajectory: &Trajectory) -> String {
    let labels = trajectory.labels();
    let mut out = String::new();
    let _ = writeln!(out, "{title}");
    let _ = write!(out, "{:<TIME_WIDTH$}", "Time (s)");
    for label in labels {
        let _ = write!(out, "{:<STATE_WIDTH$}", label.as_str());
    }
    out.push('\n');
    out.push_str(&"-".repeat(TIME_WIDTH + STATE_WIDTH * labels.len()));
    out.push('\n');

    for (time, row) in trajectory.times.iter().zip(&trajectory.populations) {
        let _ = write!(out, "{:<TIME_WIDTH$}", sci(*time, TIME_DIGITS));
        for value in row {
            let _ = write!(out, "{:<STATE_WIDTH$}", sci(*value, STATE_DIGITS));
        }
        out.push('\n');
    }
    out
}

/// Excitation table, a blank line, then the decay table.
pub fn kinetics_tables(excitation: &Trajectory, decay: &Trajectory) -> String {
    format!(
        "{}\n{}",
        kinetics_table("Excitation Kinetics:", excitation),
        kinetics_table("Decay Kinetics:", decay)
    )
}

/// Axis limits for one log-scale population panel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PanelRange {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl PanelRange {
    pub const Y_FLOOR: f64 = 1e-10;
    const PADDING: f64 = 0.05;
    const HEADROOM: f64 = 1.05;
    /// Lowest top edge of any panel.
    const CEILING: f64 = 1.1;

    pub fn for_trajectory(trajectory: &Trajectory) -> Self {
        let (lo, hi) = trajectory
            .times
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), t| {
                (lo.min(*t), hi.max(*t))
            });
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (0.0, 0.0) };
        let pad = Self::PADDING * (hi - lo);

        let peak = trajectory.max_population().max(Self::CEILING);
        Self {
            x_min: lo - pad,
            x_max: hi + pad,
            y_min: Self::Y_FLOOR,
            y_max: Self::HEADROOM * peak,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Panels {
    pub excitation: PanelRange,
    pub decay: PanelRange,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rates::Variant;

    fn two_state() -> Trajectory {
        let mut trajectory = Trajectory::new(Variant::TwoState);
        trajectory.push(1e-15, vec![1.0, 0.0]);
        trajectory.push(1e-12, vec![0.99, 0.01]);
        trajectory.push(1e-9, vec![0.5, 0.5]);
        trajectory
    }

    #[test]
    fn scientific_notation_matches_the_table_format() {
        assert_eq!(sci(1e-12, 4), "1.0000e-12");
        assert_eq!(sci(2500.0, 6), "2.500000e+03");
        assert_eq!(sci(0.0, 4), "0.0000e+00");
        assert_eq!(sci(-3.2e-105, 2), "-3.20e-105");
        assert_eq!(sci(f64::NAN, 4), "nan");
    }

    #[test]
    fn table_columns_are_fixed_width() {
        let table = kinetics_table("Excitation Kinetics:", &two_state());
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "Excitation Kinetics:");
        assert_eq!(lines[1], format!("{:<15}{:<20}{:<20}", "Time (s)", "S0", "S1"));
        assert_eq!(lines[2], "-".repeat(55));
        assert_eq!(
            lines[3],
            format!("{:<15}{:<20}{:<20}", "1.0000e-15", "1.000000e+00", "0.000000e+00")
        );
        assert_eq!(lines.len(), 6);
    }

    #[test]
    fn tables_are_separated_by_a_blank_line() {
        let text = kinetics_tables(&two_state(), &two_state());
        assert!(text.contains("\n\nDecay Kinetics:\n"));
    }

    #[test]
    fn panels_keep_headroom_above_unity() {
        let range = PanelRange::for_trajectory(&two_state());
        assert_eq!(range.y_min, 1e-10);
        assert!((range.y_max - 1.05 * 1.1).abs() < 1e-12);
        let pad = 0.05 * (1e-9 - 1e-15);
        assert!((range.x_min - (1e-15 - pad)).abs() < 1e-24);
        assert!((range.x_max - (1e-9 + pad)).abs() < 1e-24);

        let mut four_state = Trajectory::new(Variant::FourState);
        four_state.push(1e-12, vec![1.0, 0.0, 0.0, 0.0]);
        four_state.push(1e-9, vec![0.6, 0.3, 0.1, 0.0]);
        let numeric = PanelRange::for_trajectory(&four_state);
        assert!((numeric.y_max - 1.05 * 1.1).abs() < 1e-12);

        let mut pumped = Trajectory::new(Variant::FourState);
        pumped.push(1e-12, vec![2.0, 0.0, 0.0, 0.0]);
        let dose = PanelRange::for_trajectory(&pumped);
        assert!((dose.y_max - 1.05 * 2.0).abs() < 1e-12);
    }
}
