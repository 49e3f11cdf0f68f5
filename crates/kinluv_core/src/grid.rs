use crate::error::{KineticsError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSettings {
    pub excitation_start: f64,
    pub decay_start: f64,
    /// Boundary between the fast and slow decay windows.
    pub split_time: f64,
    pub samples_per_window: usize,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            excitation_start: 1e-15,
            decay_start: 1e-12,
            split_time: 1e-7,
            samples_per_window: 10_000,
        }
    }
}

/// `count` log-spaced points from `start` to `stop`, both included exactly.
pub fn logspace(start: f64, stop: f64, count: usize) -> Result<Vec<f64>> {
    if !(start.is_finite() && start > 0.0) {
        return Err(KineticsError::invalid("grid_start", format!("{start:e} must be positive")));
    }
    if !(stop.is_finite() && stop >= start) {
        return Err(KineticsError::invalid(
            "grid_stop",
            format!("{stop:e} must not precede {start:e}"),
        ));
    }
    if count < 2 {
        return Err(KineticsError::invalid(
            "samples_per_window",
            format!("need at least 2 samples, got {count}"),
        ));
    }

    let lo = start.log10();
    let hi = stop.log10();
    let last = (count - 1) as f64;
    let mut points: Vec<f64> = (0..count)
        .map(|i| 10f64.powf(lo + (hi - lo) * i as f64 / last))
        .collect();
    points[0] = start;
    points[count - 1] = stop;
    Ok(points)
}

impl GridSettings {
    pub fn excitation(&self, horizon: f64) -> Result<Vec<f64>> {
        logspace(self.excitation_start, horizon, self.samples_per_window)
            .map_err(|err| rename(err, "time_excitation"))
    }

    /// Single log-spaced decay window.
    pub fn decay(&self, horizon: f64) -> Result<Vec<f64>> {
        logspace(self.decay_start, horizon, self.samples_per_window)
            .map_err(|err| rename(err, "time_decay"))
    }

    /// Fast window up to `split_time` followed by a slow window to `horizon`.
    ///
    /// Collapses to a single window when the horizon does not reach past the
    /// split. The shared boundary sample appears once.
    pub fn two_window_decay(&self, horizon: f64) -> Result<Vec<f64>> {
        if horizon <= self.split_time {
            return self.decay(horizon);
        }
        let mut points = logspace(self.decay_start, self.split_time, self.samples_per_window)
            .map_err(|err| rename(err, "split_time"))?;
        let slow = logspace(self.split_time, horizon, self.samples_per_window)
            .map_err(|err| rename(err, "time_decay"))?;
        points.extend(slow.into_iter().skip(1));
        points.dedup();
        Ok(points)
    }
}

fn rename(err: KineticsError, key: &str) -> KineticsError {
    match err {
        KineticsError::InvalidParameterValue { reason, .. } => KineticsError::invalid(key, reason),
        other => other,
    }
}
