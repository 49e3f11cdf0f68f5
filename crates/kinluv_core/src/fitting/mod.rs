//! Bi-exponential lifetime extraction from a singlet decay series.
//!
//! Three stages: single-exponential bootstrap fits on the fast and slow
//! windows, a differential-evolution search over `[A1, log10 τ1, A2,
//! log10 τ2, C]` on log-domain residuals, then a bounded soft-L1
//! Levenberg–Marquardt polish of the same residuals.

pub mod bounded;
pub mod evolution;
pub mod model;

pub use bounded::{minimize_bounded, Bounds, LocalFit, LocalFitSettings, Loss, ResidualModel};
pub use evolution::{differential_evolution, EvolutionResult, EvolutionSettings};
pub use model::{BiExponential, CurveResiduals, Domain, ExponentialModel, FitMetrics};

use crate::error::{KineticsError, Result};
use crate::events::{EventSink, Stage, StageEvent};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitSettings {
    /// Boundary between the fast (≤) and slow (≥) bootstrap windows.
    pub threshold: f64,
    /// Populations are clipped to this value before taking logs.
    pub floor: f64,
    pub tau_min: f64,
    pub tau_max: f64,
    pub evolution: EvolutionSettings,
    pub local: LocalFitSettings,
    /// Linear-domain single-exponential fits of the bootstrap stage.
    pub bootstrap: LocalFitSettings,
}

impl FitSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.floor.is_finite() && self.floor > 0.0) {
            return Err(KineticsError::invalid(
                "floor",
                format!("{:e} must be positive and finite", self.floor),
            ));
        }
        Ok(())
    }
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            threshold: 1e-7,
            floor: 1e-12,
            tau_min: 1e-12,
            tau_max: 1.0,
            evolution: EvolutionSettings::default(),
            local: LocalFitSettings::default(),
            bootstrap: LocalFitSettings {
                ftol: 1e-8,
                xtol: 1e-8,
                gtol: 1e-8,
                patience: 100,
            },
        }
    }
}

/// Intermediate optima, kept for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitStages {
    pub bootstrap: BiExponential,
    pub global: BiExponential,
    pub global_energy: f64,
    pub generations: usize,
    pub global_evaluations: usize,
    pub global_converged: bool,
    pub local_termination: String,
    pub local_evaluations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    /// Final parameters, shorter lifetime first.
    pub params: BiExponential,
    pub metrics: FitMetrics,
    /// Whether the local refinement met its tolerances. A result is returned
    /// either way; `metrics.r_squared` says how far to trust it.
    pub converged: bool,
    pub message: String,
    pub stages: FitStages,
}

fn validate(times: &[f64], data: &[f64], photon_dose: f64) -> Result<()> {
    if data.is_empty() {
        return Err(KineticsError::infeasible("no data points"));
    }
    if times.len() != data.len() {
        return Err(KineticsError::infeasible(format!(
            "{} times for {} populations",
            times.len(),
            data.len()
        )));
    }
    if let Some(i) = times.iter().position(|t| !(t.is_finite() && *t >= 0.0)) {
        return Err(KineticsError::infeasible(format!(
            "time {} at index {i} is not a finite non-negative value",
            times[i]
        )));
    }
    if let Some(i) = data.iter().position(|y| !y.is_finite()) {
        return Err(KineticsError::infeasible(format!(
            "population at index {i} is not finite"
        )));
    }
    if !data.iter().any(|y| *y > 0.0) {
        return Err(KineticsError::infeasible("no positive population to fit"));
    }
    if !(photon_dose.is_finite() && photon_dose > 0.0) {
        return Err(KineticsError::infeasible(format!(
            "photon dose {photon_dose:e} must be positive"
        )));
    }
    let parameters = ExponentialModel::BI_EXPONENTIAL.parameter_count();
    if data.len() < parameters {
        return Err(KineticsError::infeasible(format!(
            "{} data points cannot determine {parameters} parameters",
            data.len()
        )));
    }
    Ok(())
}

/// Fits `model` to the points of `times`/`data` selected by `keep`.
///
/// Falls back to `start` with a warning when the window cannot determine
/// the model.
#[allow(clippy::too_many_arguments)]
fn window_fit(
    model: ExponentialModel,
    times: &[f64],
    data: &[f64],
    keep: impl Fn(f64) -> bool,
    bounds: &Bounds,
    start: &[f64],
    settings: &LocalFitSettings,
    window: &str,
    sink: &mut dyn EventSink,
) -> Result<Vec<f64>> {
    let (t, y): (Vec<f64>, Vec<f64>) = times
        .iter()
        .zip(data)
        .filter(|(t, _)| keep(**t))
        .map(|(t, y)| (*t, *y))
        .unzip();
    if t.len() < model.parameter_count() {
        sink.record(
            StageEvent::warn(
                Stage::FitBootstrap,
                format!("{window} window holds too few points, using the default guess"),
            )
            .metric("points", t.len() as f64),
        );
        return Ok(start.to_vec());
    }
    let residuals = CurveResiduals::new(model, &t, &y, Domain::Linear);
    let fit = minimize_bounded(&residuals, bounds, start, Loss::Linear, settings)?;
    if !fit.converged {
        sink.record(StageEvent::debug(
            Stage::FitBootstrap,
            format!("{window} window fit stopped: {}", fit.termination),
        ));
    }
    Ok(fit.params)
}

fn describe(stage: Stage, message: &str, fit: &BiExponential) -> StageEvent {
    StageEvent::info(stage, message)
        .metric("A1", fit.a1)
        .metric("tau1", fit.tau1)
        .metric("A2", fit.a2)
        .metric("tau2", fit.tau2)
        .metric("C", fit.offset)
}

/// Fits `y = A1·exp(−t/τ1) + A2·exp(−t/τ2) + C` to a decay series.
///
/// Amplitudes and the offset are bounded by `photon_dose`, time constants
/// by `[tau_min, tau_max]`.
///
/// Populations at or below `settings.floor`, zero and negative ones
/// included, are clamped to the floor in the log-domain stages and reported
/// with a warning. The linear metrics use the data as given.
pub fn fit_lifetimes(
    times: &[f64],
    data: &[f64],
    photon_dose: f64,
    settings: &FitSettings,
    sink: &mut dyn EventSink,
) -> Result<FitResult> {
    settings.validate()?;
    validate(times, data, photon_dose)?;
    let clipped = data.iter().filter(|y| **y <= settings.floor).count();
    if clipped > 0 {
        sink.record(
            StageEvent::warn(
                Stage::FitBootstrap,
                format!("{clipped} populations at or below the floor are clamped to it"),
            )
            .metric("clipped", clipped as f64)
            .metric("floor", settings.floor),
        );
    }
    let (lt_min, lt_max) = (settings.tau_min.log10(), settings.tau_max.log10());
    let n = photon_dose;

    // Slow window: A·exp(−t/τ) + C.
    let tail_bounds = Bounds::new(vec![0.0, lt_min, 0.0], vec![n, lt_max, n])?;
    let tail = window_fit(
        ExponentialModel::TAIL,
        times,
        data,
        |t| t >= settings.threshold,
        &tail_bounds,
        &[n, -6.0, 0.0],
        &settings.bootstrap,
        "slow",
        sink,
    )?;

    // Fast window: A·exp(−t/τ) on what the tail leaves over.
    let residual: Vec<f64> = times
        .iter()
        .zip(data)
        .map(|(&t, &y)| y - ExponentialModel::TAIL.evaluate(&tail, t))
        .collect();
    let pulse_bounds = Bounds::new(vec![0.0, lt_min], vec![n, lt_max])?;
    let pulse = window_fit(
        ExponentialModel::PULSE,
        times,
        &residual,
        |t| t <= settings.threshold,
        &pulse_bounds,
        &[n, -9.0],
        &settings.bootstrap,
        "fast",
        sink,
    )?;

    let seed = [pulse[0], pulse[1], tail[0], tail[1], tail[2]];
    let bootstrap = BiExponential::from_search(&seed);
    sink.record(describe(Stage::FitBootstrap, "initial guess", &bootstrap));

    let bounds = Bounds::new(
        vec![0.0, lt_min, 0.0, lt_min, 0.0],
        vec![n, lt_max, n, lt_max, n],
    )?;
    let objective = CurveResiduals::new(
        ExponentialModel::BI_EXPONENTIAL,
        times,
        data,
        Domain::Log {
            floor: settings.floor,
        },
    );

    let global = differential_evolution(
        |x| objective.sum_of_squares(x),
        &bounds,
        &[seed.to_vec()],
        &settings.evolution,
    )?;
    let global_fit = BiExponential::try_from(global.best.as_slice())?;
    let event = describe(Stage::FitGlobal, "global optimum", &global_fit)
        .metric("energy", global.energy)
        .metric("generations", global.generations as f64)
        .metric("evaluations", global.evaluations as f64)
        .metric("spread", global.spread);
    sink.record(event);
    if global.converged {
        sink.record(
            StageEvent::debug(
                Stage::FitGlobal,
                format!("population settled after {} generations", global.generations),
            )
            .metric("spread", global.spread),
        );
    } else {
        sink.record(StageEvent::warn(
            Stage::FitGlobal,
            format!(
                "population did not settle within {} generations",
                settings.evolution.max_generations
            ),
        ));
    }

    let local = minimize_bounded(
        &objective,
        &bounds,
        &global.best,
        Loss::SoftL1,
        &settings.local,
    )?;
    let params = BiExponential::try_from(local.params.as_slice())?.ordered();
    let metrics = FitMetrics::compute(&params, times, data);

    sink.record(
        describe(Stage::FitLocal, "refined optimum", &params)
            .metric("mse", metrics.mse)
            .metric("rmse", metrics.rmse)
            .metric("r_squared", metrics.r_squared)
            .metric("evaluations", local.evaluations as f64),
    );
    if !local.converged {
        sink.record(StageEvent::warn(
            Stage::FitLocal,
            format!("refinement stopped without converging: {}", local.termination),
        ));
    }

    Ok(FitResult {
        params,
        metrics,
        converged: local.converged,
        message: local.termination.clone(),
        stages: FitStages {
            bootstrap,
            global: global_fit,
            global_energy: global.energy,
            generations: global.generations,
            global_evaluations: global.evaluations,
            global_converged: global.converged,
            local_termination: local.termination,
            local_evaluations: local.evaluations,
        },
    })
}
