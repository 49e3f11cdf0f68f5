//! One complete simulation: rate model → excitation → decay → quantum
//! yields and, optionally, a lifetime fit of the singlet decay.

use crate::closed_form::ComplexNumber;
use crate::error::{KineticsError, Result};
use crate::events::{EventSink, Stage, StageEvent};
use crate::fitting::{fit_lifetimes, FitResult, FitSettings};
use crate::grid::GridSettings;
use crate::integrator::IntegratorSettings;
use crate::params::RunParameters;
use crate::phase::{DecaySolver, ExcitationSolver, PhaseSolver};
use crate::quantum_yield::{quantum_yields, QuantumYields};
use crate::rates::{RateConstantSet, RateModel, StateLabel, Variant};
use crate::report::{kinetics_tables, PanelRange, Panels};
use crate::state::{StateVector, Trajectory};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub variant: Variant,
    pub rates: RateConstantSet,
    pub photon_dose: f64,
    pub pulse_duration: f64,
    pub excitation_horizon: f64,
    pub decay_horizon: f64,
    pub excitation_integrator: IntegratorSettings,
    pub decay_integrator: IntegratorSettings,
    pub grid: GridSettings,
    pub fit: FitSettings,
    /// `None` fits the numeric (4- and 5-state) variants only.
    pub fit_lifetimes: Option<bool>,
}

impl RunConfig {
    pub fn new(variant: Variant, parameters: RunParameters) -> Self {
        Self {
            variant,
            rates: parameters.rates,
            photon_dose: parameters.num_photon,
            pulse_duration: parameters.time_pulse,
            excitation_horizon: parameters.time_excitation,
            decay_horizon: parameters.time_decay,
            excitation_integrator: IntegratorSettings::excitation(),
            decay_integrator: IntegratorSettings::decay(),
            grid: GridSettings::default(),
            fit: FitSettings::default(),
            fit_lifetimes: None,
        }
    }

    /// Builds a config from `key = value` parameter text.
    pub fn parse(variant: Variant, text: &str) -> Result<Self> {
        Ok(Self::new(variant, RunParameters::parse(variant, text)?))
    }

    pub fn fits_lifetimes(&self) -> bool {
        self.fit_lifetimes
            .unwrap_or(!self.variant.is_closed_form())
    }
}

/// Eigenvalues of both reduced generators (closed-form variants only).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    pub excitation: Vec<ComplexNumber>,
    pub decay: Vec<ComplexNumber>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub variant: Variant,
    pub rates: RateModel,
    pub end_of_pulse: StateVector,
    /// `None` when the steady state is not unique.
    pub excitation_limits: Option<StateVector>,
    pub decay_limits: Option<StateVector>,
    pub excitation: Trajectory,
    pub decay: Trajectory,
    pub quantum_yields: QuantumYields,
    pub fit: Option<FitResult>,
    /// Why a requested fit produced no result.
    pub fit_error: Option<String>,
    pub panels: Panels,
    pub spectrum: Spectrum,
}

impl SimulationReport {
    /// Both kinetics tables in the fixed-width text format.
    pub fn tables(&self) -> String {
        kinetics_tables(&self.excitation, &self.decay)
    }
}

fn diagnostic_limits(solver: &PhaseSolver, stage: Stage, sink: &mut dyn EventSink) -> Option<StateVector> {
    match solver.limits() {
        Ok(limits) => {
            let mut event = StageEvent::debug(stage, "long-time limits");
            for (label, value) in limits.labelled() {
                event = event.metric(label.as_str(), value);
            }
            sink.record(event);
            Some(limits)
        }
        Err(err) => {
            sink.record(StageEvent::warn(stage, format!("no long-time limit: {err}")));
            None
        }
    }
}

pub fn run(config: &RunConfig, sink: &mut dyn EventSink) -> Result<SimulationReport> {
    let model = RateModel::from_set(config.variant, &config.rates)?;
    let closed_form = config.variant.is_closed_form();
    sink.record(
        StageEvent::info(Stage::Parameters, format!("{} model", config.variant))
            .metric("num_photon", config.photon_dose)
            .metric("time_pulse", config.pulse_duration)
            .metric("time_excitation", config.excitation_horizon)
            .metric("time_decay", config.decay_horizon),
    );

    let mut excitation = ExcitationSolver::new(&model, config.excitation_integrator)
        .with_horizon(config.excitation_horizon);
    let end_of_pulse = excitation.solve(config.pulse_duration, config.photon_dose, sink)?;
    let excitation_trajectory =
        excitation.trajectory(&config.grid.excitation(config.excitation_horizon)?)?;

    let mut decay = DecaySolver::new(&model, config.decay_integrator);
    decay.solve(&end_of_pulse, config.decay_horizon, sink)?;
    let decay_grid = if closed_form {
        config.grid.decay(config.decay_horizon)?
    } else {
        config.grid.two_window_decay(config.decay_horizon)?
    };
    let decay_trajectory = decay.trajectory(&decay_grid)?;

    let excitation_limits = diagnostic_limits(excitation.solver(), Stage::Excitation, sink);
    let decay_limits = diagnostic_limits(decay.solver(), Stage::Decay, sink);

    let yields = quantum_yields(&model)?;
    sink.record(yields.event());

    let (fit, fit_error) = if config.fits_lifetimes() {
        let singlet = decay_trajectory
            .series(StateLabel::S1)
            .ok_or_else(|| KineticsError::invalid("variant", "topology has no S1 state"))?;
        match fit_lifetimes(
            &decay_trajectory.times,
            &singlet,
            config.photon_dose,
            &config.fit,
            sink,
        ) {
            Ok(fit) => (Some(fit), None),
            Err(err) if !err.is_fatal() => {
                sink.record(StageEvent::warn(Stage::FitLocal, err.to_string()));
                (None, Some(err.to_string()))
            }
            Err(err) => return Err(err),
        }
    } else {
        (None, None)
    };

    let panels = Panels {
        excitation: PanelRange::for_trajectory(&excitation_trajectory),
        decay: PanelRange::for_trajectory(&decay_trajectory),
    };
    let spectrum = Spectrum {
        excitation: excitation.solver().spectrum()?,
        decay: decay.solver().spectrum()?,
    };
    sink.record(
        StageEvent::info(Stage::Report, "simulation complete")
            .metric("excitation_samples", excitation_trajectory.len() as f64)
            .metric("decay_samples", decay_trajectory.len() as f64),
    );

    Ok(SimulationReport {
        variant: config.variant,
        rates: model,
        end_of_pulse,
        excitation_limits,
        decay_limits,
        excitation: excitation_trajectory,
        decay: decay_trajectory,
        quantum_yields: yields,
        fit,
        fit_error,
        panels,
        spectrum,
    })
}
