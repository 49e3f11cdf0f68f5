//! Excitation and decay phase solvers.
//!
//! One [`PhaseSolver`] drives either strategy: the exact propagator for the
//! 2- and 3-state topologies, or adaptive Radau IIA integration for the 4-
//! and 5-state ones. The strategy is fixed by the variant at construction.
//! A solver moves from unsolved to solved exactly once; asking again for the
//! same solve returns the cached result.

use crate::closed_form::{ClosedFormSolution, ComplexNumber};
use crate::error::{KineticsError, Result};
use crate::events::{EventSink, Stage, StageEvent};
use crate::integrator::{integrate, DenseSolution, IntegratorSettings};
use crate::model::{KineticsMatrix, Phase};
use crate::rates::{RateModel, Variant};
use crate::state::{StateVector, Trajectory};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    ClosedForm,
    Numeric,
}

impl Strategy {
    pub fn for_variant(variant: Variant) -> Self {
        if variant.is_closed_form() {
            Strategy::ClosedForm
        } else {
            Strategy::Numeric
        }
    }
}

#[derive(Debug, Clone)]
pub enum PhaseSolution {
    ClosedForm(ClosedFormSolution),
    Numeric(DenseSolution<KineticsMatrix>),
}

impl PhaseSolution {
    fn population_at(&self, t: f64) -> Result<Vec<f64>> {
        match self {
            PhaseSolution::ClosedForm(solution) => Ok(solution.population_at(t)),
            PhaseSolution::Numeric(solution) => solution.evaluate(t),
        }
    }

    fn populations_at(&self, times: &[f64]) -> Result<Vec<Vec<f64>>> {
        match self {
            PhaseSolution::ClosedForm(solution) => {
                Ok(times.iter().map(|&t| solution.population_at(t)).collect())
            }
            PhaseSolution::Numeric(solution) => solution.evaluate_many(times),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Request {
    initial: Vec<f64>,
    horizon: f64,
}

#[derive(Debug, Clone)]
enum SolverState {
    Unsolved,
    Solved {
        request: Request,
        solution: PhaseSolution,
    },
}

#[derive(Debug, Clone)]
pub struct PhaseSolver {
    matrix: KineticsMatrix,
    settings: IntegratorSettings,
    state: SolverState,
}

impl PhaseSolver {
    pub fn new(model: &RateModel, phase: Phase, settings: IntegratorSettings) -> Self {
        Self {
            matrix: KineticsMatrix::build(model, phase),
            settings,
            state: SolverState::Unsolved,
        }
    }

    pub fn matrix(&self) -> &KineticsMatrix {
        &self.matrix
    }

    pub fn variant(&self) -> Variant {
        self.matrix.variant()
    }

    pub fn strategy(&self) -> Strategy {
        Strategy::for_variant(self.variant())
    }

    pub fn is_solved(&self) -> bool {
        matches!(self.state, SolverState::Solved { .. })
    }

    fn stage(&self) -> Stage {
        match self.matrix.phase() {
            Phase::Excitation => Stage::Excitation,
            Phase::Decay => Stage::Decay,
        }
    }

    /// Solves from `initial` at t = 0 over `[0, horizon]`.
    pub fn solve(
        &mut self,
        initial: &[f64],
        horizon: f64,
        sink: &mut dyn EventSink,
    ) -> Result<&PhaseSolution> {
        let request = Request {
            initial: initial.to_vec(),
            horizon,
        };
        if let SolverState::Solved {
            request: solved, ..
        } = &self.state
        {
            if *solved != request {
                return Err(KineticsError::invalid(
                    self.matrix.phase().to_string(),
                    "phase already solved for a different initial state or horizon",
                ));
            }
        } else {
            let solution = self.compute(&request, sink)?;
            self.state = SolverState::Solved { request, solution };
        }
        self.solution()
    }

    fn compute(&self, request: &Request, sink: &mut dyn EventSink) -> Result<PhaseSolution> {
        let stage = self.stage();
        let phase = self.matrix.phase();
        match self.strategy() {
            Strategy::ClosedForm => {
                let solution = ClosedFormSolution::new(&self.matrix, &request.initial)?;
                let mut event = StageEvent::info(stage, format!("{phase} solved in closed form"));
                for (i, lambda) in solution.eigenvalues().iter().enumerate() {
                    event = event.metric(format!("lambda{}", i + 1), lambda.re);
                }
                sink.record(event);
                Ok(PhaseSolution::ClosedForm(solution))
            }
            Strategy::Numeric => {
                let solution = integrate(
                    &self.matrix,
                    &request.initial,
                    request.horizon,
                    &self.settings,
                    &phase.to_string(),
                )?;
                let total: f64 = request.initial.iter().sum();
                let drift = solution.final_state().iter().sum::<f64>() - total;
                sink.record(
                    StageEvent::info(stage, format!("{phase} integrated with Radau IIA"))
                        .metric("accepted_steps", solution.accepted_steps() as f64)
                        .metric("rejected_steps", solution.rejected_steps() as f64)
                        .metric("conservation_drift", drift),
                );
                Ok(PhaseSolution::Numeric(solution))
            }
        }
    }

    fn solution(&self) -> Result<&PhaseSolution> {
        match &self.state {
            SolverState::Solved { solution, .. } => Ok(solution),
            SolverState::Unsolved => Err(KineticsError::invalid(
                self.matrix.phase().to_string(),
                "phase has not been solved",
            )),
        }
    }

    fn request(&self) -> Option<&Request> {
        match &self.state {
            SolverState::Solved { request, .. } => Some(request),
            SolverState::Unsolved => None,
        }
    }

    /// Eigenvalues of the reduced generator; empty for numeric solutions.
    pub fn spectrum(&self) -> Result<Vec<ComplexNumber>> {
        Ok(match self.solution()? {
            PhaseSolution::ClosedForm(solution) => solution
                .eigenvalues()
                .into_iter()
                .map(ComplexNumber::from)
                .collect(),
            PhaseSolution::Numeric(_) => Vec::new(),
        })
    }

    pub fn population_at(&self, t: f64) -> Result<StateVector> {
        let values = self.solution()?.population_at(t)?;
        Ok(StateVector::new(self.variant(), values))
    }

    pub fn trajectory(&self, times: &[f64]) -> Result<Trajectory> {
        let rows = self.solution()?.populations_at(times)?;
        let mut trajectory = Trajectory::new(self.variant());
        for (&t, row) in times.iter().zip(rows) {
            trajectory.push(t, row);
        }
        Ok(trajectory)
    }

    /// Populations as t → ∞.
    ///
    /// Exact for closed-form solutions. Numeric solutions solve the reduced
    /// steady state `M y = −f` directly, which fails when a state is
    /// disconnected from the rest of the manifold.
    pub fn limits(&self) -> Result<StateVector> {
        let values = match self.solution()? {
            PhaseSolution::ClosedForm(solution) => solution.limits()?,
            PhaseSolution::Numeric(_) => {
                let total = self
                    .request()
                    .map(|r| r.initial.iter().sum())
                    .unwrap_or(0.0);
                let reduced = self.matrix.reduced(total);
                let steady = reduced
                    .generator
                    .clone()
                    .lu()
                    .solve(&reduced.forcing)
                    .ok_or_else(|| {
                        KineticsError::invalid(
                            self.matrix.phase().to_string(),
                            "generator is singular; the steady state is not unique",
                        )
                    })?;
                reduced.expand(&(-steady))
            }
        };
        Ok(StateVector::new(self.variant(), values))
    }
}

/// Pumped phase starting from the whole dose in the ground state.
#[derive(Debug, Clone)]
pub struct ExcitationSolver {
    inner: PhaseSolver,
    horizon: Option<f64>,
    pulse: Option<f64>,
}

impl ExcitationSolver {
    pub fn new(model: &RateModel, settings: IntegratorSettings) -> Self {
        Self {
            inner: PhaseSolver::new(model, Phase::Excitation, settings),
            horizon: None,
            pulse: None,
        }
    }

    /// Extends the solved window past the pulse, for plotting.
    pub fn with_horizon(mut self, horizon: f64) -> Self {
        self.horizon = Some(horizon);
        self
    }

    /// Returns the population at the end of the pulse.
    pub fn solve(
        &mut self,
        pulse_duration: f64,
        photon_dose: f64,
        sink: &mut dyn EventSink,
    ) -> Result<StateVector> {
        if !(pulse_duration.is_finite() && pulse_duration > 0.0) {
            return Err(KineticsError::invalid(
                "time_pulse",
                format!("{pulse_duration:e} must be positive"),
            ));
        }
        if !(photon_dose.is_finite() && photon_dose > 0.0) {
            return Err(KineticsError::invalid(
                "num_photon",
                format!("{photon_dose:e} must be positive"),
            ));
        }
        if let Some(horizon) = self.horizon {
            if !(horizon.is_finite() && horizon > 0.0) {
                return Err(KineticsError::invalid(
                    "time_excitation",
                    format!("{horizon:e} must be positive"),
                ));
            }
        }

        let span = self.horizon.map_or(pulse_duration, |h| h.max(pulse_duration));
        let initial = StateVector::ground(self.inner.variant(), photon_dose);
        self.inner.solve(&initial.values, span, sink)?;
        self.pulse = Some(pulse_duration);

        let end = self.end_of_pulse()?;
        let mut event = StageEvent::info(Stage::Excitation, "end of pulse")
            .metric("time_pulse", pulse_duration);
        for (label, value) in end.labelled() {
            event = event.metric(label.as_str(), value);
        }
        sink.record(event);
        Ok(end)
    }

    pub fn end_of_pulse(&self) -> Result<StateVector> {
        let pulse = self.pulse.ok_or_else(|| {
            KineticsError::invalid("excitation", "phase has not been solved")
        })?;
        self.inner.population_at(pulse)
    }

    pub fn population_at(&self, t: f64) -> Result<StateVector> {
        self.inner.population_at(t)
    }

    pub fn trajectory(&self, times: &[f64]) -> Result<Trajectory> {
        self.inner.trajectory(times)
    }

    pub fn limits(&self) -> Result<StateVector> {
        self.inner.limits()
    }

    pub fn solver(&self) -> &PhaseSolver {
        &self.inner
    }
}

/// Free relaxation from the end-of-pulse populations.
#[derive(Debug, Clone)]
pub struct DecaySolver {
    inner: PhaseSolver,
}

impl DecaySolver {
    pub fn new(model: &RateModel, settings: IntegratorSettings) -> Self {
        Self {
            inner: PhaseSolver::new(model, Phase::Decay, settings),
        }
    }

    pub fn solve(
        &mut self,
        initial: &StateVector,
        horizon: f64,
        sink: &mut dyn EventSink,
    ) -> Result<()> {
        if !(horizon.is_finite() && horizon > 0.0) {
            return Err(KineticsError::invalid(
                "time_decay",
                format!("{horizon:e} must be positive"),
            ));
        }
        if initial.variant != self.inner.variant() {
            return Err(KineticsError::invalid(
                "initial_state",
                format!(
                    "{} populations given to a {} decay",
                    initial.variant,
                    self.inner.variant()
                ),
            ));
        }
        self.inner.solve(&initial.values, horizon, sink)?;
        Ok(())
    }

    pub fn population_at(&self, t: f64) -> Result<StateVector> {
        self.inner.population_at(t)
    }

    pub fn trajectory(&self, times: &[f64]) -> Result<Trajectory> {
        self.inner.trajectory(times)
    }

    pub fn limits(&self) -> Result<StateVector> {
        self.inner.limits()
    }

    pub fn solver(&self) -> &PhaseSolver {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{NullSink, RecordingSink};
    use crate::grid::GridSettings;
    use crate::rates::{FourStateRates, RateConstantSet, ThreeStateRates, TwoStateRates};

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    fn three_state() -> ThreeStateRates {
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

    /// The 3-state topology embedded in the 4-state one with T2 cut off.
    fn disconnected_four_state(rates: &ThreeStateRates) -> FourStateRates {
        FourStateRates {
            k_abss0s1: rates.k_abss0s1,
            k_iscs1t1: rates.k_iscs1t1,
            k_iscs1t2: 0.0,
            k_isct1s0: rates.k_isct1s0,
            k_risct1s1: rates.k_risct1s1,
            k_risct2s1: 0.0,
            k_fls1s0: rates.k_fls1s0,
            k_ics1s0: rates.k_ics1s0,
            k_ict2t1: 0.0,
            k_ict1t2: 0.0,
            k_pht1s0: rates.k_pht1s0,
        }
    }

    #[test]
    fn two_state_pulse_conserves_the_dose() {
        let model = RateModel::Two(TwoStateRates {
            k_abss0s1: 1e13,
            k_fls1s0: 1e7,
            k_ics1s0: 1e7,
        });
        let mut solver = ExcitationSolver::new(&model, IntegratorSettings::excitation());
        let end = solver.solve(1e-11, 1.0, &mut NullSink).unwrap();
        assert!((end.total() - 1.0).abs() < 1e-9);
        assert_eq!(solver.solver().strategy(), Strategy::ClosedForm);
    }

    #[test]
    fn resolving_is_idempotent_but_rejects_a_new_request() {
        let model = RateModel::Three(three_state());
        let mut solver = ExcitationSolver::new(&model, IntegratorSettings::excitation());
        let first = solver.solve(1e-11, 1.0, &mut NullSink).unwrap();
        let again = solver.solve(1e-11, 1.0, &mut NullSink).unwrap();
        assert_eq!(first, again);
        assert_err_contains(
            solver.solve(1e-11, 2.0, &mut NullSink),
            "different initial state",
        );
    }

    #[test]
    fn unsolved_phase_reports_its_name() {
        let model = RateModel::Three(three_state());
        let solver = DecaySolver::new(&model, IntegratorSettings::decay());
        assert_err_contains(solver.population_at(1e-9), "decay");
    }

    #[test]
    fn invalid_scalars_are_rejected_before_solving() {
        let model = RateModel::Three(three_state());
        let mut solver = ExcitationSolver::new(&model, IntegratorSettings::excitation());
        assert_err_contains(solver.solve(0.0, 1.0, &mut NullSink), "time_pulse");
        assert_err_contains(solver.solve(1e-11, -1.0, &mut NullSink), "num_photon");
        assert!(!solver.solver().is_solved());
    }

    #[test]
    fn decay_limit_returns_the_dose_to_the_ground_state() {
        let model = RateModel::Three(three_state());
        let mut excitation = ExcitationSolver::new(&model, IntegratorSettings::excitation());
        let end = excitation.solve(1e-11, 1.0, &mut NullSink).unwrap();
        let mut decay = DecaySolver::new(&model, IntegratorSettings::decay());
        decay.solve(&end, 1e-3, &mut NullSink).unwrap();

        let limits = decay.limits().unwrap();
        assert!((limits.values[0] - 1.0).abs() < 1e-6);
        assert!(limits.values[1..].iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn numeric_decay_limit_matches_the_dose() {
        let set: RateConstantSet = [
            ("k_abss0s1", 1e13),
            ("k_iscs1t1", 1e8),
            ("k_iscs1t2", 5e7),
            ("k_isct1s0", 1e3),
            ("k_risct1s1", 1e5),
            ("k_risct2s1", 1e6),
            ("k_fls1s0", 5e7),
            ("k_ics1s0", 1e7),
            ("k_ict2t1", 1e10),
            ("k_ict1t2", 1e2),
            ("k_pht1s0", 1e2),
        ]
        .into_iter()
        .collect();
        let model = RateModel::from_set(Variant::FourState, &set).unwrap();
        let mut decay = DecaySolver::new(&model, IntegratorSettings::decay());
        let initial = StateVector::new(Variant::FourState, vec![0.5, 0.5, 0.0, 0.0]);
        let mut sink = RecordingSink::new();
        decay.solve(&initial, 1e-6, &mut sink).unwrap();

        let limits = decay.limits().unwrap();
        assert!((limits.values[0] - 1.0).abs() < 1e-6);
        let event = sink.for_stage(Stage::Decay).next().unwrap();
        assert!(event.metric_value("accepted_steps").unwrap() > 0.0);
    }

    #[test]
    fn disconnected_four_state_reproduces_three_state() {
        let rates = three_state();
        let closed = RateModel::Three(rates);
        let numeric = RateModel::Four(disconnected_four_state(&rates));
        let pulse = 1e-11;
        let horizon = 1e-4;

        let mut exc3 = ExcitationSolver::new(&closed, IntegratorSettings::excitation());
        let end3 = exc3.solve(pulse, 1.0, &mut NullSink).unwrap();
        let mut exc4 = ExcitationSolver::new(&numeric, IntegratorSettings::excitation());
        let end4 = exc4.solve(pulse, 1.0, &mut NullSink).unwrap();
        // The pulse window is bounded by the integrator's absolute tolerance.
        for i in 0..3 {
            assert!((end3.values[i] - end4.values[i]).abs() <= 1e-6 * end3.values[i].abs().max(1e-6));
        }
        assert_eq!(end4.values[3], 0.0);

        let mut dec3 = DecaySolver::new(&closed, IntegratorSettings::decay());
        dec3.solve(&end3, horizon, &mut NullSink).unwrap();
        let mut dec4 = DecaySolver::new(&numeric, IntegratorSettings::decay());
        dec4.solve(&end4, horizon, &mut NullSink).unwrap();

        let grid = GridSettings {
            samples_per_window: 40,
            ..GridSettings::default()
        }
        .two_window_decay(horizon)
        .unwrap();
        let a = dec3.trajectory(&grid).unwrap();
        let b = dec4.trajectory(&grid).unwrap();
        for (row3, row4) in a.populations.iter().zip(&b.populations) {
            for i in 0..3 {
                let scale = row3[i].abs().max(1e-12);
                assert!(
                    (row3[i] - row4[i]).abs() <= 1e-6 * scale,
                    "state {i}: {} vs {}",
                    row3[i],
                    row4[i]
                );
            }
        }
    }
}
