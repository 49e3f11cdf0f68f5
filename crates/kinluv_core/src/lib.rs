pub mod closed_form;
pub mod error;
pub mod events;
pub mod fitting;
pub mod grid;
pub mod integrator;
pub mod model;
pub mod params;
pub mod phase;
pub mod pipeline;
pub mod quantum_yield;
pub mod rates;
pub mod report;
pub mod solvers;
pub mod state;
/// The `kinluv_core` crate is the kinetics engine behind KinLuv. It models the
/// photophysics of a molecule as populations moving between 2 to 5 electronic
/// states under a light pulse and during the relaxation that follows.
///
/// Key components:
/// - **Traits**: `Scalar`, `DynamicalSystem` and `LinearSystem` (rate equations), `Steppable` (solvers).
/// - **Rates / Model**: named rate constants, typed per-topology records and the generator matrices.
/// - **Phase solvers**: exact propagation for 2/3 states, adaptive Radau IIA for 4/5 states.
/// - **Quantum yields**: algebraic and photostationary branching fractions.
/// - **Fitting**: bi-exponential lifetimes via bootstrap, differential evolution and bounded LM.
/// - **Pipeline**: parameter files to trajectories, yields, fits and fixed-width tables.
pub mod traits;

pub use error::{KineticsError, Result};
pub use events::{EventSink, LogSink, NullSink, RecordingSink, Stage, StageEvent};
pub use pipeline::{run, RunConfig, SimulationReport};
pub use rates::{RateConstantSet, RateModel, StateLabel, Variant};
