//! WASM bridge for the KinLuv kinetics engine.

mod fitting;
mod simulation;

pub use fitting::fit_decay_lifetimes;
pub use simulation::WasmSimulation;
