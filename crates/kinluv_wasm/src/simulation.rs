//! Simulation runner exposed to JavaScript.

use js_sys::Float64Array;
use kinluv_core::fitting::FitSettings;
use kinluv_core::pipeline::{run, RunConfig, SimulationReport};
use kinluv_core::rates::{StateLabel, Variant};
use kinluv_core::state::Trajectory;
use kinluv_core::{RecordingSink, StageEvent};
use serde::Serialize;
use serde_wasm_bindgen::{from_value, to_value};
use std::collections::BTreeMap;
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub struct WasmSimulation {
    config: RunConfig,
    report: Option<SimulationReport>,
    events: RecordingSink,
}

/// Event payload with the stage spelled the way it is logged.
#[derive(Serialize)]
struct EventRecord {
    stage: String,
    level: String,
    message: String,
    metrics: BTreeMap<String, f64>,
}

impl From<&StageEvent> for EventRecord {
    fn from(event: &StageEvent) -> Self {
        Self {
            stage: event.stage.to_string(),
            level: format!("{:?}", event.level).to_lowercase(),
            message: event.message.clone(),
            metrics: event.metrics.iter().cloned().collect(),
        }
    }
}

fn trajectory<'a>(report: &'a SimulationReport, phase: &str) -> anyhow::Result<&'a Trajectory> {
    match phase {
        "excitation" => Ok(&report.excitation),
        "decay" => Ok(&report.decay),
        other => anyhow::bail!("Unknown phase `{other}`, expected `excitation` or `decay`."),
    }
}

fn state_label(variant: Variant, label: &str) -> anyhow::Result<StateLabel> {
    variant
        .labels()
        .iter()
        .copied()
        .find(|candidate| candidate.as_str() == label)
        .ok_or_else(|| anyhow::anyhow!("{variant} model has no state `{label}`."))
}

#[wasm_bindgen]
impl WasmSimulation {
    /// `parameters` is the text of a `key = value` parameter file.
    #[wasm_bindgen(constructor)]
    pub fn new(states: u32, parameters: &str) -> Result<WasmSimulation, JsValue> {
        console_error_panic_hook::set_once();

        let variant = Variant::from_state_count(states as usize)
            .map_err(|e| JsValue::from_str(&format!("Invalid model: {}", e)))?;
        let config = RunConfig::parse(variant, parameters)
            .map_err(|e| JsValue::from_str(&format!("Invalid parameters: {}", e)))?;

        Ok(WasmSimulation {
            config,
            report: None,
            events: RecordingSink::new(),
        })
    }

    pub fn set_samples_per_window(&mut self, samples: u32) {
        self.config.grid.samples_per_window = samples as usize;
        self.report = None;
    }

    pub fn set_fit_lifetimes(&mut self, enabled: bool) {
        self.config.fit_lifetimes = Some(enabled);
        self.report = None;
    }

    pub fn set_fit_settings(&mut self, settings: JsValue) -> Result<(), JsValue> {
        let settings: FitSettings = from_value(settings)
            .map_err(|e| JsValue::from_str(&format!("Invalid fit settings: {}", e)))?;
        self.config.fit = settings;
        self.report = None;
        Ok(())
    }

    /// Runs the whole pipeline and returns the report as a plain object.
    pub fn run(&mut self) -> Result<JsValue, JsValue> {
        let mut events = RecordingSink::new();
        let report = run(&self.config, &mut events)
            .map_err(|e| JsValue::from_str(&format!("Simulation failed: {}", e)))?;
        let value = to_value(&report)
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))?;
        self.report = Some(report);
        self.events = events;
        Ok(value)
    }

    pub fn kinetics_table(&self) -> Result<String, JsValue> {
        Ok(self.report()?.tables())
    }

    pub fn times(&self, phase: &str) -> Result<Float64Array, JsValue> {
        let trajectory = trajectory(self.report()?, phase)
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        Ok(Float64Array::from(trajectory.times.as_slice()))
    }

    /// Population of one state over the sampling grid of `phase`.
    pub fn series(&self, phase: &str, label: &str) -> Result<Float64Array, JsValue> {
        let report = self.report()?;
        let series = trajectory(report, phase)
            .and_then(|trajectory| {
                let label = state_label(report.variant, label)?;
                trajectory
                    .series(label)
                    .ok_or_else(|| anyhow::anyhow!("State `{label}` is not sampled."))
            })
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        Ok(Float64Array::from(series.as_slice()))
    }

    /// Events of the last run, oldest first.
    pub fn events(&self) -> Result<JsValue, JsValue> {
        let records: Vec<EventRecord> = self.events.events.iter().map(EventRecord::from).collect();
        to_value(&records).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    /// Events of the last run, one formatted line each.
    pub fn event_log(&self) -> Vec<String> {
        self.events.events.iter().map(|event| event.to_string()).collect()
    }
}

impl WasmSimulation {
    fn report(&self) -> Result<&SimulationReport, JsValue> {
        self.report
            .as_ref()
            .ok_or_else(|| JsValue::from_str("Simulation has not been run."))
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod tests {
    use super::WasmSimulation;
    use wasm_bindgen_test::wasm_bindgen_test;

    const TWO_STATE: &str = "\
k_abss0s1 = 1.00E+13,
k_fls1s0 = 1.00E+07,
k_ics1s0 = 1.00E+07,
time_pulse = 1.00E-11,
num_photon = 1,
time_excitation = 1.00E-09,
time_decay = 1.00E-03,
";

    #[wasm_bindgen_test]
    fn rejects_unsupported_state_counts() {
        let message = WasmSimulation::new(6, TWO_STATE)
            .err()
            .and_then(|err| err.as_string())
            .unwrap_or_default();
        assert!(message.contains("unsupported state count 6"));
    }

    #[wasm_bindgen_test]
    fn two_state_run_exposes_tables_and_series() {
        let mut simulation = WasmSimulation::new(2, TWO_STATE).expect("simulation");
        simulation.set_samples_per_window(50);
        assert!(simulation.kinetics_table().is_err());

        simulation.run().expect("run");
        let table = simulation.kinetics_table().expect("table");
        assert!(table.starts_with("Excitation Kinetics:"));

        let s1 = simulation.series("decay", "S1").expect("series");
        assert_eq!(s1.length(), 50);
        assert!(simulation.series("decay", "T1").is_err());
        assert!(!simulation.event_log().is_empty());
    }
}
