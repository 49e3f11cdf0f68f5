//! Structured progress events.
//!
//! Components never print. Each stage reports what it did through an
//! injected [`EventSink`]; hosts decide whether that becomes log output, a
//! recorded transcript, or nothing.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const LOG_TARGET: &str = "kinluv";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Parameters,
    Excitation,
    Decay,
    QuantumYield,
    FitBootstrap,
    FitGlobal,
    FitLocal,
    Report,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Parameters => "parameters",
            Stage::Excitation => "excitation",
            Stage::Decay => "decay",
            Stage::QuantumYield => "quantum-yield",
            Stage::FitBootstrap => "fit-bootstrap",
            Stage::FitGlobal => "fit-global",
            Stage::FitLocal => "fit-local",
            Stage::Report => "report",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    Debug,
    Info,
    Warn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEvent {
    pub stage: Stage,
    pub level: Level,
    pub message: String,
    pub metrics: Vec<(String, f64)>,
}

impl StageEvent {
    pub fn info(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(stage, Level::Info, message)
    }

    pub fn warn(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(stage, Level::Warn, message)
    }

    pub fn debug(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(stage, Level::Debug, message)
    }

    fn new(stage: Stage, level: Level, message: impl Into<String>) -> Self {
        Self {
            stage,
            level,
            message: message.into(),
            metrics: Vec::new(),
        }
    }

    pub fn metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.push((name.into(), value));
        self
    }

    pub fn metric_value(&self, name: &str) -> Option<f64> {
        self.metrics
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| *value)
    }
}

impl fmt::Display for StageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.stage, self.message)?;
        for (name, value) in &self.metrics {
            write!(f, " {name}={value:e}")?;
        }
        Ok(())
    }
}

pub trait EventSink {
    fn record(&mut self, event: StageEvent);
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn record(&mut self, event: StageEvent) {
        match event.level {
            Level::Debug => log::debug!(target: LOG_TARGET, "{event}"),
            Level::Info => log::info!(target: LOG_TARGET, "{event}"),
            Level::Warn => log::warn!(target: LOG_TARGET, "{event}"),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub events: Vec<StageEvent>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_stage(&self, stage: Stage) -> impl Iterator<Item = &StageEvent> {
        self.events.iter().filter(move |e| e.stage == stage)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &StageEvent> {
        self.events.iter().filter(|e| e.level == Level::Warn)
    }
}

impl EventSink for RecordingSink {
    fn record(&mut self, event: StageEvent) {
        self.events.push(event);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn record(&mut self, _event: StageEvent) {}
}
