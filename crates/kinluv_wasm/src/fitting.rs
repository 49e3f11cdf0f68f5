//! Standalone lifetime fitting for measured decay curves.

use kinluv_core::fitting::{fit_lifetimes, FitSettings};
use kinluv_core::RecordingSink;
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;

/// Fits a bi-exponential decay; `settings` may be `undefined` for defaults.
#[wasm_bindgen]
pub fn fit_decay_lifetimes(
    times: Vec<f64>,
    populations: Vec<f64>,
    photon_dose: f64,
    settings: JsValue,
) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();

    let settings: FitSettings = if settings.is_undefined() || settings.is_null() {
        FitSettings::default()
    } else {
        from_value(settings).map_err(|e| JsValue::from_str(&format!("Invalid fit settings: {}", e)))?
    };

    let mut events = RecordingSink::new();
    let result = fit_lifetimes(&times, &populations, photon_dose, &settings, &mut events)
        .map_err(|e| JsValue::from_str(&format!("Lifetime fit failed: {}", e)))?;

    to_value(&result).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

#[cfg(all(test, target_arch = "wasm32"))]
mod tests {
    use super::fit_decay_lifetimes;
    use wasm_bindgen::JsValue;
    use wasm_bindgen_test::wasm_bindgen_test;

    #[wasm_bindgen_test]
    fn rejects_non_positive_populations() {
        let message = fit_decay_lifetimes(
            vec![1e-12, 1e-9, 1e-6, 1e-3, 1e-1],
            vec![0.0; 5],
            1.0,
            JsValue::UNDEFINED,
        )
        .err()
        .and_then(|err| err.as_string())
        .unwrap_or_default();
        assert!(message.contains("no positive population"));
    }
}
