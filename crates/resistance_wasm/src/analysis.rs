//! Phase-plane runners and full-simulation entry point.

use crate::system::{build_grid, serialize, to_js, unpack_states, TimeSeriesPayload, WasmModel};
use anyhow::Context;
use js_sys::Float64Array;
use resistance_core::config::{candidate_initial_conditions, SimulationConfig};
use resistance_core::equilibrium::Equilibrium;
use resistance_core::phase_plane::{self, analyze_with, PhasePortrait};
use resistance_core::trajectory::TimeGrid;
use resistance_core::State;
use serde::Serialize;
use wasm_bindgen::prelude::*;

#[derive(Serialize)]
struct PortraitTracePayload {
    label: String,
    initial: State,
    sensitive: Vec<f64>,
    resistant: Vec<f64>,
}

#[derive(Serialize)]
struct PortraitPayload {
    equilibria: Vec<Equilibrium>,
    treated_equilibrium: Option<Equilibrium>,
    traces: Vec<PortraitTracePayload>,
}

impl From<PhasePortrait> for PortraitPayload {
    fn from(portrait: PhasePortrait) -> Self {
        PortraitPayload {
            equilibria: portrait.equilibria,
            treated_equilibrium: portrait.treated_equilibrium,
            traces: portrait
                .trajectories
                .into_iter()
                .map(|entry| PortraitTracePayload {
                    sensitive: entry.trajectory.sensitive(),
                    resistant: entry.trajectory.resistant(),
                    label: entry.label,
                    initial: entry.initial,
                })
                .collect(),
        }
    }
}

#[derive(Serialize)]
struct SimulationPayload {
    concentration: f64,
    time_series: TimeSeriesPayload,
    phase_plane: PortraitPayload,
}

impl WasmModel {
    fn portrait(&self, initial_conditions: &[State], grid: &TimeGrid) -> anyhow::Result<PortraitPayload> {
        let portrait = analyze_with(&self.params, initial_conditions, grid, &self.settings)
            .context("Phase-plane analysis failed")?;
        Ok(portrait.into())
    }
}

fn simulate(config: &SimulationConfig) -> anyhow::Result<SimulationPayload> {
    config.validate().context("Invalid simulation config")?;
    let model = WasmModel::build(config.params(), config.settings)?;
    let time_series = model.time_series(config.initial, &config.time_grid)?;
    let phase_plane = model.portrait(&config.phase_initial_conditions, &config.time_grid)?;
    Ok(SimulationPayload {
        concentration: config.concentration,
        time_series,
        phase_plane,
    })
}

#[wasm_bindgen]
impl WasmModel {
    /// `initial_conditions` is a flat [S0, R0, S0, R0, ...] array; repeated
    /// pairs produce a single trace.
    pub fn analyze_phase_plane(
        &self,
        initial_conditions: Vec<f64>,
        start: f64,
        end: f64,
        points: u32,
    ) -> Result<JsValue, JsValue> {
        let states = unpack_states(&initial_conditions).map_err(to_js)?;
        let grid = build_grid(start, end, points).map_err(to_js)?;
        let payload = self.portrait(&states, &grid).map_err(to_js)?;
        serialize(&payload, "phase portrait")
    }
}

/// Runs the time-series plot and the phase portrait for a full
/// `SimulationConfig` object. Missing fields take the reference defaults.
#[wasm_bindgen]
pub fn run_simulation(config: JsValue) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();

    let config: SimulationConfig = if config.is_undefined() || config.is_null() {
        SimulationConfig::default()
    } else {
        serde_wasm_bindgen::from_value(config)
            .map_err(|err| JsValue::from_str(&format!("Invalid simulation config: {err}")))?
    };
    let payload = simulate(&config).map_err(to_js)?;
    serialize(&payload, "simulation")
}

#[wasm_bindgen]
pub fn format_magnitude(value: f64) -> String {
    phase_plane::format_magnitude(value)
}

/// Candidate phase-plane starting points as a flat [S0, R0, ...] array.
#[wasm_bindgen]
pub fn default_initial_conditions() -> Float64Array {
    let flat: Vec<f64> = candidate_initial_conditions()
        .iter()
        .flat_map(|state| state.to_array())
        .collect();
    Float64Array::from(flat.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;
    use resistance_core::config::reference_grid;

    #[test]
    fn simulate_default_config() {
        let config = SimulationConfig {
            phase_initial_conditions: vec![State::new(1.0e6, 1.0e5), State::new(1.0e6, 1.0e5)],
            ..SimulationConfig::default()
        };
        let payload = simulate(&config).unwrap();
        assert_eq!(payload.time_series.times.len(), 500);
        assert_eq!(payload.phase_plane.traces.len(), 1);
        assert_eq!(payload.phase_plane.traces[0].label, "S0=1000.0k, R0=100.0k");
        assert_eq!(payload.phase_plane.equilibria.len(), 3);
    }

    #[test]
    fn simulate_rejects_out_of_range_concentration() {
        let config = SimulationConfig {
            concentration: 7.0,
            ..SimulationConfig::default()
        };
        let err = simulate(&config).err().expect("C = 7 is out of range");
        let message = format!("{err:#}");
        assert!(message.contains("Invalid simulation config"));
        assert!(message.contains("C must lie in"));
    }

    #[test]
    fn portrait_payload_keeps_trace_lengths() {
        let model = WasmModel::build(
            resistance_core::ModelParameters::reference(0.9),
            Default::default(),
        )
        .unwrap();
        let grid = reference_grid();
        let payload = model
            .portrait(&candidate_initial_conditions(), &grid)
            .unwrap();
        assert_eq!(payload.traces.len(), 5);
        for trace in &payload.traces {
            assert_eq!(trace.sensitive.len(), grid.points);
            assert_eq!(trace.resistant.len(), grid.points);
        }
    }

    #[test]
    fn format_magnitude_delegates_to_core() {
        assert_eq!(format_magnitude(999.0), "999");
        assert_eq!(format_magnitude(1000.0), "1.0k");
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod wasm_tests {
    use super::run_simulation;
    use crate::system::WasmModel;
    use resistance_core::config::SimulationConfig;
    use resistance_core::State;
    use serde::Deserialize;
    use serde_wasm_bindgen::{from_value, to_value};
    use wasm_bindgen::JsValue;
    use wasm_bindgen_test::wasm_bindgen_test;

    #[derive(Deserialize)]
    struct Series {
        times: Vec<f64>,
        sensitive: Vec<f64>,
    }

    #[derive(Deserialize)]
    struct Trace {
        label: String,
        sensitive: Vec<f64>,
    }

    #[derive(Deserialize)]
    struct Portrait {
        traces: Vec<Trace>,
    }

    #[derive(Deserialize)]
    struct Simulation {
        time_series: Series,
        phase_plane: Portrait,
    }

    #[wasm_bindgen_test]
    fn run_simulation_uses_reference_defaults() {
        let value = run_simulation(JsValue::UNDEFINED).expect("default simulation");
        let result: Simulation = from_value(value).expect("simulation payload");
        assert_eq!(result.time_series.times.len(), 500);
        assert_eq!(result.time_series.sensitive[0], 1.0e6);
        assert_eq!(result.phase_plane.traces.len(), 1);
        assert_eq!(result.phase_plane.traces[0].label, "S0=1000.0k, R0=100.0k");
    }

    #[wasm_bindgen_test]
    fn run_simulation_rejects_out_of_range_concentration() {
        let config = SimulationConfig {
            concentration: 9.0,
            ..SimulationConfig::default()
        };
        let result = run_simulation(to_value(&config).expect("config"));
        let message = result
            .err()
            .and_then(|err| err.as_string())
            .unwrap_or_default();
        assert!(message.contains("C must lie in"));
    }

    #[wasm_bindgen_test]
    fn analyze_phase_plane_collapses_repeated_pairs() {
        let model = WasmModel::new(0.9, "rk45").expect("model");
        let value = model
            .analyze_phase_plane(vec![1.0e6, 1.0e5, 1.0e6, 1.0e5], 0.0, 200.0, 50)
            .expect("phase portrait");
        let portrait: Portrait = from_value(value).expect("portrait payload");
        assert_eq!(portrait.traces.len(), 1);
        assert_eq!(portrait.traces[0].sensitive.len(), 50);

        let result = model.analyze_phase_plane(vec![1.0, 2.0, 3.0], 0.0, 200.0, 50);
        let message = result
            .err()
            .and_then(|err| err.as_string())
            .unwrap_or_default();
        assert!(message.contains("pairs"));
    }

    #[wasm_bindgen_test]
    fn integrate_and_setters_report_errors() {
        let mut model = WasmModel::new(0.9, "tsit5").expect("model");
        let value = model.integrate(1.0e6, 5.0e3, 0.0, 100.0, 11).expect("trajectory");
        let series: Series = from_value(value).expect("series payload");
        assert_eq!(series.times.len(), 11);

        let bad_grid = model.integrate(1.0e6, 5.0e3, 0.0, 100.0, 1);
        assert!(bad_grid.is_err());
        assert!(model.set_concentration(f64::NAN).is_err());
        assert!(model.set_max_steps(0).is_err());
        assert_eq!(
            model.derivative(0.0, 160_000.0).expect("derivative"),
            State::new(0.0, 0.0).to_array().to_vec()
        );
    }
}
