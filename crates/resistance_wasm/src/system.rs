//! Core WASM model wrapper and low-level utilities.

use anyhow::{anyhow, bail, Context};
use resistance_core::autodiff::jacobian;
use resistance_core::equilibrium::{equilibria, treated_equilibrium};
use resistance_core::model::{derivative, CompetitionModel, ModelParameters, State};
use resistance_core::solvers::{AdaptiveMethod, IntegratorSettings};
use resistance_core::trajectory::{integrate_with, TimeGrid};
use serde::Serialize;
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub struct WasmModel {
    pub(crate) params: ModelParameters,
    pub(crate) settings: IntegratorSettings,
}

#[derive(Serialize)]
pub(crate) struct TimeSeriesPayload {
    pub times: Vec<f64>,
    pub sensitive: Vec<f64>,
    pub resistant: Vec<f64>,
    pub accepted_steps: usize,
    pub rejected_steps: usize,
}

pub(crate) fn to_js(err: anyhow::Error) -> JsValue {
    JsValue::from_str(&format!("{:#}", err))
}

pub(crate) fn serialize<T: Serialize>(value: &T, what: &str) -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(value)
        .map_err(|err| JsValue::from_str(&format!("Failed to serialize {what}: {err}")))
}

pub(crate) fn parse_method(name: &str) -> anyhow::Result<AdaptiveMethod> {
    match name {
        "" | "rk45" | "dopri5" => Ok(AdaptiveMethod::DormandPrince5),
        "tsit5" => Ok(AdaptiveMethod::Tsit5),
        other => bail!("Unknown solver \"{}\"", other),
    }
}

pub(crate) fn build_grid(start: f64, end: f64, points: u32) -> anyhow::Result<TimeGrid> {
    TimeGrid::new(start, end, points as usize).context("Invalid time grid")
}

/// Splits a flat [s0, r0, s1, r1, ...] array into states.
pub(crate) fn unpack_states(flat: &[f64]) -> anyhow::Result<Vec<State>> {
    if flat.len() % 2 != 0 {
        return Err(anyhow!(
            "Initial conditions must come in (S0, R0) pairs, got {} values",
            flat.len()
        ));
    }
    Ok(flat
        .chunks_exact(2)
        .map(|pair| State::new(pair[0], pair[1]))
        .collect())
}

impl WasmModel {
    pub(crate) fn build(
        params: ModelParameters,
        settings: IntegratorSettings,
    ) -> anyhow::Result<WasmModel> {
        params.validate().context("Invalid model parameters")?;
        settings.validate().context("Invalid integrator settings")?;
        Ok(WasmModel { params, settings })
    }

    pub(crate) fn update_concentration(&mut self, concentration: f64) -> anyhow::Result<()> {
        let params = ModelParameters {
            concentration,
            ..self.params
        };
        params.validate().context("Invalid drug concentration")?;
        self.params = params;
        Ok(())
    }

    pub(crate) fn update_max_steps(&mut self, max_steps: u32) -> anyhow::Result<()> {
        let settings = IntegratorSettings {
            max_steps: max_steps as usize,
            ..self.settings
        };
        settings.validate().context("Invalid integrator settings")?;
        self.settings = settings;
        Ok(())
    }

    pub(crate) fn rate_of_change(&self, s: f64, r: f64) -> anyhow::Result<Vec<f64>> {
        let d = derivative(0.0, State::new(s, r), &self.params)
            .context("Failed to evaluate derivative")?;
        Ok(d.to_array().to_vec())
    }

    pub(crate) fn linearization(&self, s: f64, r: f64) -> anyhow::Result<Vec<f64>> {
        let model = CompetitionModel::new(self.params).context("Failed to build Jacobian")?;
        Ok(jacobian(&model, 0.0, &[s, r]))
    }

    pub(crate) fn time_series(
        &self,
        initial: State,
        grid: &TimeGrid,
    ) -> anyhow::Result<TimeSeriesPayload> {
        let trajectory = integrate_with(initial, grid, &self.params, &self.settings)
            .context("Integration failed")?;
        Ok(TimeSeriesPayload {
            sensitive: trajectory.sensitive(),
            resistant: trajectory.resistant(),
            times: trajectory.times,
            accepted_steps: trajectory.stats.accepted_steps,
            rejected_steps: trajectory.stats.rejected_steps,
        })
    }
}

#[wasm_bindgen]
impl WasmModel {
    /// Reference lab model at the given drug concentration.
    #[wasm_bindgen(constructor)]
    pub fn new(concentration: f64, solver_name: &str) -> Result<WasmModel, JsValue> {
        console_error_panic_hook::set_once();

        let settings = IntegratorSettings {
            method: parse_method(solver_name).map_err(to_js)?,
            ..IntegratorSettings::default()
        };
        WasmModel::build(ModelParameters::reference(concentration), settings).map_err(to_js)
    }

    /// Fully custom parameters; β is taken as given.
    #[allow(clippy::too_many_arguments)]
    pub fn with_parameters(
        rho: f64,
        capacity: f64,
        size_ratio: f64,
        drug_effect: f64,
        concentration: f64,
        suppression: f64,
        rtol: f64,
        atol: f64,
        solver_name: &str,
    ) -> Result<WasmModel, JsValue> {
        console_error_panic_hook::set_once();

        let params = ModelParameters {
            rho,
            capacity,
            size_ratio,
            drug_effect,
            concentration,
            suppression,
        };
        let settings = IntegratorSettings {
            method: parse_method(solver_name).map_err(to_js)?,
            rtol,
            atol,
            ..IntegratorSettings::default()
        };
        WasmModel::build(params, settings).map_err(to_js)
    }

    pub fn concentration(&self) -> f64 {
        self.params.concentration
    }

    pub fn set_concentration(&mut self, concentration: f64) -> Result<(), JsValue> {
        self.update_concentration(concentration).map_err(to_js)
    }

    pub fn set_max_steps(&mut self, max_steps: u32) -> Result<(), JsValue> {
        self.update_max_steps(max_steps).map_err(to_js)
    }

    pub fn integrate(
        &self,
        s0: f64,
        r0: f64,
        start: f64,
        end: f64,
        points: u32,
    ) -> Result<JsValue, JsValue> {
        let grid = build_grid(start, end, points).map_err(to_js)?;
        let payload = self
            .time_series(State::new(s0, r0), &grid)
            .map_err(to_js)?;
        serialize(&payload, "trajectory")
    }

    pub fn derivative(&self, s: f64, r: f64) -> Result<Vec<f64>, JsValue> {
        self.rate_of_change(s, r).map_err(to_js)
    }

    pub fn compute_jacobian(&self, s: f64, r: f64) -> Result<Vec<f64>, JsValue> {
        self.linearization(s, r).map_err(to_js)
    }

    pub fn equilibria(&self) -> Result<JsValue, JsValue> {
        let mut points = equilibria(&self.params)
            .context("Failed to compute equilibria")
            .map_err(to_js)?;
        if let Some(treated) = treated_equilibrium(&self.params)
            .context("Failed to compute equilibria")
            .map_err(to_js)?
        {
            points.push(treated);
        }
        serialize(&points, "equilibria")
    }
}
