//! Reference configuration of the in-vitro competition experiment and the
//! boundary checks applied to user-supplied simulation requests.

use crate::error::{ModelError, ModelResult};
use crate::model::{ModelParameters, State};
use crate::solvers::IntegratorSettings;
use crate::trajectory::TimeGrid;
use serde::{Deserialize, Serialize};

/// Growth rate of sensitive cells (1/hour).
pub const REFERENCE_RHO_SENSITIVE: f64 = 0.031;
/// Growth rate of resistant cells (1/hour). Measured, but the model uses a
/// single shared rate.
pub const REFERENCE_RHO_RESISTANT: f64 = 0.026;
/// Petri dish carrying capacity (cells).
pub const REFERENCE_CAPACITY: f64 = 4_800_000.0;
pub const REFERENCE_SIZE_RATIO: f64 = 30.0;
/// Drug effect (1/nM).
pub const REFERENCE_DRUG_EFFECT: f64 = 0.06;
/// β per unit of carrying capacity.
pub const SUPPRESSION_PER_CAPACITY: f64 = 6.25e-7;
pub const REFERENCE_HORIZON: (f64, f64) = (0.0, 700.0);
pub const REFERENCE_POINTS: usize = 500;

pub const CONCENTRATION_RANGE: (f64, f64) = (0.0, 5.0);
pub const MIN_INITIAL_POPULATION: f64 = 5000.0;

pub const DEFAULT_CONCENTRATION: f64 = 0.9;
pub const DEFAULT_INITIAL_STATE: State = State::new(1_000_000.0, 5000.0);

impl ModelParameters {
    /// Lab parameters at drug concentration `concentration`, with β derived
    /// from K.
    pub fn reference(concentration: f64) -> Self {
        Self {
            rho: REFERENCE_RHO_SENSITIVE,
            capacity: REFERENCE_CAPACITY,
            size_ratio: REFERENCE_SIZE_RATIO,
            drug_effect: REFERENCE_DRUG_EFFECT,
            concentration,
            suppression: derived_suppression(REFERENCE_CAPACITY),
        }
    }
}

pub fn derived_suppression(capacity: f64) -> f64 {
    capacity * SUPPRESSION_PER_CAPACITY
}

pub fn reference_grid() -> TimeGrid {
    TimeGrid {
        start: REFERENCE_HORIZON.0,
        end: REFERENCE_HORIZON.1,
        points: REFERENCE_POINTS,
    }
}

/// Starting points offered for the phase portrait.
pub fn candidate_initial_conditions() -> Vec<State> {
    vec![
        State::new(1.0e6, 1.0e5),
        State::new(0.1e6, 1.4e5),
        State::new(4.0e4, REFERENCE_CAPACITY / REFERENCE_SIZE_RATIO - 100.0),
        State::new(11.0e5, 5.0e4),
        State::new(17.0e5, 2.0e4),
    ]
}

/// A full simulation request as received from the front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub concentration: f64,
    pub initial: State,
    pub phase_initial_conditions: Vec<State>,
    pub time_grid: TimeGrid,
    pub settings: IntegratorSettings,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            concentration: DEFAULT_CONCENTRATION,
            initial: DEFAULT_INITIAL_STATE,
            phase_initial_conditions: candidate_initial_conditions()
                .into_iter()
                .take(1)
                .collect(),
            time_grid: reference_grid(),
            settings: IntegratorSettings::default(),
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> ModelResult<()> {
        let (c_min, c_max) = CONCENTRATION_RANGE;
        if !(self.concentration >= c_min && self.concentration <= c_max) {
            return Err(ModelError::invalid(format!(
                "C must lie in [{}, {}], got {}",
                c_min, c_max, self.concentration
            )));
        }
        check_population("s0", self.initial.sensitive)?;
        check_population("r0", self.initial.resistant)?;
        for state in &self.phase_initial_conditions {
            if !state.is_finite() {
                return Err(ModelError::invalid(
                    "phase-plane initial conditions must be finite",
                ));
            }
        }
        self.time_grid.validate()?;
        self.settings.validate()
    }

    pub fn params(&self) -> ModelParameters {
        ModelParameters::reference(self.concentration)
    }
}

fn check_population(name: &str, value: f64) -> ModelResult<()> {
    if !(value.is_finite() && value >= MIN_INITIAL_POPULATION) {
        return Err(ModelError::invalid(format!(
            "{} must be at least {}, got {}",
            name, MIN_INITIAL_POPULATION, value
        )));
    }
    Ok(())
}
