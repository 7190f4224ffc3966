use crate::error::{ModelError, ModelResult};
use crate::model::{CompetitionModel, ModelParameters, State};
use crate::solvers::{AdaptiveSolver, IntegratorSettings, SolverStats};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Uniform grid of `points` sample times from `start` to `end` inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeGrid {
    pub start: f64,
    pub end: f64,
    pub points: usize,
}

impl TimeGrid {
    pub fn new(start: f64, end: f64, points: usize) -> ModelResult<Self> {
        let grid = Self { start, end, points };
        grid.validate()?;
        Ok(grid)
    }

    pub fn validate(&self) -> ModelResult<()> {
        if !self.start.is_finite() || !self.end.is_finite() {
            return Err(ModelError::invalid("time span must be finite"));
        }
        if self.end <= self.start {
            return Err(ModelError::invalid(format!(
                "time span must be positive (start = {}, end = {})",
                self.start, self.end
            )));
        }
        if self.points < 2 {
            return Err(ModelError::invalid(format!(
                "at least 2 evaluation points are required, got {}",
                self.points
            )));
        }
        Ok(())
    }

    /// Evenly spaced sample times. The last entry is exactly `end`.
    pub fn samples(&self) -> Vec<f64> {
        let intervals = (self.points - 1) as f64;
        let span = self.end - self.start;
        let mut times: Vec<f64> = (0..self.points)
            .map(|i| self.start + span * (i as f64 / intervals))
            .collect();
        if let Some(last) = times.last_mut() {
            *last = self.end;
        }
        times
    }
}

/// States sampled 1:1 at the grid times, in increasing time order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub times: Vec<f64>,
    pub states: Vec<State>,
    pub stats: SolverStats,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn initial(&self) -> Option<&State> {
        self.states.first()
    }

    pub fn last(&self) -> Option<&State> {
        self.states.last()
    }

    pub fn sensitive(&self) -> Vec<f64> {
        self.states.iter().map(|s| s.sensitive).collect()
    }

    pub fn resistant(&self) -> Vec<f64> {
        self.states.iter().map(|s| s.resistant).collect()
    }
}

/// Integrates the model with the default [`IntegratorSettings`].
pub fn integrate(
    initial: State,
    grid: &TimeGrid,
    params: &ModelParameters,
) -> ModelResult<Trajectory> {
    integrate_with(initial, grid, params, &IntegratorSettings::default())
}

pub fn integrate_with(
    initial: State,
    grid: &TimeGrid,
    params: &ModelParameters,
    settings: &IntegratorSettings,
) -> ModelResult<Trajectory> {
    grid.validate()?;
    let model = CompetitionModel::new(*params)?;
    if !initial.is_finite() {
        return Err(ModelError::invalid("initial state must be finite"));
    }

    let times = grid.samples();
    let mut solver = AdaptiveSolver::new(*settings, 2)?;
    let samples = solver
        .solve(&model, &initial.to_array(), &times)
        .map_err(|failure| {
            warn!(
                "integration from ({}, {}) failed at t = {}: {} after {} accepted steps",
                initial.sensitive,
                initial.resistant,
                failure.time,
                failure.reason,
                failure.stats.accepted_steps
            );
            ModelError::IntegrationFailure {
                time: failure.time,
                state: State::from_slice(&failure.state),
                reason: failure.reason,
            }
        })?;

    let stats = solver.stats();
    debug!(
        "integrated ({}, {}) over [{}, {}]: {} accepted, {} rejected, {} rhs evaluations",
        initial.sensitive,
        initial.resistant,
        grid.start,
        grid.end,
        stats.accepted_steps,
        stats.rejected_steps,
        stats.rhs_evaluations
    );

    Ok(Trajectory {
        times,
        states: samples.iter().map(|y| State::from_slice(y)).collect(),
        stats,
    })
}
