use crate::equilibrium::{equilibria, treated_equilibrium, Equilibrium};
use crate::error::ModelResult;
use crate::model::{ModelParameters, State};
use crate::solvers::IntegratorSettings;
use crate::trajectory::{integrate_with, TimeGrid, Trajectory};
use log::trace;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Compact label for a magnitude: values of 1000 and above are shown in
/// thousands with one decimal ("4800.0k"), smaller ones as plain numbers.
pub fn format_magnitude(value: f64) -> String {
    if value >= 1000.0 {
        format!("{:.1}k", value / 1000.0)
    } else {
        format!("{}", value)
    }
}

/// Legend entry for a trajectory started at `initial`.
pub fn trajectory_label(initial: &State) -> String {
    format!(
        "S0={}, R0={}",
        format_magnitude(initial.sensitive),
        format_magnitude(initial.resistant)
    )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortraitTrajectory {
    pub initial: State,
    pub label: String,
    pub trajectory: Trajectory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhasePortrait {
    /// (0, K/m), (K, 0), (0, 0) in that order.
    pub equilibria: Vec<Equilibrium>,
    /// Present when drug pressure moves the sensitive-only fixed point
    /// inside the dish.
    pub treated_equilibrium: Option<Equilibrium>,
    /// One entry per distinct initial condition, in first-seen order.
    pub trajectories: Vec<PortraitTrajectory>,
}

impl PhasePortrait {
    pub fn trajectory_for(&self, initial: &State) -> Option<&Trajectory> {
        let key = StateKey::from(initial);
        self.trajectories
            .iter()
            .find(|entry| StateKey::from(&entry.initial) == key)
            .map(|entry| &entry.trajectory)
    }

    pub fn len(&self) -> usize {
        self.trajectories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trajectories.is_empty()
    }
}

/// Bitwise identity of a state, with -0.0 folded onto 0.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct StateKey(u64, u64);

impl From<&State> for StateKey {
    fn from(state: &State) -> Self {
        let bits = |v: f64| if v == 0.0 { 0.0f64.to_bits() } else { v.to_bits() };
        StateKey(bits(state.sensitive), bits(state.resistant))
    }
}

fn distinct(initial_conditions: &[State]) -> Vec<State> {
    let mut seen = HashSet::with_capacity(initial_conditions.len());
    initial_conditions
        .iter()
        .filter(|state| seen.insert(StateKey::from(*state)))
        .copied()
        .collect()
}

pub fn analyze(
    params: &ModelParameters,
    initial_conditions: &[State],
    grid: &TimeGrid,
) -> ModelResult<PhasePortrait> {
    analyze_with(params, initial_conditions, grid, &IntegratorSettings::default())
}

/// Equilibria plus one trajectory per distinct initial condition, all on the
/// same grid and parameters. Any failed integration fails the whole analysis.
pub fn analyze_with(
    params: &ModelParameters,
    initial_conditions: &[State],
    grid: &TimeGrid,
    settings: &IntegratorSettings,
) -> ModelResult<PhasePortrait> {
    params.validate()?;
    grid.validate()?;
    settings.validate()?;

    let equilibria = equilibria(params)?;
    let treated_equilibrium = treated_equilibrium(params)?;
    let starts = distinct(initial_conditions);

    let run = |initial: &State| -> ModelResult<PortraitTrajectory> {
        let label = trajectory_label(initial);
        trace!("phase-plane trajectory {}", label);
        Ok(PortraitTrajectory {
            initial: *initial,
            label,
            trajectory: integrate_with(*initial, grid, params, settings)?,
        })
    };

    #[cfg(feature = "parallel")]
    let trajectories = starts.par_iter().map(run).collect::<ModelResult<Vec<_>>>()?;
    #[cfg(not(feature = "parallel"))]
    let trajectories = starts.iter().map(run).collect::<ModelResult<Vec<_>>>()?;

    Ok(PhasePortrait {
        equilibria,
        treated_equilibrium,
        trajectories,
    })
}

#[cfg(test)]
mod tests {
    use super::{analyze, analyze_with, format_magnitude, trajectory_label};
    use crate::config::{candidate_initial_conditions, reference_grid};
    use crate::error::ModelError;
    use crate::model::{ModelParameters, State};
    use crate::solvers::IntegratorSettings;
    use crate::trajectory::{integrate, TimeGrid};

    #[test]
    fn format_magnitude_switches_at_one_thousand() {
        assert_eq!(format_magnitude(999.0), "999");
        assert_eq!(format_magnitude(1000.0), "1.0k");
        assert_eq!(format_magnitude(4_800_000.0), "4800.0k");
        assert_eq!(format_magnitude(160_000.0), "160.0k");
        assert_eq!(format_magnitude(0.0), "0");
        assert_eq!(format_magnitude(12.5), "12.5");
        assert_eq!(format_magnitude(-2500.0), "-2500");
    }

    #[test]
    fn trajectory_label_uses_both_components() {
        assert_eq!(
            trajectory_label(&State::new(1.0e6, 1.0e5)),
            "S0=1000.0k, R0=100.0k"
        );
    }

    #[test]
    fn duplicate_initial_conditions_collapse() {
        let params = ModelParameters::reference(0.9);
        let grid = TimeGrid::new(0.0, 200.0, 50).unwrap();
        let start = State::new(1.0e6, 1.0e5);
        let portrait = analyze(&params, &[start, start], &grid).unwrap();
        assert_eq!(portrait.len(), 1);
        assert_eq!(portrait.trajectories[0].label, "S0=1000.0k, R0=100.0k");
        assert!(portrait.trajectory_for(&start).is_some());
        assert!(portrait.trajectory_for(&State::new(1.0, 1.0)).is_none());
    }

    #[test]
    fn signed_zero_counts_as_one_condition() {
        let params = ModelParameters::reference(0.9);
        let grid = TimeGrid::new(0.0, 10.0, 5).unwrap();
        let portrait = analyze(
            &params,
            &[State::new(0.0, 5.0e4), State::new(-0.0, 5.0e4)],
            &grid,
        )
        .unwrap();
        assert_eq!(portrait.len(), 1);
    }

    #[test]
    fn portrait_matches_individual_integrations() {
        let params = ModelParameters::reference(0.9);
        let grid = reference_grid();
        let starts = candidate_initial_conditions();
        let portrait = analyze(&params, &starts, &grid).unwrap();

        assert_eq!(portrait.equilibria.len(), 3);
        assert_eq!(portrait.len(), starts.len());
        for (entry, start) in portrait.trajectories.iter().zip(&starts) {
            assert_eq!(entry.initial, *start);
            let alone = integrate(*start, &grid, &params).unwrap();
            assert_eq!(entry.trajectory, alone);
            assert_eq!(entry.trajectory.len(), grid.points);
        }
    }

    #[test]
    fn empty_request_still_reports_equilibria() {
        let params = ModelParameters::reference(0.3);
        let portrait = analyze(&params, &[], &reference_grid()).unwrap();
        assert!(portrait.is_empty());
        assert_eq!(portrait.equilibria.len(), 3);
        assert!(portrait.treated_equilibrium.is_some());
    }

    #[test]
    fn failures_propagate() {
        let params = ModelParameters::reference(0.9);
        let settings = IntegratorSettings {
            max_steps: 1,
            ..IntegratorSettings::default()
        };
        let result = analyze_with(
            &params,
            &[State::new(1.0e6, 1.0e5)],
            &reference_grid(),
            &settings,
        );
        assert!(matches!(result, Err(ModelError::IntegrationFailure { .. })));

        let mut bad = params;
        bad.capacity = 0.0;
        assert!(matches!(
            analyze(&bad, &[], &reference_grid()),
            Err(ModelError::InvalidParameter(_))
        ));
    }
}
