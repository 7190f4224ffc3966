use crate::autodiff::jacobian;
use crate::error::ModelResult;
use crate::model::{derivative, CompetitionModel, ModelParameters, State};
use crate::phase_plane::format_magnitude;
use nalgebra::Matrix2;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EquilibriumKind {
    /// (0, K/m): resistant cells fill the dish.
    ResistantOnly,
    /// (K, 0): sensitive cells fill the dish (stationary only without drug).
    SensitiveOnly,
    /// (0, 0)
    Extinction,
    /// (K (1 - αC/ρ), 0): sensitive-only state held down by the drug.
    DrugAdjusted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stability {
    StableNode,
    UnstableNode,
    Saddle,
    StableFocus,
    UnstableFocus,
    Center,
    /// At least one eigenvalue on the imaginary axis.
    Degenerate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equilibrium {
    pub kind: EquilibriumKind,
    pub state: State,
    pub label: String,
    /// ‖f(x*)‖; zero up to rounding for a true fixed point.
    pub residual_norm: f64,
    /// Row-major 2x2 Jacobian at `state`.
    pub jacobian: Vec<f64>,
    pub eigenvalues: Vec<Complex64>,
    pub stability: Stability,
}

/// Closed-form equilibria in display order: (0, K/m), (K, 0), (0, 0).
pub fn equilibrium_points(params: &ModelParameters) -> ModelResult<[State; 3]> {
    params.validate()?;
    let k = params.capacity;
    Ok([
        State::new(0.0, k / params.size_ratio),
        State::new(k, 0.0),
        State::new(0.0, 0.0),
    ])
}

/// The three closed-form equilibria with their linearization.
pub fn equilibria(params: &ModelParameters) -> ModelResult<Vec<Equilibrium>> {
    let kinds = [
        EquilibriumKind::ResistantOnly,
        EquilibriumKind::SensitiveOnly,
        EquilibriumKind::Extinction,
    ];
    equilibrium_points(params)?
        .into_iter()
        .zip(kinds)
        .map(|(state, kind)| describe(params, kind, state))
        .collect()
}

/// Sensitive-only fixed point under drug pressure. `None` without drug
/// (it coincides with (K, 0)) or when the drug clears sensitive cells
/// entirely (αC ≥ ρ).
pub fn treated_equilibrium(params: &ModelParameters) -> ModelResult<Option<Equilibrium>> {
    params.validate()?;
    let pressure = params.drug_pressure();
    if pressure == 0.0 || params.rho <= 0.0 || pressure >= params.rho {
        return Ok(None);
    }
    let state = State::new(params.capacity * (1.0 - pressure / params.rho), 0.0);
    describe(params, EquilibriumKind::DrugAdjusted, state).map(Some)
}

pub fn point_label(state: &State) -> String {
    format!(
        "({},{})",
        format_magnitude(state.sensitive),
        format_magnitude(state.resistant)
    )
}

fn describe(
    params: &ModelParameters,
    kind: EquilibriumKind,
    state: State,
) -> ModelResult<Equilibrium> {
    let model = CompetitionModel::new(*params)?;
    let residual_norm = derivative(0.0, state, params)?.norm();
    let jacobian = jacobian(&model, 0.0, &state.to_array());
    let matrix = Matrix2::new(jacobian[0], jacobian[1], jacobian[2], jacobian[3]);
    let eigenvalues: Vec<Complex64> = matrix.complex_eigenvalues().iter().copied().collect();
    let stability = classify(&eigenvalues);

    Ok(Equilibrium {
        kind,
        label: point_label(&state),
        state,
        residual_norm,
        jacobian,
        eigenvalues,
        stability,
    })
}

fn classify(eigenvalues: &[Complex64]) -> Stability {
    let scale = eigenvalues
        .iter()
        .map(|l| l.norm())
        .fold(0.0_f64, f64::max);
    let tol = 1e-12 * scale.max(1e-300);
    let oscillatory = eigenvalues.iter().any(|l| l.im.abs() > tol);

    if eigenvalues.iter().any(|l| l.re.abs() <= tol) {
        if oscillatory && eigenvalues.iter().all(|l| l.re.abs() <= tol) {
            return Stability::Center;
        }
        return Stability::Degenerate;
    }

    let stable = eigenvalues.iter().filter(|l| l.re < 0.0).count();
    match (oscillatory, stable) {
        (true, n) if n == eigenvalues.len() => Stability::StableFocus,
        (true, _) => Stability::UnstableFocus,
        (false, n) if n == eigenvalues.len() => Stability::StableNode,
        (false, 0) => Stability::UnstableNode,
        (false, _) => Stability::Saddle,
    }
}
