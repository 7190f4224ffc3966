//! The `resistance_core` crate simulates competition between drug-sensitive
//! and drug-resistant cell populations.
//!
//! Key components:
//! - **Model**: `ModelParameters`, `State` and the vector field, generic over `Scalar`.
//! - **Solvers**: adaptive embedded Runge-Kutta pairs (Dormand-Prince 5(4), Tsit5) with dense output.
//! - **Trajectory**: `integrate` over a uniform `TimeGrid`.
//! - **Phase plane**: closed-form equilibria with stability, and `analyze` over a set of initial conditions.
//! - **Autodiff**: Dual numbers for Jacobians of the vector field.

pub mod autodiff;
pub mod config;
pub mod equilibrium;
pub mod error;
pub mod model;
pub mod phase_plane;
pub mod solvers;
pub mod traits;
pub mod trajectory;

pub use error::{FailureReason, ModelError, ModelResult};
pub use model::{derivative, ModelParameters, State};
pub use phase_plane::{analyze, format_magnitude, PhasePortrait};
pub use trajectory::{integrate, TimeGrid, Trajectory};
