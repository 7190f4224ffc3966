use crate::model::State;
use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

/// Why the adaptive solver gave up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FailureReason {
    MaxStepsExceeded { steps: usize },
    StepSizeTooSmall { step: f64 },
    NonFiniteState,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::MaxStepsExceeded { steps } => {
                write!(f, "step budget of {} exhausted", steps)
            }
            FailureReason::StepSizeTooSmall { step } => {
                write!(f, "step size {:e} fell below the resolvable minimum", step)
            }
            FailureReason::NonFiniteState => write!(f, "state became non-finite"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// `time` and `state` are the furthest point the solver accepted.
    #[error("integration failed at t = {time}: {reason} (s = {}, r = {})", .state.sensitive, .state.resistant)]
    IntegrationFailure {
        time: f64,
        state: State,
        reason: FailureReason,
    },
}

impl ModelError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ModelError::InvalidParameter(message.into())
    }
}
