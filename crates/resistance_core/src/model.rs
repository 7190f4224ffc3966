use crate::error::{ModelError, ModelResult};
use crate::traits::{DynamicalSystem, Scalar};
use serde::{Deserialize, Serialize};

/// Parameters of the sensitive/resistant competition model.
///
/// `suppression` (β) is an independent input here; [`ModelParameters::reference`]
/// derives it from the carrying capacity the way the lab setup does.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    /// Intrinsic growth rate ρ (1/hour).
    pub rho: f64,
    /// Carrying capacity K (cells).
    pub capacity: f64,
    /// Size ratio m between resistant and sensitive cells.
    pub size_ratio: f64,
    /// Drug effect α (1/nM).
    pub drug_effect: f64,
    /// Drug concentration C (nM/hour).
    pub concentration: f64,
    /// Cross-suppression β of resistant cells by sensitive ones.
    pub suppression: f64,
}

impl ModelParameters {
    pub fn new(
        rho: f64,
        capacity: f64,
        size_ratio: f64,
        drug_effect: f64,
        concentration: f64,
        suppression: f64,
    ) -> ModelResult<Self> {
        let params = Self {
            rho,
            capacity,
            size_ratio,
            drug_effect,
            concentration,
            suppression,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> ModelResult<()> {
        let fields = [
            ("rho", self.rho),
            ("K", self.capacity),
            ("m", self.size_ratio),
            ("alpha", self.drug_effect),
            ("C", self.concentration),
            ("beta", self.suppression),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(ModelError::invalid(format!("{} must be finite", name)));
            }
        }
        if self.capacity == 0.0 {
            return Err(ModelError::invalid("K must be nonzero"));
        }
        if self.capacity < 0.0 {
            return Err(ModelError::invalid("K must be positive"));
        }
        Ok(())
    }

    /// Net per-capita kill rate αC applied to sensitive cells.
    pub fn drug_pressure(&self) -> f64 {
        self.drug_effect * self.concentration
    }
}

/// Sensitive and resistant population sizes at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct State {
    pub sensitive: f64,
    pub resistant: f64,
}

impl State {
    pub const fn new(sensitive: f64, resistant: f64) -> Self {
        Self {
            sensitive,
            resistant,
        }
    }

    pub fn to_array(self) -> [f64; 2] {
        [self.sensitive, self.resistant]
    }

    /// `values` must hold at least two entries; used on solver output only.
    pub(crate) fn from_slice(values: &[f64]) -> Self {
        Self::new(values[0], values[1])
    }

    pub fn is_finite(&self) -> bool {
        self.sensitive.is_finite() && self.resistant.is_finite()
    }

    pub fn norm(&self) -> f64 {
        self.sensitive.hypot(self.resistant)
    }
}

/// Right-hand side of the competition model, generic so it can be evaluated
/// on dual numbers as well as floats.
///
/// growth = ρ (1 - (s + m r) / K)
/// ds/dt  = growth s - α C s
/// dr/dt  = growth r - (β s / K) r
pub fn vector_field<T: Scalar>(params: &ModelParameters, s: T, r: T) -> (T, T) {
    let rho = T::constant(params.rho);
    let k = T::constant(params.capacity);
    let m = T::constant(params.size_ratio);
    let kill = T::constant(params.drug_effect) * T::constant(params.concentration);
    let beta = T::constant(params.suppression);

    let growth = rho * (T::one() - (s + m * r) / k);
    let ds = growth * s - kill * s;
    let dr = growth * r - beta * s / k * r;
    (ds, dr)
}

/// Evaluates the state derivative. `_t` is accepted for integrator
/// compatibility; the model is autonomous.
pub fn derivative(_t: f64, state: State, params: &ModelParameters) -> ModelResult<State> {
    params.validate()?;
    let (ds, dr) = vector_field(params, state.sensitive, state.resistant);
    Ok(State::new(ds, dr))
}

/// Validated model usable wherever a [`DynamicalSystem`] is expected.
#[derive(Debug, Clone, Copy)]
pub struct CompetitionModel {
    params: ModelParameters,
}

impl CompetitionModel {
    pub fn new(params: ModelParameters) -> ModelResult<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &ModelParameters {
        &self.params
    }
}

impl<T: Scalar> DynamicalSystem<T> for CompetitionModel {
    fn dimension(&self) -> usize {
        2
    }

    fn apply(&self, _t: T, x: &[T], out: &mut [T]) {
        let (ds, dr) = vector_field(&self.params, x[0], x[1]);
        out[0] = ds;
        out[1] = dr;
    }
}

#[cfg(test)]
mod tests {
    use super::{derivative, CompetitionModel, ModelParameters, State};
    use crate::error::ModelError;
    use crate::traits::DynamicalSystem;
    use proptest::prelude::*;

    fn params(concentration: f64) -> ModelParameters {
        ModelParameters::new(0.031, 4.8e6, 30.0, 0.06, concentration, 3.0)
            .expect("reference parameters are valid")
    }

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T, ModelError>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    #[test]
    fn derivative_matches_hand_evaluation() {
        let p = params(0.9);
        let state = State::new(1.0e6, 5.0e3);
        let d = derivative(0.0, state, &p).expect("derivative should evaluate");

        let growth = 0.031 * (1.0 - (1.0e6 + 30.0 * 5.0e3) / 4.8e6);
        let ds = growth * 1.0e6 - 0.06 * 0.9 * 1.0e6;
        let dr = growth * 5.0e3 - 3.0 * 1.0e6 / 4.8e6 * 5.0e3;
        assert!((d.sensitive - ds).abs() < 1e-6);
        assert!((d.resistant - dr).abs() < 1e-9);
    }

    #[test]
    fn derivative_ignores_time() {
        let p = params(1.5);
        let state = State::new(2.0e5, 7.0e4);
        let a = derivative(0.0, state, &p).unwrap();
        let b = derivative(523.25, state, &p).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut p = params(0.9);
        p.capacity = 0.0;
        assert_err_contains(derivative(0.0, State::new(1.0, 1.0), &p), "K must be nonzero");
        assert_err_contains(
            ModelParameters::new(0.031, 0.0, 30.0, 0.06, 0.9, 0.0),
            "K must be nonzero",
        );
        assert!(matches!(
            CompetitionModel::new(p),
            Err(ModelError::InvalidParameter(_))
        ));
    }

    #[test]
    fn non_finite_parameters_are_rejected() {
        assert_err_contains(
            ModelParameters::new(f64::NAN, 4.8e6, 30.0, 0.06, 0.9, 3.0),
            "rho must be finite",
        );
        assert_err_contains(
            ModelParameters::new(0.031, 4.8e6, 30.0, 0.06, f64::INFINITY, 3.0),
            "C must be finite",
        );
    }

    #[test]
    fn negative_populations_are_evaluated_verbatim() {
        let p = params(0.9);
        let d = derivative(0.0, State::new(-1.0e4, -2.0e3), &p).unwrap();
        assert!(d.is_finite());
        assert!(d.sensitive != 0.0);
    }

    #[test]
    fn system_apply_agrees_with_derivative() {
        let p = params(2.0);
        let model = CompetitionModel::new(p).unwrap();
        let state = State::new(3.3e5, 1.2e4);
        let mut out = [0.0; 2];
        model.apply(0.0, &state.to_array(), &mut out);
        let d = derivative(0.0, state, &p).unwrap();
        assert_eq!(DynamicalSystem::<f64>::dimension(&model), 2);
        assert_eq!(out, d.to_array());
    }

    proptest! {
        #[test]
        fn prop_closed_form_points_are_stationary(
            rho in 1e-4f64..2.0,
            capacity in 1.0f64..1e8,
            size_ratio in 0.1f64..100.0,
            drug_effect in 0.0f64..1.0,
            concentration in 0.0f64..5.0,
            suppression in 0.0f64..10.0,
        ) {
            let p = ModelParameters::new(rho, capacity, size_ratio, drug_effect, concentration, suppression).unwrap();
            let scale = 1e-9 * (1.0 + rho * capacity);

            for point in [State::new(0.0, capacity / size_ratio), State::new(0.0, 0.0)] {
                let d = derivative(0.0, point, &p).unwrap();
                prop_assert!(d.sensitive.abs() <= scale);
                prop_assert!(d.resistant.abs() <= scale);
            }

            // Without drug pressure the sensitive-only point sits at capacity.
            let untreated = ModelParameters { concentration: 0.0, ..p };
            let d = derivative(0.0, State::new(capacity, 0.0), &untreated).unwrap();
            prop_assert!(d.sensitive.abs() <= scale);
            prop_assert!(d.resistant.abs() <= scale);
        }
    }
}
