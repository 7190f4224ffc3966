use crate::traits::DynamicalSystem;
use num_traits::{FromPrimitive, Num, One, Zero};
use std::ops::{Add, Div, Mul, Neg, Rem, Sub};

/// Dual number for forward-mode AD.
/// val: real part
/// eps: infinitesimal part
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Dual {
    pub val: f64,
    pub eps: f64,
}

impl Dual {
    pub fn new(val: f64, eps: f64) -> Self {
        Self { val, eps }
    }

    pub fn variable(val: f64) -> Self {
        Self::new(val, 1.0)
    }

    pub fn constant(val: f64) -> Self {
        Self::new(val, 0.0)
    }
}

impl Zero for Dual {
    fn zero() -> Self {
        Self::new(0.0, 0.0)
    }
    fn is_zero(&self) -> bool {
        self.val == 0.0 && self.eps == 0.0
    }
}

impl One for Dual {
    fn one() -> Self {
        Self::new(1.0, 0.0)
    }
}

impl Add for Dual {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.val + rhs.val, self.eps + rhs.eps)
    }
}

impl Sub for Dual {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.val - rhs.val, self.eps - rhs.eps)
    }
}

impl Mul for Dual {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(self.val * rhs.val, self.val * rhs.eps + self.eps * rhs.val)
    }
}

impl Div for Dual {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        let denom = rhs.val * rhs.val;
        Self::new(
            self.val / rhs.val,
            (self.eps * rhs.val - self.val * rhs.eps) / denom,
        )
    }
}

impl Neg for Dual {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.val, -self.eps)
    }
}

impl Rem for Dual {
    type Output = Self;
    fn rem(self, rhs: Self) -> Self {
        // Piecewise constant offset; derivative follows the dividend.
        Self::new(self.val % rhs.val, self.eps)
    }
}

impl Num for Dual {
    type FromStrRadixErr = ();
    fn from_str_radix(str: &str, radix: u32) -> Result<Self, Self::FromStrRadixErr> {
        f64::from_str_radix(str, radix)
            .map(Self::constant)
            .map_err(|_| ())
    }
}

impl FromPrimitive for Dual {
    fn from_i64(n: i64) -> Option<Self> {
        Some(Self::constant(n as f64))
    }
    fn from_u64(n: u64) -> Option<Self> {
        Some(Self::constant(n as f64))
    }
    fn from_f64(n: f64) -> Option<Self> {
        Some(Self::constant(n))
    }
}

/// Jacobian of `system` at `state`, row-major: entry (i, j) is ∂f_i/∂x_j.
/// Each column costs one dual evaluation of the field.
pub fn jacobian<S: DynamicalSystem<Dual>>(system: &S, t: f64, state: &[f64]) -> Vec<f64> {
    let dim = state.len();
    let mut jacobian = vec![0.0; dim * dim];
    let mut dual_state = vec![Dual::zero(); dim];
    let mut dual_out = vec![Dual::zero(); dim];
    let t_dual = Dual::constant(t);

    for j in 0..dim {
        for i in 0..dim {
            dual_state[i] = Dual::new(state[i], if i == j { 1.0 } else { 0.0 });
        }
        system.apply(t_dual, &dual_state, &mut dual_out);
        for i in 0..dim {
            jacobian[i * dim + j] = dual_out[i].eps;
        }
    }

    jacobian
}

#[cfg(test)]
mod tests {
    use super::{jacobian, Dual};
    use crate::model::{CompetitionModel, ModelParameters};

    #[test]
    fn dual_arithmetic_propagates_derivatives() {
        let x = Dual::variable(3.0);
        let c = Dual::constant(2.0);
        let y = x * x / c - x;
        // d/dx (x^2 / 2 - x) = x - 1
        assert!((y.val - 1.5).abs() < 1e-15);
        assert!((y.eps - 2.0).abs() < 1e-15);
    }

    #[test]
    fn jacobian_matches_analytic_partials() {
        let p = ModelParameters::new(0.031, 4.8e6, 30.0, 0.06, 0.9, 3.0).unwrap();
        let model = CompetitionModel::new(p).unwrap();
        let (s, r) = (1.0e6, 5.0e4);
        let j = jacobian(&model, 0.0, &[s, r]);

        let k = p.capacity;
        let m = p.size_ratio;
        let growth = p.rho * (1.0 - (s + m * r) / k);
        let dsds = growth - p.rho * s / k - p.drug_pressure();
        let dsdr = -p.rho * m * s / k;
        let drds = -p.rho * r / k - p.suppression * r / k;
        let drdr = growth - p.rho * m * r / k - p.suppression * s / k;

        for (got, want) in j.iter().zip([dsds, dsdr, drds, drdr]) {
            assert!((got - want).abs() < 1e-12, "got {got}, want {want}");
        }
    }
}
