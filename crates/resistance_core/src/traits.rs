use num_traits::{FromPrimitive, Num};
use std::fmt::Debug;

/// A trait for types that the vector field can be evaluated on.
/// Only field arithmetic and conversion from f64 are needed, so both plain
/// floats and dual numbers qualify.
pub trait Scalar: Num + FromPrimitive + Copy + Debug + 'static {
    fn constant(value: f64) -> Self {
        Self::from_f64(value).unwrap_or_else(Self::zero)
    }
}

impl<T: Num + FromPrimitive + Copy + Debug + 'static> Scalar for T {}

/// Represents an autonomous or non-autonomous flow.
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// t: current time
    /// x: current state
    /// out: buffer to write dx/dt into
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}
