use crate::error::Result;
use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars in the kinetics systems.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// A first-order system dx/dt = f(t, x).
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field at (t, x) into `out`.
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}

/// An autonomous linear system dx/dt = A x.
///
/// The coefficient matrix doubles as the exact, time-invariant Jacobian, so
/// implicit steppers never need to differentiate the vector field.
pub trait LinearSystem<T: Scalar>: DynamicalSystem<T> {
    /// Entry A[row][col]: rate of flow into `row` per unit population of `col`.
    fn coefficient(&self, row: usize, col: usize) -> T;
}

/// A trait for solvers that can step a linear system forward.
pub trait Steppable<T: Scalar> {
    /// Advances `state` from `t` to `t + dt` in place.
    fn step(
        &mut self,
        system: &impl LinearSystem<T>,
        t: &mut T,
        state: &mut [T],
        dt: T,
    ) -> Result<()>;
}
