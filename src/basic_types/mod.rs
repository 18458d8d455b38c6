mod solver_error;
mod value;

pub use solver_error::ConstraintOperationError;
pub use value::Value;

/// The outcome of [`crate::Solver::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SatResult {
    /// The assertions admit a model; the assignment can be inspected through
    /// [`crate::Solver::value`].
    Sat,
    /// The assertions are contradictory.
    Unsat,
}
