use thiserror::Error;

/// Errors reported when modifying the constraint set or the plugin line-up of
/// a solver.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConstraintOperationError {
    /// The requested plugin id is not registered with the solver.
    #[error("no plugin is registered under the id `{0}`")]
    UnknownPlugin(String),
    /// The plugin is already installed; a plugin can be installed at most
    /// once.
    #[error("the plugin `{0}` is already installed")]
    DuplicatePlugin(String),
    /// The solver has already concluded that the assertions are
    /// contradictory.
    #[error("the solver is in an infeasible state")]
    InfeasibleState,
}
