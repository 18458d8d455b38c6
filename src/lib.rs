//! A model-constructing satisfiability (MCSAT) solver core for quantifier-free
//! constraints over Booleans and linear rational/integer arithmetic.
//!
//! The solver maintains a single *trail* of decisions and propagations over
//! variables of mixed types. Reasoning is performed by a closed set of plugins
//! which share the trail: a clausal-conversion plugin feeding input clauses, a
//! Boolean constraint propagation engine based on the two-watched-literal
//! scheme, and a linear-arithmetic plugin which maintains a bound model and
//! resolves arithmetic conflicts with Fourier-Motzkin elimination. Conflicts
//! are repaired with first-UIP clause learning (see \[1\] for the general
//! architecture and \[2\] for the clause learning scheme).
//!
//! # Example
//! ```
//! use sable::SatResult;
//! use sable::Solver;
//!
//! let mut solver = Solver::default();
//! let (p, q) = {
//!     let terms = solver.terms_mut();
//!     (terms.boolean_variable("p"), terms.boolean_variable("q"))
//! };
//! let implication = solver.terms_mut().implies(p, q);
//! solver.add_assertion(p, false);
//! solver.add_assertion(implication, false);
//! assert_eq!(solver.check(), SatResult::Sat);
//! ```
//!
//! # Bibliography
//! \[1\] L. de Moura and D. Jovanović, ‘A model-constructing satisfiability
//! calculus’, in International Workshop on Verification, Model Checking, and
//! Abstract Interpretation, 2013, pp. 1–12.
//!
//! \[2\] J. Marques-Silva, I. Lynce, and S. Malik, ‘Conflict-driven clause
//! learning SAT solvers’, in Handbook of Satisfiability, IOS press, 2021.

pub mod asserts;
mod basic_types;
mod engine;
mod plugins;
mod terms;

#[cfg(test)]
mod tests;

pub use basic_types::ConstraintOperationError;
pub use basic_types::SatResult;
pub use basic_types::Value;
pub use engine::solver::Solver;
pub use engine::solver::SolverOptions;
pub use terms::Sort;
pub use terms::Term;
pub use terms::TermDatabase;
