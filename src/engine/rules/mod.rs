//! Proof rules: the only constructors of clauses. Each rule registers a rule
//! id with its clause database at construction, and every clause records the
//! id of the rule that produced it.

mod fourier_motzkin;
mod input_clause;
mod resolution;

pub(crate) use fourier_motzkin::FourierMotzkinRule;
pub(crate) use input_clause::InputClauseRule;
pub(crate) use resolution::BooleanResolutionRule;
