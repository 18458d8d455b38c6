use num_bigint::BigInt;
use num_rational::BigRational;

use crate::Solver;
use crate::SolverOptions;

/// A solver with logging wired up for test debugging.
pub(crate) fn test_solver() -> Solver {
    test_solver_with_options(SolverOptions::default())
}

pub(crate) fn test_solver_with_options(options: SolverOptions) -> Solver {
    let _ = env_logger::builder().is_test(true).try_init();
    Solver::new(options)
}

pub(crate) fn rational(value: i64) -> BigRational {
    BigRational::from_integer(BigInt::from(value))
}
