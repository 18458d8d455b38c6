use super::helper::rational;
use super::helper::test_solver;
use crate::SatResult;
use crate::Value;

#[test]
fn boolean_propagation_forces_an_arithmetic_conflict() {
    let mut solver = test_solver();
    let p = solver.terms_mut().boolean_variable("p");
    let x = solver.terms_mut().real_variable("x");
    let assertions = {
        let terms = solver.terms_mut();
        let zero = terms.integer_constant(0);
        let one = terms.integer_constant(1);
        let x_geq_1 = terms.geq(x, one);
        vec![
            terms.or(vec![p, x_geq_1]),
            terms.not(p),
            terms.leq(x, zero),
        ]
    };
    for assertion in assertions {
        solver.add_assertion(assertion, false);
    }
    assert_eq!(solver.check(), SatResult::Unsat);
}

#[test]
fn theory_conflict_flips_the_boolean_decision() {
    let mut solver = test_solver();
    let (p, q) = {
        let terms = solver.terms_mut();
        (terms.boolean_variable("p"), terms.boolean_variable("q"))
    };
    let x = solver.terms_mut().real_variable("x");
    let assertions = {
        let terms = solver.terms_mut();
        let zero = terms.integer_constant(0);
        let one = terms.integer_constant(1);
        let x_geq_1 = terms.geq(x, one);
        let not_p = terms.not(p);
        vec![
            terms.leq(x, zero),
            terms.or(vec![p, x_geq_1]),
            terms.or(vec![not_p, q]),
        ]
    };
    for assertion in assertions {
        solver.add_assertion(assertion, false);
    }

    assert_eq!(solver.check(), SatResult::Sat);
    // The arithmetic conflict rules out `x >= 1`, so `p` must hold and
    // pulls `q` along.
    assert_eq!(solver.value(p), Some(Value::Boolean(true)));
    assert_eq!(solver.value(q), Some(Value::Boolean(true)));
    let x_value = solver
        .value(x)
        .and_then(|value| value.as_rational().cloned())
        .expect("x is assigned in the model");
    assert!(x_value <= rational(0));
}

#[test]
fn implication_into_the_theory_bounds_the_model() {
    let mut solver = test_solver();
    let p = solver.terms_mut().boolean_variable("p");
    let x = solver.terms_mut().real_variable("x");
    let x_geq_1 = {
        let terms = solver.terms_mut();
        let one = terms.integer_constant(1);
        terms.geq(x, one)
    };
    let implication = solver.terms_mut().implies(p, x_geq_1);

    solver.add_assertion(p, false);
    solver.add_assertion(implication, false);

    assert_eq!(solver.check(), SatResult::Sat);
    let x_value = solver
        .value(x)
        .and_then(|value| value.as_rational().cloned())
        .expect("x is assigned in the model");
    assert!(x_value >= rational(1));
}

#[test]
fn equalities_fix_variables_transitively() {
    let mut solver = test_solver();
    let (x, y) = {
        let terms = solver.terms_mut();
        (terms.real_variable("x"), terms.real_variable("y"))
    };
    let assertions = {
        let terms = solver.terms_mut();
        let five = terms.integer_constant(5);
        let seven = terms.integer_constant(7);
        let sum = terms.plus(vec![x, y]);
        vec![terms.equal(x, five), terms.equal(sum, seven)]
    };
    for assertion in assertions {
        solver.add_assertion(assertion, false);
    }

    assert_eq!(solver.check(), SatResult::Sat);
    assert_eq!(
        solver
            .value(x)
            .and_then(|value| value.as_rational().cloned()),
        Some(rational(5))
    );
    assert_eq!(
        solver
            .value(y)
            .and_then(|value| value.as_rational().cloned()),
        Some(rational(2))
    );
}

#[test]
fn disjunction_of_windows_picks_a_consistent_one() {
    let mut solver = test_solver();
    let x = solver.terms_mut().real_variable("x");
    let assertions = {
        let terms = solver.terms_mut();
        let zero = terms.integer_constant(0);
        let ten = terms.integer_constant(10);
        let twenty = terms.integer_constant(20);
        let x_below_0 = terms.leq(x, zero);
        let x_above_20 = terms.geq(x, twenty);
        // (x <= 0 v x >= 20) ^ x <= 10 forces the left window.
        vec![terms.or(vec![x_below_0, x_above_20]), terms.leq(x, ten)]
    };
    for assertion in assertions {
        solver.add_assertion(assertion, false);
    }

    assert_eq!(solver.check(), SatResult::Sat);
    let x_value = solver
        .value(x)
        .and_then(|value| value.as_rational().cloned())
        .expect("x is assigned in the model");
    assert!(x_value <= rational(10));
}
