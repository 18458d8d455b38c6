use super::helper::test_solver;
use super::helper::test_solver_with_options;
use crate::SatResult;
use crate::SolverOptions;
use crate::Value;

#[test]
fn all_polarities_of_two_variables_are_unsat() {
    let mut solver = test_solver();
    let (p, q) = {
        let terms = solver.terms_mut();
        (terms.boolean_variable("p"), terms.boolean_variable("q"))
    };
    let clauses = {
        let terms = solver.terms_mut();
        let not_p = terms.not(p);
        let not_q = terms.not(q);
        vec![
            terms.or(vec![p, q]),
            terms.or(vec![not_p, q]),
            terms.or(vec![p, not_q]),
            terms.or(vec![not_p, not_q]),
        ]
    };
    for clause in clauses {
        solver.add_assertion(clause, false);
    }
    assert_eq!(solver.check(), SatResult::Unsat);
    // The answer is stable.
    assert_eq!(solver.check(), SatResult::Unsat);
}

#[test]
fn implication_chain_propagates_to_a_model() {
    let mut solver = test_solver();
    let (p, q, r) = {
        let terms = solver.terms_mut();
        (
            terms.boolean_variable("p"),
            terms.boolean_variable("q"),
            terms.boolean_variable("r"),
        )
    };
    let p_implies_q = solver.terms_mut().implies(p, q);
    let q_implies_r = solver.terms_mut().implies(q, r);

    solver.add_assertion(p, false);
    solver.add_assertion(p_implies_q, false);
    solver.add_assertion(q_implies_r, false);

    assert_eq!(solver.check(), SatResult::Sat);
    assert_eq!(solver.value(p), Some(Value::Boolean(true)));
    assert_eq!(solver.value(q), Some(Value::Boolean(true)));
    assert_eq!(solver.value(r), Some(Value::Boolean(true)));
}

#[test]
fn contradictory_units_are_unsat() {
    let mut solver = test_solver();
    let p = solver.terms_mut().boolean_variable("p");
    let not_p = solver.terms_mut().not(p);
    solver.add_assertion(p, false);
    solver.add_assertion(not_p, false);
    assert_eq!(solver.check(), SatResult::Unsat);
}

#[test]
fn tautologies_are_sat() {
    let mut solver = test_solver();
    let p = solver.terms_mut().boolean_variable("p");
    let not_p = solver.terms_mut().not(p);
    let tautology = solver.terms_mut().or(vec![p, not_p]);
    solver.add_assertion(tautology, false);
    assert_eq!(solver.check(), SatResult::Sat);
}

#[test]
fn asserting_false_is_unsat() {
    let mut solver = test_solver();
    let false_term = solver.terms_mut().false_term();
    solver.add_assertion(false_term, false);
    assert_eq!(solver.check(), SatResult::Unsat);
}

#[test]
fn asserting_true_is_sat() {
    let mut solver = test_solver();
    let true_term = solver.terms_mut().true_term();
    solver.add_assertion(true_term, false);
    assert_eq!(solver.check(), SatResult::Sat);
}

#[test]
fn negated_conjunction_excludes_both() {
    let mut solver = test_solver();
    let (p, q) = {
        let terms = solver.terms_mut();
        (terms.boolean_variable("p"), terms.boolean_variable("q"))
    };
    let conjunction = solver.terms_mut().and(vec![p, q]);
    let negated = solver.terms_mut().not(conjunction);

    solver.add_assertion(p, false);
    solver.add_assertion(q, false);
    solver.add_assertion(negated, false);
    assert_eq!(solver.check(), SatResult::Unsat);
}

#[test]
fn nested_conjunction_introduces_definitions() {
    let mut solver = test_solver();
    let (p, q, r) = {
        let terms = solver.terms_mut();
        (
            terms.boolean_variable("p"),
            terms.boolean_variable("q"),
            terms.boolean_variable("r"),
        )
    };
    // p v (q ^ r), with p forced off.
    let inner = solver.terms_mut().and(vec![q, r]);
    let disjunction = solver.terms_mut().or(vec![p, inner]);
    let not_p = solver.terms_mut().not(p);

    solver.add_assertion(disjunction, false);
    solver.add_assertion(not_p, false);

    assert_eq!(solver.check(), SatResult::Sat);
    assert_eq!(solver.value(p), Some(Value::Boolean(false)));
    assert_eq!(solver.value(q), Some(Value::Boolean(true)));
    assert_eq!(solver.value(r), Some(Value::Boolean(true)));
}

#[test]
fn immediate_processing_is_equivalent() {
    let mut solver = test_solver();
    let (p, q) = {
        let terms = solver.terms_mut();
        (terms.boolean_variable("p"), terms.boolean_variable("q"))
    };
    let implication = solver.terms_mut().implies(p, q);
    solver.add_assertion(p, true);
    solver.add_assertion(implication, true);
    assert_eq!(solver.check(), SatResult::Sat);
    assert_eq!(solver.value(q), Some(Value::Boolean(true)));
}

#[test]
fn aggressive_restarts_do_not_change_the_answer() {
    let options = SolverOptions {
        bcp_restart_init: 1,
        ..SolverOptions::default()
    };
    let mut solver = test_solver_with_options(options);
    let (p, q) = {
        let terms = solver.terms_mut();
        (terms.boolean_variable("p"), terms.boolean_variable("q"))
    };
    let clauses = {
        let terms = solver.terms_mut();
        let not_p = terms.not(p);
        let not_q = terms.not(q);
        vec![
            terms.or(vec![p, q]),
            terms.or(vec![not_p, q]),
            terms.or(vec![p, not_q]),
            terms.or(vec![not_p, not_q]),
        ]
    };
    for clause in clauses {
        solver.add_assertion(clause, false);
    }
    assert_eq!(solver.check(), SatResult::Unsat);
}

#[test]
fn phase_saving_off_still_finds_models() {
    let options = SolverOptions {
        bcp_value_phase_heuristic: false,
        bcp_var_heuristic: false,
        ..SolverOptions::default()
    };
    let mut solver = test_solver_with_options(options);
    let (p, q) = {
        let terms = solver.terms_mut();
        (terms.boolean_variable("p"), terms.boolean_variable("q"))
    };
    let disjunction = solver.terms_mut().or(vec![p, q]);
    solver.add_assertion(disjunction, false);
    assert_eq!(solver.check(), SatResult::Sat);
    let p_value = solver.value(p).and_then(|v| v.as_boolean());
    let q_value = solver.value(q).and_then(|v| v.as_boolean());
    assert!(p_value == Some(true) || q_value == Some(true));
}

#[test]
fn unknown_plugin_ids_are_rejected() {
    let mut solver = test_solver();
    let result = solver.add_plugin("TheoryOfEverything");
    assert!(result.is_err());
    let duplicate = solver.add_plugin("BCPEngine");
    assert!(duplicate.is_err());
}
