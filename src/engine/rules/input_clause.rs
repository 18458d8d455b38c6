use log::debug;

use crate::engine::clauses::ClauseFarm;
use crate::engine::clauses::ClauseRef;
use crate::engine::clauses::Literal;
use crate::engine::trail::Trail;

/// Commits input clauses after level-0 simplification.
#[derive(Debug)]
pub(crate) struct InputClauseRule {
    database: usize,
    rule_id: u16,
}

impl InputClauseRule {
    pub(crate) fn new(farm: &mut ClauseFarm, database: usize) -> InputClauseRule {
        InputClauseRule {
            database,
            rule_id: farm.database_mut(database).register_rule(),
        }
    }

    /// Simplify and commit an input clause. Returns `None` when the clause
    /// needs no commitment: it is a tautology, or already true at level 0.
    /// Duplicate literals and literals false at level 0 are dropped; if
    /// nothing remains, the unit `false` clause is committed.
    pub(crate) fn apply(
        &mut self,
        mut literals: Vec<Literal>,
        trail: &Trail,
        farm: &mut ClauseFarm,
    ) -> Option<ClauseRef> {
        literals.sort();

        let mut kept: Vec<Literal> = Vec::with_capacity(literals.len());
        for literal in literals {
            if kept.last() == Some(&literal) {
                continue;
            }
            if kept
                .last()
                .is_some_and(|previous| literal.is_negation_of(*previous))
            {
                debug!("input_clause: tautology, dropped");
                return None;
            }

            // A value only simplifies the clause when it holds at level 0.
            if let Some(value) = trail.value(literal) {
                if trail.variable_decision_level(literal.variable()) == 0 {
                    if value {
                        debug!("input_clause: satisfied at level 0, dropped");
                        return None;
                    }
                    continue;
                }
            }

            kept.push(literal);
        }

        if kept.is_empty() {
            kept.push(Literal::new(trail.false_variable(), false));
        }

        Some(
            farm.database_mut(self.database)
                .new_clause(&kept, self.rule_id, trail.decision_level()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::variables::Variable;
    use crate::engine::variables::BOOLEAN_TYPE_INDEX;

    fn lit(index: usize, negated: bool) -> Literal {
        Literal::new(Variable::new(BOOLEAN_TYPE_INDEX, index), negated)
    }

    fn setup() -> (Trail, ClauseFarm, InputClauseRule) {
        // Variables 0 and 1 act as the true/false constants.
        let mut trail = Trail::new(
            Variable::new(BOOLEAN_TYPE_INDEX, 0),
            Variable::new(BOOLEAN_TYPE_INDEX, 1),
        );
        trail.assert_initial_truths();
        let mut farm = ClauseFarm::default();
        let db = farm.new_database("input");
        let rule = InputClauseRule::new(&mut farm, db);
        (trail, farm, rule)
    }

    #[test]
    fn deduplicates_and_sorts() {
        let (trail, mut farm, mut rule) = setup();
        let cref = rule
            .apply(
                vec![lit(3, false), lit(2, true), lit(3, false)],
                &trail,
                &mut farm,
            )
            .unwrap();
        let clause = farm.clause(cref);
        assert_eq!(
            clause.literals().collect::<Vec<_>>(),
            vec![lit(2, true), lit(3, false)]
        );
    }

    #[test]
    fn tautologies_commit_nothing() {
        let (trail, mut farm, mut rule) = setup();
        let result = rule.apply(vec![lit(2, false), lit(2, true)], &trail, &mut farm);
        assert!(result.is_none());
        assert_eq!(farm.database(0).num_clauses(), 0);
    }

    #[test]
    fn literals_true_at_level_zero_satisfy_the_clause() {
        let (mut trail, mut farm, mut rule) = setup();
        trail.semantic_propagate(lit(2, false));
        let result = rule.apply(vec![lit(2, false), lit(3, false)], &trail, &mut farm);
        assert!(result.is_none());
    }

    #[test]
    fn literals_false_at_level_zero_are_dropped() {
        let (mut trail, mut farm, mut rule) = setup();
        trail.semantic_propagate(lit(2, true));
        let cref = rule
            .apply(vec![lit(2, false), lit(3, false)], &trail, &mut farm)
            .unwrap();
        assert_eq!(
            farm.clause(cref).literals().collect::<Vec<_>>(),
            vec![lit(3, false)]
        );
    }

    #[test]
    fn values_above_level_zero_do_not_simplify() {
        let (mut trail, mut farm, mut rule) = setup();
        trail.decide_literal(lit(2, false));
        let cref = rule
            .apply(vec![lit(2, false), lit(3, false)], &trail, &mut farm)
            .unwrap();
        assert_eq!(farm.clause(cref).len(), 2);
    }

    #[test]
    fn empty_clause_becomes_unit_false() {
        let (mut trail, mut farm, mut rule) = setup();
        trail.semantic_propagate(lit(2, true));
        let cref = rule.apply(vec![lit(2, false)], &trail, &mut farm).unwrap();
        let clause = farm.clause(cref);
        assert_eq!(clause.len(), 1);
        assert_eq!(clause.literal(0), Literal::new(trail.false_variable(), false));
    }
}
