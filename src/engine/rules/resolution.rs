use fnv::FnvHashSet;
use log::trace;

use crate::engine::clauses::ClauseFarm;
use crate::engine::clauses::ClauseRef;
use crate::engine::clauses::Literal;
use crate::engine::trail::Trail;
use crate::sable_assert_moderate;
use crate::sable_assert_simple;

/// Stateful Boolean resolution: accumulates a literal set starting from a
/// conflicting clause and repeatedly resolves reason clauses against it.
/// Duplicate literals collapse through the set; complementary literals may
/// only meet at the pivot.
#[derive(Debug)]
pub(crate) struct BooleanResolutionRule {
    database: usize,
    rule_id: u16,
    literals: FnvHashSet<Literal>,
}

impl BooleanResolutionRule {
    pub(crate) fn new(farm: &mut ClauseFarm, database: usize) -> BooleanResolutionRule {
        BooleanResolutionRule {
            database,
            rule_id: farm.database_mut(database).register_rule(),
            literals: FnvHashSet::default(),
        }
    }

    pub(crate) fn start(&mut self, initial: ClauseRef, farm: &ClauseFarm) {
        sable_assert_simple!(self.literals.is_empty(), "resolution already in progress");
        self.literals.extend(farm.clause(initial).literals());
        trace!("resolution: start with {}", farm.clause(initial));
    }

    /// Resolve the accumulated set with `other` on the literal at
    /// `pivot_index`, which must be the negation of a literal in the set.
    pub(crate) fn resolve(&mut self, other: ClauseRef, pivot_index: usize, farm: &ClauseFarm) {
        let clause = farm.clause(other);
        sable_assert_simple!(pivot_index < clause.len());
        trace!("resolution: resolve with {clause} on {pivot_index}");

        for (index, literal) in clause.literals().enumerate() {
            if index == pivot_index {
                let removed = self.literals.remove(&!literal);
                sable_assert_simple!(removed, "pivot {literal} has no complement in the resolvent");
            } else {
                sable_assert_moderate!(
                    !self.literals.contains(&!literal),
                    "resolvent would become tautological on {literal}"
                );
                let _ = self.literals.insert(literal);
            }
        }
    }

    /// Commit the resolvent and reset. An empty resolvent commits the unit
    /// `false` clause.
    pub(crate) fn finish(&mut self, trail: &Trail, farm: &mut ClauseFarm) -> ClauseRef {
        let mut literals: Vec<Literal> = self.literals.drain().collect();
        if literals.is_empty() {
            literals.push(Literal::new(trail.false_variable(), false));
        }
        literals.sort();
        farm.database_mut(self.database)
            .new_clause(&literals, self.rule_id, trail.decision_level())
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

    fn setup() -> (Trail, ClauseFarm, BooleanResolutionRule, u16) {
        let mut trail = Trail::new(
            Variable::new(BOOLEAN_TYPE_INDEX, 0),
            Variable::new(BOOLEAN_TYPE_INDEX, 1),
        );
        trail.assert_initial_truths();
        let mut farm = ClauseFarm::default();
        let db = farm.new_database("derived");
        let rule = BooleanResolutionRule::new(&mut farm, db);
        let input_rule = farm.database_mut(db).register_rule();
        (trail, farm, rule, input_rule)
    }

    #[test]
    fn resolves_out_the_pivot_and_unions_the_rest() {
        let (trail, mut farm, mut rule, input) = setup();
        // (p v q) resolved with (~q v r) on ~q gives (p v r).
        let first = farm
            .database_mut(0)
            .new_clause(&[lit(2, false), lit(3, false)], input, 0);
        let second = farm
            .database_mut(0)
            .new_clause(&[lit(3, true), lit(4, false)], input, 0);

        rule.start(first, &farm);
        rule.resolve(second, 0, &farm);
        let resolvent = rule.finish(&trail, &mut farm);

        assert_eq!(
            farm.clause(resolvent).literals().collect::<Vec<_>>(),
            vec![lit(2, false), lit(4, false)]
        );
    }

    #[test]
    fn duplicates_collapse_across_steps() {
        let (trail, mut farm, mut rule, input) = setup();
        let first = farm
            .database_mut(0)
            .new_clause(&[lit(2, false), lit(3, false)], input, 0);
        // Resolving on ~p re-introduces q, which must not duplicate.
        let second = farm
            .database_mut(0)
            .new_clause(&[lit(2, true), lit(3, false)], input, 0);

        rule.start(first, &farm);
        rule.resolve(second, 0, &farm);
        let resolvent = rule.finish(&trail, &mut farm);

        assert_eq!(
            farm.clause(resolvent).literals().collect::<Vec<_>>(),
            vec![lit(3, false)]
        );
    }

    #[test]
    fn empty_resolvent_commits_unit_false() {
        let (trail, mut farm, mut rule, input) = setup();
        let positive = farm.database_mut(0).new_clause(&[lit(2, false)], input, 0);
        let negative = farm.database_mut(0).new_clause(&[lit(2, true)], input, 0);

        rule.start(positive, &farm);
        rule.resolve(negative, 0, &farm);
        let resolvent = rule.finish(&trail, &mut farm);

        let clause = farm.clause(resolvent);
        assert_eq!(clause.len(), 1);
        assert_eq!(clause.literal(0), Literal::new(trail.false_variable(), false));
    }

    #[test]
    fn finish_resets_for_the_next_run() {
        let (trail, mut farm, mut rule, input) = setup();
        let first = farm.database_mut(0).new_clause(&[lit(2, false)], input, 0);
        rule.start(first, &farm);
        let _ = rule.finish(&trail, &mut farm);

        let second = farm.database_mut(0).new_clause(&[lit(5, false)], input, 0);
        rule.start(second, &farm);
        let resolvent = rule.finish(&trail, &mut farm);
        assert_eq!(
            farm.clause(resolvent).literals().collect::<Vec<_>>(),
            vec![lit(5, false)]
        );
    }
}
