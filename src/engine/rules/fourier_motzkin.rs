use fnv::FnvHashSet;
use log::debug;
use num_traits::Signed;

use crate::engine::clauses::ClauseFarm;
use crate::engine::clauses::ClauseRef;
use crate::engine::clauses::Literal;
use crate::engine::trail::Trail;
use crate::engine::variables::Variable;
use crate::engine::variables::VariableDatabase;
use crate::plugins::fm::LinearConstraint;
use crate::sable_assert_simple;
use crate::terms::TermDatabase;

/// Fourier-Motzkin resolution for arithmetic conflicts: eliminates variables
/// by combining inequalities with opposing coefficients, and commits the
/// lemma `(~a_1 v ... v ~a_n v R)` over the assumption literals `a_i` with
/// the residual constraint `R`.
#[derive(Debug)]
pub(crate) struct FourierMotzkinRule {
    database: usize,
    rule_id: u16,
    assumptions: Vec<Literal>,
    resolvent: Option<LinearConstraint>,
}

impl FourierMotzkinRule {
    pub(crate) fn new(farm: &mut ClauseFarm, database: usize) -> FourierMotzkinRule {
        FourierMotzkinRule {
            database,
            rule_id: farm.database_mut(database).register_rule(),
            assumptions: Vec::new(),
            resolvent: None,
        }
    }

    fn begin(&mut self, literal: Literal, constraint: LinearConstraint) {
        sable_assert_simple!(self.assumptions.is_empty() && self.resolvent.is_none());
        self.assumptions.push(literal);
        self.resolvent = Some(constraint);
    }

    /// Start the resolution from the (linear) atom of `literal`.
    pub(crate) fn start(
        &mut self,
        literal: Literal,
        terms: &TermDatabase,
        variables: &VariableDatabase,
    ) {
        let constraint = LinearConstraint::parse(literal, terms, variables)
            .expect("resolution starts from a linear constraint");
        debug!("fm_rule: start from {literal} = {constraint:?}");
        self.begin(literal, constraint);
    }

    pub(crate) fn resolvent(&self) -> &LinearConstraint {
        self.resolvent.as_ref().expect("no resolution in progress")
    }

    /// Resolve the current resolvent with the inequality atom of `literal`
    /// over `x`; the two coefficients of `x` must have opposite signs.
    pub(crate) fn resolve(
        &mut self,
        x: Variable,
        literal: Literal,
        terms: &TermDatabase,
        variables: &VariableDatabase,
    ) {
        let other = LinearConstraint::parse(literal, terms, variables)
            .expect("resolving with a linear constraint");
        let resolvent = self.resolvent.as_mut().expect("no resolution in progress");

        let own_coefficient = resolvent.coefficient(x);
        let other_coefficient = other.coefficient(x);
        sable_assert_simple!(
            (&own_coefficient * &other_coefficient).is_negative(),
            "coefficients of {x} must oppose"
        );

        resolvent.multiply(&other_coefficient.abs());
        resolvent.add(&other, &own_coefficient.abs());

        if !self.assumptions.contains(&literal) {
            self.assumptions.push(literal);
        }
        debug!("fm_rule: after resolving {x}: {:?}", self.resolvent);
    }

    /// Commit the lemma `(~a_1 v ... v ~a_n v R)`. When the residual
    /// constraint still mentions variables, its literal is added and its
    /// negation is semantically propagated at the level at which the
    /// residual evaluates (to false, by construction).
    pub(crate) fn finish(
        &mut self,
        trail: &mut Trail,
        terms: &mut TermDatabase,
        variables: &mut VariableDatabase,
        farm: &mut ClauseFarm,
    ) -> ClauseRef {
        let resolvent = self.resolvent.take().expect("no resolution in progress");
        let mut literals: Vec<Literal> = self.assumptions.drain(..).map(|a| !a).collect();

        if resolvent.variables().next().is_some() {
            let residual = resolvent.literal(terms, variables, trail.decision_level());
            literals.push(residual);

            let (holds, level) = resolvent.evaluate(trail);
            sable_assert_simple!(!holds, "the residual of a conflict must be false");
            trail.semantic_propagate_at(!residual, level);
        }

        let cref =
            farm.database_mut(self.database)
                .new_clause(&literals, self.rule_id, trail.decision_level());
        debug!("fm_rule: committed {}", farm.clause(cref));
        cref
    }

    /// The disequality variant: the bounds fix `x` to exactly the value a
    /// disequality excludes. The disequality `a*x + t != 0` is split into
    /// its two strict sides, each side is resolved against the opposing
    /// bound, and the two lemmas are combined by Boolean resolution over the
    /// split into the final conflict clause.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn resolve_disequality(
        &mut self,
        x: Variable,
        lower_bound_literal: Literal,
        upper_bound_literal: Literal,
        disequality_literal: Literal,
        trail: &mut Trail,
        terms: &mut TermDatabase,
        variables: &mut VariableDatabase,
        farm: &mut ClauseFarm,
    ) -> ClauseRef {
        let disequality = LinearConstraint::parse(disequality_literal, terms, variables)
            .expect("disequality atom must be linear");
        let (positive_side, negative_side) = disequality.split_disequality(x);

        let level = trail.decision_level();
        let positive_literal = positive_side.literal(terms, variables, level);
        let negative_literal = negative_side.literal(terms, variables, level);

        // The split itself: the disequality entails one of the two sides.
        let split = farm.database_mut(self.database).new_clause(
            &[!disequality_literal, positive_literal, negative_literal],
            self.rule_id,
            level,
        );

        // The positive side lower-bounds x, clashing with the upper bound;
        // symmetrically for the negative side.
        self.begin(positive_literal, positive_side);
        self.resolve(x, upper_bound_literal, terms, variables);
        let upper_lemma = self.finish(trail, terms, variables, farm);

        self.begin(negative_literal, negative_side);
        self.resolve(x, lower_bound_literal, terms, variables);
        let lower_lemma = self.finish(trail, terms, variables, farm);

        // Boolean resolution of the two lemmas against the split clause.
        let mut combined: FnvHashSet<Literal> =
            farm.clause(split).literals().collect();
        for (lemma, pivot) in [(upper_lemma, positive_literal), (lower_lemma, negative_literal)] {
            let removed = combined.remove(&pivot);
            sable_assert_simple!(removed);
            for literal in farm.clause(lemma).literals() {
                if literal != !pivot {
                    let _ = combined.insert(literal);
                }
            }
        }

        let mut literals: Vec<Literal> = combined.into_iter().collect();
        literals.sort();
        let cref = farm
            .database_mut(self.database)
            .new_clause(&literals, self.rule_id, level);
        debug!("fm_rule: disequality conflict {}", farm.clause(cref));
        cref
    }
}
