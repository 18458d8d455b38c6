//! The solver trail: the single source of truth for the current partial
//! assignment. Boolean and arithmetic variables share one trail; entries
//! record whether the assignment came from a decision (which opens a new
//! level) or a propagation, and clausal propagations carry a reason clause
//! consumed later by conflict analysis.

use log::debug;
use log::trace;

use crate::basic_types::Value;
use crate::engine::clauses::ClauseFarm;
use crate::engine::clauses::ClauseRef;
use crate::engine::clauses::Literal;
use crate::engine::clauses::LiteralTable;
use crate::engine::variables::Variable;
use crate::engine::variables::VariableTable;
use crate::sable_assert_moderate;
use crate::sable_assert_simple;

/// The four kinds of trail entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TrailKind {
    /// Decision on the value of a Boolean variable.
    BooleanDecision,
    /// Decision on the value of a non-Boolean variable.
    SemanticDecision,
    /// Propagation of a Boolean variable supported by a clause.
    ClausalPropagation,
    /// Propagation of a Boolean variable supported by the model.
    SemanticPropagation,
}

impl TrailKind {
    pub(crate) fn is_decision(self) -> bool {
        matches!(self, TrailKind::BooleanDecision | TrailKind::SemanticDecision)
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TrailElement {
    pub(crate) kind: TrailKind,
    pub(crate) var: Variable,
}

/// A clausal propagation whose literal was already false: the clause is
/// falsified and conflict analysis starts from it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct InconsistentPropagation {
    pub(crate) literal: Literal,
    pub(crate) reason: ClauseRef,
}

/// Produces a reason clause on demand for a propagated literal. The produced
/// clause is cached by the trail so providers run at most once per literal.
pub(crate) trait ReasonProvider: std::fmt::Debug {
    fn explain(&mut self, literal: Literal, farm: &mut ClauseFarm) -> ClauseRef;
}

#[derive(Debug, Clone, Copy, Default)]
struct ModelInfo {
    decision_level: u32,
    trail_index: u32,
}

#[derive(Debug)]
pub(crate) struct Trail {
    elements: Vec<TrailElement>,
    /// Trail length at the start of each decision level; its length is the
    /// current decision level.
    decision_trail: Vec<usize>,
    decision_level: usize,
    model: VariableTable<Option<Value>>,
    info: VariableTable<ModelInfo>,
    /// Cached clausal reasons, literal-indexed. Entries hold a reference
    /// count on the clause.
    reasons: LiteralTable<Option<ClauseRef>>,
    /// Lazy reason providers, literal-indexed into `provider_store`.
    providers: LiteralTable<Option<usize>>,
    provider_store: Vec<Box<dyn ReasonProvider>>,
    inconsistent: Vec<InconsistentPropagation>,
    true_variable: Variable,
    false_variable: Variable,
}

impl Trail {
    pub(crate) fn new(true_variable: Variable, false_variable: Variable) -> Trail {
        Trail {
            elements: Vec::new(),
            decision_trail: Vec::new(),
            decision_level: 0,
            model: VariableTable::default(),
            info: VariableTable::default(),
            reasons: LiteralTable::default(),
            providers: LiteralTable::default(),
            provider_store: Vec::new(),
            inconsistent: Vec::new(),
            true_variable,
            false_variable,
        }
    }

    /// Propagate the Boolean constants at level 0; called once right after
    /// construction.
    pub(crate) fn assert_initial_truths(&mut self) {
        sable_assert_simple!(self.decision_level == 0 && self.elements.is_empty());
        self.semantic_propagate(Literal::new(self.true_variable, false));
        self.semantic_propagate(Literal::new(self.false_variable, true));
    }

    pub(crate) fn true_variable(&self) -> Variable {
        self.true_variable
    }

    pub(crate) fn false_variable(&self) -> Variable {
        self.false_variable
    }

    pub(crate) fn size(&self) -> usize {
        self.elements.len()
    }

    /// The trail size at the end of the given decision level.
    pub(crate) fn size_at(&self, level: usize) -> usize {
        if level >= self.decision_level {
            self.elements.len()
        } else {
            self.decision_trail[level]
        }
    }

    pub(crate) fn element(&self, index: usize) -> &TrailElement {
        &self.elements[index]
    }

    pub(crate) fn decision_level(&self) -> usize {
        self.decision_level
    }

    pub(crate) fn consistent(&self) -> bool {
        self.inconsistent.is_empty()
    }

    pub(crate) fn inconsistent_propagations(&self) -> &[InconsistentPropagation] {
        &self.inconsistent
    }

    pub(crate) fn value_of(&self, var: Variable) -> Option<&Value> {
        self.model.get(var).and_then(Option::as_ref)
    }

    pub(crate) fn has_value(&self, var: Variable) -> bool {
        self.value_of(var).is_some()
    }

    /// The truth value of a literal under the current model, if any.
    pub(crate) fn value(&self, literal: Literal) -> Option<bool> {
        let value = self.value_of(literal.variable())?.as_boolean();
        sable_assert_moderate!(value.is_some(), "Boolean variable with non-Boolean value");
        value.map(|value| value != literal.is_negated())
    }

    pub(crate) fn is_true(&self, literal: Literal) -> bool {
        self.value(literal) == Some(true)
    }

    pub(crate) fn is_false(&self, literal: Literal) -> bool {
        self.value(literal) == Some(false)
    }

    /// The level at which an assigned variable got its value.
    pub(crate) fn variable_decision_level(&self, var: Variable) -> usize {
        sable_assert_simple!(self.has_value(var), "level query for unassigned {var}");
        self.info.get(var).map_or(0, |info| info.decision_level as usize)
    }

    /// The trail position at which an assigned variable got its value.
    pub(crate) fn trail_index(&self, var: Variable) -> usize {
        sable_assert_simple!(self.has_value(var), "index query for unassigned {var}");
        self.info.get(var).map_or(0, |info| info.trail_index as usize)
    }

    fn set_value(&mut self, var: Variable, value: Value, level: usize) {
        sable_assert_simple!(!self.has_value(var), "{var} already has a value");
        *self.model.entry(var) = Some(value);
        *self.info.entry(var) = ModelInfo {
            decision_level: level as u32,
            trail_index: self.elements.len() as u32,
        };
    }

    fn new_decision(&mut self) {
        sable_assert_simple!(self.consistent());
        self.decision_trail.push(self.elements.len());
        self.decision_level += 1;
    }

    /// Decide a Boolean literal, opening a new decision level.
    pub(crate) fn decide_literal(&mut self, literal: Literal) {
        trace!("trail: decide {literal}");
        self.new_decision();
        let var = literal.variable();
        self.set_value(var, Value::Boolean(!literal.is_negated()), self.decision_level);
        self.elements.push(TrailElement {
            kind: TrailKind::BooleanDecision,
            var,
        });
    }

    /// Decide a value for a non-Boolean variable, opening a new decision
    /// level.
    pub(crate) fn decide_value(&mut self, var: Variable, value: Value) {
        trace!("trail: decide {var} -> {value}");
        sable_assert_simple!(!var.is_boolean());
        self.new_decision();
        self.set_value(var, value, self.decision_level);
        self.elements.push(TrailElement {
            kind: TrailKind::SemanticDecision,
            var,
        });
    }

    /// Propagate a literal that holds in the current model. No-op when the
    /// literal is already true; the literal must not be false.
    pub(crate) fn semantic_propagate(&mut self, literal: Literal) {
        self.semantic_propagate_at(literal, self.decision_level);
    }

    /// Semantic propagation recorded at an explicit (possibly lower) level:
    /// the level at which the literal's atom evaluates in the model.
    pub(crate) fn semantic_propagate_at(&mut self, literal: Literal, level: usize) {
        sable_assert_simple!(!self.is_false(literal), "semantic propagation of false {literal}");
        sable_assert_simple!(level <= self.decision_level);
        if self.is_true(literal) {
            return;
        }
        trace!("trail: semantic propagation {literal} at level {level}");
        let var = literal.variable();
        self.set_value(var, Value::Boolean(!literal.is_negated()), level);
        self.elements.push(TrailElement {
            kind: TrailKind::SemanticPropagation,
            var,
        });
    }

    /// Propagate a literal entailed by a clause. If the literal is already
    /// false the conflict is recorded as an inconsistent propagation and the
    /// trail is otherwise unchanged.
    pub(crate) fn clausal_propagate(
        &mut self,
        literal: Literal,
        reason: ClauseRef,
        farm: &mut ClauseFarm,
    ) {
        sable_assert_moderate!(farm.clause(reason).literal(0) == literal);
        if self.is_true(literal) {
            return;
        }
        if self.is_false(literal) {
            debug!("trail: conflict propagating {literal} with {reason:?}");
            self.inconsistent.push(InconsistentPropagation { literal, reason });
            return;
        }
        trace!("trail: clausal propagation {literal} with {reason:?}");
        let var = literal.variable();
        self.set_value(var, Value::Boolean(!literal.is_negated()), self.decision_level);
        farm.acquire(reason);
        *self.reasons.entry(literal) = Some(reason);
        self.elements.push(TrailElement {
            kind: TrailKind::ClausalPropagation,
            var,
        });
    }

    /// Like [`Trail::clausal_propagate`], but the reason clause is only
    /// constructed if conflict analysis asks for it.
    pub(crate) fn clausal_propagate_lazy(
        &mut self,
        literal: Literal,
        provider: Box<dyn ReasonProvider>,
    ) {
        sable_assert_simple!(!self.is_false(literal));
        if self.is_true(literal) {
            return;
        }
        let var = literal.variable();
        self.set_value(var, Value::Boolean(!literal.is_negated()), self.decision_level);
        let provider_index = self.provider_store.len();
        self.provider_store.push(provider);
        *self.providers.entry(literal) = Some(provider_index);
        self.elements.push(TrailElement {
            kind: TrailKind::ClausalPropagation,
            var,
        });
    }

    /// Whether a clausal reason is available for this literal.
    pub(crate) fn has_reason(&self, literal: Literal) -> bool {
        self.reasons.get(literal).is_some_and(Option::is_some)
            || self.providers.get(literal).is_some_and(Option::is_some)
    }

    /// The reason clause of a clausally propagated literal. Materialises and
    /// caches the clause when the reason is lazy.
    pub(crate) fn reason(&mut self, literal: Literal, farm: &mut ClauseFarm) -> ClauseRef {
        sable_assert_simple!(self.has_reason(literal));
        if let Some(cached) = self.reasons.get(literal).and_then(|slot| *slot) {
            return cached;
        }
        let provider_index = self.providers.entry(literal).expect("checked by has_reason");
        let reason = self.provider_store[provider_index].explain(literal, farm);
        farm.acquire(reason);
        *self.reasons.entry(literal) = Some(reason);
        reason
    }

    fn pop_decision(&mut self, farm: &mut ClauseFarm, unset: &mut Vec<Variable>) {
        sable_assert_simple!(!self.decision_trail.is_empty());
        let mark = self.decision_trail.pop().expect("checked non-empty");

        while self.elements.len() > mark {
            let element = self.elements.pop().expect("trail longer than the mark");
            let var = element.var;
            unset.push(var);

            *self.model.entry(var) = None;
            *self.info.entry(var) = ModelInfo::default();

            if var.is_boolean() {
                for literal in [Literal::new(var, false), Literal::new(var, true)] {
                    if let Some(reason) = self.reasons.entry(literal).take() {
                        farm.release(reason);
                    }
                    let _ = self.providers.entry(literal).take();
                }
            }
        }

        self.decision_level -= 1;
    }

    /// Clause references the trail still relies on (cached reasons), for
    /// garbage collection.
    pub(crate) fn gc_mark(&self, keep: &mut fnv::FnvHashSet<ClauseRef>) {
        keep.extend(self.reasons.values().filter_map(|slot| *slot));
    }

    /// Re-point cached reason references after a compacting collection.
    pub(crate) fn relocate(&mut self, relocation: &crate::engine::clauses::ClauseRelocation) {
        sable_assert_simple!(self.inconsistent.is_empty());
        for slot in self.reasons.values_mut() {
            if let Some(cref) = slot {
                *cref = relocation
                    .relocate(*cref)
                    .expect("reason clauses are kept across collection");
            }
        }
    }

    /// Pop decisions until the decision level equals `level`. Returns the
    /// unset variables in LIFO order and clears any recorded inconsistent
    /// propagations.
    pub(crate) fn pop_to(&mut self, level: usize, farm: &mut ClauseFarm) -> Vec<Variable> {
        debug!(
            "trail: pop to level {level} from {}",
            self.decision_level
        );
        let mut unset = Vec::new();
        while self.decision_level > level {
            self.pop_decision(farm, &mut unset);
        }
        self.inconsistent.clear();
        unset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::variables::BOOLEAN_TYPE_INDEX;

    fn boolean(index: usize) -> Variable {
        Variable::new(BOOLEAN_TYPE_INDEX, index)
    }

    fn fresh_trail() -> Trail {
        // Variables 0 and 1 play the roles of the true/false constants.
        let mut trail = Trail::new(boolean(0), boolean(1));
        trail.assert_initial_truths();
        trail
    }

    fn farm_with_clause(literals: &[Literal]) -> (ClauseFarm, ClauseRef) {
        let mut farm = ClauseFarm::default();
        let db = farm.new_database("test");
        let rule = farm.database_mut(db).register_rule();
        let cref = farm.database_mut(db).new_clause(literals, rule, 0);
        (farm, cref)
    }

    #[test]
    fn initial_truths_hold_at_level_zero() {
        let trail = fresh_trail();
        assert_eq!(trail.decision_level(), 0);
        assert_eq!(trail.size(), 2);
        assert!(trail.is_true(Literal::new(boolean(0), false)));
        assert!(trail.is_true(Literal::new(boolean(1), true)));
        assert_eq!(trail.variable_decision_level(boolean(0)), 0);
    }

    #[test]
    fn decisions_open_levels_and_pop_reverts_them() {
        let mut trail = fresh_trail();
        let mut farm = ClauseFarm::default();

        let p = Literal::new(boolean(2), false);
        let q = Literal::new(boolean(3), true);
        trail.decide_literal(p);
        trail.decide_literal(q);

        assert_eq!(trail.decision_level(), 2);
        assert_eq!(trail.size_at(0), 2);
        assert_eq!(trail.size_at(1), 3);
        assert!(trail.is_true(p));
        assert!(trail.is_true(q));
        assert_eq!(trail.variable_decision_level(boolean(3)), 2);

        let unset = trail.pop_to(0, &mut farm);
        assert_eq!(unset, vec![boolean(3), boolean(2)]);
        assert_eq!(trail.decision_level(), 0);
        assert!(!trail.has_value(boolean(2)));
    }

    #[test]
    fn semantic_propagation_is_idempotent() {
        let mut trail = fresh_trail();
        let p = Literal::new(boolean(2), false);
        trail.semantic_propagate(p);
        let size = trail.size();
        trail.semantic_propagate(p);
        assert_eq!(trail.size(), size);
    }

    #[test]
    fn clausal_propagation_records_reason_and_conflicts() {
        let mut trail = fresh_trail();
        let p = Literal::new(boolean(2), false);
        let (mut farm, reason) = farm_with_clause(&[p]);

        trail.clausal_propagate(p, reason, &mut farm);
        assert!(trail.is_true(p));
        assert!(trail.has_reason(p));
        assert_eq!(trail.reason(p, &mut farm), reason);
        assert!(farm.clause(reason).in_use());

        // Propagating the negation is a conflict, recorded but not applied.
        let not_p_reason = farm.database_mut(0).new_clause(&[!p], 0, 0);
        trail.decide_literal(Literal::new(boolean(3), false));
        let size = trail.size();
        trail.clausal_propagate(!p, not_p_reason, &mut farm);
        assert_eq!(trail.size(), size);
        assert!(!trail.consistent());
        assert_eq!(trail.inconsistent_propagations().len(), 1);

        // Popping clears the inconsistency and releases the reason.
        let _ = trail.pop_to(0, &mut farm);
        assert!(trail.consistent());
        assert!(trail.is_true(p));
    }

    #[test]
    fn popping_releases_reason_clauses() {
        let mut trail = fresh_trail();
        let p = Literal::new(boolean(2), false);
        let (mut farm, reason) = farm_with_clause(&[p]);

        trail.decide_literal(Literal::new(boolean(3), false));
        trail.clausal_propagate(p, reason, &mut farm);
        assert_eq!(farm.clause(reason).ref_count(), 2);

        let _ = trail.pop_to(0, &mut farm);
        assert_eq!(farm.clause(reason).ref_count(), 1);
        assert!(!trail.has_reason(p));
    }

    #[test]
    fn lazy_reasons_materialise_once() {
        #[derive(Debug)]
        struct Fixed {
            cref: ClauseRef,
            calls: usize,
        }
        impl ReasonProvider for Fixed {
            fn explain(&mut self, _literal: Literal, _farm: &mut ClauseFarm) -> ClauseRef {
                self.calls += 1;
                assert_eq!(self.calls, 1, "provider ran more than once");
                self.cref
            }
        }

        let mut trail = fresh_trail();
        let p = Literal::new(boolean(2), false);
        let (mut farm, cref) = farm_with_clause(&[p]);

        trail.clausal_propagate_lazy(p, Box::new(Fixed { cref, calls: 0 }));
        assert!(trail.has_reason(p));
        assert_eq!(trail.reason(p, &mut farm), cref);
        assert_eq!(trail.reason(p, &mut farm), cref);
    }

    #[test]
    fn semantic_propagation_at_lower_level_keeps_that_level() {
        let mut trail = fresh_trail();
        trail.decide_literal(Literal::new(boolean(2), false));
        trail.decide_literal(Literal::new(boolean(3), false));

        let r = Literal::new(boolean(4), true);
        trail.semantic_propagate_at(r, 1);
        assert_eq!(trail.variable_decision_level(boolean(4)), 1);
        // The element itself still sits in the level-2 region of the trail.
        assert!(trail.trail_index(boolean(4)) >= trail.size_at(1));
    }
}
