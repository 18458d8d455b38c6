//! The clausal-conversion plugin: turns asserted terms into input clauses.
//! Atoms map to variables from the database; Boolean structure is converted
//! clausally, introducing a definition variable per conjunction or
//! disjunction that occurs below another connective.

use fnv::FnvHashMap;
use fnv::FnvHashSet;
use log::debug;

use super::PluginContext;
use crate::engine::clauses::ClauseFarm;
use crate::engine::clauses::ClauseRef;
use crate::engine::clauses::ClauseRelocation;
use crate::engine::clauses::Literal;
use crate::engine::rules::InputClauseRule;
use crate::engine::trail::Trail;
use crate::terms::Sort;
use crate::terms::Term;
use crate::terms::TermData;

#[derive(Debug)]
pub(crate) struct CnfPlugin {
    input_rule: InputClauseRule,
    /// Positive literal per already-converted term.
    literals: FnvHashMap<Term, Literal>,
    /// The clauses produced from conversions, kept alive.
    converted: Vec<ClauseRef>,
}

impl CnfPlugin {
    pub(crate) fn new(farm: &mut ClauseFarm, input_database: usize) -> CnfPlugin {
        CnfPlugin {
            input_rule: InputClauseRule::new(farm, input_database),
            literals: FnvHashMap::default(),
            converted: Vec::new(),
        }
    }

    pub(crate) fn notify_assertion(
        &mut self,
        assertion: Term,
        trail: &Trail,
        ctx: &mut PluginContext<'_>,
    ) {
        debug!("cnf: converting assertion {assertion:?}");
        self.convert(assertion, false, trail, ctx);
    }

    fn emit(&mut self, literals: Vec<Literal>, trail: &Trail, ctx: &mut PluginContext<'_>) {
        if let Some(cref) = self.input_rule.apply(literals, trail, ctx.farm) {
            self.converted.push(cref);
        }
    }

    /// Convert an asserted (sub)term, distributing over the top-level
    /// Boolean structure.
    fn convert(&mut self, term: Term, negated: bool, trail: &Trail, ctx: &mut PluginContext<'_>) {
        let data = ctx.terms.data(term).clone();
        match data {
            TermData::Not(inner) => self.convert(inner, !negated, trail, ctx),
            TermData::And(parts) => {
                if negated {
                    let literals = parts
                        .iter()
                        .map(|part| !self.literal_of(*part, trail, ctx))
                        .collect();
                    self.emit(literals, trail, ctx);
                } else {
                    for part in parts {
                        self.convert(part, false, trail, ctx);
                    }
                }
            }
            TermData::Or(parts) => {
                if negated {
                    for part in parts {
                        self.convert(part, true, trail, ctx);
                    }
                } else {
                    let literals = parts
                        .iter()
                        .map(|part| self.literal_of(*part, trail, ctx))
                        .collect();
                    self.emit(literals, trail, ctx);
                }
            }
            TermData::True => {
                if negated {
                    self.emit(Vec::new(), trail, ctx);
                }
            }
            TermData::False => {
                if !negated {
                    self.emit(Vec::new(), trail, ctx);
                }
            }
            _ => {
                let literal = self.literal_of(term, trail, ctx);
                let literal = if negated { !literal } else { literal };
                self.emit(vec![literal], trail, ctx);
            }
        }
    }

    /// The literal of a term, introducing definition clauses for nested
    /// connectives.
    fn literal_of(&mut self, term: Term, trail: &Trail, ctx: &mut PluginContext<'_>) -> Literal {
        if let Some(literal) = self.literals.get(&term) {
            return *literal;
        }

        let data = ctx.terms.data(term).clone();
        let literal = match data {
            TermData::Not(inner) => !self.literal_of(inner, trail, ctx),
            TermData::True => Literal::new(trail.true_variable(), false),
            TermData::False => Literal::new(trail.false_variable(), false),
            TermData::And(parts) => {
                let part_literals: Vec<Literal> = parts
                    .iter()
                    .map(|part| self.literal_of(*part, trail, ctx))
                    .collect();
                let var = ctx
                    .variables
                    .variable(term, Sort::Bool, trail.decision_level());
                let definition = Literal::new(var, false);

                for part in &part_literals {
                    self.emit(vec![!definition, *part], trail, ctx);
                }
                let mut back: Vec<Literal> =
                    part_literals.iter().map(|part| !*part).collect();
                back.push(definition);
                self.emit(back, trail, ctx);

                definition
            }
            TermData::Or(parts) => {
                let part_literals: Vec<Literal> = parts
                    .iter()
                    .map(|part| self.literal_of(*part, trail, ctx))
                    .collect();
                let var = ctx
                    .variables
                    .variable(term, Sort::Bool, trail.decision_level());
                let definition = Literal::new(var, false);

                let mut forward = vec![!definition];
                forward.extend(part_literals.iter().copied());
                self.emit(forward, trail, ctx);
                for part in &part_literals {
                    self.emit(vec![definition, !*part], trail, ctx);
                }

                definition
            }
            _ => {
                // An atom: a Boolean variable or a theory relation.
                let var = ctx
                    .variables
                    .variable(term, Sort::Bool, trail.decision_level());
                Literal::new(var, false)
            }
        };

        let _ = self.literals.insert(term, literal);
        literal
    }

    pub(crate) fn gc_mark(&self, keep: &mut FnvHashSet<ClauseRef>) {
        keep.extend(self.converted.iter().copied());
    }

    pub(crate) fn relocate(&mut self, relocation: &ClauseRelocation) {
        for cref in &mut self.converted {
            *cref = relocation
                .relocate(*cref)
                .expect("input clauses are always kept");
        }
    }
}
