//! Boolean constraint propagation: two-watched-literal unit propagation over
//! the Boolean part of the trail, the Boolean decision heuristic, and the
//! Luby restart schedule.

use fnv::FnvHashSet;
use log::debug;
use log::trace;

use super::DecisionToken;
use super::PluginContext;
use super::PropagationToken;
use super::SolverRequests;
use crate::engine::backtrack::Cd;
use crate::engine::clauses::ClauseFarm;
use crate::engine::clauses::ClauseRef;
use crate::engine::clauses::ClauseRelocation;
use crate::engine::clauses::Literal;
use crate::engine::priority_queue::VariablePriorityQueue;
use crate::engine::solver::SolverOptions;
use crate::engine::trail::Trail;
use crate::engine::variables::Variable;
use crate::engine::watch_lists::WatchLists;
use crate::sable_assert_moderate;

/// The Luby sequence `1, 1, 2, 1, 1, 2, 4, ...` (0-indexed).
pub(crate) fn luby(index: u64) -> u64 {
    let mut size = 1_u64;
    let mut sequence = 0_u32;
    while size < index + 1 {
        size = 2 * size + 1;
        sequence += 1;
    }
    let mut index = index;
    while size - 1 != index {
        size = (size - 1) / 2;
        sequence -= 1;
        index %= size;
    }
    1_u64 << sequence
}

#[derive(Debug)]
pub(crate) struct BcpEngine {
    /// Clause references watched per literal index.
    watch_manager: WatchLists<ClauseRef>,
    /// Unit clauses discovered at creation, propagated at the next yield.
    delayed_propagations: Vec<ClauseRef>,
    /// How far into the trail this plugin has propagated.
    trail_head: Cd<usize>,
    /// Last seen polarity per Boolean variable, for phase saving.
    variable_values: Vec<bool>,
    queue: VariablePriorityQueue,

    attach_limit: usize,
    restart_init: u64,
    restart_base: f64,
    var_heuristic: bool,
    phase_heuristic: bool,

    restarts_count: u64,
    conflicts_count: u64,
    conflicts_limit: u64,
}

impl BcpEngine {
    pub(crate) fn new(options: &SolverOptions) -> BcpEngine {
        BcpEngine {
            watch_manager: WatchLists::default(),
            delayed_propagations: Vec::new(),
            trail_head: Cd::new(0),
            variable_values: Vec::new(),
            queue: VariablePriorityQueue::new(1.0, 0.95),
            attach_limit: options.bcp_attach_limit,
            restart_init: options.bcp_restart_init,
            restart_base: options.bcp_restart_base,
            var_heuristic: options.bcp_var_heuristic,
            phase_heuristic: options.bcp_value_phase_heuristic,
            restarts_count: 0,
            conflicts_count: 0,
            conflicts_limit: options.bcp_restart_init,
        }
    }

    pub(crate) fn on_new_variable(&mut self, var: Variable) {
        if !var.is_boolean() {
            return;
        }
        if self.variable_values.len() <= var.index() {
            self.variable_values.resize(var.index() + 1, false);
        }
        self.queue.new_entry(var.index());
    }

    /// Order for the literals of a freshly created clause: unassigned first;
    /// among assigned, true before false; ties by later trail index first.
    fn clause_order(trail: &Trail, l1: Literal, l2: Literal) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (trail.value(l1), trail.value(l2)) {
            (None, None) => l1.index().cmp(&l2.index()),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(v1), Some(v2)) => {
                if v1 == v2 {
                    let i1 = trail.trail_index(l1.variable());
                    let i2 = trail.trail_index(l2.variable());
                    i2.cmp(&i1).then(l1.index().cmp(&l2.index()))
                } else if v1 {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
        }
    }

    pub(crate) fn on_new_clause(
        &mut self,
        cref: ClauseRef,
        trail: &Trail,
        ctx: &mut PluginContext<'_>,
    ) {
        trace!("bcp: new clause {}", ctx.farm.clause(cref));

        let len = ctx.farm.clause(cref).len();
        if len == 1 {
            if trail.decision_level() > 0 {
                ctx.requests.request_backtrack(0, cref);
            } else {
                self.delayed_propagations.push(cref);
            }
            return;
        }

        ctx.farm
            .clause_mut(cref)
            .sort_literals_by(|l1, l2| Self::clause_order(trail, l1, l2));

        if self.attach_limit == 0 || len <= self.attach_limit {
            let first = ctx.farm.clause(cref).literal(0);
            let second = ctx.farm.clause(cref).literal(1);
            self.watch_manager.add((!first).index(), cref);
            self.watch_manager.add((!second).index(), cref);
        }

        // With the second literal false the clause is unit (or conflicting)
        // at the level that literal was assigned.
        let second = ctx.farm.clause(cref).literal(1);
        if trail.is_false(second) {
            let propagation_level = trail.variable_decision_level(second.variable());
            if propagation_level < trail.decision_level() {
                ctx.requests.request_backtrack(propagation_level, cref);
            } else {
                self.delayed_propagations.push(cref);
            }
        }
    }

    pub(crate) fn propagate(
        &mut self,
        token: &mut PropagationToken<'_>,
        ctx: &mut PluginContext<'_>,
    ) {
        for cref in std::mem::take(&mut self.delayed_propagations) {
            let first = ctx.farm.clause(cref).literal(0);
            token.clausal_propagate(first, cref, ctx.farm);
        }

        let farm: &ClauseFarm = ctx.farm;
        self.watch_manager.clean(|cref| farm.clause(cref).in_use());

        let mut position = self.trail_head.get_copied();
        while token.trail().consistent() && position < token.trail().size() {
            let var = token.trail().element(position).var;
            position += 1;
            if !var.is_boolean() {
                continue;
            }

            let value = token
                .trail()
                .value_of(var)
                .and_then(crate::basic_types::Value::as_boolean)
                .expect("trail entries are assigned");
            self.variable_values[var.index()] = value;

            // The literal that became true, and its falsified negation
            // which the watch lists key on.
            let lit = Literal::new(var, !value);
            let lit_neg = !lit;
            trace!("bcp: propagating on {lit}");

            let mut watches = self.watch_manager.detach(lit.index());
            while token.trail().consistent() && !watches.done() {
                let cref = watches.current();

                if !ctx.farm.clause(cref).in_use() {
                    // The clause's other watch entry is stale too; have the
                    // next cleanup purge it.
                    let clause = ctx.farm.clause(cref);
                    self.watch_manager
                        .mark_for_cleanup((!clause.literal(0)).index());
                    self.watch_manager
                        .mark_for_cleanup((!clause.literal(1)).index());
                    watches.next_and_remove();
                    continue;
                }

                if ctx.farm.clause(cref).literal(0) == lit_neg {
                    ctx.farm.clause_mut(cref).swap_literals(0, 1);
                }

                let first = ctx.farm.clause(cref).literal(0);
                if token.trail().is_true(first) {
                    watches.next_and_keep();
                    continue;
                }

                let len = ctx.farm.clause(cref).len();
                let mut watch_found = false;
                for j in 2..len {
                    let candidate = ctx.farm.clause(cref).literal(j);
                    if !token.trail().is_false(candidate) {
                        ctx.farm.clause_mut(cref).swap_literals(1, j);
                        self.watch_manager.add((!candidate).index(), cref);
                        watches.next_and_remove();
                        watch_found = true;
                        break;
                    }
                }

                if !watch_found {
                    // All other literals are false: the first one propagates.
                    token.clausal_propagate(first, cref, ctx.farm);
                    watches.next_and_keep();
                }
            }
            self.watch_manager.reattach(watches);
        }

        self.trail_head.set(token.trail().decision_level(), position);
    }

    pub(crate) fn decide(&mut self, token: &mut DecisionToken<'_>) {
        sable_assert_moderate!(self.delayed_propagations.is_empty());
        while !self.queue.is_empty() {
            let index = self.queue.pop();
            let var = Variable::new(crate::engine::variables::BOOLEAN_TYPE_INDEX, index);
            if token.trail().has_value(var) {
                continue;
            }

            let negated = if self.phase_heuristic {
                !self.variable_values[index]
            } else {
                true
            };
            token.decide_literal(Literal::new(var, negated));
            return;
        }
    }

    pub(crate) fn notify_conflict(&mut self, requests: &mut SolverRequests) {
        self.conflicts_count += 1;
        if self.conflicts_count >= self.conflicts_limit {
            debug!(
                "bcp: restart requested after {} conflicts",
                self.conflicts_count
            );
            requests.request_restart();
        }
    }

    pub(crate) fn notify_conflict_resolution(&mut self, cref: ClauseRef, farm: &ClauseFarm) {
        if !self.var_heuristic {
            return;
        }
        for literal in farm.clause(cref).literals() {
            self.queue.bump(literal.variable().index(), 1.0);
        }
    }

    pub(crate) fn notify_variable_unset(&mut self, vars: &[Variable], trail: &Trail) {
        self.trail_head.backtrack(trail.decision_level());
        for var in vars {
            if var.is_boolean() {
                self.queue.enqueue(var.index());
            }
        }
    }

    pub(crate) fn notify_restart(&mut self) {
        self.restarts_count += 1;
        self.conflicts_count = 0;
        self.conflicts_limit = (self.restart_init as f64
            * self.restart_base.powi(luby(self.restarts_count - 1) as i32))
            as u64;
        debug!(
            "bcp: restart {}, next limit {} conflicts",
            self.restarts_count, self.conflicts_limit
        );
    }

    pub(crate) fn gc_mark(&self, keep: &mut FnvHashSet<ClauseRef>) {
        keep.extend(self.delayed_propagations.iter().copied());
    }

    pub(crate) fn relocate(&mut self, relocation: &ClauseRelocation) {
        self.watch_manager
            .relocate(|cref| relocation.relocate(cref));
        self.delayed_propagations
            .retain_mut(|cref| match relocation.relocate(*cref) {
                Some(new_ref) => {
                    *cref = new_ref;
                    true
                }
                None => false,
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luby_matches_the_reference_table() {
        let expected = [1, 1, 2, 1, 1, 2, 4, 1, 1, 2, 1, 1, 2, 4, 8];
        let actual: Vec<u64> = (0..expected.len() as u64).map(luby).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn luby_larger_entries() {
        // The sequence value at the end of each full subsequence is a power
        // of two.
        assert_eq!(luby(30), 16);
        assert_eq!(luby(62), 32);
    }
}
