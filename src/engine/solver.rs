//! The solver core: plugin registration and dispatch, the search loop,
//! request handling, first-UIP conflict analysis and learnt-clause
//! management.

use fnv::FnvHashMap;
use fnv::FnvHashSet;
use log::debug;
use log::info;
use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::basic_types::ConstraintOperationError;
use crate::basic_types::SatResult;
use crate::basic_types::Value;
use crate::engine::clauses::ClauseFarm;
use crate::engine::clauses::ClauseRef;
use crate::engine::clauses::Literal;
use crate::engine::rules::BooleanResolutionRule;
use crate::engine::trail::InconsistentPropagation;
use crate::engine::trail::Trail;
use crate::engine::variables::Variable;
use crate::engine::variables::VariableDatabase;
use crate::plugins::DecisionToken;
use crate::plugins::PluginContext;
use crate::plugins::PluginFeature;
use crate::plugins::PluginNotification;
use crate::plugins::PropagationMode;
use crate::plugins::PropagationToken;
use crate::plugins::SolverPlugin;
use crate::plugins::SolverRequests;
use crate::sable_assert_moderate;
use crate::sable_assert_simple;
use crate::terms::Sort;
use crate::terms::Term;
use crate::terms::TermData;
use crate::terms::TermDatabase;

const LEARNT_SCORE_RESCALE_LIMIT: f64 = 1e20;
const LEARNT_SCORE_RESCALE_FACTOR: f64 = 1e-20;
/// Fraction of a clause arena that may be wasted before a restart triggers a
/// compacting collection.
const GC_WASTE_THRESHOLD: f64 = 0.25;

/// Options of the [`Solver`], read at construction.
#[derive(Debug)]
pub struct SolverOptions {
    /// Maximum clause size for which the BCP engine attaches watches;
    /// 0 means no limit.
    pub bcp_attach_limit: usize,
    /// Initial Luby restart multiplier, in conflicts.
    pub bcp_restart_init: u64,
    /// Base of the Luby restart schedule.
    pub bcp_restart_base: f64,
    /// Activity-based Boolean variable selection.
    pub bcp_var_heuristic: bool,
    /// Phase saving for Boolean decisions.
    pub bcp_value_phase_heuristic: bool,
    /// Activity increment for arithmetic variables.
    pub fm_bump: f64,
    /// Cascaded Fourier-Motzkin chaining past the first conflict.
    pub fm_cascade: bool,
    /// Prefer deciding arithmetic variables that are already fixed by their
    /// bounds.
    pub fm_decide_fixed: bool,
    /// Probability of a random pick from the arithmetic variable queue.
    pub fm_random_select: f64,
    /// Number of learnt clauses tolerated before a restart shrinks the
    /// learnt database.
    pub learnt_clause_limit: usize,
    /// Seeded generator driving all randomised heuristics.
    pub random_generator: SmallRng,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            bcp_attach_limit: 0,
            bcp_restart_init: 100,
            bcp_restart_base: 2.0,
            bcp_var_heuristic: true,
            bcp_value_phase_heuristic: true,
            fm_bump: 1.0,
            fm_cascade: false,
            fm_decide_fixed: true,
            fm_random_select: 0.0,
            learnt_clause_limit: 1000,
            random_generator: SmallRng::seed_from_u64(42),
        }
    }
}

/// Counters updated during the search.
#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    conflicts: u64,
    decisions: u64,
    restarts: u64,
}

impl Counters {
    fn log_statistics(&self) {
        info!("numberOfConflicts={}", self.conflicts);
        info!("numberOfDecisions={}", self.decisions);
        info!("numberOfRestarts={}", self.restarts);
    }
}

/// An MCSAT solver instance over one set of assertions.
#[derive(Debug)]
pub struct Solver {
    options: SolverOptions,
    terms: TermDatabase,
    variables: VariableDatabase,
    farm: ClauseFarm,
    input_database: usize,
    derived_database: usize,
    trail: Trail,
    /// Boolean resolution for conflict analysis.
    resolution_rule: BooleanResolutionRule,

    plugins: Vec<SolverPlugin>,
    /// Dispatch tables, by feature, in registration order.
    propagate_order: Vec<usize>,
    decide_order: Vec<usize>,

    requests: SolverRequests,

    learnt_clauses: Vec<ClauseRef>,
    learnt_scores: FnvHashMap<ClauseRef, f64>,
    learnt_score_max: f64,
    learnt_score_increase: f64,

    assertions: Vec<Term>,
    counters: Counters,
    infeasible: bool,
}

impl Default for Solver {
    fn default() -> Self {
        Solver::new(SolverOptions::default())
    }
}

impl Solver {
    /// Create a solver with the three standard plugins installed: clausal
    /// conversion, Boolean constraint propagation, and linear arithmetic.
    pub fn new(options: SolverOptions) -> Solver {
        let mut terms = TermDatabase::default();
        let mut variables = VariableDatabase::default();
        let mut farm = ClauseFarm::default();
        let input_database = farm.new_database("input_clauses");
        let derived_database = farm.new_database("derived_clauses");
        let resolution_rule = BooleanResolutionRule::new(&mut farm, derived_database);

        let true_term = terms.true_term();
        let false_term = terms.false_term();
        let true_var = variables.variable(true_term, Sort::Bool, 0);
        let false_var = variables.variable(false_term, Sort::Bool, 0);
        let mut trail = Trail::new(true_var, false_var);
        trail.assert_initial_truths();

        let mut solver = Solver {
            options,
            terms,
            variables,
            farm,
            input_database,
            derived_database,
            trail,
            resolution_rule,
            plugins: Vec::new(),
            propagate_order: Vec::new(),
            decide_order: Vec::new(),
            requests: SolverRequests::default(),
            learnt_clauses: Vec::new(),
            learnt_scores: FnvHashMap::default(),
            learnt_score_max: 1.0,
            learnt_score_increase: 1.0,
            assertions: Vec::new(),
            counters: Counters::default(),
            infeasible: false,
        };

        for id in ["CNFPlugin", "BCPEngine", "FMPlugin"] {
            solver
                .add_plugin(id)
                .expect("the standard plugins always install");
        }
        solver
    }

    /// Install a plugin by its registered id.
    pub fn add_plugin(&mut self, id: &str) -> Result<(), ConstraintOperationError> {
        if self.plugins.iter().any(|plugin| plugin.name() == id) {
            return Err(ConstraintOperationError::DuplicatePlugin(id.to_owned()));
        }
        let plugin = SolverPlugin::from_id(
            id,
            &self.options,
            &mut self.farm,
            self.input_database,
            self.derived_database,
            &mut self.variables,
        )?;

        let index = self.plugins.len();
        let features = plugin.features();
        if features.contains(PluginFeature::Propagate) {
            self.propagate_order.push(index);
        }
        if features.contains(PluginFeature::DecideBoolean)
            || features.contains(PluginFeature::DecideValues)
        {
            self.decide_order.push(index);
        }
        info!("solver: added plugin {}", plugin.name());
        self.plugins.push(plugin);
        Ok(())
    }

    /// Term construction interface of this solver.
    pub fn terms_mut(&mut self) -> &mut TermDatabase {
        &mut self.terms
    }

    /// The model value of a term after a `Sat` answer, if assigned.
    pub fn value(&self, term: Term) -> Option<Value> {
        let var = self.variables.variable_of(term)?;
        self.trail.value_of(var).cloned()
    }

    /// Add one assertion. With `process` set, a single init-mode propagation
    /// pass runs immediately.
    pub fn add_assertion(&mut self, assertion: Term, process: bool) {
        if self.infeasible {
            return;
        }
        debug!("solver: add assertion {assertion:?}");
        self.assertions.push(assertion);
        self.register_variables(assertion);

        for index in 0..self.plugins.len() {
            if !self.plugins[index]
                .notifications()
                .contains(PluginNotification::Assertion)
            {
                continue;
            }
            let Solver {
                plugins,
                terms,
                variables,
                farm,
                requests,
                options,
                trail,
                ..
            } = self;
            plugins[index].notify_assertion(
                assertion,
                trail,
                &mut PluginContext {
                    terms,
                    variables,
                    farm,
                    requests,
                    rng: &mut options.random_generator,
                },
            );
        }
        self.dispatch_notifications();

        if process {
            self.propagate(PropagationMode::Init);
        }
    }

    /// Register every free variable occurring in the assertion.
    fn register_variables(&mut self, assertion: Term) {
        let mut visited: FnvHashSet<Term> = FnvHashSet::default();
        let mut pending = vec![assertion];
        while let Some(term) = pending.pop() {
            if !visited.insert(term) {
                continue;
            }
            match self.terms.data(term) {
                TermData::Variable(sort, _) => {
                    let sort = *sort;
                    let _ = self
                        .variables
                        .variable(term, sort, self.trail.decision_level());
                }
                TermData::Plus(parts) | TermData::And(parts) | TermData::Or(parts) => {
                    pending.extend(parts.iter().copied());
                }
                TermData::Minus(lhs, rhs)
                | TermData::Gt(lhs, rhs)
                | TermData::Geq(lhs, rhs)
                | TermData::Lt(lhs, rhs)
                | TermData::Leq(lhs, rhs)
                | TermData::Equal(lhs, rhs) => {
                    pending.push(*lhs);
                    pending.push(*rhs);
                }
                TermData::UnaryMinus(inner)
                | TermData::Mult(_, inner)
                | TermData::Not(inner) => pending.push(*inner),
                TermData::True | TermData::False | TermData::Constant(_) => {}
            }
        }
    }

    /// Decide satisfiability of the asserted constraints.
    pub fn check(&mut self) -> SatResult {
        if self.infeasible {
            return SatResult::Unsat;
        }
        debug!("solver: check()");

        loop {
            self.process_requests();

            self.propagate(PropagationMode::Normal);

            if !self.trail.consistent() {
                self.counters.conflicts += 1;
                self.notify_conflict();

                if self.trail.decision_level() == 0 {
                    self.infeasible = true;
                    self.counters.log_statistics();
                    return SatResult::Unsat;
                }

                self.analyze_conflicts();
                // Let the propagation engine see the learnt clauses; it will
                // request the backtrack that satisfies them.
                self.dispatch_notifications();
                continue;
            }

            if self.requests.any() {
                continue;
            }

            if self.dispatch_decide() {
                self.counters.decisions += 1;
            } else {
                // No plugin wants to decide: everything is assigned. One
                // complete pass to be sure, then we have a model.
                self.propagate(PropagationMode::Complete);
                if !self.trail.consistent() || self.requests.any() {
                    continue;
                }
                self.log_model();
                self.counters.log_statistics();
                return SatResult::Sat;
            }
        }
    }

    fn log_model(&self) {
        if log::log_enabled!(log::Level::Debug) {
            for assertion in &self.assertions {
                debug!("model: assertion {assertion:?}");
            }
            for index in 0..self.trail.size() {
                let var = self.trail.element(index).var;
                if let Some(value) = self.trail.value_of(var) {
                    debug!("model: {var} -> {value}");
                }
            }
        }
    }

    /// Deliver pending new-variable and new-clause notifications to the
    /// plugins, in creation order, until none remain.
    fn dispatch_notifications(&mut self) {
        loop {
            let level = self.trail.decision_level();
            let new_vars = self.variables.drain_new();
            // The replayed stream has no context-dependent consumer among
            // the installed plugins, but its cursor must track level
            // changes.
            let _ = self.variables.drain_new_replayed(level);
            let new_clauses = self.farm.drain_new();
            let _ = self.farm.drain_new_replayed(level);

            if new_vars.is_empty() && new_clauses.is_empty() {
                break;
            }

            for var in new_vars {
                for index in 0..self.plugins.len() {
                    let Solver {
                        plugins,
                        terms,
                        variables,
                        farm,
                        requests,
                        options,
                        trail,
                        ..
                    } = self;
                    plugins[index].on_new_variable(
                        var,
                        trail,
                        &mut PluginContext {
                            terms,
                            variables,
                            farm,
                            requests,
                            rng: &mut options.random_generator,
                        },
                    );
                }
            }
            for cref in new_clauses {
                for index in 0..self.plugins.len() {
                    let Solver {
                        plugins,
                        terms,
                        variables,
                        farm,
                        requests,
                        options,
                        trail,
                        ..
                    } = self;
                    plugins[index].on_new_clause(
                        cref,
                        trail,
                        &mut PluginContext {
                            terms,
                            variables,
                            farm,
                            requests,
                            rng: &mut options.random_generator,
                        },
                    );
                }
            }
        }
    }

    /// Run all propagating plugins to a fixpoint in the given mode.
    fn propagate(&mut self, mode: PropagationMode) {
        loop {
            self.dispatch_notifications();
            if !self.trail.consistent() {
                return;
            }

            let mut used = false;
            for position in 0..self.propagate_order.len() {
                let index = self.propagate_order[position];
                let Solver {
                    plugins,
                    terms,
                    variables,
                    farm,
                    requests,
                    options,
                    trail,
                    ..
                } = self;
                let mut token = PropagationToken::new(trail, mode);
                plugins[index].propagate(
                    &mut token,
                    &mut PluginContext {
                        terms,
                        variables,
                        farm,
                        requests,
                        rng: &mut options.random_generator,
                    },
                );
                used |= token.used();
                if !self.trail.consistent() {
                    return;
                }
            }

            if !used && !self.variables.has_pending() && !self.farm.has_pending() {
                return;
            }
        }
    }

    /// Offer the decision token to the deciding plugins in registration
    /// order; returns whether anyone took it.
    fn dispatch_decide(&mut self) -> bool {
        let mut used = false;
        for position in 0..self.decide_order.len() {
            let index = self.decide_order[position];
            let Solver {
                plugins,
                terms,
                variables,
                farm,
                requests,
                options,
                trail,
                ..
            } = self;
            let mut token = DecisionToken::new(trail);
            plugins[index].decide(
                &mut token,
                &mut PluginContext {
                    terms,
                    variables,
                    farm,
                    requests,
                    rng: &mut options.random_generator,
                },
            );
            if token.used() {
                used = true;
                break;
            }
        }
        used
    }

    /// Serve pending backtrack and restart requests: pop the trail, notify
    /// the plugins of the unset variables, and re-assert the clauses that
    /// motivated the backtrack.
    fn process_requests(&mut self) {
        if let Some((level, clauses)) = self.requests.take_backtrack() {
            sable_assert_moderate!(level <= self.trail.decision_level());
            debug!("solver: backtracking to level {level}");
            let unset = self.trail.pop_to(level, &mut self.farm);
            self.variables.backtrack(level);
            self.farm.backtrack(level);
            if !unset.is_empty() {
                self.notify_variable_unset(&unset);
            }

            for cref in clauses {
                let first = self.farm.clause(cref).literal(0);
                self.trail.clausal_propagate(first, cref, &mut self.farm);
            }
        }

        if self.requests.take_restart() {
            self.counters.restarts += 1;
            info!("solver: restarting after {} conflicts", self.counters.conflicts);
            let unset = self.trail.pop_to(0, &mut self.farm);
            self.variables.backtrack(0);
            self.farm.backtrack(0);
            if !unset.is_empty() {
                self.notify_variable_unset(&unset);
            }
            for index in 0..self.plugins.len() {
                if self.plugins[index]
                    .notifications()
                    .contains(PluginNotification::Restart)
                {
                    self.plugins[index].notify_restart();
                }
            }

            if self.learnt_clauses.len() > self.options.learnt_clause_limit {
                self.shrink_learnts();
            }
            self.collect_garbage();
        }

        self.requests.clear_served();
    }

    fn notify_variable_unset(&mut self, unset: &[Variable]) {
        for index in 0..self.plugins.len() {
            if !self.plugins[index]
                .notifications()
                .contains(PluginNotification::VariableUnset)
            {
                continue;
            }
            let Solver {
                plugins,
                terms,
                variables,
                farm,
                requests,
                options,
                trail,
                ..
            } = self;
            plugins[index].notify_variable_unset(
                unset,
                trail,
                &mut PluginContext {
                    terms,
                    variables,
                    farm,
                    requests,
                    rng: &mut options.random_generator,
                },
            );
        }
    }

    fn notify_conflict(&mut self) {
        for index in 0..self.plugins.len() {
            if self.plugins[index]
                .notifications()
                .contains(PluginNotification::Conflict)
            {
                self.plugins[index].notify_conflict(&mut self.requests);
            }
        }
    }

    fn notify_conflict_resolution(&mut self, cref: ClauseRef) {
        for index in 0..self.plugins.len() {
            if self.plugins[index]
                .notifications()
                .contains(PluginNotification::ConflictResolution)
            {
                self.plugins[index].notify_conflict_resolution(cref, &self.farm);
            }
        }
    }

    /// First-UIP Boolean conflict analysis over every recorded inconsistent
    /// propagation; each analysis commits one learnt clause.
    fn analyze_conflicts(&mut self) {
        let conflicts: Vec<InconsistentPropagation> =
            self.trail.inconsistent_propagations().to_vec();
        sable_assert_simple!(!conflicts.is_empty());

        for conflict in conflicts {
            let conflicting = conflict.reason;
            debug!(
                "solver: analyzing conflict {}",
                self.farm.clause(conflicting)
            );

            if self.learnt_scores.contains_key(&conflicting) {
                self.bump_clause(conflicting);
            }

            // The level at which the clause is falsified.
            let conflict_level = self
                .farm
                .clause(conflicting)
                .literals()
                .map(|literal| self.trail.variable_decision_level(literal.variable()))
                .max()
                .expect("clauses are never empty");
            sable_assert_simple!(conflict_level >= 1, "level-0 conflicts end the search earlier");

            self.resolution_rule.start(conflicting, &self.farm);
            self.notify_conflict_resolution(conflicting);

            // Variables of the conflict level already in the resolvent, and
            // the subset that can be resolved out through a clausal reason.
            let mut vars_seen: FnvHashSet<Variable> = FnvHashSet::default();
            let mut vars_with_reason: FnvHashSet<Variable> = FnvHashSet::default();
            let mut vars_at_conflict_level = 0_usize;

            let literals: Vec<Literal> = self.farm.clause(conflicting).literals().collect();
            for literal in literals {
                let var = literal.variable();
                if self.trail.variable_decision_level(var) == conflict_level
                    && vars_seen.insert(var)
                {
                    vars_at_conflict_level += 1;
                    if self.trail.has_reason(!literal) {
                        let _ = vars_with_reason.insert(var);
                    }
                }
            }

            let mut index = self.trail.size_at(conflict_level) - 1;
            while !self.trail.element(index).kind.is_decision() && vars_at_conflict_level > 1 {
                // Skip trail entries that cannot be resolved.
                while index > 0
                    && !self.trail.element(index).kind.is_decision()
                    && !vars_with_reason.contains(&self.trail.element(index).var)
                {
                    index -= 1;
                }

                // Hitting the decision means either a UIP or a semantic
                // decision blocking further Boolean resolution.
                if self.trail.element(index).kind.is_decision() {
                    break;
                }

                let var = self.trail.element(index).var;
                let literal = Literal::new(var, self.trail.is_false(Literal::new(var, false)));
                let reason = self.trail.reason(literal, &mut self.farm);

                // Propagations keep their propagated literal first.
                sable_assert_moderate!(self.farm.clause(reason).literal(0) == literal);
                self.resolution_rule.resolve(reason, 0, &self.farm);
                self.notify_conflict_resolution(reason);
                vars_at_conflict_level -= 1;

                let reason_literals: Vec<Literal> =
                    self.farm.clause(reason).literals().skip(1).collect();
                for reason_literal in reason_literals {
                    let reason_var = reason_literal.variable();
                    if self.trail.variable_decision_level(reason_var) == conflict_level
                        && vars_seen.insert(reason_var)
                    {
                        vars_at_conflict_level += 1;
                        if self.trail.has_reason(!reason_literal) {
                            let _ = vars_with_reason.insert(reason_var);
                        }
                    }
                }

                if index == 0 {
                    break;
                }
                index -= 1;
            }

            let resolvent = self.resolution_rule.finish(&self.trail, &mut self.farm);
            debug!("solver: learnt {}", self.farm.clause(resolvent));
            self.learnt_clauses.push(resolvent);
            let _ = self.learnt_scores.insert(resolvent, self.learnt_score_max);
        }
    }

    fn bump_clause(&mut self, cref: ClauseRef) {
        let score = self
            .learnt_scores
            .get_mut(&cref)
            .expect("bumped clauses are learnt");
        *score += self.learnt_score_increase;
        if *score > self.learnt_score_max {
            self.learnt_score_max = *score;
        }

        if *score > LEARNT_SCORE_RESCALE_LIMIT {
            for entry in self.learnt_scores.values_mut() {
                *entry *= LEARNT_SCORE_RESCALE_FACTOR;
            }
            self.learnt_score_max *= LEARNT_SCORE_RESCALE_FACTOR;
        }
    }

    /// Sort the learnt clauses by score and drop the lower-scored half,
    /// releasing their references.
    fn shrink_learnts(&mut self) {
        let scores = &self.learnt_scores;
        self.learnt_clauses.sort_by(|c1, c2| {
            let s1 = scores.get(c1).copied().unwrap_or(0.0);
            let s2 = scores.get(c2).copied().unwrap_or(0.0);
            s1.total_cmp(&s2)
        });

        let dropped = self.learnt_clauses.len() / 2;
        for cref in self.learnt_clauses.drain(..dropped) {
            let _ = self.learnt_scores.remove(&cref);
            self.farm.release(cref);
        }
        debug!("solver: shrunk learnt clauses by {dropped}");
    }

    /// Compact the derived clause database when enough of it is garbage.
    /// Runs at level 0 only.
    fn collect_garbage(&mut self) {
        sable_assert_simple!(self.trail.decision_level() == 0);
        if self.farm.database(self.derived_database).wasted_fraction() < GC_WASTE_THRESHOLD {
            return;
        }

        let mut keep: FnvHashSet<ClauseRef> = self.learnt_clauses.iter().copied().collect();
        self.trail.gc_mark(&mut keep);
        self.requests.gc_mark(&mut keep);
        for plugin in &self.plugins {
            plugin.gc_mark(&mut keep);
        }

        let relocation = self
            .farm
            .database_mut(self.derived_database)
            .collect(&keep);

        self.trail.relocate(&relocation);
        for plugin in &mut self.plugins {
            plugin.relocate(&relocation);
        }
        for cref in &mut self.learnt_clauses {
            *cref = relocation.relocate(*cref).expect("learnt clauses are kept");
        }
        let rescored = self
            .learnt_scores
            .drain()
            .map(|(cref, score)| {
                let new_ref = relocation.relocate(cref).expect("learnt clauses are kept");
                (new_ref, score)
            })
            .collect();
        self.learnt_scores = rescored;
    }
}
