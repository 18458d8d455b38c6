//! The linear arithmetic plugin: watches arithmetic constraints for unit-ness
//! under the trail's assignment, maintains the context-dependent bound model,
//! turns unit constraints into bound updates, and resolves bound conflicts
//! with Fourier-Motzkin elimination.

mod assigned_watch_manager;
mod bounds;
mod linear_constraint;

pub(crate) use assigned_watch_manager::AssignedWatchManager;
pub(crate) use bounds::BoundInfo;
pub(crate) use bounds::BoundUpdate;
pub(crate) use bounds::BoundsModel;
pub(crate) use bounds::DisequalInfo;
pub(crate) use linear_constraint::ConstraintKind;
pub(crate) use linear_constraint::LinearConstraint;

use fnv::FnvHashMap;
use log::debug;
use log::trace;
use num_rational::BigRational;
use num_traits::Signed;
use num_traits::Zero;
use rand::Rng;

use super::DecisionToken;
use super::PluginContext;
use super::PropagationToken;
use crate::basic_types::Value;
use crate::engine::backtrack::Cd;
use crate::engine::clauses::ClauseRef;
use crate::engine::clauses::Literal;
use crate::engine::priority_queue::VariablePriorityQueue;
use crate::engine::rules::FourierMotzkinRule;
use crate::engine::solver::SolverOptions;
use crate::engine::trail::Trail;
use crate::engine::variables::Variable;
use crate::sable_assert_simple;
use crate::terms::Sort;

/// Cached unit-ness of a registered constraint under the current trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum UnassignedStatus {
    /// More than one variable unassigned.
    #[default]
    Unknown,
    /// Exactly one variable unassigned.
    Unit,
    /// All variables assigned.
    None,
}

/// The literal under which `var` currently holds on the trail.
fn asserted_literal(trail: &Trail, var: Variable) -> Literal {
    Literal::new(var, trail.is_false(Literal::new(var, false)))
}

#[derive(Debug)]
pub(crate) struct FmPlugin {
    int_type_index: usize,
    real_type_index: usize,

    /// Registered linear constraints by their constraint variable.
    constraints: FnvHashMap<Variable, LinearConstraint>,
    /// Unit-ness per constraint variable index.
    status: Vec<UnassignedStatus>,

    /// Dense plugin-local ids for arithmetic variables.
    arith_ids: FnvHashMap<Variable, usize>,
    arith_vars: Vec<Variable>,

    watch_manager: AssignedWatchManager,
    bounds: BoundsModel,

    /// Variables fixed by their bounds, in fixing order, with a
    /// context-dependent length and decide cursor.
    fixed_variables: Vec<Variable>,
    fixed_count: Cd<usize>,
    fixed_index: Cd<usize>,
    fixed_decided: Cd<usize>,

    /// How far into the trail this plugin has processed.
    trail_head: Cd<usize>,

    queue: VariablePriorityQueue,

    /// Constraint variables fully assigned at registration, evaluated at the
    /// next propagation pass.
    delayed_evaluations: Vec<Variable>,

    fm_rule: FourierMotzkinRule,

    cascade: bool,
    decide_fixed: bool,
    random_select: f64,
}

impl FmPlugin {
    pub(crate) fn new(
        options: &SolverOptions,
        farm: &mut crate::engine::clauses::ClauseFarm,
        derived_database: usize,
        variables: &mut crate::engine::variables::VariableDatabase,
    ) -> FmPlugin {
        FmPlugin {
            int_type_index: variables.type_index(Sort::Integer),
            real_type_index: variables.type_index(Sort::Real),
            constraints: FnvHashMap::default(),
            status: Vec::new(),
            arith_ids: FnvHashMap::default(),
            arith_vars: Vec::new(),
            watch_manager: AssignedWatchManager::default(),
            bounds: BoundsModel::default(),
            fixed_variables: Vec::new(),
            fixed_count: Cd::new(0),
            fixed_index: Cd::new(0),
            fixed_decided: Cd::new(0),
            trail_head: Cd::new(0),
            queue: VariablePriorityQueue::new(options.fm_bump, 0.95),
            delayed_evaluations: Vec::new(),
            fm_rule: FourierMotzkinRule::new(farm, derived_database),
            cascade: options.fm_cascade,
            decide_fixed: options.fm_decide_fixed,
            random_select: options.fm_random_select,
        }
    }

    fn is_arithmetic(&self, var: Variable) -> bool {
        var.type_index() == self.int_type_index || var.type_index() == self.real_type_index
    }

    fn is_linear_constraint(&self, var: Variable) -> bool {
        var.is_boolean() && self.constraints.contains_key(&var)
    }

    fn arith_id(&mut self, var: Variable) -> usize {
        if let Some(id) = self.arith_ids.get(&var) {
            return *id;
        }
        let id = self.arith_vars.len();
        self.arith_vars.push(var);
        let _ = self.arith_ids.insert(var, id);
        id
    }

    fn status_of(&self, constraint_var: Variable) -> UnassignedStatus {
        self.status
            .get(constraint_var.index())
            .copied()
            .unwrap_or_default()
    }

    fn set_status(&mut self, constraint_var: Variable, status: UnassignedStatus) {
        if self.status.len() <= constraint_var.index() {
            self.status
                .resize(constraint_var.index() + 1, UnassignedStatus::Unknown);
        }
        self.status[constraint_var.index()] = status;
    }

    pub(crate) fn on_new_variable(
        &mut self,
        var: Variable,
        trail: &Trail,
        ctx: &mut PluginContext<'_>,
    ) {
        if self.is_arithmetic(var) {
            let id = self.arith_id(var);
            self.queue.new_entry(id);
        } else if var.is_boolean()
            && ctx.terms.is_arithmetic_relation(ctx.variables.term(var))
            && !self.constraints.contains_key(&var)
        {
            self.new_constraint(var, trail, ctx);
        }
    }

    fn new_constraint(&mut self, var: Variable, trail: &Trail, ctx: &mut PluginContext<'_>) {
        let Some(constraint) =
            LinearConstraint::parse(Literal::new(var, false), ctx.terms, ctx.variables)
        else {
            // Not linear; this plugin ignores the constraint entirely.
            debug!("fm: constraint {var} is non-linear, ignored");
            return;
        };
        trace!("fm: new constraint {var}: {constraint:?}");

        let mut vars: Vec<Variable> = constraint.variables().collect();
        let _ = self.constraints.insert(var, constraint);

        if vars.is_empty() {
            // A constant atom; it simply evaluates.
            self.set_status(var, UnassignedStatus::None);
            self.delayed_evaluations.push(var);
            return;
        }

        // Unassigned variables to the front, then by decreasing level.
        vars.sort_by(|v1, v2| match (trail.has_value(*v1), trail.has_value(*v2)) {
            (false, false) => v1.cmp(v2),
            (false, true) => std::cmp::Ordering::Less,
            (true, false) => std::cmp::Ordering::Greater,
            (true, true) => trail
                .variable_decision_level(*v2)
                .cmp(&trail.variable_decision_level(*v1))
                .then(v1.cmp(v2)),
        });

        let reference = self.watch_manager.new_list(&vars, var);
        let first_id = self.arith_id(vars[0]);
        self.watch_manager.watch(first_id, reference);
        if vars.len() > 1 {
            let second_id = self.arith_id(vars[1]);
            self.watch_manager.watch(second_id, reference);
        }

        if !trail.has_value(vars[0]) {
            if vars.len() == 1 || trail.has_value(vars[1]) {
                self.set_status(var, UnassignedStatus::Unit);
                if trail.has_value(var) {
                    self.process_unit_constraint(var, trail);
                }
            } else {
                self.set_status(var, UnassignedStatus::Unknown);
            }
        } else {
            self.set_status(var, UnassignedStatus::None);
            self.delayed_evaluations.push(var);
        }
    }

    pub(crate) fn propagate(
        &mut self,
        token: &mut PropagationToken<'_>,
        ctx: &mut PluginContext<'_>,
    ) {
        trace!("fm: propagate ({:?})", token.mode());

        for constraint_var in std::mem::take(&mut self.delayed_evaluations) {
            if !token.trail().has_value(constraint_var) {
                let (value, level) = self.constraints[&constraint_var].evaluate(token.trail());
                token.semantic_propagate_at(Literal::new(constraint_var, !value), level);
            }
        }

        let mut position = self.trail_head.get_copied();
        while token.trail().consistent() && position < token.trail().size() {
            let var = token.trail().element(position).var;
            position += 1;

            if self.is_arithmetic(var) {
                self.propagate_assigned_variable(var, token);
            } else if self.is_linear_constraint(var)
                && self.status_of(var) == UnassignedStatus::Unit
            {
                self.process_unit_constraint(var, token.trail());
            }
        }
        self.trail_head
            .set(token.trail().decision_level(), position);

        if self.bounds.in_conflict() {
            self.process_conflicts(token, ctx);
        }
    }

    /// Walk the watch lists of a just-assigned arithmetic variable.
    fn propagate_assigned_variable(&mut self, var: Variable, token: &mut PropagationToken<'_>) {
        let id = self.arith_ids[&var];
        let mut watches = self.watch_manager.detach(id);

        while token.trail().consistent() && !watches.done() {
            let reference = watches.current();

            if reference.size() > 1 && self.watch_manager.list(reference)[0] == var {
                self.watch_manager.swap(reference, 0, 1);
            }

            let mut watch_found = false;
            for j in 2..reference.size() {
                let candidate = self.watch_manager.list(reference)[j];
                if !token.trail().has_value(candidate) {
                    self.watch_manager.swap(reference, 1, j);
                    let new_id = self.arith_ids[&candidate];
                    self.watch_manager.watch(new_id, reference);
                    watches.next_and_remove();
                    watch_found = true;
                    break;
                }
            }

            if !watch_found {
                let constraint_var = self.watch_manager.constraint_of(reference);
                let first = self.watch_manager.list(reference)[0];
                if token.trail().has_value(first) {
                    // Fully assigned: the constraint evaluates in the model.
                    if !token.trail().has_value(constraint_var) {
                        let (value, level) =
                            self.constraints[&constraint_var].evaluate(token.trail());
                        token.semantic_propagate_at(Literal::new(constraint_var, !value), level);
                    }
                    self.set_status(constraint_var, UnassignedStatus::None);
                } else {
                    self.set_status(constraint_var, UnassignedStatus::Unit);
                    if token.trail().has_value(constraint_var) {
                        self.process_unit_constraint(constraint_var, token.trail());
                    }
                }
                watches.next_and_keep();
            }
        }
        self.watch_manager.reattach(watches);
    }

    /// Derive the bound a unit constraint imposes on its one unassigned
    /// variable.
    fn process_unit_constraint(&mut self, constraint_var: Variable, trail: &Trail) {
        sable_assert_simple!(self.is_linear_constraint(constraint_var));
        let constraint = &self.constraints[&constraint_var];
        trace!("fm: processing unit constraint {constraint_var}");

        let mut sum = BigRational::zero();
        let mut x: Option<Variable> = None;
        let mut a = BigRational::zero();
        for (var, coefficient) in constraint.entries() {
            if var.is_null() {
                sum += coefficient;
            } else if let Some(value) = trail.value_of(var) {
                let value = value.as_rational().expect("arithmetic value");
                sum += coefficient * value;
            } else {
                sable_assert_simple!(x.is_none(), "constraint is not unit");
                x = Some(var);
                a = coefficient.clone();
            }
        }
        let x = x.expect("unit constraint has an unassigned variable");

        let mut kind = constraint.kind();
        if trail.is_false(Literal::new(constraint_var, false)) {
            kind = kind.negate();
        }
        if a.is_negative() {
            kind = kind.flip();
            a = -a;
            sum = -sum;
        }

        let value = -sum / a;
        let level = trail.decision_level();
        let fixed = match kind {
            ConstraintKind::Gt | ConstraintKind::Geq => {
                let info = BoundInfo::new(value, kind == ConstraintKind::Gt, constraint_var);
                self.bounds.update_lower_bound(x, info, level) == BoundUpdate::Fixed
            }
            ConstraintKind::Lt | ConstraintKind::Leq => {
                let info = BoundInfo::new(value, kind == ConstraintKind::Lt, constraint_var);
                self.bounds.update_upper_bound(x, info, level) == BoundUpdate::Fixed
            }
            ConstraintKind::Equal => {
                let _ = self.bounds.update_lower_bound(
                    x,
                    BoundInfo::new(value.clone(), false, constraint_var),
                    level,
                );
                let _ = self.bounds.update_upper_bound(
                    x,
                    BoundInfo::new(value, false, constraint_var),
                    level,
                );
                true
            }
            ConstraintKind::Distinct => {
                self.bounds.add_disequality(
                    x,
                    DisequalInfo {
                        value,
                        reason: constraint_var,
                    },
                    level,
                );
                false
            }
        };

        if fixed {
            self.fixed_variables.push(x);
            self.fixed_count.set(level, self.fixed_variables.len());
        }
    }

    /// Turn every conflicting variable's bounds into a learnt clause.
    fn process_conflicts(&mut self, token: &mut PropagationToken<'_>, ctx: &mut PluginContext<'_>) {
        for x in self.bounds.take_variables_in_conflict() {
            let lower = self.bounds.lower_bound_info(x).clone();
            let upper = self.bounds.upper_bound_info(x).clone();
            let lower_literal = asserted_literal(token.trail(), lower.reason);
            let upper_literal = asserted_literal(token.trail(), upper.reason);

            debug!("fm: conflict on {x}");
            let conflict = if BoundInfo::in_conflict(&lower, &upper) {
                self.fm_rule.start(lower_literal, ctx.terms, ctx.variables);
                self.fm_rule.resolve(x, upper_literal, ctx.terms, ctx.variables);
                if self.cascade {
                    self.cascade_resolution(token, ctx);
                }
                self.fm_rule
                    .finish(token.trail_mut(), ctx.terms, ctx.variables, ctx.farm)
            } else {
                // The bounds meet exactly on an excluded value.
                let disequal = self.bounds.disequal_info(x, &lower.value).clone();
                let disequality_literal = asserted_literal(token.trail(), disequal.reason);
                self.fm_rule.resolve_disequality(
                    x,
                    lower_literal,
                    upper_literal,
                    disequality_literal,
                    token.trail_mut(),
                    ctx.terms,
                    ctx.variables,
                    ctx.farm,
                )
            };

            self.bump_conflict_variables(conflict, ctx);
        }
    }

    /// While enabled, chase the conflict past the first resolution: derive
    /// the bound the current resolvent implies on its highest-level variable
    /// and, when that clashes with a recorded bound, resolve with that
    /// bound's reason as well.
    fn cascade_resolution(&mut self, token: &PropagationToken<'_>, ctx: &mut PluginContext<'_>) {
        loop {
            let resolvent = self.fm_rule.resolvent().clone();

            let mut top: Option<Variable> = None;
            let mut all_assigned = true;
            for var in resolvent.variables() {
                if !token.trail().has_value(var) {
                    all_assigned = false;
                    break;
                }
                let level = token.trail().variable_decision_level(var);
                if top.map_or(true, |t| token.trail().variable_decision_level(t) < level) {
                    top = Some(var);
                }
            }
            if !all_assigned {
                return;
            }
            let Some(top) = top else { return };

            // The bound the resolvent implies on the top variable.
            let mut sum = BigRational::zero();
            for (var, coefficient) in resolvent.entries() {
                if var.is_null() {
                    sum += coefficient;
                } else if var != top {
                    let value = token
                        .trail()
                        .value_of(var)
                        .and_then(Value::as_rational)
                        .expect("assigned above");
                    sum += coefficient * value;
                }
            }
            let a = resolvent.coefficient(top);
            sable_assert_simple!(!a.is_zero());
            let strict = resolvent.kind() == ConstraintKind::Gt;
            let value = -sum / &a;

            if a.is_positive() {
                // Implied lower bound; clash with a recorded upper bound?
                if !self.bounds.has_upper_bound(top) {
                    return;
                }
                let upper = self.bounds.upper_bound_info(top).clone();
                let implied = BoundInfo::new(value, strict, Variable::null());
                if !BoundInfo::in_conflict(&implied, &upper) {
                    return;
                }
                let literal = asserted_literal(token.trail(), upper.reason);
                self.fm_rule.resolve(top, literal, ctx.terms, ctx.variables);
            } else {
                if !self.bounds.has_lower_bound(top) {
                    return;
                }
                let lower = self.bounds.lower_bound_info(top).clone();
                let implied = BoundInfo::new(value, strict, Variable::null());
                if !BoundInfo::in_conflict(&lower, &implied) {
                    return;
                }
                let literal = asserted_literal(token.trail(), lower.reason);
                self.fm_rule.resolve(top, literal, ctx.terms, ctx.variables);
            }
        }
    }

    fn bump_conflict_variables(&mut self, conflict: ClauseRef, ctx: &PluginContext<'_>) {
        let mut conflict_vars: Vec<Variable> = Vec::new();
        for literal in ctx.farm.clause(conflict).literals() {
            if let Some(constraint) = self.constraints.get(&literal.variable()) {
                conflict_vars.extend(constraint.variables());
            }
        }
        for var in conflict_vars {
            if let Some(id) = self.arith_ids.get(&var) {
                self.queue.bump(*id, 1.0);
            }
        }
    }

    pub(crate) fn decide(&mut self, token: &mut DecisionToken<'_>, ctx: &mut PluginContext<'_>) {
        if self.decide_fixed {
            let mut index = self.fixed_index.get_copied();
            while index < self.fixed_variables.len() {
                let var = self.fixed_variables[index];
                if !token.trail().has_value(var) {
                    let value = self.pick_value(var, ctx);
                    debug!("fm: deciding fixed {var} -> {value}");
                    token.decide_value(var, Value::Rational(value));
                    let decided = self.fixed_decided.get_copied() + 1;
                    self.fixed_decided
                        .set(token.trail().decision_level(), decided);
                    return;
                }
                index += 1;
                self.fixed_index.set(token.trail().decision_level(), index);
            }
        }

        while !self.queue.is_empty() {
            let id = if ctx.rng.gen::<f64>() < self.random_select {
                self.queue.pop_random(ctx.rng)
            } else {
                self.queue.pop()
            };
            let var = self.arith_vars[id];
            if token.trail().has_value(var) {
                continue;
            }
            let value = self.pick_value(var, ctx);
            debug!("fm: deciding {var} -> {value}");
            token.decide_value(var, Value::Rational(value));
            return;
        }
    }

    fn pick_value(&self, var: Variable, ctx: &PluginContext<'_>) -> BigRational {
        let is_integer = ctx.variables.sort_of_type(var.type_index()) == Sort::Integer;
        self.bounds.pick(var, is_integer)
    }

    pub(crate) fn notify_variable_unset(
        &mut self,
        vars: &[Variable],
        trail: &Trail,
        _ctx: &mut PluginContext<'_>,
    ) {
        let level = trail.decision_level();
        debug!("fm: backjump to level {level}");

        self.delayed_evaluations.clear();
        self.queue.decay();

        self.trail_head.backtrack(level);
        self.bounds.backtrack(level);
        self.fixed_count.backtrack(level);
        self.fixed_variables.truncate(self.fixed_count.get_copied());
        self.fixed_index.backtrack(level);
        self.fixed_decided.backtrack(level);

        for var in vars {
            if !self.is_arithmetic(*var) {
                continue;
            }
            let id = self.arith_ids[var];

            // Unassigning one watched variable moves each constraint one
            // step away from being fully assigned.
            let updates: Vec<(Variable, usize)> = self
                .watch_manager
                .watched_by(id)
                .iter()
                .map(|reference| (self.watch_manager.constraint_of(*reference), reference.size()))
                .collect();
            for (constraint_var, size) in updates {
                match self.status_of(constraint_var) {
                    UnassignedStatus::None => self.set_status(constraint_var, UnassignedStatus::Unit),
                    UnassignedStatus::Unit => {
                        if size > 1 {
                            self.set_status(constraint_var, UnassignedStatus::Unknown);
                        }
                    }
                    UnassignedStatus::Unknown => {}
                }
            }

            self.queue.enqueue(id);
        }
    }
}
