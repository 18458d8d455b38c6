//! The reasoning plugins and their dispatch plumbing. Plugins are a closed
//! set of variants sharing the trail; the solver drives them through
//! feature-indexed dispatch tables and fans notifications out to the
//! subscribed subset.

pub(crate) mod bcp;
pub(crate) mod cnf;
pub(crate) mod fm;

use std::collections::BTreeSet;

use enumset::EnumSet;
use enumset::EnumSetType;
use fnv::FnvHashSet;
use rand::rngs::SmallRng;

use crate::basic_types::ConstraintOperationError;
use crate::basic_types::Value;
use crate::engine::clauses::ClauseFarm;
use crate::engine::clauses::ClauseRef;
use crate::engine::clauses::ClauseRelocation;
use crate::engine::clauses::Literal;
use crate::engine::trail::Trail;
use crate::engine::variables::Variable;
use crate::engine::variables::VariableDatabase;
use crate::sable_assert_simple;
use crate::terms::Term;
use crate::terms::TermDatabase;

pub(crate) use bcp::BcpEngine;
pub(crate) use cnf::CnfPlugin;
pub(crate) use fm::FmPlugin;

/// Capabilities a plugin can offer; the solver builds one dispatch table per
/// feature.
#[derive(EnumSetType, Debug)]
pub(crate) enum PluginFeature {
    Propagate,
    DecideBoolean,
    DecideValues,
}

/// Events a plugin can subscribe to.
#[derive(EnumSetType, Debug)]
pub(crate) enum PluginNotification {
    Assertion,
    Conflict,
    ConflictResolution,
    VariableUnset,
    Restart,
}

/// Propagation urgency, passed down with the propagation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PropagationMode {
    /// First pass after new assertions were added.
    Init,
    Normal,
    /// Final pass before declaring satisfiability.
    Complete,
}

/// Shared mutable state handed to plugins alongside a token.
#[derive(Debug)]
pub(crate) struct PluginContext<'a> {
    pub(crate) terms: &'a mut TermDatabase,
    pub(crate) variables: &'a mut VariableDatabase,
    pub(crate) farm: &'a mut ClauseFarm,
    pub(crate) requests: &'a mut SolverRequests,
    pub(crate) rng: &'a mut SmallRng,
}

/// Token through which plugins extend the trail during propagation. Tracks
/// whether it was used so the solver can detect the fixpoint.
#[derive(Debug)]
pub(crate) struct PropagationToken<'a> {
    trail: &'a mut Trail,
    mode: PropagationMode,
    used: bool,
}

impl<'a> PropagationToken<'a> {
    pub(crate) fn new(trail: &'a mut Trail, mode: PropagationMode) -> PropagationToken<'a> {
        PropagationToken {
            trail,
            mode,
            used: false,
        }
    }

    pub(crate) fn mode(&self) -> PropagationMode {
        self.mode
    }

    pub(crate) fn used(&self) -> bool {
        self.used
    }

    pub(crate) fn trail(&self) -> &Trail {
        self.trail
    }

    /// Mutable trail access for proof-rule driven propagation; counts as a
    /// use of the token.
    pub(crate) fn trail_mut(&mut self) -> &mut Trail {
        self.used = true;
        self.trail
    }

    pub(crate) fn semantic_propagate_at(&mut self, literal: Literal, level: usize) {
        self.used = true;
        self.trail.semantic_propagate_at(literal, level);
    }

    pub(crate) fn clausal_propagate(
        &mut self,
        literal: Literal,
        reason: ClauseRef,
        farm: &mut ClauseFarm,
    ) {
        self.used = true;
        self.trail.clausal_propagate(literal, reason, farm);
    }
}

/// Token through which plugins make a single decision.
#[derive(Debug)]
pub(crate) struct DecisionToken<'a> {
    trail: &'a mut Trail,
    used: bool,
}

impl<'a> DecisionToken<'a> {
    pub(crate) fn new(trail: &'a mut Trail) -> DecisionToken<'a> {
        DecisionToken { trail, used: false }
    }

    pub(crate) fn used(&self) -> bool {
        self.used
    }

    pub(crate) fn trail(&self) -> &Trail {
        self.trail
    }

    pub(crate) fn decide_literal(&mut self, literal: Literal) {
        sable_assert_simple!(!self.used, "a decision token decides at most once");
        self.used = true;
        self.trail.decide_literal(literal);
    }

    pub(crate) fn decide_value(&mut self, var: Variable, value: Value) {
        sable_assert_simple!(!self.used, "a decision token decides at most once");
        self.used = true;
        self.trail.decide_value(var, value);
    }
}

/// Pending plugin requests, drained by the solver between dispatches. A
/// backtrack request aggregates to the smallest requested level and retains
/// every clause enqueued with a request.
#[derive(Debug, Default)]
pub(crate) struct SolverRequests {
    any: bool,
    backtrack_level: Option<usize>,
    backtrack_clauses: BTreeSet<ClauseRef>,
    restart: bool,
}

impl SolverRequests {
    pub(crate) fn request_backtrack(&mut self, level: usize, cref: ClauseRef) {
        match self.backtrack_level {
            None => self.backtrack_level = Some(level),
            Some(current) if level < current => {
                self.backtrack_level = Some(level);
                self.backtrack_clauses.clear();
            }
            Some(_) => {}
        }
        let _ = self.backtrack_clauses.insert(cref);
        self.any = true;
    }

    pub(crate) fn request_restart(&mut self) {
        self.restart = true;
        self.any = true;
    }

    pub(crate) fn any(&self) -> bool {
        self.any
    }

    pub(crate) fn take_backtrack(&mut self) -> Option<(usize, Vec<ClauseRef>)> {
        let level = self.backtrack_level.take()?;
        let clauses = std::mem::take(&mut self.backtrack_clauses);
        Some((level, clauses.into_iter().collect()))
    }

    pub(crate) fn take_restart(&mut self) -> bool {
        std::mem::replace(&mut self.restart, false)
    }

    pub(crate) fn clear_served(&mut self) {
        self.any = self.backtrack_level.is_some() || self.restart;
    }

    /// Clause references held by pending requests, for garbage collection.
    pub(crate) fn gc_mark(&self, keep: &mut FnvHashSet<ClauseRef>) {
        keep.extend(self.backtrack_clauses.iter().copied());
    }
}

/// The closed set of plugins.
#[derive(Debug)]
pub(crate) enum SolverPlugin {
    Cnf(CnfPlugin),
    Bcp(BcpEngine),
    Fm(FmPlugin),
}

impl SolverPlugin {
    /// Instantiate a plugin from its registered id.
    pub(crate) fn from_id(
        id: &str,
        options: &crate::engine::solver::SolverOptions,
        farm: &mut ClauseFarm,
        input_database: usize,
        derived_database: usize,
        variables: &mut VariableDatabase,
    ) -> Result<SolverPlugin, ConstraintOperationError> {
        match id {
            "CNFPlugin" => Ok(SolverPlugin::Cnf(CnfPlugin::new(farm, input_database))),
            "BCPEngine" => Ok(SolverPlugin::Bcp(BcpEngine::new(options))),
            "FMPlugin" => Ok(SolverPlugin::Fm(FmPlugin::new(
                options,
                farm,
                derived_database,
                variables,
            ))),
            _ => Err(ConstraintOperationError::UnknownPlugin(id.to_owned())),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            SolverPlugin::Cnf(_) => "CNFPlugin",
            SolverPlugin::Bcp(_) => "BCPEngine",
            SolverPlugin::Fm(_) => "FMPlugin",
        }
    }

    pub(crate) fn features(&self) -> EnumSet<PluginFeature> {
        match self {
            SolverPlugin::Cnf(_) => EnumSet::empty(),
            SolverPlugin::Bcp(_) => PluginFeature::Propagate | PluginFeature::DecideBoolean,
            SolverPlugin::Fm(_) => PluginFeature::Propagate | PluginFeature::DecideValues,
        }
    }

    pub(crate) fn notifications(&self) -> EnumSet<PluginNotification> {
        match self {
            SolverPlugin::Cnf(_) => PluginNotification::Assertion.into(),
            SolverPlugin::Bcp(_) => {
                PluginNotification::Conflict
                    | PluginNotification::ConflictResolution
                    | PluginNotification::VariableUnset
                    | PluginNotification::Restart
            }
            SolverPlugin::Fm(_) => PluginNotification::VariableUnset.into(),
        }
    }

    pub(crate) fn on_new_variable(
        &mut self,
        var: Variable,
        trail: &Trail,
        ctx: &mut PluginContext<'_>,
    ) {
        match self {
            SolverPlugin::Cnf(_) => {}
            SolverPlugin::Bcp(plugin) => plugin.on_new_variable(var),
            SolverPlugin::Fm(plugin) => plugin.on_new_variable(var, trail, ctx),
        }
    }

    pub(crate) fn on_new_clause(
        &mut self,
        cref: ClauseRef,
        trail: &Trail,
        ctx: &mut PluginContext<'_>,
    ) {
        match self {
            SolverPlugin::Cnf(_) | SolverPlugin::Fm(_) => {}
            SolverPlugin::Bcp(plugin) => plugin.on_new_clause(cref, trail, ctx),
        }
    }

    pub(crate) fn notify_assertion(
        &mut self,
        assertion: Term,
        trail: &Trail,
        ctx: &mut PluginContext<'_>,
    ) {
        match self {
            SolverPlugin::Cnf(plugin) => plugin.notify_assertion(assertion, trail, ctx),
            SolverPlugin::Bcp(_) | SolverPlugin::Fm(_) => {}
        }
    }

    pub(crate) fn propagate(
        &mut self,
        token: &mut PropagationToken<'_>,
        ctx: &mut PluginContext<'_>,
    ) {
        match self {
            SolverPlugin::Cnf(_) => {}
            SolverPlugin::Bcp(plugin) => plugin.propagate(token, ctx),
            SolverPlugin::Fm(plugin) => plugin.propagate(token, ctx),
        }
    }

    pub(crate) fn decide(&mut self, token: &mut DecisionToken<'_>, ctx: &mut PluginContext<'_>) {
        match self {
            SolverPlugin::Cnf(_) => {}
            SolverPlugin::Bcp(plugin) => plugin.decide(token),
            SolverPlugin::Fm(plugin) => plugin.decide(token, ctx),
        }
    }

    pub(crate) fn notify_conflict(&mut self, requests: &mut SolverRequests) {
        if let SolverPlugin::Bcp(plugin) = self {
            plugin.notify_conflict(requests);
        }
    }

    pub(crate) fn notify_conflict_resolution(&mut self, cref: ClauseRef, farm: &ClauseFarm) {
        if let SolverPlugin::Bcp(plugin) = self {
            plugin.notify_conflict_resolution(cref, farm);
        }
    }

    pub(crate) fn notify_variable_unset(
        &mut self,
        vars: &[Variable],
        trail: &Trail,
        ctx: &mut PluginContext<'_>,
    ) {
        match self {
            SolverPlugin::Cnf(_) => {}
            SolverPlugin::Bcp(plugin) => plugin.notify_variable_unset(vars, trail),
            SolverPlugin::Fm(plugin) => plugin.notify_variable_unset(vars, trail, ctx),
        }
    }

    pub(crate) fn notify_restart(&mut self) {
        if let SolverPlugin::Bcp(plugin) = self {
            plugin.notify_restart();
        }
    }

    /// Clauses this plugin still relies on, for garbage collection.
    pub(crate) fn gc_mark(&self, keep: &mut FnvHashSet<ClauseRef>) {
        match self {
            SolverPlugin::Cnf(plugin) => plugin.gc_mark(keep),
            SolverPlugin::Bcp(plugin) => plugin.gc_mark(keep),
            SolverPlugin::Fm(_) => {}
        }
    }

    pub(crate) fn relocate(&mut self, relocation: &ClauseRelocation) {
        match self {
            SolverPlugin::Cnf(plugin) => plugin.relocate(relocation),
            SolverPlugin::Bcp(plugin) => plugin.relocate(relocation),
            SolverPlugin::Fm(_) => {}
        }
    }
}
