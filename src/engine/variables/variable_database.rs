//! The database of solver variables. Every distinct term that occurs in an
//! assertion receives exactly one [`Variable`], with ids allocated densely
//! per type class so that variable-keyed tables stay compact.

use fnv::FnvHashMap;
use fnv::FnvHashSet;
use log::debug;

use super::Variable;
use crate::engine::backtrack::Cd;
use crate::sable_assert_simple;
use crate::terms::Sort;
use crate::terms::Term;

/// Relocation information produced by [`VariableDatabase::collect`]. Owners
/// of variable-keyed data use it to compact their tables.
#[derive(Debug)]
pub(crate) struct VariableRelocation {
    /// Per type class: `old index -> new index`, `None` when collected.
    new_indices: Vec<Vec<Option<u32>>>,
    /// Per type class: the variables (old identities) that were collected.
    removed: Vec<Vec<Variable>>,
}

impl VariableRelocation {
    /// The new identity of `var`, or `None` if it was collected.
    pub(crate) fn relocate(&self, var: Variable) -> Option<Variable> {
        let new_index = (*self
            .new_indices
            .get(var.type_index())?
            .get(var.index())?)?;
        Some(Variable::new(var.type_index(), new_index as usize))
    }

    /// The collected variables of one type class, in increasing index order.
    pub(crate) fn removed(&self, type_index: usize) -> &[Variable] {
        self.removed
            .get(type_index)
            .map_or(&[], |removed| removed.as_slice())
    }
}

#[derive(Debug)]
pub(crate) struct VariableDatabase {
    /// Sort of each type class.
    sorts: Vec<Sort>,
    sort_ids: FnvHashMap<Sort, usize>,
    /// Per type class, the term of each variable.
    terms: Vec<Vec<Term>>,
    variable_ids: FnvHashMap<Term, Variable>,
    /// All variables in creation order, driving notification dispatch.
    variables: Vec<Variable>,
    /// Dispatch cursor for once-only listeners.
    first_not_notified: usize,
    /// Dispatch cursor for context-dependent listeners; reverts on pop so
    /// that variables introduced after the pop point are re-notified.
    replay_cursor: Cd<usize>,
}

impl Default for VariableDatabase {
    fn default() -> Self {
        let mut db = VariableDatabase {
            sorts: Vec::new(),
            sort_ids: FnvHashMap::default(),
            terms: Vec::new(),
            variable_ids: FnvHashMap::default(),
            variables: Vec::new(),
            first_not_notified: 0,
            replay_cursor: Cd::new(0),
        };
        // Booleans are always type class 0, see `BOOLEAN_TYPE_INDEX`.
        let boolean = db.type_index(Sort::Bool);
        sable_assert_simple!(boolean == super::BOOLEAN_TYPE_INDEX);
        db
    }
}

impl VariableDatabase {
    /// The dense id of a type class, allocating one on first use.
    pub(crate) fn type_index(&mut self, sort: Sort) -> usize {
        if let Some(index) = self.sort_ids.get(&sort) {
            return *index;
        }
        let index = self.sorts.len();
        self.sorts.push(sort);
        self.terms.push(Vec::new());
        let _ = self.sort_ids.insert(sort, index);
        debug!("variable_db: type {sort:?} -> {index}");
        index
    }

    /// The variable of `term`, allocating a fresh one within the type class
    /// of `sort` on first occurrence. Idempotent for equal terms.
    pub(crate) fn variable(&mut self, term: Term, sort: Sort, level: usize) -> Variable {
        if let Some(var) = self.variable_ids.get(&term) {
            return *var;
        }

        let type_index = self.type_index(sort);
        let index = self.terms[type_index].len();
        let var = Variable::new(type_index, index);

        self.terms[type_index].push(term);
        let _ = self.variable_ids.insert(term, var);
        self.variables.push(var);
        self.replay_cursor.set(level, self.variables.len());

        debug!("variable_db: new variable {var} for term {term:?}");
        var
    }

    pub(crate) fn has_variable(&self, term: Term) -> bool {
        self.variable_ids.contains_key(&term)
    }

    pub(crate) fn variable_of(&self, term: Term) -> Option<Variable> {
        self.variable_ids.get(&term).copied()
    }

    pub(crate) fn term(&self, var: Variable) -> Term {
        self.terms[var.type_index()][var.index()]
    }

    /// The sort of a type class.
    pub(crate) fn sort_of_type(&self, type_index: usize) -> Sort {
        self.sorts[type_index]
    }

    /// Number of variables in one type class.
    pub(crate) fn num_variables(&self, type_index: usize) -> usize {
        self.terms.get(type_index).map_or(0, Vec::len)
    }

    /// Variables not yet dispatched to once-only listeners. Advances the
    /// cursor.
    pub(crate) fn drain_new(&mut self) -> Vec<Variable> {
        let pending = self.variables[self.first_not_notified..].to_vec();
        self.first_not_notified = self.variables.len();
        pending
    }

    /// Variables not yet dispatched to context-dependent listeners at the
    /// current level; after a pop this range includes everything created
    /// after the pop point again.
    pub(crate) fn drain_new_replayed(&mut self, level: usize) -> Vec<Variable> {
        let pending = self.variables[self.replay_cursor.get_copied()..].to_vec();
        self.replay_cursor.set(level, self.variables.len());
        pending
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.first_not_notified < self.variables.len()
            || self.replay_cursor.get_copied() < self.variables.len()
    }

    pub(crate) fn backtrack(&mut self, level: usize) {
        self.replay_cursor.backtrack(level);
    }

    /// Compact each type class, keeping exactly the supplied variables.
    /// Callers must relocate all variable-keyed data with the returned map.
    pub(crate) fn collect(&mut self, keep: &FnvHashSet<Variable>) -> VariableRelocation {
        let mut new_indices = Vec::with_capacity(self.terms.len());
        let mut removed = Vec::with_capacity(self.terms.len());

        for (type_index, terms_of_type) in self.terms.iter_mut().enumerate() {
            let mut type_map = vec![None; terms_of_type.len()];
            let mut type_removed = Vec::new();
            let mut next = 0_u32;

            for (index, term) in terms_of_type.iter().enumerate() {
                let old = Variable::new(type_index, index);
                if keep.contains(&old) {
                    type_map[index] = Some(next);
                    next += 1;
                } else {
                    type_removed.push(old);
                    let _ = self.variable_ids.remove(term);
                }
            }

            let mut kept_terms = Vec::with_capacity(next as usize);
            for (index, term) in terms_of_type.iter().enumerate() {
                if let Some(new_index) = type_map[index] {
                    kept_terms.push(*term);
                    let _ = self
                        .variable_ids
                        .insert(*term, Variable::new(type_index, new_index as usize));
                }
            }
            *terms_of_type = kept_terms;

            new_indices.push(type_map);
            removed.push(type_removed);
        }

        let relocation = VariableRelocation {
            new_indices,
            removed,
        };

        self.variables = self
            .variables
            .iter()
            .filter_map(|var| relocation.relocate(*var))
            .collect();
        self.first_not_notified = self.variables.len();
        self.replay_cursor = Cd::new(self.variables.len());

        relocation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (crate::terms::TermDatabase, VariableDatabase) {
        (crate::terms::TermDatabase::default(), VariableDatabase::default())
    }

    #[test]
    fn variable_creation_is_idempotent() {
        let (mut terms, mut db) = setup();
        let x = terms.real_variable("x");
        let v1 = db.variable(x, Sort::Real, 0);
        let v2 = db.variable(x, Sort::Real, 0);
        assert_eq!(v1, v2);
        assert_eq!(db.num_variables(v1.type_index()), 1);
    }

    #[test]
    fn type_classes_are_dense_and_boolean_is_first() {
        let (mut terms, mut db) = setup();
        assert_eq!(db.type_index(Sort::Bool), super::super::BOOLEAN_TYPE_INDEX);

        let p = terms.boolean_variable("p");
        let x = terms.real_variable("x");
        let n = terms.integer_variable("n");

        let vp = db.variable(p, Sort::Bool, 0);
        let vx = db.variable(x, Sort::Real, 0);
        let vn = db.variable(n, Sort::Integer, 0);

        assert!(vp.is_boolean());
        assert_ne!(vx.type_index(), vp.type_index());
        assert_ne!(vn.type_index(), vx.type_index());
        assert_eq!(vx.index(), 0);
        assert_eq!(vn.index(), 0);
    }

    #[test]
    fn replayed_drain_repeats_after_backtrack() {
        let (mut terms, mut db) = setup();
        let p = terms.boolean_variable("p");
        let q = terms.boolean_variable("q");

        let _ = db.variable(p, Sort::Bool, 0);
        assert_eq!(db.drain_new_replayed(0).len(), 1);

        // A variable introduced at level 2 is replayed once level 2 is gone.
        let vq = db.variable(q, Sort::Bool, 2);
        assert_eq!(db.drain_new_replayed(2), vec![vq]);
        assert!(db.drain_new_replayed(2).is_empty());

        db.backtrack(1);
        assert_eq!(db.drain_new_replayed(1), vec![vq]);
    }

    #[test]
    fn once_drain_never_repeats() {
        let (mut terms, mut db) = setup();
        let p = terms.boolean_variable("p");
        let vp = db.variable(p, Sort::Bool, 3);
        assert_eq!(db.drain_new(), vec![vp]);
        db.backtrack(0);
        assert!(db.drain_new().is_empty());
    }

    #[test]
    fn collect_compacts_ids_within_type_classes() {
        let (mut terms, mut db) = setup();
        let x = terms.real_variable("x");
        let y = terms.real_variable("y");
        let z = terms.real_variable("z");
        let vx = db.variable(x, Sort::Real, 0);
        let vy = db.variable(y, Sort::Real, 0);
        let vz = db.variable(z, Sort::Real, 0);

        let keep = [vx, vz].into_iter().collect();
        let relocation = db.collect(&keep);

        assert_eq!(relocation.relocate(vx), Some(vx));
        assert_eq!(relocation.relocate(vy), None);
        let new_z = relocation.relocate(vz).unwrap();
        assert_eq!(new_z.index(), 1);
        assert_eq!(relocation.removed(vy.type_index()), &[vy]);

        assert_eq!(db.num_variables(vx.type_index()), 2);
        assert_eq!(db.variable_of(z), Some(new_z));
        assert_eq!(db.variable_of(y), None);
        // Re-introducing a collected term allocates a fresh id.
        assert_eq!(db.variable(y, Sort::Real, 0).index(), 2);
    }
}
