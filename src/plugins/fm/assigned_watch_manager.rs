//! Watches over the variables of arithmetic constraints. Each registered
//! constraint stores its variable list in a shared arena; per arithmetic
//! variable, the manager keeps the lists in which that variable is currently
//! one of the two watched positions.

use fnv::FnvHashMap;

use crate::engine::variables::Variable;
use crate::engine::watch_lists::DetachedWatchList;
use crate::engine::watch_lists::WatchLists;
use crate::sable_assert_simple;

/// Reference to a variable list in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct VariableListReference {
    index: u32,
    size: u32,
}

impl VariableListReference {
    pub(crate) fn size(self) -> usize {
        self.size as usize
    }
}

#[derive(Debug, Default)]
pub(crate) struct AssignedWatchManager {
    memory: Vec<Variable>,
    /// The constraint variable owning each list, keyed by list start index.
    constraints: FnvHashMap<u32, Variable>,
    /// Per arithmetic variable (dense plugin id), the lists watching it.
    watch_lists: WatchLists<VariableListReference>,
}

impl AssignedWatchManager {
    /// Store a new variable list for `constraint` and return its reference.
    pub(crate) fn new_list(
        &mut self,
        vars: &[Variable],
        constraint: Variable,
    ) -> VariableListReference {
        sable_assert_simple!(!vars.is_empty());
        let reference = VariableListReference {
            index: self.memory.len() as u32,
            size: vars.len() as u32,
        };
        self.memory.extend_from_slice(vars);
        let _ = self.constraints.insert(reference.index, constraint);
        reference
    }

    pub(crate) fn constraint_of(&self, reference: VariableListReference) -> Variable {
        self.constraints[&reference.index]
    }

    pub(crate) fn list(&self, reference: VariableListReference) -> &[Variable] {
        let start = reference.index as usize;
        &self.memory[start..start + reference.size()]
    }

    pub(crate) fn swap(&mut self, reference: VariableListReference, i: usize, j: usize) {
        let start = reference.index as usize;
        sable_assert_simple!(i < reference.size() && j < reference.size());
        self.memory.swap(start + i, start + j);
    }

    /// Watch `reference` on the variable with the given dense id.
    pub(crate) fn watch(&mut self, var_id: usize, reference: VariableListReference) {
        self.watch_lists.add(var_id, reference);
    }

    pub(crate) fn watched_by(&self, var_id: usize) -> &[VariableListReference] {
        self.watch_lists.list(var_id)
    }

    pub(crate) fn detach(&mut self, var_id: usize) -> DetachedWatchList<VariableListReference> {
        self.watch_lists.detach(var_id)
    }

    pub(crate) fn reattach(&mut self, detached: DetachedWatchList<VariableListReference>) {
        self.watch_lists.reattach(detached);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arith(index: usize) -> Variable {
        Variable::new(1, index)
    }

    fn constraint(index: usize) -> Variable {
        Variable::new(0, index)
    }

    #[test]
    fn lists_are_stored_and_swappable() {
        let mut manager = AssignedWatchManager::default();
        let vars = [arith(0), arith(1), arith(2)];
        let reference = manager.new_list(&vars, constraint(7));

        assert_eq!(manager.list(reference), &vars);
        assert_eq!(manager.constraint_of(reference), constraint(7));

        manager.swap(reference, 0, 2);
        assert_eq!(manager.list(reference), &[arith(2), arith(1), arith(0)]);
    }

    #[test]
    fn watches_move_between_variables() {
        let mut manager = AssignedWatchManager::default();
        let first = manager.new_list(&[arith(0), arith(1)], constraint(0));
        let second = manager.new_list(&[arith(0), arith(2)], constraint(1));

        manager.watch(0, first);
        manager.watch(0, second);
        assert_eq!(manager.watched_by(0), &[first, second]);

        // Move `first` from variable 0 to variable 1.
        let mut iter = manager.detach(0);
        iter.next_and_remove();
        manager.reattach(iter);
        manager.watch(1, first);

        assert_eq!(manager.watched_by(0), &[second]);
        assert_eq!(manager.watched_by(1), &[first]);
    }
}
