use super::Variable;
use super::VariableRelocation;

/// Dense variable-keyed storage spanning all type classes. Entries spring
/// into existence with `T::default()` when first touched, so owners never
/// have to track database growth explicitly.
#[derive(Debug, Clone)]
pub(crate) struct VariableTable<T> {
    data: Vec<Vec<T>>,
}

impl<T> Default for VariableTable<T> {
    fn default() -> Self {
        VariableTable { data: Vec::new() }
    }
}

impl<T: Default + Clone> VariableTable<T> {
    pub(crate) fn get(&self, var: Variable) -> Option<&T> {
        self.data.get(var.type_index())?.get(var.index())
    }

    pub(crate) fn entry(&mut self, var: Variable) -> &mut T {
        if self.data.len() <= var.type_index() {
            self.data.resize(var.type_index() + 1, Vec::new());
        }
        let of_type = &mut self.data[var.type_index()];
        if of_type.len() <= var.index() {
            of_type.resize(var.index() + 1, T::default());
        }
        &mut of_type[var.index()]
    }

    /// Compact the table according to a variable relocation; collected
    /// entries are dropped.
    pub(crate) fn relocate(&mut self, relocation: &VariableRelocation) {
        for (type_index, of_type) in self.data.iter_mut().enumerate() {
            let mut kept = Vec::new();
            for (index, value) in of_type.drain(..).enumerate() {
                if relocation
                    .relocate(Variable::new(type_index, index))
                    .is_some()
                {
                    kept.push(value);
                }
            }
            *of_type = kept;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::variables::VariableDatabase;
    use crate::terms::Sort;
    use crate::terms::TermDatabase;

    #[test]
    fn entries_default_on_first_touch() {
        let mut table: VariableTable<u32> = VariableTable::default();
        let var = Variable::new(1, 3);
        assert_eq!(table.get(var), None);
        *table.entry(var) = 7;
        assert_eq!(table.get(var), Some(&7));
        assert_eq!(table.get(Variable::new(1, 2)), Some(&0));
    }

    #[test]
    fn relocation_compacts_entries() {
        let mut terms = TermDatabase::default();
        let mut db = VariableDatabase::default();
        let x = terms.real_variable("x");
        let y = terms.real_variable("y");
        let z = terms.real_variable("z");
        let vx = db.variable(x, Sort::Real, 0);
        let vy = db.variable(y, Sort::Real, 0);
        let vz = db.variable(z, Sort::Real, 0);

        let mut table: VariableTable<u32> = VariableTable::default();
        *table.entry(vx) = 1;
        *table.entry(vy) = 2;
        *table.entry(vz) = 3;

        let keep = [vx, vz].into_iter().collect();
        let relocation = db.collect(&keep);
        table.relocate(&relocation);

        assert_eq!(table.get(vx), Some(&1));
        let new_z = relocation.relocate(vz).unwrap();
        assert_eq!(table.get(new_z), Some(&3));
    }
}
