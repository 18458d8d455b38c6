mod variable;
mod variable_database;
mod variable_table;

pub(crate) use variable::Variable;
pub(crate) use variable::BOOLEAN_TYPE_INDEX;
pub(crate) use variable_database::VariableDatabase;
pub(crate) use variable_database::VariableRelocation;
pub(crate) use variable_table::VariableTable;
