//! Bump-allocated clause storage. Each database owns a flat word arena into
//! which clauses are packed (header followed by the literal array); clauses
//! never move except during [`ClauseDatabase::collect`]. Databases live in a
//! [`ClauseFarm`] which resolves [`ClauseRef`]s across databases.

use fnv::FnvHashMap;
use fnv::FnvHashSet;
use log::debug;

use super::clause::pack_meta;
use super::clause::CLAUSE_HEADER_WORDS;
use super::Clause;
use super::ClauseMut;
use super::ClauseRef;
use super::Literal;
use crate::engine::backtrack::Cd;
use crate::sable_assert_moderate;
use crate::sable_assert_simple;

/// Relocation map produced by a compacting collection of one database.
#[derive(Debug)]
pub(crate) struct ClauseRelocation {
    database: usize,
    new_refs: FnvHashMap<ClauseRef, ClauseRef>,
}

impl ClauseRelocation {
    /// The new identity of `cref`: unchanged when it belongs to another
    /// database, `None` when it was collected.
    pub(crate) fn relocate(&self, cref: ClauseRef) -> Option<ClauseRef> {
        if cref.is_null() || cref.database() != self.database {
            return Some(cref);
        }
        self.new_refs.get(&cref).copied()
    }
}

const INITIAL_CAPACITY_WORDS: usize = 1 << 14;

#[derive(Debug)]
pub(crate) struct ClauseDatabase {
    id: usize,
    name: String,
    memory: Vec<u32>,
    /// Words occupied by clauses whose reference count dropped to zero.
    wasted: usize,
    /// All clauses in creation order, driving notification dispatch.
    clauses: Vec<ClauseRef>,
    /// Dispatch cursor for once-only listeners.
    first_not_notified: usize,
    /// Dispatch cursor for context-dependent listeners; reverts on pop.
    replay_cursor: Cd<usize>,
    /// Number of proof rules registered with this database.
    rules: u16,
}

impl ClauseDatabase {
    fn new(id: usize, name: &str) -> ClauseDatabase {
        ClauseDatabase {
            id,
            name: name.to_owned(),
            memory: Vec::new(),
            wasted: 0,
            clauses: Vec::new(),
            first_not_notified: 0,
            replay_cursor: Cd::new(0),
            rules: 0,
        }
    }

    /// Hand out a fresh rule id; only proof rules construct clauses.
    pub(crate) fn register_rule(&mut self) -> u16 {
        let id = self.rules;
        self.rules += 1;
        id
    }

    fn allocate(&mut self, words: usize) -> usize {
        let required = self.memory.len() + words;
        if required > self.memory.capacity() {
            let mut capacity = self.memory.capacity().max(INITIAL_CAPACITY_WORDS);
            while capacity < required {
                capacity += capacity >> 1;
            }
            self.memory.reserve_exact(capacity - self.memory.len());
        }
        let offset = self.memory.len();
        self.memory.resize(required, 0);
        offset
    }

    pub(crate) fn new_clause(
        &mut self,
        literals: &[Literal],
        rule_id: u16,
        level: usize,
    ) -> ClauseRef {
        sable_assert_simple!(!literals.is_empty(), "clauses are never empty");
        sable_assert_moderate!(rule_id < self.rules, "unregistered rule");

        let offset = self.allocate(CLAUSE_HEADER_WORDS + literals.len());
        self.memory[offset] = literals.len() as u32;
        // The creator holds the first reference; releasing it hands the
        // clause to garbage collection.
        self.memory[offset + 1] = pack_meta(1, rule_id);
        for (i, literal) in literals.iter().enumerate() {
            self.memory[offset + CLAUSE_HEADER_WORDS + i] = literal.code();
        }

        let cref = ClauseRef::new(self.id, offset);
        self.clauses.push(cref);
        self.replay_cursor.set(level, self.clauses.len());

        debug!("clause_db[{}]: new clause {}", self.name, self.clause(cref));
        cref
    }

    pub(crate) fn clause(&self, cref: ClauseRef) -> Clause<'_> {
        sable_assert_moderate!(cref.database() == self.id);
        let offset = cref.offset();
        let len = self.memory[offset] as usize;
        Clause::from_words(&self.memory[offset..offset + CLAUSE_HEADER_WORDS + len])
    }

    pub(crate) fn clause_mut(&mut self, cref: ClauseRef) -> ClauseMut<'_> {
        sable_assert_moderate!(cref.database() == self.id);
        let offset = cref.offset();
        let len = self.memory[offset] as usize;
        ClauseMut::from_words(&mut self.memory[offset..offset + CLAUSE_HEADER_WORDS + len])
    }

    /// Increment the reference count; the clause stays in use while the
    /// count is positive.
    pub(crate) fn acquire(&mut self, cref: ClauseRef) {
        let mut clause = self.clause_mut(cref);
        let count = clause.ref_count();
        clause.set_ref_count(count + 1);
    }

    pub(crate) fn release(&mut self, cref: ClauseRef) {
        let words = CLAUSE_HEADER_WORDS + self.clause(cref).len();
        let mut clause = self.clause_mut(cref);
        let count = clause.ref_count();
        sable_assert_simple!(count > 0, "release of a clause that is not in use");
        clause.set_ref_count(count - 1);
        if count == 1 {
            self.wasted += words;
        }
    }

    /// Fraction of the arena occupied by released clauses.
    pub(crate) fn wasted_fraction(&self) -> f64 {
        if self.memory.is_empty() {
            0.0
        } else {
            self.wasted as f64 / self.memory.len() as f64
        }
    }

    pub(crate) fn num_clauses(&self) -> usize {
        self.clauses.len()
    }

    fn drain_new(&mut self) -> Vec<ClauseRef> {
        let pending = self.clauses[self.first_not_notified..].to_vec();
        self.first_not_notified = self.clauses.len();
        pending
    }

    fn drain_new_replayed(&mut self, level: usize) -> Vec<ClauseRef> {
        let pending = self.clauses[self.replay_cursor.get_copied()..].to_vec();
        self.replay_cursor.set(level, self.clauses.len());
        pending
    }

    fn has_pending(&self) -> bool {
        self.first_not_notified < self.clauses.len()
            || self.replay_cursor.get_copied() < self.clauses.len()
    }

    fn backtrack(&mut self, level: usize) {
        self.replay_cursor.backtrack(level);
    }

    /// Compact the arena, keeping exactly the supplied clauses. Reference
    /// counts of survivors are preserved; everyone holding a [`ClauseRef`]
    /// into this database must relocate it.
    pub(crate) fn collect(&mut self, keep: &FnvHashSet<ClauseRef>) -> ClauseRelocation {
        let mut relocation = ClauseRelocation {
            database: self.id,
            new_refs: FnvHashMap::default(),
        };
        let mut new_memory = Vec::with_capacity(self.memory.len());
        let mut new_clauses = Vec::with_capacity(keep.len());

        for old_ref in &self.clauses {
            if !keep.contains(old_ref) {
                continue;
            }
            let offset = old_ref.offset();
            let words = CLAUSE_HEADER_WORDS + self.memory[offset] as usize;
            let new_offset = new_memory.len();
            new_memory.extend_from_slice(&self.memory[offset..offset + words]);

            let new_ref = ClauseRef::new(self.id, new_offset);
            new_clauses.push(new_ref);
            let _ = relocation.new_refs.insert(*old_ref, new_ref);
        }

        debug!(
            "clause_db[{}]: collected {} -> {} clauses, {} -> {} words",
            self.name,
            self.clauses.len(),
            new_clauses.len(),
            self.memory.len(),
            new_memory.len()
        );

        self.memory = new_memory;
        self.clauses = new_clauses;
        self.wasted = 0;
        self.first_not_notified = self.clauses.len();
        self.replay_cursor = Cd::new(self.clauses.len());

        relocation
    }
}

/// The collection of clause databases of one solver.
#[derive(Debug, Default)]
pub(crate) struct ClauseFarm {
    databases: Vec<ClauseDatabase>,
}

impl ClauseFarm {
    pub(crate) fn new_database(&mut self, name: &str) -> usize {
        let id = self.databases.len();
        self.databases.push(ClauseDatabase::new(id, name));
        id
    }

    pub(crate) fn database(&self, id: usize) -> &ClauseDatabase {
        &self.databases[id]
    }

    pub(crate) fn database_mut(&mut self, id: usize) -> &mut ClauseDatabase {
        &mut self.databases[id]
    }

    pub(crate) fn clause(&self, cref: ClauseRef) -> Clause<'_> {
        self.databases[cref.database()].clause(cref)
    }

    pub(crate) fn clause_mut(&mut self, cref: ClauseRef) -> ClauseMut<'_> {
        self.databases[cref.database()].clause_mut(cref)
    }

    pub(crate) fn acquire(&mut self, cref: ClauseRef) {
        self.databases[cref.database()].acquire(cref);
    }

    pub(crate) fn release(&mut self, cref: ClauseRef) {
        self.databases[cref.database()].release(cref);
    }

    /// Copy a clause from a sibling database into `target`.
    pub(crate) fn adopt(&mut self, target: usize, cref: ClauseRef, level: usize) -> ClauseRef {
        sable_assert_simple!(
            cref.database() != target,
            "no reason to adopt a clause of the same database"
        );
        let (literals, rule_id) = {
            let clause = self.clause(cref);
            (clause.literals().collect::<Vec<_>>(), clause.rule_id())
        };
        self.databases[target].new_clause(&literals, rule_id, level)
    }

    /// Clauses not yet dispatched to once-only listeners, across all
    /// databases in registration order.
    pub(crate) fn drain_new(&mut self) -> Vec<ClauseRef> {
        let mut pending = Vec::new();
        for database in &mut self.databases {
            pending.append(&mut database.drain_new());
        }
        pending
    }

    /// Clauses not yet dispatched to context-dependent listeners; after a
    /// pop this includes everything created after the pop point again.
    pub(crate) fn drain_new_replayed(&mut self, level: usize) -> Vec<ClauseRef> {
        let mut pending = Vec::new();
        for database in &mut self.databases {
            pending.append(&mut database.drain_new_replayed(level));
        }
        pending
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.databases.iter().any(ClauseDatabase::has_pending)
    }

    pub(crate) fn backtrack(&mut self, level: usize) {
        for database in &mut self.databases {
            database.backtrack(level);
        }
    }
}
