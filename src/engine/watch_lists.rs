//! Index-keyed watch lists with removal during iteration. Both the clausal
//! propagation engine (literal-keyed lists of clause references) and the
//! arithmetic plugin's assigned-variable watches (variable-keyed lists of
//! variable-list references) use this structure.
//!
//! Iteration detaches the list under the key: each step either keeps or
//! removes the current entry, and [`WatchLists::reattach`] writes the kept
//! prefix back. Entries added to the same key while its list is detached are
//! preserved behind the kept prefix, so watch maintenance may re-add to the
//! list it is walking.

use crate::sable_assert_simple;

#[derive(Debug, Clone)]
pub(crate) struct WatchLists<R> {
    lists: Vec<Vec<R>>,
    needs_cleanup: Vec<bool>,
}

impl<R> Default for WatchLists<R> {
    fn default() -> Self {
        WatchLists {
            lists: Vec::new(),
            needs_cleanup: Vec::new(),
        }
    }
}

impl<R: Copy> WatchLists<R> {
    fn resize_to_fit(&mut self, key: usize) {
        if key >= self.lists.len() {
            self.lists.resize_with(key + 1, Vec::new);
            self.needs_cleanup.resize(key + 1, false);
        }
    }

    pub(crate) fn add(&mut self, key: usize, entry: R) {
        self.resize_to_fit(key);
        self.lists[key].push(entry);
    }

    /// Mark the list of `key` for a lazy purge by the next [`Self::clean`].
    pub(crate) fn mark_for_cleanup(&mut self, key: usize) {
        self.resize_to_fit(key);
        self.needs_cleanup[key] = true;
    }

    /// Purge entries failing the predicate from every marked list; survivors
    /// keep their relative order.
    pub(crate) fn clean(&mut self, mut keep: impl FnMut(R) -> bool) {
        for (key, marked) in self.needs_cleanup.iter_mut().enumerate() {
            if *marked {
                self.lists[key].retain(|entry| keep(*entry));
                *marked = false;
            }
        }
    }

    pub(crate) fn list(&self, key: usize) -> &[R] {
        self.lists.get(key).map_or(&[], Vec::as_slice)
    }

    /// Detach the list of `key` for iteration with in-place removal.
    pub(crate) fn detach(&mut self, key: usize) -> DetachedWatchList<R> {
        self.resize_to_fit(key);
        DetachedWatchList {
            key,
            entries: std::mem::take(&mut self.lists[key]),
            kept: 0,
            current: 0,
        }
    }

    /// Write the kept prefix of a detached list back; entries added under
    /// the key in the meantime stay at the tail.
    pub(crate) fn reattach(&mut self, mut detached: DetachedWatchList<R>) {
        while !detached.done() {
            detached.next_and_keep();
        }
        let key = detached.key;
        detached.entries.truncate(detached.kept);
        detached.entries.append(&mut self.lists[key]);
        self.lists[key] = detached.entries;
    }

    /// Apply `map` to every entry of every list, dropping entries for which
    /// it returns `None`.
    pub(crate) fn relocate(&mut self, mut map: impl FnMut(R) -> Option<R>) {
        for list in &mut self.lists {
            let mut kept = Vec::with_capacity(list.len());
            for entry in list.drain(..) {
                if let Some(new_entry) = map(entry) {
                    kept.push(new_entry);
                }
            }
            *list = kept;
        }
    }
}

/// Positional iterator over one detached watch list. Finishing it through
/// [`WatchLists::reattach`] truncates the list to the kept prefix; dropping
/// it without reattaching loses the list, so don't.
#[derive(Debug)]
pub(crate) struct DetachedWatchList<R> {
    key: usize,
    entries: Vec<R>,
    kept: usize,
    current: usize,
}

impl<R: Copy> DetachedWatchList<R> {
    pub(crate) fn done(&self) -> bool {
        self.current == self.entries.len()
    }

    pub(crate) fn current(&self) -> R {
        sable_assert_simple!(!self.done());
        self.entries[self.current]
    }

    pub(crate) fn next_and_keep(&mut self) {
        let entry = self.entries[self.current];
        self.entries[self.kept] = entry;
        self.kept += 1;
        self.current += 1;
    }

    pub(crate) fn next_and_remove(&mut self) {
        self.current += 1;
    }
}
