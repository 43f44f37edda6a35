// ── In-place entity collection ──
//
// Entities live in cells that are mutated, never replaced, so handles
// given out to callers stay valid across reconnects. A fresh bootstrap
// inserts new ids and drops absent ones; existing cells only have their
// fields rewritten.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

/// A stable, shareable handle to one entity. Cloning the handle is
/// cheap; all clones observe the same live cell.
pub struct Entry<T>(Arc<RwLock<T>>);

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Entry<T> {
    fn new(value: T) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    /// Run `f` against the current value.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.0.read())
    }

    /// `true` if both handles refer to the same cell.
    pub fn ptr_eq(&self, other: &Entry<T>) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.0.write())
    }
}

impl<T: Clone> Entry<T> {
    /// A point-in-time copy of the entity.
    pub fn snapshot(&self) -> T {
        self.0.read().clone()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Entry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.read().fmt(f)
    }
}

// ── EntityCollection ────────────────────────────────────────────────

pub(crate) struct EntityCollection<T> {
    entries: DashMap<u32, Entry<T>>,
}

impl<T> EntityCollection<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Insert-or-update: create the cell with `init` when the id is new,
    /// then apply `update` in place either way.
    pub(crate) fn upsert_with(
        &self,
        id: u32,
        init: impl FnOnce() -> T,
        update: impl FnOnce(&mut T),
    ) -> Entry<T> {
        let entry = self
            .entries
            .entry(id)
            .or_insert_with(|| Entry::new(init()))
            .clone();
        entry.update(update);
        entry
    }

    pub(crate) fn get(&self, id: u32) -> Option<Entry<T>> {
        self.entries.get(&id).map(|r| r.value().clone())
    }

    pub(crate) fn contains(&self, id: u32) -> bool {
        self.entries.contains_key(&id)
    }

    /// Mutate an existing entity in place. Returns `None` if absent.
    pub(crate) fn update<R>(&self, id: u32, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.get(id).map(|entry| entry.update(f))
    }

    /// Drop every id not present in `keep`. Cells stay alive for anyone
    /// still holding an [`Entry`], but the collection forgets them.
    pub(crate) fn retain_ids(&self, keep: &HashSet<u32>) {
        self.entries.retain(|id, _| keep.contains(id));
    }

    /// All entries, sorted by id.
    pub(crate) fn iter_sorted(&self) -> Vec<(u32, Entry<T>)> {
        let mut all: Vec<_> = self
            .entries
            .iter()
            .map(|r| (*r.key(), r.value().clone()))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
