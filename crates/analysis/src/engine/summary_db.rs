use std::{
    collections::{btree_map, BTreeMap},
    sync::Arc,
};

use dashmap::{mapref::entry::Entry, DashMap};
use lattix_ir::FuncRef;

use super::FuncStatus;

/// Summaries of the functions analyzed so far. A summary is written once and
/// never replaced.
#[derive(Debug, Clone)]
pub struct SummaryDb<S> {
    summaries: BTreeMap<FuncRef, Arc<S>>,
}

impl<S> SummaryDb<S> {
    pub fn new() -> Self {
        Self {
            summaries: BTreeMap::new(),
        }
    }

    /// Records the summary of `func`. Returns `false` and keeps the existing
    /// summary if `func` is already summarized.
    pub fn insert(&mut self, func: FuncRef, summary: Arc<S>) -> bool {
        match self.summaries.entry(func) {
            btree_map::Entry::Vacant(entry) => {
                entry.insert(summary);
                true
            }
            btree_map::Entry::Occupied(_) => false,
        }
    }

    pub fn get(&self, func: FuncRef) -> Option<&Arc<S>> {
        self.summaries.get(&func)
    }

    pub fn contains(&self, func: FuncRef) -> bool {
        self.summaries.contains_key(&func)
    }

    /// Iterates over the summaries in ascending function order.
    pub fn iter(&self) -> impl Iterator<Item = (FuncRef, &Arc<S>)> {
        self.summaries.iter().map(|(&func, summary)| (func, summary))
    }

    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }

    pub fn into_map(self) -> BTreeMap<FuncRef, Arc<S>> {
        self.summaries
    }
}

impl<S> Default for SummaryDb<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub enum Slot<S> {
    InProgress,
    Summarized(Arc<S>),
}

/// A summary database that several workers fill concurrently.
///
/// A function moves from not started to [`Slot::InProgress`] exactly once,
/// through [`SharedSummaryDb::try_claim`]. Only the worker that claimed it
/// publishes its summary.
#[derive(Debug)]
pub struct SharedSummaryDb<S> {
    slots: DashMap<FuncRef, Slot<S>>,
}

impl<S> SharedSummaryDb<S> {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Marks `func` as in progress. Returns `false` if another worker claimed
    /// it before.
    pub fn try_claim(&self, func: FuncRef) -> bool {
        match self.slots.entry(func) {
            Entry::Vacant(entry) => {
                entry.insert(Slot::InProgress);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Publishes the summary of a claimed function. Returns `false` and keeps
    /// the existing summary if `func` is already summarized.
    pub fn publish(&self, func: FuncRef, summary: Arc<S>) -> bool {
        let mut slot = self.slots.entry(func).or_insert(Slot::InProgress);
        if matches!(*slot, Slot::Summarized(_)) {
            return false;
        }

        *slot = Slot::Summarized(summary);
        true
    }

    pub fn get(&self, func: FuncRef) -> Option<Arc<S>> {
        match self.slots.get(&func).as_deref() {
            Some(Slot::Summarized(summary)) => Some(summary.clone()),
            _ => None,
        }
    }

    pub fn status(&self, func: FuncRef) -> FuncStatus {
        match self.slots.get(&func).as_deref() {
            None => FuncStatus::NotStarted,
            Some(Slot::InProgress) => FuncStatus::InProgress,
            Some(Slot::Summarized(_)) => FuncStatus::Summarized,
        }
    }

    /// Collects every published summary. Functions still in progress are left
    /// out.
    pub fn into_map(self) -> BTreeMap<FuncRef, Arc<S>> {
        self.slots
            .into_iter()
            .filter_map(|(func, slot)| match slot {
                Slot::Summarized(summary) => Some((func, summary)),
                Slot::InProgress => None,
            })
            .collect()
    }
}

impl<S> Default for SharedSummaryDb<S> {
    fn default() -> Self {
        Self::new()
    }
}
