//! Registry of continuations waiting for tasks or parameter sets to finish.
//!
//! Keys are canonical: id sets are sorted and deduplicated so the same set
//! registered in a different order lands on the same entry. Reverse indexes
//! map a member id to the set keys containing it, so a stored result only
//! examines the watches it can affect.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::task::Waker;

use crate::engine::Engine;
use crate::error::Result;
use crate::table::WorkTable;
use crate::task::{ParameterSetId, TaskId};

/// What a waiter is waiting for.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum Watch {
    Task(TaskId),
    Tasks(Vec<TaskId>),
    ParameterSet(ParameterSetId),
    ParameterSets(Vec<ParameterSetId>),
}

/// Notification categories, in the order a pass visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Category {
    Task,
    Tasks,
    ParameterSet,
    ParameterSets,
}

impl Category {
    pub(crate) const ORDER: [Category; 4] = [
        Category::Task,
        Category::Tasks,
        Category::ParameterSet,
        Category::ParameterSets,
    ];
}

fn canonical(mut ids: Vec<usize>) -> Vec<usize> {
    ids.sort_unstable();
    ids.dedup();
    ids
}

impl Watch {
    pub(crate) fn tasks(ids: impl IntoIterator<Item = TaskId>) -> Self {
        Self::Tasks(canonical(ids.into_iter().collect()))
    }

    pub(crate) fn parameter_sets(ids: impl IntoIterator<Item = ParameterSetId>) -> Self {
        Self::ParameterSets(canonical(ids.into_iter().collect()))
    }

    fn category(&self) -> Category {
        match self {
            Self::Task(_) => Category::Task,
            Self::Tasks(_) => Category::Tasks,
            Self::ParameterSet(_) => Category::ParameterSet,
            Self::ParameterSets(_) => Category::ParameterSets,
        }
    }

    /// Every id the watch names exists in `table`.
    pub(crate) fn validate(&self, table: &WorkTable) -> Result<()> {
        match self {
            Self::Task(id) => table.find_task(*id).map(drop),
            Self::Tasks(ids) => ids.iter().try_for_each(|id| table.find_task(*id).map(drop)),
            Self::ParameterSet(id) => table.find_parameter_set_record(*id).map(drop),
            Self::ParameterSets(ids) => ids
                .iter()
                .try_for_each(|id| table.find_parameter_set_record(*id).map(drop)),
        }
    }

    /// The watched condition holds. Ids missing from `table` never hold.
    pub(crate) fn is_satisfied(&self, table: &WorkTable) -> bool {
        let task_done = |id: &TaskId| table.is_task_finished(*id).unwrap_or(false);
        let ps_done = |id: &ParameterSetId| table.is_parameter_set_finished(*id).unwrap_or(false);
        match self {
            Self::Task(id) => task_done(id),
            Self::Tasks(ids) => ids.iter().all(task_done),
            Self::ParameterSet(id) => ps_done(id),
            Self::ParameterSets(ids) => ids.iter().all(ps_done),
        }
    }
}

/// Shared between a suspended completion future and its registry entry.
#[derive(Default)]
pub(crate) struct ResumeSlot {
    fired: Cell<bool>,
    waker: RefCell<Option<Waker>>,
}

impl ResumeSlot {
    pub(crate) fn has_fired(&self) -> bool {
        self.fired.get()
    }

    pub(crate) fn set_waker(&self, waker: &Waker) {
        let mut slot = self.waker.borrow_mut();
        match slot.as_ref() {
            Some(current) if current.will_wake(waker) => {}
            _ => *slot = Some(waker.clone()),
        }
    }

    pub(crate) fn fire(&self) {
        self.fired.set(true);
        let waker = self.waker.borrow_mut().take();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

pub(crate) type Callback = Box<dyn FnOnce(&Engine) -> anyhow::Result<()>>;

pub(crate) enum Waiter {
    /// Wakes a suspended flow.
    Resume(std::rc::Rc<ResumeSlot>),
    /// Runs a registered callback.
    Callback(Callback),
}

/// Watches that became due, with their waiters in registration order.
pub(crate) type Due = Vec<(Watch, Vec<Waiter>)>;

#[derive(Default)]
pub(crate) struct WaiterRegistry {
    waiting: BTreeMap<Watch, Vec<Waiter>>,
    by_task: HashMap<TaskId, BTreeSet<Watch>>,
    by_parameter_set: HashMap<ParameterSetId, BTreeSet<Watch>>,
    /// Registered since they were last examined. May already be satisfied.
    fresh: Vec<Watch>,
}

impl WaiterRegistry {
    pub(crate) fn register(&mut self, watch: Watch, waiter: Waiter) {
        if !self.waiting.contains_key(&watch) {
            match &watch {
                Watch::Tasks(ids) => {
                    for id in ids {
                        self.by_task.entry(*id).or_default().insert(watch.clone());
                    }
                }
                Watch::ParameterSets(ids) => {
                    for id in ids {
                        self.by_parameter_set
                            .entry(*id)
                            .or_default()
                            .insert(watch.clone());
                    }
                }
                Watch::Task(_) | Watch::ParameterSet(_) => {}
            }
        }
        self.waiting.entry(watch.clone()).or_default().push(waiter);
        self.fresh.push(watch);
    }

    pub(crate) fn has_fresh(&self) -> bool {
        !self.fresh.is_empty()
    }

    /// Number of registered waiters.
    pub(crate) fn len(&self) -> usize {
        self.waiting.values().map(Vec::len).sum()
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }

    /// Remove and return the satisfied watches of `category` among those
    /// touched by `trigger` (a task and its parameter set) and the fresh ones.
    pub(crate) fn take_due(
        &mut self,
        category: Category,
        trigger: Option<(TaskId, Option<ParameterSetId>)>,
        table: &WorkTable,
    ) -> Due {
        let mut candidates = BTreeSet::new();

        let mut i = 0;
        while i < self.fresh.len() {
            if self.fresh[i].category() == category {
                candidates.insert(self.fresh.swap_remove(i));
            } else {
                i += 1;
            }
        }

        if let Some((task_id, ps_id)) = trigger {
            match category {
                Category::Task => {
                    candidates.insert(Watch::Task(task_id));
                }
                Category::Tasks => {
                    if let Some(keys) = self.by_task.get(&task_id) {
                        candidates.extend(keys.iter().cloned());
                    }
                }
                Category::ParameterSet => {
                    if let Some(ps_id) = ps_id {
                        candidates.insert(Watch::ParameterSet(ps_id));
                    }
                }
                Category::ParameterSets => {
                    if let Some(keys) = ps_id.and_then(|id| self.by_parameter_set.get(&id)) {
                        candidates.extend(keys.iter().cloned());
                    }
                }
            }
        }

        let mut due = Vec::new();
        for watch in candidates {
            if !self.waiting.contains_key(&watch) || !watch.is_satisfied(table) {
                continue;
            }
            if let Some(waiters) = self.waiting.remove(&watch) {
                self.unindex(&watch);
                due.push((watch, waiters));
            }
        }
        due
    }

    fn unindex(&mut self, watch: &Watch) {
        let (ids, index) = match watch {
            Watch::Tasks(ids) => (ids, &mut self.by_task),
            Watch::ParameterSets(ids) => (ids, &mut self.by_parameter_set),
            Watch::Task(_) | Watch::ParameterSet(_) => return,
        };
        for id in ids {
            if let Some(keys) = index.get_mut(id) {
                keys.remove(watch);
                if keys.is_empty() {
                    index.remove(id);
                }
            }
        }
    }
}

impl std::fmt::Debug for WaiterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaiterRegistry")
            .field("watches", &self.waiting.len())
            .field("waiters", &self.len())
            .field("fresh", &self.fresh.len())
            .finish()
    }
}

/// Rejects watches naming ids the table never handed out.
pub(crate) fn checked(watch: Watch, table: &WorkTable) -> Result<Watch> {
    watch.validate(table)?;
    Ok(watch)
}
