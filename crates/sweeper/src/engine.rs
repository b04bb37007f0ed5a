//! The engine context: work table, waiter registry and flow runtime.
//!
//! `Engine` is a cheap `Rc` handle. Everything lives on one thread; flows,
//! callbacks and the event loop all go through the same handle.

use std::cell::RefCell;
use std::future::Future;
use std::path::Path;
use std::rc::Rc;

use crate::completion::Completion;
use crate::error::{Result, SweepError};
use crate::runtime::{FlowHandle, Runtime};
use crate::table::WorkTable;
use crate::task::{Outcome, ParameterSetId, Params, TaskId};
use crate::waiters::{Category, Waiter, WaiterRegistry, Watch, checked};

struct Inner {
    table: RefCell<WorkTable>,
    waiters: RefCell<WaiterRegistry>,
    runtime: Runtime,
}

#[derive(Clone)]
pub struct Engine {
    inner: Rc<Inner>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("table", &*self.inner.table.borrow())
            .field("waiters", &*self.inner.waiters.borrow())
            .field("suspended_flows", &self.inner.runtime.suspended())
            .finish()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(Inner {
                table: RefCell::new(WorkTable::new()),
                waiters: RefCell::new(WaiterRegistry::default()),
                runtime: Runtime::default(),
            }),
        }
    }

    /// Read access to the table. Do not hold across an `.await`.
    pub fn with_table<R>(&self, f: impl FnOnce(&WorkTable) -> R) -> R {
        f(&self.inner.table.borrow())
    }

    fn with_table_mut<R>(&self, f: impl FnOnce(&mut WorkTable) -> R) -> R {
        f(&mut self.inner.table.borrow_mut())
    }

    pub fn set_command_builder<F>(&self, builder: F)
    where
        F: Fn(&Params, u32) -> String + Send + Sync + 'static,
    {
        self.with_table_mut(|t| t.set_command_builder(builder));
    }

    pub fn create_task(
        &self,
        command: impl Into<String>,
        input: Option<serde_json::Value>,
    ) -> TaskId {
        self.with_table_mut(|t| t.create_task(command, input))
    }

    pub fn find_or_create_parameter_set(&self, params: impl Into<Params>) -> ParameterSetId {
        self.with_table_mut(|t| t.find_or_create_parameter_set(params))
    }

    pub fn create_runs(&self, ps_id: ParameterSetId, n: usize) -> Result<Vec<TaskId>> {
        self.with_table_mut(|t| t.create_runs(ps_id, n))
    }

    pub fn create_runs_upto(&self, ps_id: ParameterSetId, target: usize) -> Result<Vec<TaskId>> {
        self.with_table_mut(|t| t.create_runs_upto(ps_id, target))
    }

    pub fn task_completion(&self, id: TaskId) -> Completion {
        Completion::new(self.clone(), Watch::Task(id))
    }

    /// Resolves once every task in `ids` is finished. Order and repeats do not matter.
    pub fn tasks_completion(&self, ids: impl IntoIterator<Item = TaskId>) -> Completion {
        Completion::new(self.clone(), Watch::tasks(ids))
    }

    /// Resolves once every run of `id` is finished.
    ///
    /// Awaiting a parameter set that is already finished resolves on the
    /// spot, without suspending. Contrast [`watch_parameter_set`], whose
    /// callback never runs at registration and waits for the next
    /// notification pass even when the set is already finished.
    ///
    /// [`watch_parameter_set`]: Engine::watch_parameter_set
    pub fn parameter_set_completion(&self, id: ParameterSetId) -> Completion {
        Completion::new(self.clone(), Watch::ParameterSet(id))
    }

    pub fn parameter_sets_completion(
        &self,
        ids: impl IntoIterator<Item = ParameterSetId>,
    ) -> Completion {
        Completion::new(self.clone(), Watch::parameter_sets(ids))
    }

    /// Run `callback` once task `id` is finished.
    ///
    /// Never fires during registration, even when the task is already
    /// finished: the next notification pass picks it up.
    pub fn watch_task<F>(&self, id: TaskId, callback: F) -> Result<()>
    where
        F: FnOnce(&Engine) -> anyhow::Result<()> + 'static,
    {
        self.watch(Watch::Task(id), callback)
    }

    pub fn watch_tasks<F>(&self, ids: impl IntoIterator<Item = TaskId>, callback: F) -> Result<()>
    where
        F: FnOnce(&Engine) -> anyhow::Result<()> + 'static,
    {
        self.watch(Watch::tasks(ids), callback)
    }

    /// Run `callback` once `id` is finished, on a notification pass after
    /// this call returns.
    pub fn watch_parameter_set<F>(&self, id: ParameterSetId, callback: F) -> Result<()>
    where
        F: FnOnce(&Engine) -> anyhow::Result<()> + 'static,
    {
        self.watch(Watch::ParameterSet(id), callback)
    }

    pub fn watch_parameter_sets<F>(
        &self,
        ids: impl IntoIterator<Item = ParameterSetId>,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(&Engine) -> anyhow::Result<()> + 'static,
    {
        self.watch(Watch::parameter_sets(ids), callback)
    }

    fn watch<F>(&self, watch: Watch, callback: F) -> Result<()>
    where
        F: FnOnce(&Engine) -> anyhow::Result<()> + 'static,
    {
        let watch = self.with_table(|t| checked(watch, t))?;
        self.register_waiter(watch, Waiter::Callback(Box::new(callback)));
        Ok(())
    }

    pub(crate) fn register_waiter(&self, watch: Watch, waiter: Waiter) {
        tracing::trace!(?watch, "Registering waiter");
        self.inner.waiters.borrow_mut().register(watch, waiter);
    }

    /// Start a flow. It runs right away up to its first suspension point.
    pub fn spawn<F>(&self, flow: F) -> FlowHandle
    where
        F: Future<Output = anyhow::Result<()>> + 'static,
    {
        self.inner.runtime.spawn(flow)
    }

    /// Flows currently parked on a completion or a join.
    pub fn suspended_flows(&self) -> usize {
        self.inner.runtime.suspended()
    }

    pub fn pending_waiters(&self) -> usize {
        self.inner.waiters.borrow().len()
    }

    /// Drop every record, pending waiter and suspended flow.
    pub fn clear(&self) {
        self.with_table_mut(WorkTable::clear);
        self.inner.waiters.borrow_mut().clear();
        self.inner.runtime.clear();
    }

    pub fn snapshot(&self) -> Result<Vec<u8>> {
        self.with_table(WorkTable::snapshot)
    }

    /// Replace the table with `blob`. Registered waiters stay and are
    /// evaluated against the restored table.
    pub fn restore(&self, blob: &[u8]) -> Result<()> {
        self.with_table_mut(|t| t.restore(blob))
    }

    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let blob = self.snapshot()?;
        std::fs::write(path, &blob)?;
        tracing::info!(path = %path.display(), bytes = blob.len(), "Saved snapshot");
        Ok(())
    }

    pub fn load_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let blob = std::fs::read(path)?;
        self.restore(&blob)?;
        tracing::info!(path = %path.display(), "Loaded snapshot");
        Ok(())
    }

    pub(crate) fn command_of(&self, id: TaskId) -> Result<String> {
        self.with_table(|t| t.command_of(id))
    }

    pub(crate) fn store_result(&self, id: TaskId, outcome: Outcome) -> Result<()> {
        self.with_table_mut(|t| t.store_result(id, outcome))
    }

    pub(crate) fn take_flow_failure(&self) -> Option<SweepError> {
        self.inner
            .runtime
            .take_failure()
            .map(|(_, e)| SweepError::Flow(e))
    }

    /// Resume ready flows, then run notification passes until one fires
    /// nothing and no new watch is waiting to be examined.
    ///
    /// `trigger` is the task whose result was just stored. Returns the
    /// number of waiters fired.
    pub(crate) fn settle(&self, trigger: Option<TaskId>) -> Result<usize> {
        let mut trigger = match trigger {
            Some(id) => {
                let ps_id = self.with_table(|t| t.find_task(id).map(|task| task.parameter_set_id()))?;
                Some((id, ps_id))
            }
            None => None,
        };

        self.inner.runtime.drain();

        let mut fired = 0;
        loop {
            let mut fired_in_pass = 0;
            for category in Category::ORDER {
                let due = {
                    let table = self.inner.table.borrow();
                    self.inner
                        .waiters
                        .borrow_mut()
                        .take_due(category, trigger, &table)
                };
                for (watch, waiters) in due {
                    tracing::trace!(?watch, count = waiters.len(), "Firing waiters");
                    for waiter in waiters {
                        match waiter {
                            Waiter::Resume(slot) => slot.fire(),
                            Waiter::Callback(callback) => {
                                callback(self).map_err(SweepError::Flow)?;
                            }
                        }
                        fired_in_pass += 1;
                        self.inner.runtime.drain();
                    }
                }
            }
            trigger = None;
            fired += fired_in_pass;
            if fired_in_pass == 0 && !self.inner.waiters.borrow().has_fresh() {
                break;
            }
        }
        Ok(fired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn ok(output: Vec<f64>) -> Outcome {
        Outcome {
            return_code: 0,
            place_id: 0,
            start_at: 0,
            finish_at: 1,
            output,
        }
    }

    #[test]
    fn completion_of_finished_task_does_not_suspend() {
        let engine = Engine::new();
        let id = engine.create_task("a", None);
        engine.store_result(id, ok(vec![])).unwrap();

        let done = Rc::new(Cell::new(false));
        let (e, d) = (engine.clone(), done.clone());
        engine.spawn(async move {
            e.task_completion(id).await?;
            d.set(true);
            Ok(())
        });
        assert!(done.get());
        assert_eq!(engine.suspended_flows(), 0);
        assert_eq!(engine.pending_waiters(), 0);
    }

    #[test]
    fn flow_resumes_after_result_and_settle() {
        let engine = Engine::new();
        let ps = engine.find_or_create_parameter_set([1, 2]);
        let runs = engine.create_runs(ps, 2).unwrap();

        let average = Rc::new(RefCell::new(Vec::new()));
        let (e, avg) = (engine.clone(), average.clone());
        engine.spawn(async move {
            e.parameter_set_completion(ps).await?;
            *avg.borrow_mut() = e.with_table(|t| t.find_parameter_set(ps)?.average_results())?;
            Ok(())
        });
        assert_eq!(engine.suspended_flows(), 1);

        engine.store_result(runs[0], ok(vec![1.0])).unwrap();
        assert_eq!(engine.settle(Some(runs[0])).unwrap(), 0);
        assert!(average.borrow().is_empty());

        engine.store_result(runs[1], ok(vec![3.0])).unwrap();
        assert_eq!(engine.settle(Some(runs[1])).unwrap(), 1);
        assert_eq!(*average.borrow(), vec![2.0]);
        assert_eq!(engine.suspended_flows(), 0);
    }

    #[test]
    fn callback_on_finished_parameter_set_fires_on_next_pass_once() {
        let engine = Engine::new();
        let ps = engine.find_or_create_parameter_set([0]);
        let run = engine.create_runs(ps, 1).unwrap()[0];
        engine.store_result(run, ok(vec![])).unwrap();

        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();
        engine
            .watch_parameter_set(ps, move |_| {
                c.set(c.get() + 1);
                Ok(())
            })
            .unwrap();
        assert_eq!(calls.get(), 0);

        // Awaiting the same finished set does not wait for a pass.
        let awaited = Rc::new(Cell::new(false));
        let (e, a) = (engine.clone(), awaited.clone());
        engine.spawn(async move {
            e.parameter_set_completion(ps).await?;
            a.set(true);
            Ok(())
        });
        assert!(awaited.get());
        assert_eq!(calls.get(), 0);

        engine.settle(None).unwrap();
        assert_eq!(calls.get(), 1);
        engine.settle(None).unwrap();
        engine.settle(Some(run)).unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn notification_visits_categories_in_order() {
        let engine = Engine::new();
        let ps = engine.find_or_create_parameter_set([0]);
        let run = engine.create_runs(ps, 1).unwrap()[0];

        let order = Rc::new(RefCell::new(Vec::new()));
        let push = |label: &'static str| {
            let order = order.clone();
            move |_: &Engine| -> anyhow::Result<()> {
                order.borrow_mut().push(label);
                Ok(())
            }
        };
        engine.watch_parameter_sets([ps], push("ps-set")).unwrap();
        engine.watch_parameter_set(ps, push("ps")).unwrap();
        engine.watch_tasks([run], push("task-set")).unwrap();
        engine.watch_task(run, push("task")).unwrap();
        engine.settle(None).unwrap();
        assert!(order.borrow().is_empty());

        engine.store_result(run, ok(vec![])).unwrap();
        engine.settle(Some(run)).unwrap();
        assert_eq!(*order.borrow(), vec!["task", "task-set", "ps", "ps-set"]);
    }

    #[test]
    fn callback_can_create_work_and_register_more_watches() {
        let engine = Engine::new();
        let a = engine.create_task("a", None);
        let chained = Rc::new(Cell::new(false));

        let flag = chained.clone();
        engine
            .watch_task(a, move |e| {
                let b = e.create_task("b", None);
                e.store_result(b, ok(vec![]))?;
                e.watch_task(b, move |_| {
                    flag.set(true);
                    Ok(())
                })?;
                Ok(())
            })
            .unwrap();

        engine.store_result(a, ok(vec![])).unwrap();
        engine.settle(Some(a)).unwrap();
        assert!(chained.get());
        assert_eq!(engine.with_table(WorkTable::len), 2);
    }

    #[test]
    fn failing_callback_surfaces_as_flow_error() {
        let engine = Engine::new();
        let a = engine.create_task("a", None);
        engine
            .watch_task(a, |_| Err(anyhow::anyhow!("bad callback")))
            .unwrap();
        engine.store_result(a, ok(vec![])).unwrap();
        let err = engine.settle(Some(a)).unwrap_err();
        assert!(matches!(err, SweepError::Flow(_)));
    }

    #[test]
    fn unknown_ids_fail_fast() {
        let engine = Engine::new();
        assert!(engine.watch_task(0, |_| Ok(())).is_err());

        let failed = Rc::new(Cell::new(false));
        let (e, f) = (engine.clone(), failed.clone());
        engine.spawn(async move {
            if e.parameter_set_completion(3).await.is_err() {
                f.set(true);
            }
            Ok(())
        });
        assert!(failed.get());
    }

    #[test]
    fn set_completion_ignores_order_and_repeats() {
        let engine = Engine::new();
        let a = engine.create_task("a", None);
        let b = engine.create_task("b", None);
        let done = Rc::new(Cell::new(false));
        let (e, d) = (engine.clone(), done.clone());
        engine.spawn(async move {
            e.tasks_completion([b, a, b]).await?;
            d.set(true);
            Ok(())
        });

        engine.store_result(b, ok(vec![])).unwrap();
        engine.settle(Some(b)).unwrap();
        assert!(!done.get());
        engine.store_result(a, ok(vec![])).unwrap();
        engine.settle(Some(a)).unwrap();
        assert!(done.get());
    }

    #[test]
    fn clear_drops_waiters_and_flows() {
        let engine = Engine::new();
        let a = engine.create_task("a", None);
        let e = engine.clone();
        engine.spawn(async move {
            e.task_completion(a).await?;
            Ok(())
        });
        engine.watch_task(a, |_| Ok(())).unwrap();
        engine.clear();
        assert_eq!(engine.pending_waiters(), 0);
        assert_eq!(engine.suspended_flows(), 0);
        assert!(engine.with_table(WorkTable::is_empty));
    }

    #[test]
    fn snapshot_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.json");

        let engine = Engine::new();
        let ps = engine.find_or_create_parameter_set([1, 2]);
        let runs = engine.create_runs(ps, 2).unwrap();
        engine.store_result(runs[0], ok(vec![0.5])).unwrap();
        engine.save_snapshot(&path).unwrap();

        let restored = Engine::new();
        restored.load_snapshot(&path).unwrap();
        let same = engine.with_table(|a| restored.with_table(|b| a.tasks() == b.tasks()));
        assert!(same);
        assert_eq!(restored.find_or_create_parameter_set([1, 2]), ps);
    }
}
