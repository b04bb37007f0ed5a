//! Single-threaded cooperative executor for logical flows.
//!
//! A flow is a future that runs until it awaits a completion. Wakers push
//! the flow id onto a shared ready queue; `drain` polls ready flows until
//! the queue is empty. Flows are taken out of the table while polled so a
//! flow may spawn other flows.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Wake, Waker};

pub type FlowId = u64;

type BoxFlow = Pin<Box<dyn Future<Output = anyhow::Result<()>>>>;

type ReadyQueue = Arc<Mutex<VecDeque<FlowId>>>;

fn lock(queue: &ReadyQueue) -> MutexGuard<'_, VecDeque<FlowId>> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

struct FlowWaker {
    id: FlowId,
    ready: ReadyQueue,
}

impl Wake for FlowWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        lock(&self.ready).push_back(self.id);
    }
}

struct Flow {
    future: BoxFlow,
    waker: Waker,
}

/// Completion state shared with [`FlowHandle`]s.
#[derive(Default)]
struct Joins {
    /// `true` for flows that returned `Ok`.
    done: HashMap<FlowId, bool>,
    joiners: HashMap<FlowId, Vec<Waker>>,
}

#[derive(Default)]
pub(crate) struct Runtime {
    next_id: Cell<FlowId>,
    flows: RefCell<HashMap<FlowId, Flow>>,
    ready: ReadyQueue,
    joins: Rc<RefCell<Joins>>,
    failures: RefCell<Vec<(FlowId, anyhow::Error)>>,
}

impl Runtime {
    /// Register a flow and poll it up to its first suspension point.
    pub(crate) fn spawn<F>(&self, future: F) -> FlowHandle
    where
        F: Future<Output = anyhow::Result<()>> + 'static,
    {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        tracing::trace!(flow_id = id, "Spawning flow");

        let waker = Waker::from(Arc::new(FlowWaker {
            id,
            ready: self.ready.clone(),
        }));
        self.poll_flow(
            id,
            Flow {
                future: Box::pin(future),
                waker,
            },
        );

        FlowHandle {
            id,
            joins: self.joins.clone(),
        }
    }

    /// Poll every ready flow until none is left. Returns how many polls ran.
    pub(crate) fn drain(&self) -> usize {
        let mut polled = 0;
        loop {
            let next = lock(&self.ready).pop_front();
            let Some(id) = next else {
                break;
            };
            // Stale wake-ups for finished flows are expected.
            let flow = self.flows.borrow_mut().remove(&id);
            if let Some(flow) = flow {
                self.poll_flow(id, flow);
                polled += 1;
            }
        }
        polled
    }

    fn poll_flow(&self, id: FlowId, mut flow: Flow) {
        let waker = flow.waker.clone();
        let mut cx = Context::from_waker(&waker);
        match flow.future.as_mut().poll(&mut cx) {
            Poll::Pending => {
                self.flows.borrow_mut().insert(id, flow);
            }
            Poll::Ready(result) => self.finish(id, result),
        }
    }

    fn finish(&self, id: FlowId, result: anyhow::Result<()>) {
        let ok = result.is_ok();
        if let Err(e) = result {
            tracing::error!(flow_id = id, error = %format!("{e:#}"), "Flow failed");
            self.failures.borrow_mut().push((id, e));
        } else {
            tracing::trace!(flow_id = id, "Flow finished");
        }

        let joiners = {
            let mut joins = self.joins.borrow_mut();
            joins.done.insert(id, ok);
            joins.joiners.remove(&id).unwrap_or_default()
        };
        for waker in joiners {
            waker.wake();
        }
    }

    /// Flows currently suspended.
    pub(crate) fn suspended(&self) -> usize {
        self.flows.borrow().len()
    }

    pub(crate) fn take_failure(&self) -> Option<(FlowId, anyhow::Error)> {
        let mut failures = self.failures.borrow_mut();
        if failures.is_empty() {
            None
        } else {
            Some(failures.remove(0))
        }
    }

    /// Drop every suspended flow and any queued wake-up.
    pub(crate) fn clear(&self) {
        let dropped = std::mem::take(&mut *self.flows.borrow_mut());
        lock(&self.ready).clear();
        if !dropped.is_empty() {
            tracing::debug!(count = dropped.len(), "Dropped suspended flows");
        }
    }
}

/// Handle to a spawned flow. Awaiting it waits for the flow to finish.
///
/// The flow runs whether or not the handle is awaited or kept.
#[derive(Clone)]
pub struct FlowHandle {
    id: FlowId,
    joins: Rc<RefCell<Joins>>,
}

impl FlowHandle {
    pub fn id(&self) -> FlowId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.joins.borrow().done.contains_key(&self.id)
    }
}

impl std::fmt::Debug for FlowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowHandle")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl Future for FlowHandle {
    /// The flow's own error is reported to the event loop; joiners only
    /// learn that it failed.
    type Output = anyhow::Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut joins = self.joins.borrow_mut();
        match joins.done.get(&self.id) {
            Some(true) => Poll::Ready(Ok(())),
            Some(false) => Poll::Ready(Err(anyhow::anyhow!("flow {} failed", self.id))),
            None => {
                let wakers = joins.joiners.entry(self.id).or_default();
                if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}
