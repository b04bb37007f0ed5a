//! Suspension points: futures that resolve once watched work is finished.

use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::engine::Engine;
use crate::error::Result;
use crate::waiters::{ResumeSlot, Waiter, Watch};

enum State {
    Unpolled,
    Waiting(Rc<ResumeSlot>),
    Done,
}

/// Resolves once the watched task(s) or parameter set(s) are finished.
///
/// A condition that already holds on first poll resolves without
/// suspending. Otherwise the owning flow is parked until a notification
/// pass finds the condition satisfied. Unknown ids resolve to `OutOfRange`.
#[must_use = "completions do nothing unless awaited"]
pub struct Completion {
    engine: Engine,
    watch: Watch,
    state: State,
}

impl Completion {
    pub(crate) fn new(engine: Engine, watch: Watch) -> Self {
        Self {
            engine,
            watch,
            state: State::Unpolled,
        }
    }
}

impl Future for Completion {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match &this.state {
            State::Done => Poll::Ready(Ok(())),
            State::Waiting(slot) => {
                if slot.has_fired() {
                    this.state = State::Done;
                    Poll::Ready(Ok(()))
                } else {
                    slot.set_waker(cx.waker());
                    Poll::Pending
                }
            }
            State::Unpolled => {
                let satisfied = this.engine.with_table(|table| {
                    this.watch.validate(table)?;
                    Ok::<_, crate::SweepError>(this.watch.is_satisfied(table))
                });
                match satisfied {
                    Err(e) => {
                        this.state = State::Done;
                        Poll::Ready(Err(e))
                    }
                    Ok(true) => {
                        this.state = State::Done;
                        Poll::Ready(Ok(()))
                    }
                    Ok(false) => {
                        let slot = Rc::new(ResumeSlot::default());
                        slot.set_waker(cx.waker());
                        this.engine
                            .register_waiter(this.watch.clone(), Waiter::Resume(slot.clone()));
                        this.state = State::Waiting(slot);
                        Poll::Pending
                    }
                }
            }
        }
    }
}
