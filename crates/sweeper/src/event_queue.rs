//! Deterministic discrete-event simulation of a pool of worker places.
//!
//! Places pick up pending items in FIFO order, lowest free place first.
//! `pop` advances the simulated clock to the earliest finish time and hands
//! back that item. Nothing here sleeps or does I/O.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Simulated time, in ticks.
pub type Tick = i64;

/// An item that finished on a place.
#[derive(Debug, Clone, PartialEq)]
pub struct Completed<T> {
    pub item: T,
    pub place_id: i64,
    pub start_at: Tick,
    pub finish_at: Tick,
}

#[derive(Debug)]
struct Running<T> {
    item: T,
    start_at: Tick,
}

#[derive(Debug)]
pub struct EventQueue<T> {
    now: Tick,
    num_places: usize,
    free: BTreeSet<i64>,
    /// Keyed by `(finish_at, place_id)` so equal finish times complete in
    /// place order.
    running: BTreeMap<(Tick, i64), Running<T>>,
    pending: VecDeque<(T, Tick)>,
}

impl<T> EventQueue<T> {
    /// A queue with places `0..num_places`, all free, clock at 0.
    pub fn new(num_places: usize) -> Self {
        Self {
            now: 0,
            num_places,
            free: (0..num_places as i64).collect(),
            running: BTreeMap::new(),
            pending: VecDeque::new(),
        }
    }

    pub fn now(&self) -> Tick {
        self.now
    }

    pub fn num_places(&self) -> usize {
        self.num_places
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn running_len(&self) -> usize {
        self.running.len()
    }

    /// No item is pending or running.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.running.is_empty()
    }

    /// Queue one item that takes `duration` ticks. Negative durations count as 0.
    pub fn push(&mut self, item: T, duration: Tick) {
        self.pending.push_back((item, duration.max(0)));
    }

    pub fn push_all<I>(&mut self, items: I)
    where
        I: IntoIterator<Item = (T, Tick)>,
    {
        for (item, duration) in items {
            self.push(item, duration);
        }
    }

    /// Fill free places, then complete the item with the earliest finish time.
    ///
    /// Returns `None` when nothing is running.
    pub fn pop(&mut self) -> Option<Completed<T>> {
        self.dispatch();

        let ((finish_at, place_id), running) = self.running.pop_first()?;
        self.now = finish_at;
        self.free.insert(place_id);
        tracing::trace!(place_id, finish_at, "Simulated item finished");

        Some(Completed {
            item: running.item,
            place_id,
            start_at: running.start_at,
            finish_at,
        })
    }

    fn dispatch(&mut self) {
        while !self.pending.is_empty() {
            let Some(place_id) = self.free.pop_first() else {
                break;
            };
            let Some((item, duration)) = self.pending.pop_front() else {
                self.free.insert(place_id);
                break;
            };
            let start_at = self.now;
            let finish_at = start_at.saturating_add(duration);
            tracing::trace!(place_id, start_at, finish_at, "Simulated item started");
            self.running
                .insert((finish_at, place_id), Running { item, start_at });
        }
    }
}
