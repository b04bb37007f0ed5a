//! In-process stand-in for a worker pool, backed by [`EventQueue`].

use async_trait::async_trait;

use super::ResultSource;
use crate::bridge::protocol::{SubmitBatch, TaskResult, TaskSubmission};
use crate::error::Result;
use crate::event_queue::{EventQueue, Tick};
use crate::task::TaskId;

/// What a simulated worker reports for one task.
#[derive(Debug, Clone, PartialEq)]
pub struct Simulation {
    pub output: Vec<f64>,
    pub duration: Tick,
    pub return_code: i64,
}

impl Simulation {
    pub fn new(output: Vec<f64>, duration: Tick) -> Self {
        Self {
            output,
            duration,
            return_code: 0,
        }
    }

    pub fn with_return_code(mut self, return_code: i64) -> Self {
        self.return_code = return_code;
        self
    }
}

#[derive(Debug)]
struct Pending {
    id: TaskId,
    return_code: i64,
    output: Vec<f64>,
}

/// Deterministic workers: each submitted task is mapped through `simulate`
/// and completes on the [`EventQueue`] clock.
pub struct SimulatedWorkers<F> {
    queue: EventQueue<Pending>,
    simulate: F,
    batches: Vec<Vec<TaskId>>,
    closed: bool,
}

impl<F> SimulatedWorkers<F>
where
    F: FnMut(&TaskSubmission) -> Simulation,
{
    pub fn new(num_places: usize, simulate: F) -> Self {
        Self {
            queue: EventQueue::new(num_places),
            simulate,
            batches: Vec::new(),
            closed: false,
        }
    }

    /// Task ids of every batch received so far, empty batches included.
    pub fn batches(&self) -> &[Vec<TaskId>] {
        &self.batches
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Current simulated time.
    pub fn now(&self) -> Tick {
        self.queue.now()
    }
}

#[async_trait(?Send)]
impl<F> ResultSource for SimulatedWorkers<F>
where
    F: FnMut(&TaskSubmission) -> Simulation,
{
    async fn submit(&mut self, batch: SubmitBatch) -> Result<()> {
        self.batches.push(batch.iter().map(|t| t.id).collect());
        for task in &batch {
            let sim = (self.simulate)(task);
            self.queue.push(
                Pending {
                    id: task.id,
                    return_code: sim.return_code,
                    output: sim.output,
                },
                sim.duration,
            );
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<TaskResult>> {
        let Some(done) = self.queue.pop() else {
            return Ok(None);
        };
        Ok(Some(TaskResult {
            id: done.item.id,
            return_code: done.item.return_code,
            place_id: done.place_id,
            start_at: done.start_at,
            finish_at: done.finish_at,
            output: done.item.output,
        }))
    }

    async fn close(&mut self) -> Result<()> {
        self.batches.push(Vec::new());
        self.closed = true;
        Ok(())
    }
}
