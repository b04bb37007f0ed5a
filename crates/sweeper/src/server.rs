//! The event loop.
//!
//! Each round:
//! 1. Resume flows that are ready and fire due waiters
//! 2. Submit every task created since the last round, in id order
//! 3. Receive exactly one result (or end of stream)
//! 4. Store it and notify the waiters it affects
//!
//! The loop stops once nothing is in flight and the driver flow has
//! finished, when the result stream ends, or on the first fatal error. The
//! close frame is sent in every case.

use std::future::Future;

use crate::bridge::protocol::{SubmitBatch, TaskResult, TaskSubmission};
use crate::config::ServerConfig;
use crate::engine::Engine;
use crate::error::{Result, SweepError};
use crate::runtime::FlowHandle;
use crate::task::TaskId;
use crate::transport::ResultSource;

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Nothing left in flight and the driver finished.
    Drained,
    /// The workers ended the result stream.
    StreamClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub submitted: usize,
    pub received: usize,
    pub end: EndReason,
    pub driver_finished: bool,
}

pub struct Server<S> {
    engine: Engine,
    source: S,
    config: ServerConfig,
    /// Every task id below this has been considered for submission.
    submitted_upto: TaskId,
    /// Table generation `submitted_upto` refers to.
    generation: u64,
    in_flight: usize,
    submitted: usize,
    received: usize,
}

impl<S: ResultSource> Server<S> {
    pub fn new(engine: Engine, source: S, config: ServerConfig) -> Self {
        let generation = engine.with_table(|t| t.generation());
        Self {
            engine,
            source,
            config,
            submitted_upto: 0,
            generation,
            in_flight: 0,
            submitted: 0,
            received: 0,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Spawn `driver` as a flow and run the loop until it is done.
    pub async fn run<F>(&mut self, driver: F) -> Result<RunReport>
    where
        F: Future<Output = anyhow::Result<()>> + 'static,
    {
        let driver = self.engine.spawn(driver);
        tracing::info!(flow_id = driver.id(), "Event loop starting");

        let outcome = self.drive(&driver).await;

        if let Err(e) = self.source.close().await {
            tracing::warn!(error = %e, "Failed to send close frame");
        }

        match &outcome {
            Ok(report) => tracing::info!(
                submitted = report.submitted,
                received = report.received,
                end = ?report.end,
                driver_finished = report.driver_finished,
                "Event loop stopped"
            ),
            Err(e) => tracing::error!(error = %e, "Event loop failed"),
        }
        outcome
    }

    async fn drive(&mut self, driver: &FlowHandle) -> Result<RunReport> {
        let mut idle_rechecks = 0;
        loop {
            self.settle(None)?;
            self.submit_pending().await?;

            if self.in_flight == 0 {
                if driver.is_finished() {
                    let suspended = self.engine.suspended_flows();
                    if suspended > 0 {
                        tracing::warn!(
                            flows = suspended,
                            "Driver finished with flows still suspended"
                        );
                    }
                    return Ok(self.report(EndReason::Drained, true));
                }
                if idle_rechecks >= self.config.max_idle_rechecks {
                    let flows = self.engine.suspended_flows();
                    tracing::warn!(flows, "Nothing in flight and no flow can make progress");
                    return Err(SweepError::Stalled { flows });
                }
                idle_rechecks += 1;
                tracing::debug!(attempt = idle_rechecks, "Idle, re-checking");
                tokio::time::sleep(self.config.idle_wait).await;
                continue;
            }
            idle_rechecks = 0;

            let Some(result) = self.source.receive().await? else {
                if self.in_flight > 0 {
                    tracing::warn!(
                        in_flight = self.in_flight,
                        "Result stream ended with tasks still in flight"
                    );
                }
                return Ok(self.report(EndReason::StreamClosed, driver.is_finished()));
            };
            let id = self.accept(result)?;
            self.settle(Some(id))?;
        }
    }

    fn settle(&self, trigger: Option<TaskId>) -> Result<()> {
        self.engine.settle(trigger)?;
        match self.engine.take_flow_failure() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn submit_pending(&mut self) -> Result<()> {
        let (end, generation) = self.engine.with_table(|t| (t.len(), t.generation()));
        if generation != self.generation {
            tracing::debug!(
                stale_cursor = self.submitted_upto,
                in_flight = self.in_flight,
                "Work table replaced, restarting submission from id 0"
            );
            self.generation = generation;
            self.submitted_upto = 0;
            self.in_flight = 0;
        }
        let mut batch: SubmitBatch = Vec::with_capacity(end.saturating_sub(self.submitted_upto));
        for id in self.submitted_upto..end {
            let (finished, input) = self.engine.with_table(|t| {
                t.find_task(id)
                    .map(|task| (task.is_finished(), task.input().cloned()))
            })?;
            if finished {
                continue;
            }
            let command = self.engine.command_of(id)?;
            batch.push(TaskSubmission { id, command, input });
        }
        self.submitted_upto = end;

        if batch.is_empty() && !self.config.keepalive_batches {
            return Ok(());
        }
        if !batch.is_empty() {
            tracing::debug!(
                count = batch.len(),
                first_id = batch[0].id,
                "Submitting tasks"
            );
        }
        self.in_flight += batch.len();
        self.submitted += batch.len();
        self.source.submit(batch).await
    }

    fn accept(&mut self, result: TaskResult) -> Result<TaskId> {
        let (id, outcome) = result.into_outcome();
        if id >= self.submitted_upto {
            tracing::error!(task_id = id, "Result for a task that was never submitted");
            return Err(SweepError::UnknownTaskId { id });
        }
        if let Err(e) = self.engine.store_result(id, outcome) {
            tracing::error!(task_id = id, error = %e, "Rejected result");
            return Err(e);
        }
        tracing::debug!(task_id = id, "Stored result");
        self.in_flight = self.in_flight.saturating_sub(1);
        self.received += 1;
        Ok(id)
    }

    fn report(&self, end: EndReason, driver_finished: bool) -> RunReport {
        RunReport {
            submitted: self.submitted,
            received: self.received,
            end,
            driver_finished,
        }
    }
}
