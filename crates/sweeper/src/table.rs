//! The work table: append-only arena of tasks and parameter sets.
//!
//! Ids are positions. Nothing is ever removed or reordered except by
//! `clear` or by swapping in a restored snapshot.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SweepError};
use crate::parameter_set::{ParameterSet, ParameterSetView};
use crate::task::{Outcome, ParameterSetId, Params, Task, TaskId, TaskKind};

/// Builds the command of a run from its parameters and seed.
pub type CommandBuilder = Arc<dyn Fn(&Params, u32) -> String + Send + Sync>;

#[derive(Default)]
pub struct WorkTable {
    tasks: Vec<Task>,
    parameter_sets: Vec<ParameterSet>,
    params_index: HashMap<Params, ParameterSetId>,
    command_builder: Option<CommandBuilder>,
    /// Bumped whenever ids are reused: on `clear` and on `restore`.
    generation: u64,
}

/// Serialized form of the table. The command builder is code and is not part of it.
#[derive(Serialize, Deserialize)]
struct Snapshot<T, P> {
    tasks: T,
    parameter_sets: P,
}

impl fmt::Debug for WorkTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkTable")
            .field("tasks", &self.tasks.len())
            .field("parameter_sets", &self.parameter_sets.len())
            .field("has_command_builder", &self.command_builder.is_some())
            .field("generation", &self.generation)
            .finish()
    }
}

impl WorkTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_command_builder<F>(&mut self, builder: F)
    where
        F: Fn(&Params, u32) -> String + Send + Sync + 'static,
    {
        self.command_builder = Some(Arc::new(builder));
    }

    pub fn has_command_builder(&self) -> bool {
        self.command_builder.is_some()
    }

    /// Number of tasks (runs included).
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.parameter_sets.is_empty()
    }

    /// Changes every time the table's contents are replaced wholesale.
    /// Anything that tracks ids across calls must start over when it does.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn create_task(
        &mut self,
        command: impl Into<String>,
        input: Option<serde_json::Value>,
    ) -> TaskId {
        let id = self.tasks.len();
        self.tasks.push(Task::command(id, command.into(), input));
        id
    }

    /// Return the parameter set for `params`, creating it on first sight.
    pub fn find_or_create_parameter_set(&mut self, params: impl Into<Params>) -> ParameterSetId {
        let params = params.into();
        if let Some(&id) = self.params_index.get(&params) {
            return id;
        }
        let id = self.parameter_sets.len();
        self.parameter_sets
            .push(ParameterSet::new(id, params.clone()));
        self.params_index.insert(params, id);
        id
    }

    /// Append `n` runs with the next seeds. Returns their ids in creation order.
    pub fn create_runs(&mut self, ps_id: ParameterSetId, n: usize) -> Result<Vec<TaskId>> {
        let len = self.parameter_sets.len();
        let ps = self
            .parameter_sets
            .get_mut(ps_id)
            .ok_or_else(|| SweepError::parameter_set_out_of_range(ps_id, len))?;

        let mut created = Vec::with_capacity(n);
        for _ in 0..n {
            let id = self.tasks.len();
            let seed = ps.run_ids().len() as u32;
            self.tasks.push(Task::run(id, ps_id, seed));
            ps.push_run(id);
            created.push(id);
        }
        Ok(created)
    }

    /// Ensure at least `target` runs exist and return the first `target`.
    pub fn create_runs_upto(&mut self, ps_id: ParameterSetId, target: usize) -> Result<Vec<TaskId>> {
        let current = self.find_parameter_set_record(ps_id)?.run_ids().len();
        if target > current {
            self.create_runs(ps_id, target - current)?;
        }
        let ps = self.find_parameter_set_record(ps_id)?;
        Ok(ps.run_ids()[..target].to_vec())
    }

    pub fn find_task(&self, id: TaskId) -> Result<&Task> {
        self.tasks
            .get(id)
            .ok_or_else(|| SweepError::task_out_of_range(id, self.tasks.len()))
    }

    pub fn find_parameter_set_record(&self, id: ParameterSetId) -> Result<&ParameterSet> {
        self.parameter_sets
            .get(id)
            .ok_or_else(|| SweepError::parameter_set_out_of_range(id, self.parameter_sets.len()))
    }

    pub fn find_parameter_set(&self, id: ParameterSetId) -> Result<ParameterSetView<'_>> {
        let ps = self.find_parameter_set_record(id)?;
        Ok(ParameterSetView::new(ps, self))
    }

    /// Alias of [`find_parameter_set`](Self::find_parameter_set).
    pub fn parameter_set(&self, id: ParameterSetId) -> Result<ParameterSetView<'_>> {
        self.find_parameter_set(id)
    }

    /// Lookup by parameter tuple without creating anything.
    pub fn lookup_parameter_set(&self, params: &Params) -> Option<ParameterSetId> {
        self.params_index.get(params).copied()
    }

    /// All tasks in creation order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn runs(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|t| t.is_run())
    }

    /// All parameter sets in creation order.
    pub fn parameter_sets(&self) -> &[ParameterSet] {
        &self.parameter_sets
    }

    pub fn is_task_finished(&self, id: TaskId) -> Result<bool> {
        Ok(self.find_task(id)?.is_finished())
    }

    pub fn is_parameter_set_finished(&self, id: ParameterSetId) -> Result<bool> {
        Ok(self.find_parameter_set(id)?.is_finished())
    }

    /// Command handed to a worker for task `id`.
    pub fn command_of(&self, id: TaskId) -> Result<String> {
        let task = self.find_task(id)?;
        match task.kind() {
            TaskKind::Command { command } => Ok(command.clone()),
            TaskKind::Run {
                parameter_set_id,
                seed,
            } => {
                let builder = self
                    .command_builder
                    .as_ref()
                    .ok_or(SweepError::CommandBuilderMissing { id })?;
                let ps = self.find_parameter_set_record(*parameter_set_id)?;
                Ok(builder(ps.params(), *seed))
            }
        }
    }

    /// Store the result of task `id`.
    pub fn store_result(&mut self, id: TaskId, outcome: Outcome) -> Result<()> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or(SweepError::UnknownTaskId { id })?;
        task.store_outcome(outcome)
    }

    /// Drop every record. The command builder stays registered.
    pub fn clear(&mut self) {
        self.tasks.clear();
        self.parameter_sets.clear();
        self.params_index.clear();
        self.generation += 1;
    }

    pub fn snapshot(&self) -> Result<Vec<u8>> {
        let snapshot = Snapshot {
            tasks: &self.tasks,
            parameter_sets: &self.parameter_sets,
        };
        Ok(serde_json::to_vec(&snapshot)?)
    }

    /// Replace the whole table with a snapshot. On error the table is untouched.
    pub fn restore(&mut self, blob: &[u8]) -> Result<()> {
        let snapshot: Snapshot<Vec<Task>, Vec<ParameterSet>> = serde_json::from_slice(blob)?;
        let params_index = validate(&snapshot.tasks, &snapshot.parameter_sets)?;

        self.tasks = snapshot.tasks;
        self.parameter_sets = snapshot.parameter_sets;
        self.params_index = params_index;
        self.generation += 1;
        tracing::debug!(
            tasks = self.tasks.len(),
            parameter_sets = self.parameter_sets.len(),
            "Restored work table"
        );
        Ok(())
    }

    /// Human-readable listing: every parameter set with its runs.
    pub fn dump_json(&self) -> serde_json::Value {
        let sets: Vec<serde_json::Value> = self
            .parameter_sets
            .iter()
            .map(|ps| {
                let runs: Vec<&Task> = ps
                    .run_ids()
                    .iter()
                    .filter_map(|&id| self.tasks.get(id))
                    .collect();
                serde_json::json!({
                    "id": ps.id(),
                    "params": ps.params(),
                    "runs": runs,
                })
            })
            .collect();
        serde_json::Value::Array(sets)
    }

    /// Write finished tasks as big-endian records:
    /// `i64 id, rc, place_id, start_at, finish_at, n` then `n` f64 outputs.
    pub fn write_results_binary<W: Write>(&self, mut out: W) -> Result<()> {
        for task in &self.tasks {
            let Some(o) = task.outcome() else {
                continue;
            };
            let header = [
                task.id() as i64,
                o.return_code,
                o.place_id,
                o.start_at,
                o.finish_at,
                o.output.len() as i64,
            ];
            for v in header {
                out.write_all(&v.to_be_bytes())?;
            }
            for v in &o.output {
                out.write_all(&v.to_be_bytes())?;
            }
        }
        out.flush()?;
        Ok(())
    }
}

fn validate(
    tasks: &[Task],
    parameter_sets: &[ParameterSet],
) -> Result<HashMap<Params, ParameterSetId>> {
    for (pos, task) in tasks.iter().enumerate() {
        if task.id() != pos {
            return Err(SweepError::InconsistentSnapshot(format!(
                "task at position {pos} has id {}",
                task.id()
            )));
        }
    }

    let mut index = HashMap::with_capacity(parameter_sets.len());
    for (pos, ps) in parameter_sets.iter().enumerate() {
        if ps.id() != pos {
            return Err(SweepError::InconsistentSnapshot(format!(
                "parameter set at position {pos} has id {}",
                ps.id()
            )));
        }
        for (seed, &run_id) in ps.run_ids().iter().enumerate() {
            let owned = tasks.get(run_id).is_some_and(|t| {
                t.parameter_set_id() == Some(pos) && t.seed() == Some(seed as u32)
            });
            if !owned {
                return Err(SweepError::InconsistentSnapshot(format!(
                    "parameter set {pos} lists task {run_id} as seed {seed}"
                )));
            }
        }
        if let Some(first) = index.insert(ps.params().clone(), pos) {
            return Err(SweepError::DeduplicationConflict {
                params: ps.params().to_string(),
                first,
                second: pos,
            });
        }
    }
    Ok(index)
}
