//! Parameter sets: deduplicated parameter tuples owning an ordered list of runs.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SweepError};
use crate::table::WorkTable;
use crate::task::{ParameterSetId, Params, Task, TaskId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    id: ParameterSetId,
    params: Params,
    run_ids: Vec<TaskId>,
}

impl ParameterSet {
    pub(crate) fn new(id: ParameterSetId, params: Params) -> Self {
        Self {
            id,
            params,
            run_ids: Vec::new(),
        }
    }

    pub fn id(&self) -> ParameterSetId {
        self.id
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Run ids in seed order.
    pub fn run_ids(&self) -> &[TaskId] {
        &self.run_ids
    }

    pub(crate) fn push_run(&mut self, id: TaskId) {
        self.run_ids.push(id);
    }
}

/// Read-only view joining a parameter set with the tasks it owns.
#[derive(Clone, Copy)]
pub struct ParameterSetView<'a> {
    ps: &'a ParameterSet,
    table: &'a WorkTable,
}

impl<'a> ParameterSetView<'a> {
    pub(crate) fn new(ps: &'a ParameterSet, table: &'a WorkTable) -> Self {
        Self { ps, table }
    }

    pub fn record(&self) -> &'a ParameterSet {
        self.ps
    }

    pub fn id(&self) -> ParameterSetId {
        self.ps.id
    }

    pub fn params(&self) -> &'a Params {
        &self.ps.params
    }

    pub fn runs(&self) -> impl Iterator<Item = &'a Task> + use<'a> {
        let tasks = self.table.tasks();
        let ps = self.ps;
        ps.run_ids.iter().filter_map(move |&id| tasks.get(id))
    }

    pub fn finished_runs(&self) -> Vec<&'a Task> {
        self.runs().filter(|r| r.is_finished()).collect()
    }

    /// Vacuously true for a parameter set without runs.
    pub fn is_finished(&self) -> bool {
        self.runs().all(Task::is_finished)
    }

    /// Outputs of the successful runs, in run order.
    pub fn outputs(&self) -> Vec<&'a [f64]> {
        self.runs()
            .filter_map(|r| r.outcome())
            .filter(|o| o.is_success())
            .map(|o| o.output.as_slice())
            .collect()
    }

    /// Element-wise mean of the outputs of the successful runs.
    ///
    /// Empty when no run succeeded. Runs whose outputs differ in length are
    /// rejected instead of averaged partially.
    pub fn average_results(&self) -> Result<Vec<f64>> {
        let outputs = self.outputs();
        let Some(first) = outputs.first() else {
            return Ok(Vec::new());
        };
        let width = first.len();

        let mut sums = vec![0.0; width];
        for output in &outputs {
            if output.len() != width {
                return Err(SweepError::OutputLengthMismatch {
                    parameter_set_id: self.ps.id,
                    expected: width,
                    found: output.len(),
                });
            }
            for (sum, v) in sums.iter_mut().zip(output.iter()) {
                *sum += v;
            }
        }

        let n = outputs.len() as f64;
        Ok(sums.into_iter().map(|s| s / n).collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::task::{Outcome, Params};
    use crate::table::WorkTable;

    fn outcome(rc: i64, output: Vec<f64>) -> Outcome {
        Outcome {
            return_code: rc,
            place_id: 3,
            start_at: 111,
            finish_at: 222,
            output,
        }
    }

    #[test]
    fn new_parameter_set_has_no_runs() {
        let mut table = WorkTable::new();
        let id = table.find_or_create_parameter_set(Params::from([2, 3, 4, 5]));
        let ps = table.parameter_set(id).unwrap();
        assert_eq!(ps.id(), 0);
        assert_eq!(ps.params(), &Params::from([2, 3, 4, 5]));
        assert!(ps.record().run_ids().is_empty());
        assert!(ps.is_finished());
    }

    #[test]
    fn is_finished_tracks_every_run() {
        let mut table = WorkTable::new();
        let id = table.find_or_create_parameter_set(Params::from([0, 1, 2, 3]));
        let runs = table.create_runs_upto(id, 1).unwrap();
        {
            let ps = table.parameter_set(id).unwrap();
            assert!(!ps.is_finished());
            assert!(ps.finished_runs().is_empty());
        }

        table
            .store_result(runs[0], outcome(0, vec![1.0, 2.0, 3.0]))
            .unwrap();
        let ps = table.parameter_set(id).unwrap();
        assert!(ps.is_finished());
        assert_eq!(ps.finished_runs().len(), 1);
    }

    #[test]
    fn failed_runs_finish_but_do_not_contribute() {
        let mut table = WorkTable::new();
        let id = table.find_or_create_parameter_set(Params::from([1]));
        let runs = table.create_runs(id, 2).unwrap();
        table.store_result(runs[0], outcome(0, vec![4.0])).unwrap();
        table.store_result(runs[1], outcome(1, vec![100.0])).unwrap();

        let ps = table.parameter_set(id).unwrap();
        assert!(ps.is_finished());
        assert_eq!(ps.outputs(), vec![&[4.0][..]]);
        assert_eq!(ps.average_results().unwrap(), vec![4.0]);
    }

    #[test]
    fn outputs_and_average() {
        let mut table = WorkTable::new();
        let id = table.find_or_create_parameter_set(Params::from([0, 1, 2, 3]));
        let runs = table.create_runs_upto(id, 3).unwrap();
        assert!(table.parameter_set(id).unwrap().outputs().is_empty());

        for (i, r) in runs.iter().enumerate() {
            let base = i as f64;
            table
                .store_result(*r, outcome(0, vec![1.0 + base, 2.0 + base, 3.0 + base]))
                .unwrap();
        }

        let ps = table.parameter_set(id).unwrap();
        assert_eq!(
            ps.outputs(),
            vec![&[1.0, 2.0, 3.0][..], &[2.0, 3.0, 4.0][..], &[3.0, 4.0, 5.0][..]]
        );
        assert_eq!(ps.average_results().unwrap(), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn average_without_successes_is_empty() {
        let mut table = WorkTable::new();
        let id = table.find_or_create_parameter_set(Params::from([9]));
        let runs = table.create_runs(id, 1).unwrap();
        assert!(table.parameter_set(id).unwrap().average_results().unwrap().is_empty());

        table.store_result(runs[0], outcome(2, vec![1.0])).unwrap();
        assert!(table.parameter_set(id).unwrap().average_results().unwrap().is_empty());
    }

    #[test]
    fn mismatched_output_lengths_are_rejected() {
        let mut table = WorkTable::new();
        let id = table.find_or_create_parameter_set(Params::from([9]));
        let runs = table.create_runs(id, 2).unwrap();
        table.store_result(runs[0], outcome(0, vec![1.0, 2.0])).unwrap();
        table.store_result(runs[1], outcome(0, vec![1.0])).unwrap();

        let err = table.parameter_set(id).unwrap().average_results().unwrap_err();
        assert!(matches!(
            err,
            crate::SweepError::OutputLengthMismatch {
                expected: 2,
                found: 1,
                ..
            }
        ));
    }
}
