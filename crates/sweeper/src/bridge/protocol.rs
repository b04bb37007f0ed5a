//! Wire protocol payloads.
//!
//! Outbound: one frame per submission round carrying a JSON array of
//! submissions in ascending id order. `[]` is both the keep-alive and the
//! close signal.
//!
//! Inbound: one frame per finished task. A zero-length frame ends the stream.

use serde::{Deserialize, Serialize};

use crate::task::{Outcome, TaskId};

/// One task handed to the worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSubmission {
    pub id: TaskId,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
}

/// One submission round. Empty means "nothing new" or, when last, "close".
pub type SubmitBatch = Vec<TaskSubmission>;

/// Result reported by a worker place for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: TaskId,
    pub return_code: i64,
    pub place_id: i64,
    pub start_at: i64,
    pub finish_at: i64,
    #[serde(default)]
    pub output: Vec<f64>,
}

impl TaskResult {
    pub fn into_outcome(self) -> (TaskId, Outcome) {
        let outcome = Outcome {
            return_code: self.return_code,
            place_id: self.place_id,
            start_at: self.start_at,
            finish_at: self.finish_at,
            output: self.output,
        };
        (self.id, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_batch_serializes() {
        let batch: SubmitBatch = vec![
            TaskSubmission {
                id: 3,
                command: "sim 1 2 --seed 0".to_string(),
                input: None,
            },
            TaskSubmission {
                id: 4,
                command: "echo".to_string(),
                input: Some(serde_json::json!({"x": 1})),
            },
        ];
        insta::assert_json_snapshot!(batch, @r###"
        [
          {
            "id": 3,
            "command": "sim 1 2 --seed 0"
          },
          {
            "id": 4,
            "command": "echo",
            "input": {
              "x": 1
            }
          }
        ]
        "###);
    }

    #[test]
    fn empty_batch_is_an_empty_array() {
        let batch: SubmitBatch = Vec::new();
        assert_eq!(serde_json::to_string(&batch).unwrap(), "[]");
    }

    #[test]
    fn result_deserializes_with_and_without_output() {
        let r: TaskResult = serde_json::from_str(
            r#"{"id":2,"return_code":1,"place_id":7,"start_at":10,"finish_at":12,"output":[1.5,2]}"#,
        )
        .unwrap();
        assert_eq!(r.output, vec![1.5, 2.0]);

        let r: TaskResult = serde_json::from_str(
            r#"{"id":2,"return_code":0,"place_id":7,"start_at":10,"finish_at":12}"#,
        )
        .unwrap();
        assert!(r.output.is_empty());
    }

    #[test]
    fn result_missing_id_is_rejected() {
        let r = serde_json::from_str::<TaskResult>(
            r#"{"return_code":0,"place_id":7,"start_at":10,"finish_at":12}"#,
        );
        assert!(r.is_err());
    }

    #[test]
    fn into_outcome_moves_every_field() {
        let r = TaskResult {
            id: 9,
            return_code: 3,
            place_id: 1,
            start_at: 4,
            finish_at: 6,
            output: vec![],
        };
        let (id, outcome) = r.into_outcome();
        assert_eq!(id, 9);
        insta::assert_json_snapshot!(outcome, @r###"
        {
          "return_code": 3,
          "place_id": 1,
          "start_at": 4,
          "finish_at": 6,
          "output": []
        }
        "###);
    }
}
