//! Task records and the values they carry.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SweepError};

/// Position of a task in the work table.
pub type TaskId = usize;

/// Position of a parameter set in the work table.
pub type ParameterSetId = usize;

/// JSON has no literal for NaN or infinities, so those are written as
/// `{"float": "NaN" | "inf" | "-inf"}`. Finite values stay plain numbers.
/// Every NaN reads back as `f64::NAN`.
mod float_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Finite(f64),
        NonFinite { float: NonFinite },
    }

    #[derive(Serialize, Deserialize)]
    enum NonFinite {
        #[serde(rename = "NaN")]
        Nan,
        #[serde(rename = "inf")]
        Inf,
        #[serde(rename = "-inf")]
        NegInf,
    }

    impl From<f64> for Repr {
        fn from(v: f64) -> Self {
            if v.is_finite() {
                Self::Finite(v)
            } else if v.is_nan() {
                Self::NonFinite { float: NonFinite::Nan }
            } else if v > 0.0 {
                Self::NonFinite { float: NonFinite::Inf }
            } else {
                Self::NonFinite { float: NonFinite::NegInf }
            }
        }
    }

    impl From<Repr> for f64 {
        fn from(r: Repr) -> Self {
            match r {
                Repr::Finite(v) => v,
                Repr::NonFinite { float: NonFinite::Nan } => f64::NAN,
                Repr::NonFinite { float: NonFinite::Inf } => f64::INFINITY,
                Repr::NonFinite { float: NonFinite::NegInf } => f64::NEG_INFINITY,
            }
        }
    }

    pub(super) fn serialize<S>(v: &f64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        Repr::from(*v).serialize(serializer)
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        Repr::deserialize(deserializer).map(f64::from)
    }

    pub(super) mod seq {
        use super::Repr;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.collect_seq(values.iter().map(|&v| Repr::from(v)))
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let values = Vec::<Repr>::deserialize(deserializer)?;
            Ok(values.into_iter().map(f64::from).collect())
        }
    }
}

/// A single parameter value.
///
/// Floats compare and hash by bit pattern so that tuples can key the
/// deduplication index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Param {
    Int(i64),
    Float(#[serde(with = "float_serde")] f64),
    Bool(bool),
    Text(String),
}

impl PartialEq for Param {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Param {}

impl Hash for Param {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Int(v) => v.hash(state),
            Self::Float(v) => v.to_bits().hash(state),
            Self::Bool(v) => v.hash(state),
            Self::Text(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:?}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v:?}"),
        }
    }
}

macro_rules! param_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Param {
                fn from(v: $ty) -> Self {
                    Self::$variant(v.into())
                }
            }
        )*
    };
}

param_from! {
    i32 => Int,
    i64 => Int,
    u32 => Int,
    f32 => Float,
    f64 => Float,
    bool => Bool,
    String => Text,
    &str => Text,
}

/// Ordered, immutable parameter tuple. Equal tuples denote the same
/// parameter set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(Vec<Param>);

impl Params {
    pub fn new(values: Vec<Param>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[Param] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<P: Into<Param>> FromIterator<P> for Params {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<P: Into<Param>> From<Vec<P>> for Params {
    fn from(values: Vec<P>) -> Self {
        values.into_iter().collect()
    }
}

impl<P: Into<Param>, const N: usize> From<[P; N]> for Params {
    fn from(values: [P; N]) -> Self {
        values.into_iter().collect()
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, p) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, ")")
    }
}

/// What a task executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    /// Free-standing command string.
    Command { command: String },
    /// One trial of a parameter set. The command is derived from the
    /// parameter set and the seed when the task is submitted.
    Run {
        parameter_set_id: ParameterSetId,
        seed: u32,
    },
}

/// Result block of a finished task. Present as a whole or not at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub return_code: i64,
    pub place_id: i64,
    pub start_at: i64,
    pub finish_at: i64,
    #[serde(default, with = "float_serde::seq")]
    pub output: Vec<f64>,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        self.return_code == 0
    }
}

/// One submittable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    #[serde(flatten)]
    kind: TaskKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    outcome: Option<Outcome>,
}

impl Task {
    pub(crate) fn command(id: TaskId, command: String, input: Option<serde_json::Value>) -> Self {
        Self {
            id,
            kind: TaskKind::Command { command },
            input,
            outcome: None,
        }
    }

    pub(crate) fn run(id: TaskId, parameter_set_id: ParameterSetId, seed: u32) -> Self {
        Self {
            id,
            kind: TaskKind::Run {
                parameter_set_id,
                seed,
            },
            input: None,
            outcome: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    pub fn input(&self) -> Option<&serde_json::Value> {
        self.input.as_ref()
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// Owning parameter set, for runs.
    pub fn parameter_set_id(&self) -> Option<ParameterSetId> {
        match self.kind {
            TaskKind::Run {
                parameter_set_id, ..
            } => Some(parameter_set_id),
            TaskKind::Command { .. } => None,
        }
    }

    pub fn seed(&self) -> Option<u32> {
        match self.kind {
            TaskKind::Run { seed, .. } => Some(seed),
            TaskKind::Command { .. } => None,
        }
    }

    pub fn is_run(&self) -> bool {
        matches!(self.kind, TaskKind::Run { .. })
    }

    /// True once a result is stored, whatever its return code.
    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn is_success(&self) -> bool {
        self.outcome.as_ref().is_some_and(Outcome::is_success)
    }

    /// Store the result block. A task accepts exactly one result.
    pub(crate) fn store_outcome(&mut self, outcome: Outcome) -> Result<()> {
        if self.outcome.is_some() {
            return Err(SweepError::DuplicateResult { id: self.id });
        }
        self.outcome = Some(outcome);
        Ok(())
    }
}
