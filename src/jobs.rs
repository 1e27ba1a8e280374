/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Typed jobs that one replica can ask another replica to run against its copy of the table.
//!
//! A [`Job`] is a list of [`Instruction`]s. Every instruction reads the table (or nothing) and writes
//! one named variable. Running a job yields the resulting variables, which travel back to the
//! requester inside an execution result block.
//!
//! Jobs are data, not code: the set of things a remote peer can make this replica do is closed, and
//! every job is [validated](Job::validate) before it is submitted and again before it is run.
//!
//! ## Example
//!
//! ```
//! # use tablechain::jobs::{AggregateOp, Instruction, Job};
//! let job = Job::new(vec![
//!     Instruction::CountRows { into: "n".into() },
//!     Instruction::Aggregate { op: AggregateOp::Mean, column: "age".into(), into: "mean_age".into() },
//! ]);
//! assert!(job.validate().is_ok());
//! ```

use borsh::{BorshDeserialize, BorshSerialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use crate::table::view::TableView;
use crate::types::value::Value;

/// Variables written by a job, by name.
pub type Variables = BTreeMap<String, Value>;

/// Names that jobs may not write to. `chain` is the name the table snapshot goes by during
/// evaluation, and `error_msg` is how failures are reported back to the requester.
pub const RESERVED_NAMES: [&str; 2] = ["chain", "error_msg"];

#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct Job {
    pub instructions: Vec<Instruction>,
}

#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub enum Instruction {
    /// Write a constant.
    Let { into: String, value: Value },

    /// Write the number of rows in the table.
    CountRows { into: String },

    /// Fold the numeric values of a column. Rows where the column is missing or null are skipped.
    Aggregate {
        op: AggregateOp,
        column: String,
        into: String,
    },

    /// Write the list of values of a column, one per row (null where a row lacks the column).
    Collect { column: String, into: String },

    /// Like `Collect`, but keeps only the first occurrence of each value.
    Distinct { column: String, into: String },

    /// Write `value_column` of the first row whose `key_column` equals `key`, or null if there is none.
    Lookup {
        key_column: String,
        key: Value,
        value_column: String,
        into: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum AggregateOp {
    Sum,
    Min,
    Max,
    Mean,
}

impl Job {
    pub fn new(instructions: Vec<Instruction>) -> Job {
        Job { instructions }
    }

    /// Checks that the job is something a replica would agree to run.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.instructions.is_empty() {
            return Err(JobError::Empty);
        }

        for instruction in &self.instructions {
            let into = instruction.target();
            if !is_identifier(into) {
                return Err(JobError::InvalidVariableName(into.to_string()));
            }
            if RESERVED_NAMES.contains(&into) {
                return Err(JobError::ReservedVariableName(into.to_string()));
            }

            match instruction {
                Instruction::Let { value, .. } if !value.is_storable() => {
                    return Err(JobError::UnstorableValue(into.to_string()))
                }
                Instruction::Lookup { key, .. } if !key.is_storable() => {
                    return Err(JobError::UnstorableValue(into.to_string()))
                }
                _ => {}
            }

            for column in instruction.columns() {
                if column.is_empty() {
                    return Err(JobError::EmptyColumnName);
                }
            }
        }

        Ok(())
    }

    /// Runs the job against a snapshot of the table. Later instructions overwrite variables written by
    /// earlier ones.
    pub fn evaluate(&self, table: &TableView) -> Result<Variables, JobError> {
        self.validate()?;

        let mut variables = Variables::new();
        for instruction in &self.instructions {
            let value = instruction.evaluate(table)?;
            // e.g. the mean of a column holding both infinities is NaN.
            if !value.is_storable() {
                return Err(JobError::UnstorableValue(instruction.target().to_string()));
            }
            variables.insert(instruction.target().to_string(), value);
        }
        Ok(variables)
    }
}

impl Instruction {
    /// Name of the variable this instruction writes.
    pub fn target(&self) -> &str {
        match self {
            Instruction::Let { into, .. }
            | Instruction::CountRows { into }
            | Instruction::Aggregate { into, .. }
            | Instruction::Collect { into, .. }
            | Instruction::Distinct { into, .. }
            | Instruction::Lookup { into, .. } => into,
        }
    }

    fn columns(&self) -> Vec<&str> {
        match self {
            Instruction::Let { .. } | Instruction::CountRows { .. } => Vec::new(),
            Instruction::Aggregate { column, .. }
            | Instruction::Collect { column, .. }
            | Instruction::Distinct { column, .. } => vec![column],
            Instruction::Lookup {
                key_column,
                value_column,
                ..
            } => vec![key_column, value_column],
        }
    }

    fn evaluate(&self, table: &TableView) -> Result<Value, JobError> {
        match self {
            Instruction::Let { value, .. } => Ok(value.clone()),

            Instruction::CountRows { .. } => Ok(Value::Int(table.len() as i64)),

            Instruction::Aggregate { op, column, .. } => aggregate(*op, column, table),

            Instruction::Collect { column, .. } => Ok(Value::List(
                table
                    .column(column)
                    .map(|value| value.cloned().unwrap_or(Value::Null))
                    .collect(),
            )),

            Instruction::Distinct { column, .. } => {
                let mut distinct: Vec<Value> = Vec::new();
                for value in table.column(column) {
                    let value = value.cloned().unwrap_or(Value::Null);
                    if !distinct.contains(&value) {
                        distinct.push(value);
                    }
                }
                Ok(Value::List(distinct))
            }

            Instruction::Lookup {
                key_column,
                key,
                value_column,
                ..
            } => Ok(table
                .records()
                .iter()
                .find(|record| record.get(key_column) == Some(key))
                .and_then(|record| record.get(value_column).cloned())
                .unwrap_or(Value::Null)),
        }
    }
}

fn aggregate(op: AggregateOp, column: &str, table: &TableView) -> Result<Value, JobError> {
    let mut values = Vec::new();
    for value in table.column(column).flatten() {
        match value {
            Value::Null => continue,
            Value::Int(_) | Value::Float(_) => values.push(value),
            other => {
                return Err(JobError::NotNumeric {
                    column: column.to_string(),
                    found: other.type_name(),
                })
            }
        }
    }

    if values.is_empty() {
        return Ok(match op {
            AggregateOp::Sum => Value::Int(0),
            _ => Value::Null,
        });
    }

    let all_ints = values.iter().all(|value| matches!(value, Value::Int(_)));
    // Safety: only Int and Float values were collected above.
    let floats = values.iter().filter_map(|value| value.as_f64());

    match op {
        AggregateOp::Sum if all_ints => values
            .iter()
            .filter_map(|value| value.as_int())
            .try_fold(0i64, |acc, int| acc.checked_add(int))
            .map(Value::Int)
            .ok_or(JobError::Overflow(column.to_string())),
        AggregateOp::Sum => Ok(Value::Float(floats.sum())),
        AggregateOp::Min if all_ints => Ok(values.iter().filter_map(|v| v.as_int()).min().into()),
        AggregateOp::Max if all_ints => Ok(values.iter().filter_map(|v| v.as_int()).max().into()),
        AggregateOp::Min => Ok(Value::Float(floats.fold(f64::INFINITY, f64::min))),
        AggregateOp::Max => Ok(Value::Float(floats.fold(f64::NEG_INFINITY, f64::max))),
        AggregateOp::Mean => {
            let count = values.len() as f64;
            Ok(Value::Float(floats.sum::<f64>() / count))
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// What came of running a job on the target replica.
///
/// Failures are data: a job that fails on the target still produces a result block, and the requester
/// receives [`JobOutcome::Failed`] rather than an error.
#[derive(Clone, Debug, PartialEq)]
pub enum JobOutcome {
    Completed(Variables),
    Failed { error_msg: String },
}

impl JobOutcome {
    /// Encoding used inside result blocks: the variables themselves, or `{"error_msg": ...}`.
    pub fn to_value(&self) -> Value {
        match self {
            JobOutcome::Completed(variables) => Value::Map(variables.clone()),
            JobOutcome::Failed { error_msg } => Value::Map(
                [("error_msg".to_string(), Value::Text(error_msg.clone()))]
                    .into_iter()
                    .collect(),
            ),
        }
    }

    pub fn from_value(value: &Value) -> Option<JobOutcome> {
        let map = value.as_map()?;
        if let Some(error_msg) = map.get("error_msg") {
            return Some(JobOutcome::Failed {
                error_msg: error_msg.as_text()?.to_string(),
            });
        }
        Some(JobOutcome::Completed(map.clone()))
    }

    pub fn variables(&self) -> Option<&Variables> {
        match self {
            JobOutcome::Completed(variables) => Some(variables),
            JobOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, JobOutcome::Failed { .. })
    }
}

impl From<Result<Variables, JobError>> for JobOutcome {
    fn from(result: Result<Variables, JobError>) -> Self {
        match result {
            Ok(variables) => JobOutcome::Completed(variables),
            Err(err) => JobOutcome::Failed {
                error_msg: err.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobError {
    Empty,
    InvalidVariableName(String),
    ReservedVariableName(String),
    EmptyColumnName,
    UnstorableValue(String),
    NotNumeric { column: String, found: &'static str },
    Overflow(String),
}

impl Display for JobError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            JobError::Empty => write!(f, "job has no instructions"),
            JobError::InvalidVariableName(name) => write!(f, "{:?} is not a valid variable name", name),
            JobError::ReservedVariableName(name) => write!(f, "{:?} is a reserved variable name", name),
            JobError::EmptyColumnName => write!(f, "column names cannot be empty"),
            JobError::UnstorableValue(name) => {
                write!(f, "value for {:?} cannot be stored in a block", name)
            }
            JobError::NotNumeric { column, found } => {
                write!(f, "column {:?} holds a {} value, expected a number", column, found)
            }
            JobError::Overflow(column) => write!(f, "sum of column {:?} overflows", column),
        }
    }
}

impl std::error::Error for JobError {}
