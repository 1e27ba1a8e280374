//! Tests for projecting the log into rows, and for validating and evaluating jobs over those rows.

mod common;

use tablechain::{
    jobs::{AggregateOp, Instruction, Job, JobError, JobOutcome},
    ledger::Ledger,
    table::{TableView, META_BLOCK_ID, META_INSERT_TIMESTAMP},
    types::{
        basic::{BlockId, Difficulty},
        block::BlockKind,
        crypto_primitives::Keypair,
        value::{row, Value},
    },
};

use common::{fixtures::person, mem_db::MemDB};

/// A table of people. Block 3 carries two rows and one entry that is not a row.
fn people() -> TableView {
    let owner = Keypair::generate();
    let ledger = Ledger::open(MemDB::new(), "people", Difficulty::new(0)).unwrap();
    ledger
        .append(&owner, BlockKind::AuthorizedKeys, vec![Value::Text(owner.public_key_string())])
        .unwrap();
    ledger.append(&owner, BlockKind::Row, vec![person("ann", 31)]).unwrap();
    ledger
        .append(
            &owner,
            BlockKind::Row,
            vec![person("bob", 45), Value::from("not a row"), person("cat", 27)],
        )
        .unwrap();
    ledger
        .append(&owner, BlockKind::Row, vec![Value::Map(row([("name", Value::from("dan"))]))])
        .unwrap();
    TableView::project(&ledger.snapshot())
}

fn run(instructions: Vec<Instruction>) -> Result<tablechain::jobs::Variables, JobError> {
    Job::new(instructions).evaluate(&people())
}

#[test]
fn project_unnests_row_blocks_and_tags_records() {
    let table = people();
    assert_eq!(table.len(), 4);

    let block_ids: Vec<BlockId> = table.records().iter().map(|record| record.block_id).collect();
    assert_eq!(block_ids, vec![BlockId::new(3), BlockId::new(4), BlockId::new(4), BlockId::new(5)]);

    assert_eq!(
        table.columns(),
        vec!["age", "name", META_BLOCK_ID, META_INSERT_TIMESTAMP]
    );

    let rows = table.rows();
    assert_eq!(rows[1].get("name"), Some(&Value::from("bob")));
    assert_eq!(rows[1].get(META_BLOCK_ID), Some(&Value::Int(4)));
    assert!(rows[3].get("age").is_none());
}

#[test]
fn count_and_let() {
    let variables = run(vec![
        Instruction::CountRows { into: "n".into() },
        Instruction::Let { into: "label".into(), value: Value::from("census") },
    ])
    .unwrap();

    assert_eq!(variables.get("n"), Some(&Value::Int(4)));
    assert_eq!(variables.get("label"), Some(&Value::from("census")));
}

#[test]
fn aggregates_skip_missing_values() {
    let variables = run(vec![
        Instruction::Aggregate { op: AggregateOp::Sum, column: "age".into(), into: "total".into() },
        Instruction::Aggregate { op: AggregateOp::Min, column: "age".into(), into: "youngest".into() },
        Instruction::Aggregate { op: AggregateOp::Max, column: "age".into(), into: "oldest".into() },
        Instruction::Aggregate { op: AggregateOp::Mean, column: "age".into(), into: "mean".into() },
    ])
    .unwrap();

    assert_eq!(variables.get("total"), Some(&Value::Int(103)));
    assert_eq!(variables.get("youngest"), Some(&Value::Int(27)));
    assert_eq!(variables.get("oldest"), Some(&Value::Int(45)));
    let mean = variables.get("mean").and_then(Value::as_f64).unwrap();
    assert!((mean - 103.0 / 3.0).abs() < 1e-9);
}

#[test]
fn aggregates_over_empty_column() {
    let variables = run(vec![
        Instruction::Aggregate { op: AggregateOp::Sum, column: "height".into(), into: "total".into() },
        Instruction::Aggregate { op: AggregateOp::Max, column: "height".into(), into: "tallest".into() },
    ])
    .unwrap();

    assert_eq!(variables.get("total"), Some(&Value::Int(0)));
    assert_eq!(variables.get("tallest"), Some(&Value::Null));
}

#[test]
fn aggregate_of_text_column_fails() {
    assert_eq!(
        run(vec![Instruction::Aggregate { op: AggregateOp::Sum, column: "name".into(), into: "x".into() }]),
        Err(JobError::NotNumeric { column: "name".into(), found: "text" })
    );
}

#[test]
fn sum_overflow_is_an_error() {
    let owner = Keypair::generate();
    let ledger = Ledger::open(MemDB::new(), "big", Difficulty::new(0)).unwrap();
    ledger
        .append(&owner, BlockKind::AuthorizedKeys, vec![Value::Text(owner.public_key_string())])
        .unwrap();
    for _ in 0..2 {
        ledger
            .append(&owner, BlockKind::Row, vec![Value::Map(row([("n", Value::Int(i64::MAX))]))])
            .unwrap();
    }

    let job = Job::new(vec![Instruction::Aggregate { op: AggregateOp::Sum, column: "n".into(), into: "total".into() }]);
    assert_eq!(
        job.evaluate(&TableView::project(&ledger.snapshot())),
        Err(JobError::Overflow("n".into()))
    );
}

#[test]
fn mean_of_opposite_infinities_is_unstorable() {
    let owner = Keypair::generate();
    let ledger = Ledger::open(MemDB::new(), "signals", Difficulty::new(0)).unwrap();
    ledger
        .append(&owner, BlockKind::AuthorizedKeys, vec![Value::Text(owner.public_key_string())])
        .unwrap();
    for x in [f64::INFINITY, f64::NEG_INFINITY] {
        ledger
            .append(&owner, BlockKind::Row, vec![Value::Map(row([("x", Value::Float(x))]))])
            .unwrap();
    }

    let job = Job::new(vec![
        Instruction::Aggregate { op: AggregateOp::Max, column: "x".into(), into: "highest".into() },
        Instruction::Aggregate { op: AggregateOp::Mean, column: "x".into(), into: "mean".into() },
    ]);
    let outcome = JobOutcome::from(job.evaluate(&TableView::project(&ledger.snapshot())));
    assert_eq!(outcome, JobOutcome::Failed { error_msg: JobError::UnstorableValue("mean".into()).to_string() });
}

#[test]
fn collect_distinct_and_lookup() {
    let variables = run(vec![
        Instruction::Collect { column: "age".into(), into: "ages".into() },
        Instruction::Distinct { column: "age".into(), into: "distinct_ages".into() },
        Instruction::Lookup {
            key_column: "name".into(),
            key: Value::from("cat"),
            value_column: "age".into(),
            into: "cat_age".into(),
        },
        Instruction::Lookup {
            key_column: "name".into(),
            key: Value::from("zed"),
            value_column: "age".into(),
            into: "zed_age".into(),
        },
    ])
    .unwrap();

    assert_eq!(
        variables.get("ages"),
        Some(&Value::List(vec![Value::Int(31), Value::Int(45), Value::Int(27), Value::Null]))
    );
    assert_eq!(
        variables.get("distinct_ages"),
        Some(&Value::List(vec![Value::Int(31), Value::Int(45), Value::Int(27), Value::Null]))
    );
    assert_eq!(variables.get("cat_age"), Some(&Value::Int(27)));
    assert_eq!(variables.get("zed_age"), Some(&Value::Null));
}

#[test]
fn validation_rejects_malformed_jobs() {
    assert_eq!(Job::new(vec![]).validate(), Err(JobError::Empty));
    assert_eq!(
        Job::new(vec![Instruction::CountRows { into: "2fast".into() }]).validate(),
        Err(JobError::InvalidVariableName("2fast".into()))
    );
    assert_eq!(
        Job::new(vec![Instruction::CountRows { into: "chain".into() }]).validate(),
        Err(JobError::ReservedVariableName("chain".into()))
    );
    assert_eq!(
        Job::new(vec![Instruction::CountRows { into: "error_msg".into() }]).validate(),
        Err(JobError::ReservedVariableName("error_msg".into()))
    );
    assert_eq!(
        Job::new(vec![Instruction::Collect { column: "".into(), into: "x".into() }]).validate(),
        Err(JobError::EmptyColumnName)
    );
    assert_eq!(
        Job::new(vec![Instruction::Let { into: "x".into(), value: Value::Float(f64::NAN) }]).validate(),
        Err(JobError::UnstorableValue("x".into()))
    );
}

#[test]
fn later_instructions_overwrite_earlier_variables() {
    let variables = run(vec![
        Instruction::Let { into: "x".into(), value: Value::Int(1) },
        Instruction::CountRows { into: "x".into() },
    ])
    .unwrap();
    assert_eq!(variables.len(), 1);
    assert_eq!(variables.get("x"), Some(&Value::Int(4)));
}

#[test]
fn failed_outcome_is_encoded_with_error_msg() {
    let outcome = JobOutcome::from(run(vec![Instruction::Aggregate {
        op: AggregateOp::Mean,
        column: "name".into(),
        into: "x".into(),
    }]));
    assert!(outcome.is_failed());

    let value = outcome.to_value();
    assert!(value.as_map().unwrap().contains_key("error_msg"));
    assert_eq!(JobOutcome::from_value(&value), Some(outcome));
}
