/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The tabular projection of the log returned by [`Table::select`](super::Table::select).

use std::collections::BTreeSet;
use std::time::SystemTime;

use crate::types::{
    basic::{BlockId, Timestamp},
    block::{Block, BlockKind},
    value::{Row, Value},
};

/// Synthetic column holding the id of the block a row was inserted in.
pub const META_BLOCK_ID: &str = "META_BLOCK_ID";

/// Synthetic column holding the time at which the row's block was appended.
pub const META_INSERT_TIMESTAMP: &str = "META_INSERT_TIMESTAMP";

/// One row of the table together with where it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub block_id: BlockId,
    pub inserted_at: Timestamp,
    pub fields: Row,
}

impl Record {
    /// Look up a data column. The meta columns only appear in [`to_row`](Self::to_row).
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }

    pub fn inserted_at(&self) -> SystemTime {
        self.inserted_at.to_system_time()
    }

    /// The row with the meta columns filled in.
    pub fn to_row(&self) -> Row {
        let mut row = self.fields.clone();
        row.insert(META_BLOCK_ID.to_string(), Value::Int(self.block_id.int() as i64));
        row.insert(
            META_INSERT_TIMESTAMP.to_string(),
            Value::Int(self.inserted_at.millis() as i64),
        );
        row
    }
}

/// Every row in the log, in log order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableView {
    records: Vec<Record>,
}

impl TableView {
    /// Unnests the data of every row block, keeping only map-shaped entries.
    pub fn project<'a>(blocks: impl IntoIterator<Item = &'a Block>) -> TableView {
        let records = blocks
            .into_iter()
            .filter(|block| block.kind == BlockKind::Row)
            .flat_map(|block| {
                block.data.iter().filter_map(move |datum| {
                    datum.as_map().map(|fields| Record {
                        block_id: block.id,
                        inserted_at: block.timestamp,
                        fields: fields.clone(),
                    })
                })
            })
            .collect();
        TableView { records }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Union of the columns of all rows, sorted, followed by the two meta columns.
    pub fn columns(&self) -> Vec<String> {
        let data_columns: BTreeSet<&String> = self
            .records
            .iter()
            .flat_map(|record| record.fields.keys())
            .collect();
        data_columns
            .into_iter()
            .cloned()
            .chain([META_BLOCK_ID.to_string(), META_INSERT_TIMESTAMP.to_string()])
            .collect()
    }

    /// The value of `column` in each row, `None` where a row lacks it.
    pub fn column<'a>(&'a self, column: &'a str) -> impl Iterator<Item = Option<&'a Value>> + 'a {
        self.records.iter().map(move |record| record.get(column))
    }

    /// Every row with the meta columns filled in.
    pub fn rows(&self) -> Vec<Row> {
        self.records.iter().map(Record::to_row).collect()
    }
}
