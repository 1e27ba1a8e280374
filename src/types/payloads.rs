/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Typed views of the `data` carried by the non-row block kinds, and their encoding into
//! [`Value`]s.
//!
//! | Block kind         | `data`                                                                  |
//! |--------------------|-------------------------------------------------------------------------|
//! | `AuthorizedKeys`   | one `Text` per authorized key string                                    |
//! | `ExecutionRequest` | `[{"job": Bytes, "host": Text, "port": Int}]`                           |
//! | `ExecutionResult`  | `[{"block_id": Int, "request_hash": Bytes, "host": Text, "port": Int, "result": Map}]` |

use borsh::{BorshDeserialize, BorshSerialize};
use std::collections::BTreeMap;

use crate::jobs::{Job, JobOutcome};
use crate::types::{
    basic::{BlockId, CryptoHash, PeerAddr},
    block::{Block, BlockKind},
    value::Value,
};

/// Extract the allow-list snapshot carried by an `AuthorizedKeys` block. Non-text entries are ignored.
pub fn authorized_keys(block: &Block) -> Option<Vec<String>> {
    if block.kind != BlockKind::AuthorizedKeys {
        return None;
    }
    Some(
        block
            .data
            .iter()
            .filter_map(|datum| datum.as_text().map(str::to_string))
            .collect(),
    )
}

/// A request for the replica at `target` to run `job`.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionRequest {
    pub job: Job,
    pub target: PeerAddr,
}

impl ExecutionRequest {
    pub fn to_data(&self) -> Result<Vec<Value>, std::io::Error> {
        let mut map = BTreeMap::new();
        map.insert("job".to_string(), Value::Bytes(self.job.try_to_vec()?));
        map.insert("host".to_string(), Value::Text(self.target.host.clone()));
        map.insert("port".to_string(), Value::Int(self.target.port as i64));
        Ok(vec![Value::Map(map)])
    }

    pub fn from_block(block: &Block) -> Option<ExecutionRequest> {
        if block.kind != BlockKind::ExecutionRequest {
            return None;
        }
        let map = block.data.first()?.as_map()?;
        let job = Job::try_from_slice(map.get("job")?.as_bytes()?).ok()?;
        let host = map.get("host")?.as_text()?.to_string();
        let port = u16::try_from(map.get("port")?.as_int()?).ok()?;
        Some(ExecutionRequest {
            job,
            target: PeerAddr::new(host, port),
        })
    }
}

/// The answer to an [`ExecutionRequest`], correlated with it by the request block's hash.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionResult {
    pub block_id: BlockId,
    pub request_hash: CryptoHash,
    pub target: PeerAddr,
    pub outcome: JobOutcome,
}

impl ExecutionResult {
    pub fn to_data(&self) -> Vec<Value> {
        let mut map = BTreeMap::new();
        map.insert("block_id".to_string(), Value::Int(self.block_id.int() as i64));
        map.insert(
            "request_hash".to_string(),
            Value::Bytes(self.request_hash.bytes().to_vec()),
        );
        map.insert("host".to_string(), Value::Text(self.target.host.clone()));
        map.insert("port".to_string(), Value::Int(self.target.port as i64));
        map.insert("result".to_string(), self.outcome.to_value());
        vec![Value::Map(map)]
    }

    pub fn from_block(block: &Block) -> Option<ExecutionResult> {
        if block.kind != BlockKind::ExecutionResult {
            return None;
        }
        let map = block.data.first()?.as_map()?;
        let block_id = BlockId::new(u64::try_from(map.get("block_id")?.as_int()?).ok()?);
        let request_hash =
            CryptoHash::new(<[u8; 32]>::try_from(map.get("request_hash")?.as_bytes()?).ok()?);
        let host = map.get("host")?.as_text()?.to_string();
        let port = u16::try_from(map.get("port")?.as_int()?).ok()?;
        let outcome = JobOutcome::from_value(map.get("result")?)?;
        Some(ExecutionResult {
            block_id,
            request_hash,
            target: PeerAddr::new(host, port),
            outcome,
        })
    }
}
