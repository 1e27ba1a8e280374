/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The execution listener thread, which runs the jobs other replicas address to this one.
//!
//! Every time the chain changes, the listener looks for execution requests that target this replica's
//! advertised address and have no result yet. It evaluates each against the table as it currently is,
//! and appends the outcome in an execution result block that names the request by its hash. A job that
//! fails still gets a result, carrying [`JobOutcome::Failed`].
//!
//! Requests need no separate authorization check here: the ledger only holds blocks signed by keys
//! that were authorized when the block was appended.

use std::collections::HashSet;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crate::events::{Event, ExecuteJobEvent};
use crate::jobs::JobOutcome;
use crate::ledger::LedgerError;
use crate::networking::Network;
use crate::node::BlockWriter;
use crate::state::KVStore;
use crate::types::{
    basic::CryptoHash,
    block::{Block, BlockKind},
    payloads::{ExecutionRequest, ExecutionResult},
};

use super::view::TableView;

pub(crate) fn start_executor<K: KVStore, N: Network + 'static>(
    mut writer: BlockWriter<K, N>,
    poll_interval: Duration,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        // Requests this replica gave up on, so that it does not retry them on every change.
        let mut abandoned = HashSet::new();
        let mut seen = None;

        loop {
            match shutdown_signal.try_recv() {
                Ok(()) => return,
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => panic!("Executor thread disconnected from main thread"),
            }

            let generation = writer.ledger().generation();
            if seen != Some(generation) {
                execute_pending(&mut writer, &mut abandoned);
                seen = Some(generation);
            }
            writer.ledger().wait_for_change(generation, poll_interval);
        }
    })
}

/// Execute every request in the chain that targets this replica and has no result yet.
pub(crate) fn execute_pending<K: KVStore, N: Network>(
    writer: &mut BlockWriter<K, N>,
    abandoned: &mut HashSet<CryptoHash>,
) {
    let chain = writer.ledger().snapshot();
    let local_addr = writer.local_addr();

    let answered: HashSet<CryptoHash> = chain
        .iter()
        .filter_map(ExecutionResult::from_block)
        .map(|result| result.request_hash)
        .collect();

    let pending: Vec<(&Block, ExecutionRequest)> = chain
        .iter()
        .filter(|block| block.kind == BlockKind::ExecutionRequest)
        .filter_map(|block| ExecutionRequest::from_block(block).map(|request| (block, request)))
        .filter(|(_, request)| request.target == local_addr)
        .filter(|(block, _)| {
            let hash = block.hash();
            !answered.contains(&hash) && !abandoned.contains(&hash)
        })
        .collect();

    if pending.is_empty() {
        return;
    }

    let table = TableView::project(&chain);
    for (block, request) in pending {
        let request_hash = block.hash();
        let outcome = JobOutcome::from(request.job.evaluate(&table));

        let mut result = ExecutionResult {
            block_id: block.id,
            request_hash,
            target: local_addr.clone(),
            outcome,
        };

        let mut appended = writer.append(BlockKind::ExecutionResult, result.to_data());
        if let Err(LedgerError::UnstorableData) = appended {
            result.outcome = JobOutcome::Failed {
                error_msg: "the job's result cannot be stored".to_string(),
            };
            appended = writer.append(BlockKind::ExecutionResult, result.to_data());
        }
        let failed = result.outcome.is_failed();

        match appended {
            Ok(result_block) => {
                writer.publish(Event::ExecuteJob(ExecuteJobEvent {
                    timestamp: SystemTime::now(),
                    request: request_hash,
                    result_block: result_block.id,
                    failed,
                }));
            }
            Err(err) => {
                log::warn!("Executor, could not append the result of request {}: {}", request_hash, err);
                abandoned.insert(request_hash);
            }
        }
    }
}
