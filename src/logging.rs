/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the replica's
//! [config](crate::config::Configuration).
//!
//! This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [ReceiveBlock](crate::events::ReceiveBlockEvent) is printed:
//!
//! ```text
//! ReceiveBlock, 1701329264, 127.0.0.1:40313, fNGCJyk, 7, row
//! ```
//!
//! In the snippet:
//! - The third value is the advertised address of the peer the block came from.
//! - The fourth value is the first seven characters of the Base64 encoding of the hash of the block.
//! - The fifth value is the id of the block, and the sixth its kind.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use std::time::SystemTime;

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const APPEND_BLOCK: &str = "AppendBlock";
pub const RECEIVE_BLOCK: &str = "ReceiveBlock";
pub const REPLACE_CHAIN: &str = "ReplaceChain";
pub const REGISTER_PEER: &str = "RegisterPeer";
pub const RECEIVE_SYNC_REQUEST: &str = "ReceiveSyncRequest";
pub const EXECUTE_JOB: &str = "ExecuteJob";
pub const RECEIVE_JOB_RESULT: &str = "ReceiveJobResult";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for AppendBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |append_block_event: &AppendBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                APPEND_BLOCK,
                secs_since_unix_epoch(append_block_event.timestamp),
                first_seven_base64_chars(&append_block_event.block.hash().bytes()),
                append_block_event.block.id,
                append_block_event.block.kind
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_block_event: &ReceiveBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_BLOCK,
                secs_since_unix_epoch(receive_block_event.timestamp),
                receive_block_event.origin,
                first_seven_base64_chars(&receive_block_event.block.hash().bytes()),
                receive_block_event.block.id,
                receive_block_event.block.kind
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReplaceChainEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |replace_chain_event: &ReplaceChainEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                REPLACE_CHAIN,
                secs_since_unix_epoch(replace_chain_event.timestamp),
                replace_chain_event.origin,
                replace_chain_event.old_len,
                replace_chain_event.new_len
            )
        };
        Box::new(logger)
    }
}

impl Logger for RegisterPeerEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |register_peer_event: &RegisterPeerEvent| {
            log::info!(
                "{}, {}, {}",
                REGISTER_PEER,
                secs_since_unix_epoch(register_peer_event.timestamp),
                register_peer_event.peer
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveSyncRequestEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_sync_request_event: &ReceiveSyncRequestEvent| {
            log::info!(
                "{}, {}, {}",
                RECEIVE_SYNC_REQUEST,
                secs_since_unix_epoch(receive_sync_request_event.timestamp),
                receive_sync_request_event.origin
            )
        };
        Box::new(logger)
    }
}

impl Logger for ExecuteJobEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |execute_job_event: &ExecuteJobEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                EXECUTE_JOB,
                secs_since_unix_epoch(execute_job_event.timestamp),
                first_seven_base64_chars(&execute_job_event.request.bytes()),
                execute_job_event.result_block,
                if execute_job_event.failed { "failed" } else { "completed" }
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveJobResultEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_job_result_event: &ReceiveJobResultEvent| {
            log::info!(
                "{}, {}, {}, {}",
                RECEIVE_JOB_RESULT,
                secs_since_unix_epoch(receive_job_result_event.timestamp),
                first_seven_base64_chars(&receive_job_result_event.request.bytes()),
                receive_job_result_event.result_block
            )
        };
        Box::new(logger)
    }
}

/// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
pub fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

pub fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
