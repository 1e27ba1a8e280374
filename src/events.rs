/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events a replica emits, for event handling and logging.
//!
//! Note: an event for a given action indicates that the action has been completed.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::types::{
    basic::{BlockId, CryptoHash, PeerAddr},
    block::Block,
};

pub enum Event {
    // Events that change the chain.
    AppendBlock(AppendBlockEvent),
    ReceiveBlock(ReceiveBlockEvent),
    ReplaceChain(ReplaceChainEvent),
    // Events that involve peers.
    RegisterPeer(RegisterPeerEvent),
    ReceiveSyncRequest(ReceiveSyncRequestEvent),
    // Events that involve jobs.
    ExecuteJob(ExecuteJobEvent),
    ReceiveJobResult(ReceiveJobResultEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            // The event bus is shut down before the threads that publish to it.
            let _ = event_publisher.send(event);
        }
    }
}

/// The replica appended a block it created itself.
pub struct AppendBlockEvent {
    pub timestamp: SystemTime,
    pub block: Block,
}

/// The replica appended a block received from a peer.
pub struct ReceiveBlockEvent {
    pub timestamp: SystemTime,
    pub origin: PeerAddr,
    pub block: Block,
}

/// The replica adopted a longer chain received from a peer.
pub struct ReplaceChainEvent {
    pub timestamp: SystemTime,
    pub origin: PeerAddr,
    pub old_len: usize,
    pub new_len: usize,
}

pub struct RegisterPeerEvent {
    pub timestamp: SystemTime,
    pub peer: PeerAddr,
}

/// A peer asked for the replica's chain.
pub struct ReceiveSyncRequestEvent {
    pub timestamp: SystemTime,
    pub origin: PeerAddr,
}

/// The replica executed a job addressed to it and appended the result.
pub struct ExecuteJobEvent {
    pub timestamp: SystemTime,
    pub request: CryptoHash,
    pub result_block: BlockId,
    pub failed: bool,
}

/// The replica found the result of a job it requested.
pub struct ReceiveJobResultEvent {
    pub timestamp: SystemTime,
    pub request: CryptoHash,
    pub result_block: BlockId,
}
