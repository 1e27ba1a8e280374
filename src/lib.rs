/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A replicated, append-only table. Every replica of a table holds a copy of one hash-linked,
//! signed, proof-of-work log of blocks; rows, the table's allow-list of writers, and requests to run
//! jobs on specific replicas (together with their results) are all blocks in that log.
//!
//! Replicas converge by exchanging blocks and, when they fall behind, whole chains: the longest valid
//! chain wins. See [ledger] for the validity rules and [sync_server] for the protocol.
//!
//! Most users only need [table::Table]. [node::Node] exposes the replication layer on its own, and
//! the [networking::Network] and [state::KVStore] traits let embedders plug in their own transport
//! and storage.

pub mod config;

pub(crate) mod event_bus;

pub mod events;

pub mod jobs;

pub mod ledger;

pub mod logging;

pub mod networking;

pub mod node;

pub mod state;

pub mod sync_server;

pub mod table;

pub mod types;
