/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [`Table`]: a replicated, append-only table of rows that its writers can also run jobs against on
//! specific replicas.
//!
//! A table is a [node](crate::node) plus the table-level rules on top of its log:
//! - Rows are [`Map`](Value::Map) values appended in `Row` blocks, and read back as a
//!   [`TableView`],
//! - Only the keys in the table's allow-list may write to it. A new table's allow-list initially
//!   holds the key of the replica that created it,
//! - A writer can ask a specific replica to run a [`Job`] over its copy of the table. The request and
//!   its result both travel through the log.
//!
//! ## Opening a table
//!
//! ```no_run
//! use tablechain::config::Configuration;
//! use tablechain::table::{Connection, Table};
//! use tablechain::types::value::{row, Value};
//!
//! let configuration = Configuration::builder().table_name("inventory").build();
//! let mut table = Table::open(Connection::default(), configuration)?;
//! table.insert(Value::Map(row([("item", Value::from("bolt")), ("count", Value::from(40))])))?;
//! assert_eq!(table.select().len(), 1);
//! # Ok::<(), tablechain::table::TableError>(())
//! ```

pub mod connection;
pub(crate) mod executor;
pub mod view;

pub use connection::Connection;
pub use view::{Record, TableView, META_BLOCK_ID, META_INSERT_TIMESTAMP};

use std::fmt::{self, Display, Formatter};
use std::io;
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use crate::config::Configuration;
use crate::events::{Event, ReceiveJobResultEvent};
use crate::jobs::{Job, JobError, JobOutcome};
use crate::ledger::{Ledger, LedgerError};
use crate::networking::{
    tcp::{NetworkError, TcpNetwork},
    Network,
};
use crate::node::{JoinError, Node, NodeSpec};
use crate::state::{DirDB, KVStore};
use crate::types::{
    basic::{BlockId, CryptoHash, PeerAddr},
    block::{Block, BlockKind},
    crypto_primitives::{parse_public_key, KeyError},
    payloads::{ExecutionRequest, ExecutionResult},
    value::Value,
};

pub struct Table<K: KVStore = DirDB, N: Network + 'static = TcpNetwork> {
    node: Node<K, N>,
    executor: Option<JoinHandle<()>>,
    executor_shutdown: Option<Sender<()>>,
}

impl Table<DirDB, TcpNetwork> {
    /// Open a table over TCP, storing its blocks in a [`DirDB`].
    pub fn open(connection: Connection, configuration: Configuration) -> Result<Self, TableError> {
        let network = TcpNetwork::from_configuration(&configuration)?;
        let kv_store = match &configuration.data_dir {
            Some(dir) => DirDB::open(dir),
            None => DirDB::for_table(&configuration.table_name),
        }
        .map_err(TableError::Storage)?;

        Self::open_with(connection, configuration, kv_store, network)
    }
}

impl<K: KVStore, N: Network + 'static> Table<K, N> {
    /// Open a table over the given storage and networking providers.
    pub fn open_with(
        connection: Connection,
        configuration: Configuration,
        kv_store: K,
        network: N,
    ) -> Result<Self, TableError> {
        let node = NodeSpec::builder()
            .network(network)
            .kv_store(kv_store)
            .keypair(connection.keypair()?)
            .configuration(configuration)
            .build()
            .start()?;

        Self::from_node(node, connection.peer())
    }

    /// Turn a started node into a table: join the cluster through `peer` (or start a new one without a
    /// peer), check that the node's key may write to the table, and start the execution listener.
    ///
    /// This is the way to open a table with event handlers registered on the [`NodeSpec`].
    pub fn from_node(mut node: Node<K, N>, peer: Option<PeerAddr>) -> Result<Self, TableError> {
        let own_key = node.keypair().public_key_string();

        match peer {
            None => {
                if !has_allow_list(node.ledger()) {
                    node.append(BlockKind::AuthorizedKeys, vec![Value::Text(own_key.clone())])?;
                }
            }
            Some(peer) => {
                let sync_timeout = node.configuration().sync_timeout;
                node.join(peer, sync_timeout)?;
            }
        }

        if !node.ledger().allow_list().contains(&own_key) {
            return Err(TableError::Unauthorized);
        }

        let (executor_shutdown, executor_shutdown_receiver) = mpsc::channel();
        let executor = executor::start_executor(
            node.writer(),
            node.configuration().poll_interval,
            executor_shutdown_receiver,
        );

        Ok(Table {
            node,
            executor: Some(executor),
            executor_shutdown: Some(executor_shutdown),
        })
    }

    pub fn name(&self) -> &str {
        self.node.ledger().table_name()
    }

    pub fn node(&self) -> &Node<K, N> {
        &self.node
    }

    pub fn ledger(&self) -> &Ledger<K> {
        self.node.ledger()
    }

    /// The address other replicas reach this one at, and address jobs to.
    pub fn local_addr(&self) -> PeerAddr {
        self.node.local_addr()
    }

    /// The Base64 public key this table writes with.
    pub fn public_key(&self) -> String {
        self.node.keypair().public_key_string()
    }

    /// The Base64 private key this table writes with. Store it to reopen the table with the same identity.
    pub fn private_key(&self) -> String {
        self.node.keypair().private_key_string()
    }

    /// Every row inserted so far, across all replicas this one has synced with.
    pub fn select(&self) -> TableView {
        TableView::project(&self.node.ledger().snapshot())
    }

    /// Append a row. The row must be a [`Map`](Value::Map) of column names to values.
    pub fn insert(&mut self, row: Value) -> Result<BlockId, TableError> {
        if !matches!(row, Value::Map(_)) {
            return Err(TableError::RowNotAMap(row.type_name()));
        }
        let block = self.node.append(BlockKind::Row, vec![row])?;
        Ok(block.id)
    }

    /// Replace the allow-list with `keys`. Every key must be a Base64 Ed25519 public key.
    pub fn set_authorized_keys(&mut self, keys: Vec<String>) -> Result<BlockId, TableError> {
        if keys.is_empty() {
            return Err(TableError::EmptyAllowList);
        }
        for key in &keys {
            parse_public_key(key).map_err(|source| TableError::InvalidKey { key: key.clone(), source })?;
        }

        let data = keys.into_iter().map(Value::Text).collect();
        let block = self.node.append(BlockKind::AuthorizedKeys, data)?;
        Ok(block.id)
    }

    /// The allow-list currently in force: the keys of the latest `AuthorizedKeys` block.
    pub fn authorized_keys(&self) -> Vec<String> {
        self.node.ledger().allow_list()
    }

    /// Run `job` on the replica at `target` and wait for its outcome.
    pub fn execute(&mut self, job: Job, target: PeerAddr) -> Result<JobOutcome, ExecuteError> {
        let request = self.submit(job, target)?;
        let timeout = self.node.configuration().execute_timeout;
        self.await_result(&request, timeout)
    }

    /// Append a request for the replica at `target` to run `job`, without waiting for the outcome.
    pub fn submit(&mut self, job: Job, target: PeerAddr) -> Result<Block, ExecuteError> {
        job.validate().map_err(ExecuteError::InvalidJob)?;
        let data = ExecutionRequest { job, target }.to_data().map_err(ExecuteError::Encode)?;
        Ok(self.node.append(BlockKind::ExecutionRequest, data)?)
    }

    /// Wait up to `timeout` for the result of the request appended in `request`.
    pub fn await_result(&self, request: &Block, timeout: Duration) -> Result<JobOutcome, ExecuteError> {
        let ledger = self.node.ledger();
        let request_hash = request.hash();
        let deadline = Instant::now() + timeout;
        let mut generation = ledger.generation();

        loop {
            if !ledger.contains(request) {
                return Err(ExecuteError::RequestDisplaced { request: request_hash });
            }

            if let Some((result_block, result)) = find_result(&ledger.blocks_after(request.id.int() as usize), &request_hash) {
                self.node.writer().publish(Event::ReceiveJobResult(ReceiveJobResultEvent {
                    timestamp: SystemTime::now(),
                    request: request_hash,
                    result_block,
                }));
                return Ok(result.outcome);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ExecuteError::Timeout { request: request_hash, timeout });
            }
            generation = ledger.wait_for_change(generation, deadline - now);
        }
    }

    /// Ask every known peer for its chain, adopting any longer valid one.
    pub fn resolve_conflicts(&mut self) {
        self.node.resolve_conflicts()
    }

    /// Stop executing jobs addressed to this replica. The table stays readable and writable.
    pub fn stop_executor(&mut self) {
        if let Some(shutdown) = self.executor_shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(executor) = self.executor.take() {
            let _ = executor.join();
        }
    }

    /// Stop every background thread of the table.
    pub fn close(self) {}
}

impl<K: KVStore, N: Network + 'static> Drop for Table<K, N> {
    fn drop(&mut self) {
        // The executor appends through the node, so it stops first.
        self.stop_executor();
    }
}

// Whether the chain has ever carried an allow-list, even an empty one.
fn has_allow_list<K: KVStore>(ledger: &Ledger<K>) -> bool {
    ledger
        .snapshot()
        .iter()
        .any(|block| block.kind == BlockKind::AuthorizedKeys)
}

fn find_result(blocks: &[Block], request_hash: &CryptoHash) -> Option<(BlockId, ExecutionResult)> {
    blocks.iter().find_map(|block| {
        ExecutionResult::from_block(block)
            .filter(|result| result.request_hash == *request_hash)
            .map(|result| (block.id, result))
    })
}

#[derive(Debug)]
pub enum TableError {
    Network(NetworkError),
    Storage(io::Error),
    Key(KeyError),
    Ledger(LedgerError),
    Join(JoinError),
    /// This replica's key is not in the table's allow-list.
    Unauthorized,
    RowNotAMap(&'static str),
    InvalidKey { key: String, source: KeyError },
    EmptyAllowList,
}

impl Display for TableError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TableError::Network(err) => write!(f, "{}", err),
            TableError::Storage(err) => write!(f, "failed to open the table's storage: {}", err),
            TableError::Key(err) => write!(f, "{}", err),
            TableError::Ledger(err) => write!(f, "{}", err),
            TableError::Join(err) => write!(f, "{}", err),
            TableError::Unauthorized => write!(f, "Your SSH key is not authorized."),
            TableError::RowNotAMap(found) => write!(f, "a row must be a map of columns to values, found {}", found),
            TableError::InvalidKey { key, source } => write!(f, "invalid key {}: {}", key, source),
            TableError::EmptyAllowList => write!(f, "the allow-list must contain at least one key"),
        }
    }
}

impl std::error::Error for TableError {}

impl From<NetworkError> for TableError {
    fn from(err: NetworkError) -> Self {
        TableError::Network(err)
    }
}

impl From<KeyError> for TableError {
    fn from(err: KeyError) -> Self {
        TableError::Key(err)
    }
}

impl From<LedgerError> for TableError {
    fn from(err: LedgerError) -> Self {
        TableError::Ledger(err)
    }
}

impl From<JoinError> for TableError {
    fn from(err: JoinError) -> Self {
        TableError::Join(err)
    }
}

#[derive(Debug)]
pub enum ExecuteError {
    InvalidJob(JobError),
    Encode(io::Error),
    Ledger(LedgerError),
    /// No result arrived in time.
    Timeout { request: CryptoHash, timeout: Duration },
    /// The request block is no longer in the chain: a longer chain without it replaced the local one.
    RequestDisplaced { request: CryptoHash },
}

impl Display for ExecuteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ExecuteError::InvalidJob(err) => write!(f, "invalid job: {}", err),
            ExecuteError::Encode(err) => write!(f, "failed to encode the job: {}", err),
            ExecuteError::Ledger(err) => write!(f, "{}", err),
            ExecuteError::Timeout { request, timeout } => {
                write!(f, "no result for request {} within {:?}", request, timeout)
            }
            ExecuteError::RequestDisplaced { request } => {
                write!(f, "request {} was displaced from the chain", request)
            }
        }
    }
}

impl std::error::Error for ExecuteError {}

impl From<LedgerError> for ExecuteError {
    fn from(err: LedgerError) -> Self {
        ExecuteError::Ledger(err)
    }
}
