/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run a replica of a table's log, and to connect it to a cluster.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the node](NodeSpec),
//! - The function to [start](NodeSpec::start) a [Node] given its specification,
//! - [The type](Node) which keeps the node's threads alive,
//! - [`BlockWriter`], which appends blocks to the ledger and broadcasts them to peers.
//!
//! ## Starting a node
//!
//! ```ignore
//! let node =
//!     NodeSpec::builder()
//!     .network(network)
//!     .kv_store(kv_store)
//!     .keypair(keypair)
//!     .configuration(configuration)
//!     .on_receive_block(receive_block_handler)
//!     .build()
//!     .start()?;
//! ```
//!
//! ### Required setters
//!
//! - `.network(...)`
//! - `.kv_store(...)`
//! - `.keypair(...)`
//! - `.configuration(...)`
//!
//! ### Optional setters
//!
//! The optional setters are for registering user-defined event handlers for events from [crate::events]:
//! - `.on_append_block(...)`
//! - `.on_receive_block(...)`
//! - `.on_replace_chain(...)`
//! - `.on_register_peer(...)`
//! - `.on_receive_sync_request(...)`
//! - `.on_execute_job(...)`
//! - `.on_receive_job_result(...)`
//!
//! ## Threads
//!
//! A running node has up to three threads:
//! 1. The poller, which drains the [network](crate::networking::Network),
//! 2. The [sync server](crate::sync_server), which handles messages from peers,
//! 3. The [event bus](crate::event_bus), if any event handler is registered or event logging is enabled.

use std::fmt::{self, Display, Formatter};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use typed_builder::TypedBuilder;

use crate::config::Configuration;
use crate::event_bus::*;
use crate::events::*;
use crate::ledger::{Ledger, LedgerError};
use crate::networking::{start_polling, Message, Network};
use crate::state::KVStore;
use crate::sync_server::SyncServer;
use crate::types::{
    basic::PeerAddr,
    block::{Block, BlockKind},
    crypto_primitives::Keypair,
    value::Value,
};

/// Stores all necessary parameters and trait implementations required to run a [Node].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [NodeSpec]. On the builder call the following methods to construct a valid [NodeSpec].

    Required:
    - `.network(...)`
    - `.kv_store(...)`
    - `.keypair(...)`
    - `.configuration(...)`

    Optional:
    - `.on_append_block(...)`
    - `.on_receive_block(...)`
    - `.on_replace_chain(...)`
    - `.on_register_peer(...)`
    - `.on_receive_sync_request(...)`
    - `.on_execute_job(...)`
    - `.on_receive_job_result(...)`
"))]
pub struct NodeSpec<K: KVStore, N: Network + 'static> {
    // Required parameters
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. The argument must implement the [Network](crate::networking::Network) trait. Required."))]
    network: N,
    #[builder(setter(doc = "Set the implementation of the node's Key-Value store. The argument must implement the [KVStore](crate::state::KVStore) trait. Required."))]
    kv_store: K,
    #[builder(setter(doc = "Set the keypair the node signs its blocks with. Required."))]
    keypair: Keypair,
    #[builder(setter(doc = "Set the [configuration](Configuration). Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&AppendBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<AppendBlockEvent>),
    doc = "Register a handler closure to be invoked after the node appends a block it created. Optional."))]
    on_append_block: Option<HandlerPtr<AppendBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveBlockEvent>),
    doc = "Register a handler closure to be invoked after the node appends a block received from a peer. Optional."))]
    on_receive_block: Option<HandlerPtr<ReceiveBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReplaceChainEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReplaceChainEvent>),
    doc = "Register a handler closure to be invoked after the node adopts a longer chain from a peer. Optional."))]
    on_replace_chain: Option<HandlerPtr<ReplaceChainEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RegisterPeerEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RegisterPeerEvent>),
    doc = "Register a handler closure to be invoked after the node learns of a new peer. Optional."))]
    on_register_peer: Option<HandlerPtr<RegisterPeerEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveSyncRequestEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveSyncRequestEvent>),
    doc = "Register a handler closure to be invoked after a peer asks the node for its chain. Optional."))]
    on_receive_sync_request: Option<HandlerPtr<ReceiveSyncRequestEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ExecuteJobEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ExecuteJobEvent>),
    doc = "Register a handler closure to be invoked after the node executes a job addressed to it. Optional."))]
    on_execute_job: Option<HandlerPtr<ExecuteJobEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveJobResultEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveJobResultEvent>),
    doc = "Register a handler closure to be invoked after the node finds the result of a job it requested. Optional."))]
    on_receive_job_result: Option<HandlerPtr<ReceiveJobResultEvent>>,
}

impl<K: KVStore, N: Network + 'static> NodeSpec<K, N> {
    /// Opens the ledger, then starts all threads and channels associated with running a node, and returns the
    /// handles to them in a [Node] struct.
    pub fn start(self) -> Result<Node<K, N>, LedgerError> {
        let configuration = self.configuration;
        let ledger = Ledger::open(self.kv_store, &configuration.table_name, configuration.pow_difficulty)?;

        let event_handlers = EventHandlers::new(
            configuration.log_events,
            self.on_append_block,
            self.on_receive_block,
            self.on_replace_chain,
            self.on_register_peer,
            self.on_receive_sync_request,
            self.on_execute_job,
            self.on_receive_job_result,
        );

        let (event_publisher, event_subscriber) =
            if !event_handlers.is_empty() {
                Some(mpsc::channel()).unzip()
            } else { (None, None) };

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let (poller, messages) =
            start_polling(self.network.clone(), configuration.poll_interval, poller_shutdown_receiver);

        let (sync_server_shutdown, sync_server_shutdown_receiver) = mpsc::channel();
        let sync_server = SyncServer::new(ledger.clone(), self.network.clone(), event_publisher.clone())
            .start(messages, configuration.poll_interval, sync_server_shutdown_receiver);

        let (event_bus, event_bus_shutdown) = match event_subscriber {
            Some(event_subscriber) => {
                let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
                let event_bus = start_event_bus(
                    event_handlers,
                    event_subscriber,
                    configuration.poll_interval,
                    event_bus_shutdown_receiver,
                );
                (Some(event_bus), Some(event_bus_shutdown))
            }
            None => (None, None),
        };

        Ok(Node {
            writer: BlockWriter {
                ledger,
                network: self.network,
                keypair: self.keypair,
                event_publisher,
                append_lock: Arc::new(Mutex::new(())),
            },
            configuration,
            poller: Some(poller),
            poller_shutdown,
            sync_server: Some(sync_server),
            sync_server_shutdown,
            event_bus,
            event_bus_shutdown,
        })
    }
}

/// A handle to the background threads of a node. When this value is dropped, all background threads are
/// gracefully shut down.
pub struct Node<K: KVStore, N: Network> {
    writer: BlockWriter<K, N>,
    configuration: Configuration,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    sync_server: Option<JoinHandle<()>>,
    sync_server_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<K: KVStore, N: Network + 'static> Node<K, N> {
    pub fn ledger(&self) -> &Ledger<K> {
        &self.writer.ledger
    }

    pub fn network(&self) -> &N {
        &self.writer.network
    }

    pub fn keypair(&self) -> &Keypair {
        &self.writer.keypair
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn local_addr(&self) -> PeerAddr {
        self.writer.network.local_addr()
    }

    /// A [`BlockWriter`] that threads other than the caller's can append blocks with.
    pub fn writer(&self) -> BlockWriter<K, N> {
        self.writer.clone()
    }

    /// Append a block signed by this node and broadcast it to every known peer.
    pub fn append(&mut self, kind: BlockKind, data: Vec<Value>) -> Result<Block, LedgerError> {
        self.writer.append(kind, data)
    }

    /// Join the cluster that `peer` belongs to.
    ///
    /// Registers with `peer`, asks it for its peers (each of which this node then registers with too)
    /// and for its chain, and waits up to `timeout` until the local chain holds more than the genesis
    /// block.
    pub fn join(&mut self, peer: PeerAddr, timeout: Duration) -> Result<(), JoinError> {
        let local_addr = self.local_addr();
        if peer == local_addr {
            return Err(JoinError::OwnAddress(peer));
        }

        let network = &mut self.writer.network;
        network.register_peer(peer.clone());
        network.send(peer.clone(), Message::Register(local_addr));
        network.send(peer.clone(), Message::GetPeers);
        network.send(peer.clone(), Message::GetChain);

        let ledger = &self.writer.ledger;
        let deadline = Instant::now() + timeout;
        let mut generation = ledger.generation();
        while ledger.len() <= 1 {
            let now = Instant::now();
            if now >= deadline {
                return Err(JoinError::Timeout { peer, timeout });
            }
            generation = ledger.wait_for_change(generation, deadline - now);
        }

        Ok(())
    }

    /// Ask every known peer for its chain. Longer valid chains are adopted as they arrive.
    pub fn resolve_conflicts(&mut self) {
        self.writer.network.broadcast(Message::GetChain)
    }
}

impl<K: KVStore, N: Network> Drop for Node<K, N> {
    fn drop(&mut self) {
        // Safety: the order of thread shutdown in this function is important, as the threads make assumptions about
        // the validity of their channels based on this. The sync server thread receives messages from the poller,
        // and assumes that the poller will live longer than it.

        self.event_bus_shutdown.iter().for_each(|shutdown| { let _ = shutdown.send(()); });
        if let Some(event_bus) = self.event_bus.take() {
            let _ = event_bus.join();
        }

        let _ = self.sync_server_shutdown.send(());
        if let Some(sync_server) = self.sync_server.take() {
            let _ = sync_server.join();
        }

        let _ = self.poller_shutdown.send(());
        if let Some(poller) = self.poller.take() {
            let _ = poller.join();
        }
    }
}

/// Appends blocks signed by a node's keypair to its ledger, and broadcasts them to the node's peers.
///
/// Clones share one append lock, held from the ledger append until the event is published, so that
/// peers and event handlers see a node's own blocks in log order.
pub struct BlockWriter<K: KVStore, N: Network> {
    ledger: Ledger<K>,
    network: N,
    keypair: Keypair,
    event_publisher: Option<Sender<Event>>,
    append_lock: Arc<Mutex<()>>,
}

impl<K: KVStore, N: Network> Clone for BlockWriter<K, N> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            network: self.network.clone(),
            keypair: self.keypair.clone(),
            event_publisher: self.event_publisher.clone(),
            append_lock: self.append_lock.clone(),
        }
    }
}

impl<K: KVStore, N: Network> BlockWriter<K, N> {
    pub fn append(&mut self, kind: BlockKind, data: Vec<Value>) -> Result<Block, LedgerError> {
        // Safety: the lock guards no data, so a poisoned lock carries no broken invariant.
        let _guard = self.append_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let block = self.ledger.append(&self.keypair, kind, data)?;
        self.network.broadcast(Message::NewBlock(block.clone()));

        Event::publish(&self.event_publisher, Event::AppendBlock(AppendBlockEvent {
            timestamp: SystemTime::now(),
            block: block.clone(),
        }));

        Ok(block)
    }

    pub fn ledger(&self) -> &Ledger<K> {
        &self.ledger
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn local_addr(&self) -> PeerAddr {
        self.network.local_addr()
    }

    pub(crate) fn publish(&self, event: Event) {
        Event::publish(&self.event_publisher, event)
    }
}

#[derive(Debug)]
pub enum JoinError {
    /// The given peer is this node itself.
    OwnAddress(PeerAddr),
    /// No chain beyond the genesis block arrived in time.
    Timeout { peer: PeerAddr, timeout: Duration },
}

impl Display for JoinError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            JoinError::OwnAddress(peer) => write!(f, "cannot join through own address {}", peer),
            JoinError::Timeout { peer, timeout } => {
                write!(f, "received no chain through {} within {:?}", peer, timeout)
            }
        }
    }
}

impl std::error::Error for JoinError {}
