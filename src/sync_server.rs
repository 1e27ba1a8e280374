/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The sync server thread, which handles every message a replica receives from its peers.
//!
//! ## Sync protocol
//!
//! Replicas keep each other up to date in two ways:
//! 1. A replica that appends a block broadcasts it in a [`NewBlock`](Message::NewBlock) message. A
//!    receiving replica appends it if it directly extends its chain.
//! 2. A replica that receives a block from beyond the end of its chain, or that joins a cluster, sends a
//!    [`GetChain`](Message::GetChain) request. The peer responds with its whole
//!    [`Chain`](Message::Chain), which the requester adopts if it is valid and longer than its own.
//!
//! ## Peer discovery
//!
//! The origin of every message is registered as a peer on first contact. A replica that learns of new
//! peers through a [`Peers`](Message::Peers) message sends each of them a
//! [`Register`](Message::Register) message so that they include it in their broadcasts too.

use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crate::events::*;
use crate::ledger::{ExtendOutcome, Ledger, ReplaceOutcome};
use crate::networking::{Message, Network};
use crate::state::KVStore;
use crate::types::{basic::PeerAddr, block::Block};

pub(crate) struct SyncServer<K: KVStore, N: Network> {
    ledger: Ledger<K>,
    network: N,
    event_publisher: Option<Sender<Event>>,
}

impl<K: KVStore, N: Network + 'static> SyncServer<K, N> {
    pub(crate) fn new(ledger: Ledger<K>, network: N, event_publisher: Option<Sender<Event>>) -> Self {
        Self {
            ledger,
            network,
            event_publisher,
        }
    }

    pub(crate) fn start(
        mut self,
        messages: Receiver<(PeerAddr, Message)>,
        poll_interval: Duration,
        shutdown_signal: Receiver<()>,
    ) -> JoinHandle<()> {
        thread::spawn(move || loop {
            match shutdown_signal.try_recv() {
                Ok(()) => return,
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => panic!("Sync server thread disconnected from main thread"),
            }

            match messages.recv_timeout(poll_interval) {
                Ok((origin, message)) => self.handle(origin, message),
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => panic!("Sync server thread disconnected from the poller"),
            }
        })
    }

    /// Handle one message from `origin`.
    pub(crate) fn handle(&mut self, origin: PeerAddr, message: Message) {
        if origin == self.network.local_addr() {
            return;
        }
        self.register(origin.clone());

        match message {
            Message::GetChain => {
                Event::publish(&self.event_publisher, Event::ReceiveSyncRequest(ReceiveSyncRequestEvent {
                    timestamp: SystemTime::now(),
                    origin: origin.clone(),
                }));
                let chain = self.ledger.snapshot();
                self.network.send(origin, Message::Chain(chain));
            }

            Message::Chain(blocks) => self.on_chain(origin, blocks),

            Message::GetPeers => {
                let mut peers = self.network.peers();
                peers.push(self.network.local_addr());
                self.network.send(origin, Message::Peers(peers));
            }

            Message::Peers(peers) => {
                let local_addr = self.network.local_addr();
                for peer in peers {
                    if self.register(peer.clone()) {
                        self.network.send(peer, Message::Register(local_addr.clone()));
                    }
                }
            }

            Message::Register(peer) => {
                self.register(peer);
            }

            Message::NewBlock(block) => self.on_new_block(origin, block),
        }
    }

    fn on_chain(&mut self, origin: PeerAddr, blocks: Vec<Block>) {
        match self.ledger.try_replace(blocks) {
            Ok(ReplaceOutcome::Replaced { old_len, new_len }) => {
                Event::publish(&self.event_publisher, Event::ReplaceChain(ReplaceChainEvent {
                    timestamp: SystemTime::now(),
                    origin,
                    old_len,
                    new_len,
                }));
            }
            Ok(ReplaceOutcome::NotLonger) => (),
            Ok(ReplaceOutcome::Rejected(invalid)) => {
                log::warn!("SyncServer, rejected chain from {}: {}", origin, invalid);
            }
            Err(err) => log::error!("SyncServer, failed to replace chain: {}", err),
        }
    }

    fn on_new_block(&mut self, origin: PeerAddr, block: Block) {
        match self.ledger.try_extend(block.clone()) {
            Ok(ExtendOutcome::Extended) => {
                Event::publish(&self.event_publisher, Event::ReceiveBlock(ReceiveBlockEvent {
                    timestamp: SystemTime::now(),
                    origin,
                    block,
                }));
            }
            Ok(ExtendOutcome::Known) => (),
            Ok(ExtendOutcome::Behind) => self.network.send(origin, Message::GetChain),
            Ok(ExtendOutcome::Rejected(invalid)) => {
                log::debug!("SyncServer, rejected block {} from {}: {}", block.id, origin, invalid);
                // A conflicting block may come from a longer fork; let the longest chain decide.
                self.network.send(origin, Message::GetChain);
            }
            Err(err) => log::error!("SyncServer, failed to append received block: {}", err),
        }
    }

    fn register(&mut self, peer: PeerAddr) -> bool {
        let is_new = self.network.register_peer(peer.clone());
        if is_new {
            Event::publish(&self.event_publisher, Event::RegisterPeer(RegisterPeerEvent {
                timestamp: SystemTime::now(),
                peer,
            }));
        }
        is_new
    }
}
