/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [Trait definition](Network) for pluggable peer-to-peer networking, the [messages](Message) that
//! replicas exchange, and the internal poller thread that drains the network.
//!
//! Peers are identified by the [address](PeerAddr) they advertise. Every message a replica receives
//! comes with the advertised address of its origin, so that the replica can reply to it (and register
//! it as a peer) even if the message arrived on a connection opened from some other port.
//!
//! The crate provides one networking provider, [`TcpNetwork`](tcp::TcpNetwork). Tests and embedders
//! can plug in their own by implementing [`Network`].

pub mod tcp;

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{basic::PeerAddr, block::Block};

pub trait Network: Clone + Send {
    /// The address this replica advertises to its peers.
    fn local_addr(&self) -> PeerAddr;

    /// Remember `peer` as a recipient of broadcasts. Returns whether the peer was not known before.
    /// Registering the local address is a no-op.
    fn register_peer(&mut self, peer: PeerAddr) -> bool;

    /// Every peer registered so far.
    fn peers(&self) -> Vec<PeerAddr>;

    /// Send a message to the specified peer without blocking.
    fn send(&mut self, peer: PeerAddr, message: Message);

    /// Send a message to every registered peer without blocking.
    fn broadcast(&mut self, message: Message);

    /// Receive a message from any peer. Returns immediately with a None if no message is available now.
    fn recv(&mut self) -> Option<(PeerAddr, Message)>;
}

/// Messages exchanged between replicas.
#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub enum Message {
    /// Ask for the sender's whole chain.
    GetChain,
    /// A whole chain, genesis first.
    Chain(Vec<Block>),
    /// Ask for the peers the receiver knows.
    GetPeers,
    Peers(Vec<PeerAddr>),
    /// Ask the receiver to include the given address in its broadcasts.
    Register(PeerAddr),
    /// A block the sender has just appended.
    NewBlock(Block),
}

impl Message {
    pub fn name(&self) -> &'static str {
        match self {
            Message::GetChain => "GetChain",
            Message::Chain(_) => "Chain",
            Message::GetPeers => "GetPeers",
            Message::Peers(_) => "Peers",
            Message::Register(_) => "Register",
            Message::NewBlock(_) => "NewBlock",
        }
    }
}

/// Spawn the poller thread, which polls the Network for messages and forwards them to the sync server.
///
/// When no message is available, the poller sleeps for `poll_interval` before trying again.
pub(crate) fn start_polling<N: Network + 'static>(
    mut network: N,
    poll_interval: Duration,
    shutdown_signal: Receiver<()>,
) -> (JoinHandle<()>, Receiver<(PeerAddr, Message)>) {
    let (to_sync_server, messages) = mpsc::channel();

    let poller_thread = thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Poller thread disconnected from main thread")
            }
        }

        if let Some((origin, msg)) = network.recv() {
            let _ = to_sync_server.send((origin, msg));
        } else {
            match shutdown_signal.recv_timeout(poll_interval) {
                Ok(()) => return,
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => {
                    panic!("Poller thread disconnected from main thread")
                }
            }
        }
    });

    (poller_thread, messages)
}
