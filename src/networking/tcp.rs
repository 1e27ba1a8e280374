/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [`TcpNetwork`], a [`Network`] over plain TCP.
//!
//! Every message travels over its own short-lived connection as a single frame:
//!
//! ```text
//! | length: u32 (little endian) | Borsh(Envelope { origin, message }) |
//! ```
//!
//! Frames longer than the configured maximum are dropped without being read.
//!
//! A `TcpNetwork` runs a *listener* thread that accepts connections (spawning a short-lived reader for
//! each), and one *writer* thread per peer it sends to. Each writer drains a bounded queue of frames, so a
//! slow or dead peer only holds up its own traffic. Frames for a peer whose queue is full are dropped. A
//! peer that refuses [`MAX_SEND_FAILURES`] frames in a row is unregistered and its writer exits. Everything
//! is shut down when the last clone of the network is dropped.

use std::collections::{BTreeSet, HashMap};
use std::fmt::{self, Display, Formatter};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TryRecvError, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::config::Configuration;
use crate::types::basic::PeerAddr;

use super::{Message, Network};

/// The largest frame accepted unless configured otherwise: 64 MiB.
pub const DEFAULT_MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const IO_TIMEOUT: Duration = Duration::from_secs(5);
const ACCEPT_INTERVAL: Duration = Duration::from_millis(10);

/// How many frames may wait for one peer before new ones are dropped.
pub const PEER_QUEUE_LEN: usize = 64;

/// How many sends in a row may fail before a peer is unregistered.
pub const MAX_SEND_FAILURES: u32 = 3;

/// What actually goes over the wire: a message together with the advertised address of its sender.
#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct Envelope {
    pub origin: PeerAddr,
    pub message: Message,
}

#[derive(Clone)]
pub struct TcpNetwork {
    local_addr: PeerAddr,
    peers: Arc<Mutex<BTreeSet<PeerAddr>>>,
    inbox: Arc<Mutex<Receiver<(PeerAddr, Message)>>>,
    writers: Arc<Writers>,
    _threads: Arc<TcpThreads>,
}

impl TcpNetwork {
    /// Bind a listener on `listen_addr` and start the listener thread.
    ///
    /// The advertised address is `advertise_host` if given, else the bound IP, or the machine's
    /// [outbound IP](local_ip) if bound to an unspecified address. The advertised port is always the
    /// port actually bound, so `listen_addr` may use port 0.
    pub fn bind(
        listen_addr: SocketAddr,
        advertise_host: Option<String>,
        max_frame_len: u32,
    ) -> Result<TcpNetwork, NetworkError> {
        let listener = TcpListener::bind(listen_addr).map_err(|source| NetworkError::Bind { addr: listen_addr, source })?;
        let bound = listener.local_addr().map_err(NetworkError::Setup)?;
        listener.set_nonblocking(true).map_err(NetworkError::Setup)?;

        let host = match advertise_host {
            Some(host) => host,
            None if bound.ip().is_unspecified() => local_ip().to_string(),
            None => bound.ip().to_string(),
        };
        let local_addr = PeerAddr::new(host, bound.port());

        let (to_inbox, inbox) = mpsc::channel();

        let (listener_shutdown, listener_shutdown_receiver) = mpsc::channel();
        let listener = start_listener(listener, to_inbox, max_frame_len, listener_shutdown_receiver);

        log::debug!("TcpNetwork, listening on {}, advertising {}", bound, local_addr);

        let peers = Arc::new(Mutex::new(BTreeSet::new()));
        let writers = Arc::new(Writers {
            queues: Mutex::new(HashMap::new()),
            peers: Arc::clone(&peers),
            closed: AtomicBool::new(false),
        });

        Ok(TcpNetwork {
            local_addr,
            peers,
            inbox: Arc::new(Mutex::new(inbox)),
            writers: Arc::clone(&writers),
            _threads: Arc::new(TcpThreads {
                listener: Some(listener),
                listener_shutdown,
                writers,
            }),
        })
    }

    /// Bind according to the networking fields of `configuration`.
    pub fn from_configuration(configuration: &Configuration) -> Result<TcpNetwork, NetworkError> {
        Self::bind(
            configuration.listen_addr,
            configuration.advertise_host.clone(),
            configuration.max_frame_len,
        )
    }

    fn enqueue(&self, peer: PeerAddr, frame: Vec<u8>) {
        let mut queues = self.writers.queues.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = queues
            .entry(peer.clone())
            .or_insert_with(|| start_writer(peer.clone(), Arc::clone(&self.writers)));
        match queue.try_send(frame) {
            Ok(()) => (),
            Err(TrySendError::Full(_)) => {
                log::debug!("TcpNetwork, dropped a frame for {}: {} frames already waiting", peer, PEER_QUEUE_LEN)
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("TcpNetwork, dropped a frame for {}: its writer has stopped", peer);
                queues.remove(&peer);
            }
        }
    }

    fn frame(&self, message: Message) -> Option<Vec<u8>> {
        let envelope = Envelope {
            origin: self.local_addr.clone(),
            message,
        };
        match encode_frame(&envelope) {
            Ok(frame) => Some(frame),
            Err(err) => {
                log::error!("TcpNetwork, failed to encode {}: {}", envelope.message.name(), err);
                None
            }
        }
    }
}

impl Network for TcpNetwork {
    fn local_addr(&self) -> PeerAddr {
        self.local_addr.clone()
    }

    fn register_peer(&mut self, peer: PeerAddr) -> bool {
        if peer == self.local_addr {
            return false;
        }
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer)
    }

    fn peers(&self) -> Vec<PeerAddr> {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    fn send(&mut self, peer: PeerAddr, message: Message) {
        if let Some(frame) = self.frame(message) {
            self.enqueue(peer, frame);
        }
    }

    fn broadcast(&mut self, message: Message) {
        let peers = self.peers();
        if peers.is_empty() {
            return;
        }
        if let Some(frame) = self.frame(message) {
            for peer in peers {
                self.enqueue(peer, frame.clone());
            }
        }
    }

    fn recv(&mut self) -> Option<(PeerAddr, Message)> {
        self.inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_recv()
            .ok()
    }
}

struct TcpThreads {
    listener: Option<JoinHandle<()>>,
    listener_shutdown: Sender<()>,
    writers: Arc<Writers>,
}

impl Drop for TcpThreads {
    fn drop(&mut self) {
        let _ = self.listener_shutdown.send(());
        if let Some(listener) = self.listener.take() {
            let _ = listener.join();
        }

        // Writers are not joined: one may be waiting out a connect timeout. They exit once their
        // queue is gone, without sending what is left in it.
        self.writers.closed.store(true, Ordering::Release);
        self.writers.queues.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// The per-peer writers' queues, and what the writers share with the network.
struct Writers {
    queues: Mutex<HashMap<PeerAddr, SyncSender<Vec<u8>>>>,
    peers: Arc<Mutex<BTreeSet<PeerAddr>>>,
    closed: AtomicBool,
}

fn start_listener(
    listener: TcpListener,
    to_inbox: Sender<(PeerAddr, Message)>,
    max_frame_len: u32,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        match listener.accept() {
            Ok((stream, from)) => {
                let to_inbox = to_inbox.clone();
                thread::spawn(move || {
                    if let Err(err) = receive_envelope(stream, max_frame_len, &to_inbox) {
                        log::debug!("TcpNetwork, dropped connection from {}: {}", from, err);
                    }
                });
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_INTERVAL),
            Err(err) => {
                log::warn!("TcpNetwork, failed to accept a connection: {}", err);
                thread::sleep(ACCEPT_INTERVAL)
            }
        }
    })
}

fn receive_envelope(
    mut stream: TcpStream,
    max_frame_len: u32,
    to_inbox: &Sender<(PeerAddr, Message)>,
) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(IO_TIMEOUT))?;
    let envelope = read_frame(&mut stream, max_frame_len)?;
    let _ = to_inbox.send((envelope.origin, envelope.message));
    Ok(())
}

/// Spawn the writer for `peer` and return its queue. The caller must insert the queue into
/// `writers.queues`, which is also the only place the writer removes it from.
fn start_writer(peer: PeerAddr, writers: Arc<Writers>) -> SyncSender<Vec<u8>> {
    let (queue, frames) = mpsc::sync_channel::<Vec<u8>>(PEER_QUEUE_LEN);
    thread::spawn(move || {
        let mut failures = 0;
        while let Ok(frame) = frames.recv() {
            if writers.closed.load(Ordering::Acquire) {
                return;
            }

            match write_to(&peer, &frame) {
                Ok(()) => failures = 0,
                Err(err) => {
                    failures += 1;
                    log::debug!("TcpNetwork, failed to send to {} ({} in a row): {}", peer, failures, err);
                    if failures >= MAX_SEND_FAILURES {
                        writers.queues.lock().unwrap_or_else(PoisonError::into_inner).remove(&peer);
                        if writers.peers.lock().unwrap_or_else(PoisonError::into_inner).remove(&peer) {
                            log::warn!("TcpNetwork, unregistered {} after {} failed sends", peer, failures);
                        }
                        return;
                    }
                }
            }
        }
    });
    queue
}

fn write_to(peer: &PeerAddr, frame: &[u8]) -> io::Result<()> {
    let addr = peer
        .to_socket_addr()
        .ok_or_else(|| io::Error::new(ErrorKind::AddrNotAvailable, "cannot resolve address"))?;
    let mut stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
    stream.set_write_timeout(Some(IO_TIMEOUT))?;
    stream.write_all(frame)?;
    stream.flush()
}

/// Length-prefix the Borsh encoding of `envelope`.
pub fn encode_frame(envelope: &Envelope) -> io::Result<Vec<u8>> {
    let body = envelope.try_to_vec()?;
    let len = u32::try_from(body.len()).map_err(|_| io::Error::new(ErrorKind::InvalidInput, "frame too long"))?;
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Read one frame from `reader`, refusing frames whose body is longer than `max_frame_len`.
pub fn read_frame<R: Read>(reader: &mut R, max_frame_len: u32) -> io::Result<Envelope> {
    let mut len = [0u8; 4];
    reader.read_exact(&mut len)?;
    let len = u32::from_le_bytes(len);
    if len > max_frame_len {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds the limit of {} bytes", len, max_frame_len),
        ));
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body)?;
    Envelope::try_from_slice(&body)
}

/// The IP of the interface this machine uses for outbound traffic, or `127.0.0.1` if it has none.
///
/// Connecting a UDP socket sends no packets; it only makes the OS pick a route and a source address.
pub fn local_ip() -> IpAddr {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect((Ipv4Addr::new(10, 255, 255, 255), 1))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .ok()
        .filter(|ip| !ip.is_unspecified())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

#[derive(Debug)]
pub enum NetworkError {
    Bind { addr: SocketAddr, source: io::Error },
    Setup(io::Error),
}

impl Display for NetworkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::Bind { addr, source } => write!(f, "failed to bind {}: {}", addr, source),
            NetworkError::Setup(source) => write!(f, "failed to set up the listener: {}", source),
        }
    }
}

impl std::error::Error for NetworkError {}
