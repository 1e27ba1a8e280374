/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! "Inert" types that are stored in blocks, sent around between replicas, and inspected, but have no
//! active behavior of their own. Most of them follow the newtype pattern.

use borsh::{BorshDeserialize, BorshSerialize};
use std::{
    fmt::{self, Display, Formatter},
    net::{SocketAddr, ToSocketAddrs},
    ops::Add,
    time::{Duration, SystemTime},
};

/// Position of a block in the log. The genesis block has id 1, and every following block has the id
/// of its predecessor plus one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct BlockId(u64);

impl BlockId {
    pub const GENESIS: BlockId = BlockId(1);

    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    pub fn to_le_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    pub fn next(&self) -> BlockId {
        *self + 1
    }
}

impl Display for BlockId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for BlockId {
    type Output = BlockId;
    fn add(self, rhs: u64) -> Self::Output {
        BlockId::new(self.0 + rhs)
    }
}

/// Milliseconds since the Unix Epoch. Assigned to a block when it is appended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const UNIX_EPOCH: Timestamp = Timestamp(0);

    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub const fn millis(&self) -> u64 {
        self.0
    }

    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    pub fn to_system_time(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_millis(self.0)
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        // Times before the epoch saturate to the epoch itself.
        let millis = time
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|duration| duration.as_millis() as u64)
            .unwrap_or(0);
        Timestamp(millis)
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// SHA-256 hash of a block.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl From<[u8; 32]> for CryptoHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "CryptoHash({})", crate::logging::first_seven_base64_chars(&self.0))
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::logging::first_seven_base64_chars(&self.0))
    }
}

/// Ed25519 signature over a block's [signing bytes](crate::types::block::Block::signing_bytes).
#[derive(Clone, Copy, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// The signature carried by blocks that nobody signs, i.e., the genesis block.
    pub const fn empty() -> Self {
        Self([0u8; 64])
    }

    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl fmt::Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureBytes({})", crate::logging::first_seven_base64_chars(&self.0))
    }
}

/// Raw bytes of an Ed25519 verifying key.
pub type PublicKeyBytes = [u8; 32];

/// Network address of a replica, as advertised by the replica itself. Execution requests name their
/// target replica by this address.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl PeerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Resolve the address into something a `TcpStream` can connect to.
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
    }
}

impl From<SocketAddr> for PeerAddr {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl Display for PeerAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Number of leading zero hex digits that a proof-of-work hash must have.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Difficulty(u8);

impl Difficulty {
    /// The highest difficulty a table may use. Every further digit multiplies the expected number of
    /// hashes per block by 16.
    pub const MAX: Difficulty = Difficulty(8);

    /// Difficulties above [`Difficulty::MAX`] are clamped to it.
    pub const fn new(int: u8) -> Self {
        if int > Self::MAX.0 {
            Self::MAX
        } else {
            Self(int)
        }
    }

    pub const fn int(&self) -> u8 {
        self.0
    }
}
