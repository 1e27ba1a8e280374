/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`Ledger`]: one replica's copy of the append-only log of a table.
//!
//! The ledger owns the blocks (in memory, mirrored into a user-provided [`KVStore`]) and enforces the
//! rules that every block in the log must satisfy. It knows nothing about networking; the
//! [sync server](crate::sync_server) feeds it blocks and chains received from peers, and the
//! [node](crate::node) broadcasts blocks the ledger appends locally.
//!
//! ## Validity
//!
//! A chain is valid if:
//! 1. Its first block is the [genesis block](Block::genesis) of the table,
//! 2. Every following block has the id of its predecessor plus one, and names the hash of its
//!    predecessor in `previous_hash`,
//! 3. Every following block carries a proof-of-work that is [valid](valid_proof) with respect to the
//!    proof of its predecessor,
//! 4. Every following block is correctly signed by its `signer`,
//! 5. Every following block is authorized: its signer appears in the [allow-list](allow_list) in force
//!    just before it. The only exception is the first `AuthorizedKeys` block of a chain, which may be
//!    signed by anyone as long as it authorizes its own signer. This is how a fresh table bootstraps.
//!
//! ## Replication
//!
//! Replicas converge with the *longest valid chain* rule: a replica replaces its chain with a chain it
//! receives from a peer iff the received chain is valid and strictly longer. Blocks appended to the
//! replaced suffix of the old chain are lost.
//!
//! ## Waiting for changes
//!
//! Every change to the chain bumps a *generation* counter and wakes up every thread blocked in
//! [`Ledger::wait_for_change`]. Threads that watch the log for new blocks use this instead of polling.

use std::{
    fmt::{self, Display, Formatter},
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use crate::state::{ChainWriteBatch, KVGet, KVGetError, KVSetError, KVStore};
use crate::types::{
    basic::{BlockId, Difficulty, PublicKeyBytes, Timestamp},
    block::{proof_of_work, valid_proof, Block, BlockKind},
    crypto_primitives::{public_key_string, Keypair},
    payloads,
    value::Value,
};

/// A handle to one replica's copy of the log. Clones share the same copy.
pub struct Ledger<K: KVStore> {
    inner: Arc<LedgerInner<K>>,
}

impl<K: KVStore> Clone for Ledger<K> {
    fn clone(&self) -> Self {
        Ledger {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct LedgerInner<K: KVStore> {
    table_name: String,
    difficulty: Difficulty,
    state: Mutex<LedgerState<K>>,
    changed: Condvar,
}

struct LedgerState<K: KVStore> {
    kv_store: K,
    chain: Vec<Block>,
    generation: u64,
}

/// What [`Ledger::try_extend`] did with a block received from a peer.
#[derive(Debug, PartialEq)]
pub enum ExtendOutcome {
    /// The block was the next block of the chain and has been appended.
    Extended,
    /// The chain already contains this exact block.
    Known,
    /// The block lies beyond the end of the chain. The sender's chain is longer; ask for it.
    Behind,
    /// The block conflicts with the chain or breaks a validity rule.
    Rejected(InvalidBlock),
}

impl<K: KVStore> Ledger<K> {
    /// Load the chain of `table_name` from `kv_store`, writing the genesis block if the store is empty.
    pub fn open(kv_store: K, table_name: &str, difficulty: Difficulty) -> Result<Ledger<K>, LedgerError> {
        let mut kv_store = kv_store;
        let mut chain = kv_store.snapshot().blocks()?;

        if chain.is_empty() {
            let genesis = Block::genesis(table_name);
            let mut wb = ChainWriteBatch::<K::WriteBatch>::new();
            wb.set_chain(std::slice::from_ref(&genesis), 0)?;
            kv_store.write(wb.0)?;
            chain.push(genesis);
        } else if let Err(invalid) = validate_chain(table_name, &chain, difficulty) {
            return Err(LedgerError::CorruptStore(invalid));
        }

        Ok(Ledger {
            inner: Arc::new(LedgerInner {
                table_name: table_name.to_string(),
                difficulty,
                state: Mutex::new(LedgerState {
                    kv_store,
                    chain,
                    generation: 0,
                }),
                changed: Condvar::new(),
            }),
        })
    }

    pub fn table_name(&self) -> &str {
        &self.inner.table_name
    }

    pub fn difficulty(&self) -> Difficulty {
        self.inner.difficulty
    }

    /// Mine, sign, persist, and append a new block. Fails if `keypair` is not authorized to write to
    /// the table (see the [module docs](self)).
    pub fn append(&self, keypair: &Keypair, kind: BlockKind, data: Vec<Value>) -> Result<Block, LedgerError> {
        if kind == BlockKind::Genesis {
            return Err(LedgerError::Invalid(InvalidBlock::UnexpectedGenesis));
        }
        if !data.iter().all(Value::is_storable) {
            return Err(LedgerError::UnstorableData);
        }

        let mut state = self.state();
        let last = last_block(&state.chain);

        let allow_list = allow_list_in_force(&state.chain);
        check_authorized(allow_list.as_deref(), kind, &data, &keypair.public_bytes())
            .map_err(LedgerError::Invalid)?;

        let proof = proof_of_work(last.proof, self.inner.difficulty);
        let block = Block::new(
            keypair,
            last.id.next(),
            kind,
            data,
            Timestamp::now(),
            proof,
            last.hash(),
        )
        .map_err(|_| LedgerError::UnstorableData)?;

        Self::persist_block(&mut state, &block)?;
        state.chain.push(block.clone());
        self.bump(&mut state);

        Ok(block)
    }

    /// Try to append a block received from a peer.
    pub fn try_extend(&self, block: Block) -> Result<ExtendOutcome, LedgerError> {
        let mut state = self.state();
        let last = last_block(&state.chain);

        if block.id > last.id.next() {
            return Ok(ExtendOutcome::Behind);
        }
        if block.id <= last.id {
            let index = block.id.int().saturating_sub(1) as usize;
            return Ok(match state.chain.get(index) {
                Some(known) if *known == block => ExtendOutcome::Known,
                _ => ExtendOutcome::Rejected(InvalidBlock::Conflicting { id: block.id }),
            });
        }

        let allow_list = allow_list_in_force(&state.chain);
        if let Err(invalid) = check_next(last, &block, allow_list.as_deref(), self.inner.difficulty) {
            return Ok(ExtendOutcome::Rejected(invalid));
        }

        Self::persist_block(&mut state, &block)?;
        state.chain.push(block);
        self.bump(&mut state);

        Ok(ExtendOutcome::Extended)
    }

    /// Replace the chain with `blocks` if they form a valid chain that is strictly longer than the
    /// current one. The new chain is persisted in a single write batch.
    pub fn try_replace(&self, blocks: Vec<Block>) -> Result<ReplaceOutcome, LedgerError> {
        let mut state = self.state();

        if blocks.len() <= state.chain.len() {
            return Ok(ReplaceOutcome::NotLonger);
        }
        if let Err(invalid) = validate_chain(&self.inner.table_name, &blocks, self.inner.difficulty) {
            return Ok(ReplaceOutcome::Rejected(invalid));
        }

        let mut wb = ChainWriteBatch::<K::WriteBatch>::new();
        wb.set_chain(&blocks, state.chain.len() as u64)?;
        state.kv_store.write(wb.0)?;

        let old_len = state.chain.len();
        state.chain = blocks;
        self.bump(&mut state);

        Ok(ReplaceOutcome::Replaced { old_len, new_len: state.chain.len() })
    }

    /// Whether `blocks` form a valid chain of this table under this ledger's difficulty.
    pub fn is_valid_chain(&self, blocks: &[Block]) -> bool {
        validate_chain(&self.inner.table_name, blocks, self.inner.difficulty).is_ok()
    }

    /// A copy of the whole chain, genesis first.
    pub fn snapshot(&self) -> Vec<Block> {
        self.state().chain.clone()
    }

    /// The blocks after the first `skip` blocks of the chain.
    pub fn blocks_after(&self, skip: usize) -> Vec<Block> {
        self.state().chain.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state().chain.len()
    }

    pub fn is_empty(&self) -> bool {
        // The genesis block is always present.
        false
    }

    pub fn last(&self) -> Block {
        last_block(&self.state().chain).clone()
    }

    /// Whether the chain contains a block with this hash.
    pub fn contains(&self, block: &Block) -> bool {
        let state = self.state();
        let index = (block.id.int().saturating_sub(1)) as usize;
        state.chain.get(index).map_or(false, |known| known == block)
    }

    /// The allow-list currently in force.
    pub fn allow_list(&self) -> Vec<String> {
        allow_list(&self.state().chain)
    }

    /// The number of changes the chain has gone through since the ledger was opened.
    pub fn generation(&self) -> u64 {
        self.state().generation
    }

    /// Block until the chain changes after generation `seen`, or until `timeout` elapses. Returns the
    /// generation at the time of return, which equals `seen` iff the wait timed out.
    pub fn wait_for_change(&self, seen: u64, timeout: Duration) -> u64 {
        let deadline = Instant::now() + timeout;
        let mut state = self.state();
        while state.generation == seen {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (next, _) = self
                .inner
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }
        state.generation
    }

    fn state(&self) -> MutexGuard<'_, LedgerState<K>> {
        // Safety: every critical section leaves the state consistent before anything can panic, so a
        // poisoned lock does not imply a broken chain.
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist_block(state: &mut LedgerState<K>, block: &Block) -> Result<(), LedgerError> {
        let mut wb = ChainWriteBatch::<K::WriteBatch>::new();
        wb.set_block(block)?;
        wb.set_chain_length(block.id.int())?;
        state.kv_store.write(wb.0)?;
        Ok(())
    }

    fn bump(&self, state: &mut LedgerState<K>) {
        state.generation += 1;
        self.inner.changed.notify_all();
    }
}

/// What [`Ledger::try_replace`] did with a chain received from a peer.
#[derive(Debug, PartialEq)]
pub enum ReplaceOutcome {
    Replaced { old_len: usize, new_len: usize },
    NotLonger,
    Rejected(InvalidBlock),
}

fn last_block(chain: &[Block]) -> &Block {
    // Safety: the chain always contains at least the genesis block.
    &chain[chain.len() - 1]
}

/// The allow-list in force at the end of `blocks`: the keys of the latest `AuthorizedKeys` block, or
/// nothing if there is none yet.
pub fn allow_list(blocks: &[Block]) -> Vec<String> {
    allow_list_in_force(blocks).unwrap_or_default()
}

// `None` until the first `AuthorizedKeys` block, which is different from an empty allow-list.
fn allow_list_in_force(blocks: &[Block]) -> Option<Vec<String>> {
    blocks.iter().rev().find_map(payloads::authorized_keys)
}

/// Checks every rule listed in the [module docs](self) over a whole chain.
pub fn validate_chain(table_name: &str, blocks: &[Block], difficulty: Difficulty) -> Result<(), InvalidBlock> {
    let genesis = blocks.first().ok_or(InvalidBlock::Empty)?;
    if *genesis != Block::genesis(table_name) {
        return Err(InvalidBlock::WrongGenesis);
    }

    let mut allow_list = None;
    for window in blocks.windows(2) {
        let (prev, block) = (&window[0], &window[1]);
        check_next(prev, block, allow_list.as_deref(), difficulty)?;
        if let Some(keys) = payloads::authorized_keys(block) {
            allow_list = Some(keys);
        }
    }

    Ok(())
}

/// Checks that `block` may directly follow `prev` given the allow-list in force after `prev`.
fn check_next(prev: &Block, block: &Block, allow_list: Option<&[String]>, difficulty: Difficulty) -> Result<(), InvalidBlock> {
    if block.kind == BlockKind::Genesis {
        return Err(InvalidBlock::UnexpectedGenesis);
    }
    if block.id != prev.id.next() {
        return Err(InvalidBlock::WrongId { expected: prev.id.next(), found: block.id });
    }
    if block.previous_hash != prev.hash() {
        return Err(InvalidBlock::BrokenLink { id: block.id });
    }
    if !valid_proof(prev.proof, block.proof, difficulty) {
        return Err(InvalidBlock::InvalidProof { id: block.id });
    }
    if !block.is_correctly_signed() {
        return Err(InvalidBlock::InvalidSignature { id: block.id });
    }
    check_authorized(allow_list, block.kind, &block.data, &block.signer)
}

fn check_authorized(allow_list: Option<&[String]>, kind: BlockKind, data: &[Value], signer: &PublicKeyBytes) -> Result<(), InvalidBlock> {
    let signer = public_key_string(signer);

    let Some(allow_list) = allow_list else {
        // Bootstrap: the first allow-list may be written by anyone, but must let its writer back in.
        let authorizes_itself = kind == BlockKind::AuthorizedKeys
            && data.iter().any(|datum| datum.as_text() == Some(signer.as_str()));
        return if authorizes_itself {
            Ok(())
        } else {
            Err(InvalidBlock::Unauthorized { signer })
        };
    };

    if allow_list.iter().any(|key| *key == signer) {
        Ok(())
    } else {
        Err(InvalidBlock::Unauthorized { signer })
    }
}

/// Reasons for a block or chain to be refused.
#[derive(Debug, Clone, PartialEq)]
pub enum InvalidBlock {
    Empty,
    WrongGenesis,
    UnexpectedGenesis,
    WrongId { expected: BlockId, found: BlockId },
    BrokenLink { id: BlockId },
    InvalidProof { id: BlockId },
    InvalidSignature { id: BlockId },
    Unauthorized { signer: String },
    Conflicting { id: BlockId },
}

impl Display for InvalidBlock {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            InvalidBlock::Empty => write!(f, "chain is empty"),
            InvalidBlock::WrongGenesis => write!(f, "chain does not start with this table's genesis block"),
            InvalidBlock::UnexpectedGenesis => write!(f, "genesis block after the start of the chain"),
            InvalidBlock::WrongId { expected, found } => {
                write!(f, "expected block {}, found block {}", expected, found)
            }
            InvalidBlock::BrokenLink { id } => {
                write!(f, "block {} does not reference the hash of its predecessor", id)
            }
            InvalidBlock::InvalidProof { id } => write!(f, "block {} has an invalid proof of work", id),
            InvalidBlock::InvalidSignature { id } => write!(f, "block {} has an invalid signature", id),
            InvalidBlock::Unauthorized { signer } => {
                write!(f, "key {} is not authorized to write to this table", signer)
            }
            InvalidBlock::Conflicting { id } => {
                write!(f, "block {} conflicts with the block already at that position", id)
            }
        }
    }
}

#[derive(Debug)]
pub enum LedgerError {
    Read(KVGetError),
    Write(KVSetError),
    CorruptStore(InvalidBlock),
    Invalid(InvalidBlock),
    UnstorableData,
}

impl Display for LedgerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::Read(err) => write!(f, "failed to read the stored chain: {}", err),
            LedgerError::Write(err) => write!(f, "failed to store the chain: {}", err),
            LedgerError::CorruptStore(invalid) => write!(f, "the stored chain is invalid: {}", invalid),
            LedgerError::Invalid(invalid) => write!(f, "{}", invalid),
            LedgerError::UnstorableData => write!(f, "block data cannot be stored (it holds a NaN float or nests too deeply)"),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<KVGetError> for LedgerError {
    fn from(err: KVGetError) -> Self {
        LedgerError::Read(err)
    }
}

impl From<KVSetError> for LedgerError {
    fn from(err: KVSetError) -> Self {
        LedgerError::Write(err)
    }
}
