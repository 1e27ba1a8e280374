/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/
//! Defines the [KVStore] trait, which specifies the required interface for the key-value store provided
//! by the user.
//!
//! Given a method to obtain the value for a given key in bytes, this module also provides methods to
//! obtain the ledger variables stored in the key-value store, as laid out in [crate::state::paths].

use std::fmt::Display;

use borsh::BorshDeserialize;

use crate::types::{basic::BlockId, block::Block};

use super::paths;
use super::write_batch::{KVSetError, WriteBatch};

pub trait KVStore: KVGet + Clone + Send + 'static {
    type WriteBatch: WriteBatch;
    type Snapshot<'a>: 'a + KVGet;

    /// Apply the batch's operations in the order they were added, stopping at the first that fails.
    fn write(&mut self, wb: Self::WriteBatch) -> Result<(), KVSetError>;
    fn snapshot<'b>(&'b self) -> Self::Snapshot<'_>;
}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /* ↓↓↓ Chain Length ↓↓↓ */

    fn chain_length(&self) -> Result<u64, KVGetError> {
        match self.get(&paths::CHAIN_LENGTH) {
            Some(bytes) => u64::deserialize(&mut bytes.as_slice())
                .map_err(|err| KVGetError::DeserializeValueError{key: Key::ChainLength, source: err}),
            None => Ok(0),
        }
    }

    /* ↓↓↓ Block ↓↓↓  */

    fn block(&self, id: BlockId) -> Result<Option<Block>, KVGetError> {
        if let Some(bytes) = self.get(&paths::block_key(id)) {
            Ok(
                Some(
                    Block::deserialize(&mut bytes.as_slice())
                    .map_err(|err| KVGetError::DeserializeValueError{key: Key::Block{id}, source: err})?
                )
            )
        } else {
            Ok(None)
        }
    }

    /* ↓↓↓ Whole Chain ↓↓↓ */

    /// Every block from genesis up to the stored chain length, in order.
    fn blocks(&self) -> Result<Vec<Block>, KVGetError> {
        let len = self.chain_length()?;
        let mut blocks = Vec::with_capacity(len as usize);
        for int in 1..=len {
            let id = BlockId::new(int);
            let block = self.block(id)?.ok_or(KVGetError::ValueNotFound{key: Key::Block{id}})?;
            blocks.push(block);
        }
        Ok(blocks)
    }
}

/// Error when trying to read a value corresponding to a given key from the [key value store][KVStore].
/// The error may arise in the following circumstances:
/// 1. The value corresponding to a given key cannot be deserialized into its expected type,
/// 2. The value corresponding to a given key cannot be found.
#[derive(Debug)]
pub enum KVGetError {
    DeserializeValueError{key: Key, source: std::io::Error},
    ValueNotFound{key: Key},
}

impl Display for KVGetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KVGetError::DeserializeValueError{key, source} =>
                write!(f, "failed to deserialize {}: {}", key, source),
            KVGetError::ValueNotFound{key} =>
                write!(f, "{} not found", key),
        }
    }
}

impl std::error::Error for KVGetError {}

#[derive(Debug)]
pub enum Key {
    Block{id: BlockId},
    ChainLength,
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self {
            &Key::Block{id} =>
                write!(f, "Block {}", id),
            &Key::ChainLength =>
                write!(f, "Chain Length"),
        }
    }
}
