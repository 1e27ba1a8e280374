/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/
//! The [WriteBatch] trait that user-provided key-value stores implement, and [ChainWriteBatch], which
//! abstracts the forming of keys away from the ledger.

use borsh::BorshSerialize;

use crate::types::basic::BlockId;
use crate::types::block::Block;

use super::kv_store::Key;
use super::paths;

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}

pub struct ChainWriteBatch<W: WriteBatch>(pub(crate) W);

impl<W: WriteBatch> ChainWriteBatch<W> {
    pub(crate) fn new() -> ChainWriteBatch<W> {
        ChainWriteBatch(W::new())
    }

    /* ↓↓↓ Block ↓↓↓  */

    pub fn set_block(&mut self, block: &Block) -> Result<(), KVSetError> {
        self.0.set(
            &paths::block_key(block.id),
            &block.try_to_vec().map_err(|err| KVSetError::SerializeValueError{key: Key::Block{id: block.id}, source: err})?,
        );
        Ok(())
    }

    pub fn delete_block(&mut self, id: BlockId) {
        self.0.delete(&paths::block_key(id))
    }

    /* ↓↓↓ Chain Length ↓↓↓ */

    pub fn set_chain_length(&mut self, len: u64) -> Result<(), KVSetError> {
        self.0.set(
            &paths::CHAIN_LENGTH,
            &len.try_to_vec().map_err(|err| KVSetError::SerializeValueError{key: Key::ChainLength, source: err})?,
        );
        Ok(())
    }

    /// Replace the stored chain (of length `old_len`) with `blocks`, deleting any stored block beyond the
    /// end of the new chain.
    pub fn set_chain(&mut self, blocks: &[Block], old_len: u64) -> Result<(), KVSetError> {
        for block in blocks {
            self.set_block(block)?;
        }
        let new_len = blocks.len() as u64;
        for int in (new_len + 1)..=old_len {
            self.delete_block(BlockId::new(int));
        }
        self.set_chain_length(new_len)
    }
}

/// Error when trying to serialize a value to be written into the [key value store][super::kv_store::KVStore],
/// or when the store fails to apply a write batch.
#[derive(Debug)]
pub enum KVSetError {
    SerializeValueError{key: Key, source: std::io::Error},
    WriteError(std::io::Error),
}

impl std::fmt::Display for KVSetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KVSetError::SerializeValueError{key, source} =>
                write!(f, "failed to serialize {}: {}", key, source),
            KVSetError::WriteError(source) =>
                write!(f, "failed to write to the store: {}", source),
        }
    }
}

impl std::error::Error for KVSetError {}
