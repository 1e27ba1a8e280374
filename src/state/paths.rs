/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/
//! Byte-prefixes that specify where each ledger variable is stored in the user-provided key-value
//! store.
//!
//! # Storage of state variables
//!
//! Each variable is stored as a **Borsh-serialized value** under one or more **keys**:
//! - "Single values" (the chain length) are stored in one-byte, constant keys.
//! - Mappings of the form "`A` -> `B`" (block id to block) are stored under the concatenation of a
//!   one-byte prefix and the little-endian bytes of the `A`.
//!
//! | Variable     | Key                                   | Value           |
//! |--------------|---------------------------------------|-----------------|
//! | Blocks       | `BLOCKS ++ block_id.to_le_bytes()`    | `Block`         |
//! | Chain length | `CHAIN_LENGTH`                        | `u64`           |

use crate::types::basic::BlockId;

pub const BLOCKS: [u8; 1] = [0];
pub const CHAIN_LENGTH: [u8; 1] = [1];

/// Key under which the block with `id` is stored.
pub fn block_key(id: BlockId) -> Vec<u8> {
    combine(&BLOCKS, &id.to_le_bytes())
}

/// Takes references to two byteslices and returns a vector containing the bytes of the first one, and
/// then the bytes of the second one.
pub fn combine(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(a.len() + b.len());
    res.extend_from_slice(a);
    res.extend_from_slice(b);
    res
}
