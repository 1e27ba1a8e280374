/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the 'block' type and its associated methods.

use borsh::{BorshDeserialize, BorshSerialize};
use std::fmt::{self, Display, Formatter};

use crate::types::basic::*;
use crate::types::crypto_primitives::{self, CryptoHasher, Digest, Keypair};
use crate::types::value::Value;

/// What a block means to the table. Every kind has a stable string tag, which is what operators see in
/// logs and what other tools key on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum BlockKind {
    Genesis,
    Row,
    AuthorizedKeys,
    ExecutionRequest,
    ExecutionResult,
}

impl BlockKind {
    pub const fn tag(&self) -> &'static str {
        match self {
            BlockKind::Genesis => "GENESIS",
            BlockKind::Row => "row",
            BlockKind::AuthorizedKeys => "ssh_keys",
            BlockKind::ExecutionRequest => "event__job",
            BlockKind::ExecutionResult => "event__job_result",
        }
    }

    pub fn from_tag(tag: &str) -> Option<BlockKind> {
        match tag {
            "GENESIS" => Some(BlockKind::Genesis),
            "row" => Some(BlockKind::Row),
            "ssh_keys" => Some(BlockKind::AuthorizedKeys),
            "event__job" => Some(BlockKind::ExecutionRequest),
            "event__job_result" => Some(BlockKind::ExecutionResult),
            _ => None,
        }
    }
}

impl Display for BlockKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// One entry of the replicated log.
#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub id: BlockId,
    pub kind: BlockKind,
    pub data: Vec<Value>,
    pub timestamp: Timestamp,
    pub proof: u64,
    pub previous_hash: CryptoHash,
    pub signer: PublicKeyBytes,
    pub signature: SignatureBytes,
}

impl Block {
    /// Build and sign a block that extends a block with hash `previous_hash`.
    pub fn new(
        keypair: &Keypair,
        id: BlockId,
        kind: BlockKind,
        data: Vec<Value>,
        timestamp: Timestamp,
        proof: u64,
        previous_hash: CryptoHash,
    ) -> Result<Block, std::io::Error> {
        let mut block = Block {
            id,
            kind,
            data,
            timestamp,
            proof,
            previous_hash,
            signer: keypair.public_bytes(),
            signature: SignatureBytes::empty(),
        };
        block.signature = keypair.sign(&block.signing_bytes()?);
        Ok(block)
    }

    /// The genesis block of the table called `table_name`. It is a pure function of the table name, so
    /// replicas that start independently still agree on the first block of the log.
    pub fn genesis(table_name: &str) -> Block {
        Block {
            id: BlockId::GENESIS,
            kind: BlockKind::Genesis,
            data: vec![Value::Text(table_name.to_string())],
            timestamp: Timestamp::UNIX_EPOCH,
            proof: 100,
            previous_hash: CryptoHash::zero(),
            signer: [0u8; 32],
            signature: SignatureBytes::empty(),
        }
    }

    /// The bytes the signer commits to: the Borsh encoding of every field except the signature.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut bytes = Vec::new();
        self.id.serialize(&mut bytes)?;
        self.kind.serialize(&mut bytes)?;
        self.data.serialize(&mut bytes)?;
        self.timestamp.serialize(&mut bytes)?;
        self.proof.serialize(&mut bytes)?;
        self.previous_hash.serialize(&mut bytes)?;
        self.signer.serialize(&mut bytes)?;
        Ok(bytes)
    }

    /// SHA-256 of the block's Borsh encoding. This is what the next block's `previous_hash` must be.
    pub fn hash(&self) -> CryptoHash {
        let mut hasher = CryptoHasher::new();
        // Safety: blocks only ever hold storable values (checked before they are built), so
        // serialization cannot fail.
        hasher.update(&self.try_to_vec().unwrap_or_default());
        CryptoHash::new(hasher.finalize().into())
    }

    /// Checks that the signature was produced by `signer` over this block's contents. The genesis
    /// block is unsigned and always passes.
    pub fn is_correctly_signed(&self) -> bool {
        if self.kind == BlockKind::Genesis {
            return self.signer == [0u8; 32] && self.signature == SignatureBytes::empty();
        }
        match self.signing_bytes() {
            Ok(bytes) => crypto_primitives::verify(&self.signer, &bytes, &self.signature),
            Err(_) => false,
        }
    }
}

/// Proof-of-work predicate: the SHA-256 of the decimal text `"{last_proof}{proof}"` must begin with
/// `difficulty` zero hex digits.
pub fn valid_proof(last_proof: u64, proof: u64, difficulty: Difficulty) -> bool {
    let guess = format!("{}{}", last_proof, proof);
    let hash: [u8; 32] = CryptoHasher::digest(guess.as_bytes()).into();
    leading_zero_nibbles(&hash) >= difficulty.int() as u32
}

/// Smallest proof, counting up from zero, that satisfies [`valid_proof`].
pub fn proof_of_work(last_proof: u64, difficulty: Difficulty) -> u64 {
    let mut proof = 0;
    while !valid_proof(last_proof, proof, difficulty) {
        proof += 1;
    }
    proof
}

fn leading_zero_nibbles(bytes: &[u8]) -> u32 {
    let mut count = 0;
    for byte in bytes {
        if *byte == 0 {
            count += 2;
        } else {
            if byte >> 4 == 0 {
                count += 1;
            }
            break;
        }
    }
    count
}
