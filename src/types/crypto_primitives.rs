/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives.
//!
//! The definitions and re-exports in this module provide three categories of cryptographic primitives:
//! 1. **Cryptographic Hashes**: provided by the [`sha2`] crate.
//! 2. **Digital Signatures**: provided by the [`ed25519_dalek`] crate.
//! 3. **Key strings**: keys travel between operators (and sit in the allow-list) as standard Base64
//!    encodings of the raw 32-byte keys.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand_core::OsRng;
use std::fmt::{self, Display, Formatter};

use super::basic::{PublicKeyBytes, SignatureBytes};

// re-exports below.
pub use sha2::Digest;
pub use sha2::Sha256 as CryptoHasher;

pub use ed25519_dalek::{Signature, SignatureError, Signer, SigningKey, Verifier, VerifyingKey};

/// A facade around [`SigningKey`] that implements methods for [`sign`](Self::sign)-ing messages as well
/// as getters for the [`public`](Self::public) key and the key strings.
#[derive(Clone)]
pub struct Keypair(pub(crate) SigningKey);

impl Keypair {
    /// Create a `Keypair` that wraps over `signing_key`.
    pub fn new(signing_key: SigningKey) -> Keypair {
        Keypair(signing_key)
    }

    /// Generate a fresh keypair from the operating system's randomness.
    pub fn generate() -> Keypair {
        Keypair(SigningKey::generate(&mut OsRng))
    }

    /// Load a keypair from its key strings. The public key string is checked against the one derived
    /// from the private key.
    pub fn from_strings(private_key: &str, public_key: &str) -> Result<Keypair, KeyError> {
        let secret = decode_key_bytes(private_key)?;
        let keypair = Keypair(SigningKey::from_bytes(&secret));
        if keypair.public_key_string() != public_key.trim() {
            return Err(KeyError::Mismatch);
        }
        Ok(keypair)
    }

    /// Sign an arbitrary `message` with the `Keypair`.
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        SignatureBytes::new(self.0.sign(message).to_bytes())
    }

    /// Get the `VerifyingKey` of this `Keypair`.
    pub fn public(&self) -> VerifyingKey {
        self.0.verifying_key()
    }

    pub fn public_bytes(&self) -> PublicKeyBytes {
        self.0.verifying_key().to_bytes()
    }

    pub fn private_key_string(&self) -> String {
        STANDARD.encode(self.0.to_bytes())
    }

    pub fn public_key_string(&self) -> String {
        public_key_string(&self.public_bytes())
    }
}

/// Encode a public key as a key string.
pub fn public_key_string(public_key: &PublicKeyBytes) -> String {
    STANDARD.encode(public_key)
}

/// Decode a key string into a valid Ed25519 verifying key.
pub fn parse_public_key(key: &str) -> Result<VerifyingKey, KeyError> {
    let bytes = decode_key_bytes(key)?;
    VerifyingKey::from_bytes(&bytes).map_err(KeyError::Invalid)
}

/// Check `signature` over `message` against the raw `signer` key.
pub fn verify(signer: &PublicKeyBytes, message: &[u8], signature: &SignatureBytes) -> bool {
    match VerifyingKey::from_bytes(signer) {
        Ok(verifying_key) => verifying_key
            .verify(message, &Signature::from_bytes(&signature.bytes()))
            .is_ok(),
        Err(_) => false,
    }
}

fn decode_key_bytes(key: &str) -> Result<[u8; 32], KeyError> {
    let bytes = STANDARD.decode(key.trim()).map_err(|_| KeyError::NotBase64)?;
    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| KeyError::WrongLength(bytes.len()))
}

/// Error when reading a key string.
#[derive(Debug)]
pub enum KeyError {
    NotBase64,
    WrongLength(usize),
    Invalid(SignatureError),
    Mismatch,
    /// Only one half of a keypair was given.
    Incomplete,
}

impl Display for KeyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            KeyError::NotBase64 => write!(f, "key is not valid Base64"),
            KeyError::WrongLength(len) => write!(f, "key decodes to {} bytes, expected 32", len),
            KeyError::Invalid(err) => write!(f, "key is not a valid Ed25519 key: {}", err),
            KeyError::Mismatch => write!(f, "public key does not belong to the private key"),
            KeyError::Incomplete => write!(f, "a private key and a public key must be given together"),
        }
    }
}

impl std::error::Error for KeyError {}
