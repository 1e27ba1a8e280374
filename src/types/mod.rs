//! Types and traits that are used across multiple components of the crate: the log's blocks, the
//! values they carry, and the cryptography that binds them together.
//!
//! Types specific to single components can be found next to those components, e.g.,
//! [`crate::networking::Message`].

pub mod basic;

pub mod block;

pub mod crypto_primitives;

pub mod payloads;

pub mod value;
