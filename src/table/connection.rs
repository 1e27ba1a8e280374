/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Where to find an existing cluster, and which keys to write with.

use typed_builder::TypedBuilder;

use crate::types::{
    basic::PeerAddr,
    crypto_primitives::{KeyError, Keypair},
};

/// How a [`Table`](super::Table) connects: an optional peer of an existing cluster (without one, the
/// table starts a new cluster), and an optional keypair (without one, a fresh keypair is generated).
///
/// ```
/// use tablechain::table::Connection;
///
/// let connection = Connection::builder()
///     .host("10.0.0.7")
///     .host_port(5000)
///     .build();
///
/// assert_eq!(connection.peer().map(|peer| peer.to_string()), Some("10.0.0.7:5000".to_string()));
/// ```
#[derive(Clone, Debug, Default, TypedBuilder)]
pub struct Connection {
    #[builder(default, setter(strip_option, into))]
    pub host: Option<String>,
    #[builder(default, setter(strip_option))]
    pub host_port: Option<u16>,
    #[builder(default, setter(strip_option, into))]
    pub private_key: Option<String>,
    #[builder(default, setter(strip_option, into))]
    pub public_key: Option<String>,
}

impl Connection {
    /// The peer to join through, if both its host and port are given.
    pub fn peer(&self) -> Option<PeerAddr> {
        match (&self.host, self.host_port) {
            (Some(host), Some(port)) => Some(PeerAddr::new(host.clone(), port)),
            _ => None,
        }
    }

    /// The keypair given as strings, a freshly generated one if no key is given, or an error if only
    /// half of a keypair is given.
    pub fn keypair(&self) -> Result<Keypair, KeyError> {
        match (&self.private_key, &self.public_key) {
            (Some(private_key), Some(public_key)) => Keypair::from_strings(private_key, public_key),
            (None, None) => Ok(Keypair::generate()),
            _ => Err(KeyError::Incomplete),
        }
    }
}
