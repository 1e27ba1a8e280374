/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! User-defined parameters of a replica.
//!
//! The [configuration](Configuration) is defined using the builder pattern, for example:
//!
//! ```
//! use std::time::Duration;
//! use tablechain::config::Configuration;
//! use tablechain::types::basic::Difficulty;
//!
//! let configuration = Configuration::builder()
//!     .table_name("inventory")
//!     .pow_difficulty(Difficulty::new(2))
//!     .execute_timeout(Duration::from_secs(10))
//!     .log_events(true)
//!     .build();
//!
//! assert_eq!(configuration.sync_timeout, Duration::from_secs(5));
//! ```
//!
//! ## Proof-of-work difficulty
//!
//! Every replica of a table must use the same difficulty: a replica refuses blocks whose proof does
//! not meet its own difficulty.
//!
//! ## Log Events
//!
//! The crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a [logging
//! implementation](https://docs.rs/log/latest/log/#available-logging-implementations).

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::networking::tcp::DEFAULT_MAX_FRAME_LEN;
use crate::types::basic::Difficulty;

#[derive(Clone, Debug, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.table_name(...)`

    Optional:
    - `.listen_addr(...)`
    - `.advertise_host(...)`
    - `.data_dir(...)`
    - `.pow_difficulty(...)`
    - `.sync_timeout(...)`
    - `.execute_timeout(...)`
    - `.poll_interval(...)`
    - `.max_frame_len(...)`
    - `.log_events(...)`
"))]
pub struct Configuration {
    #[builder(setter(into, doc = "Set the name of the table. Replicas of different tables never accept each other's chains. Required."))]
    pub table_name: String,
    #[builder(default = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)),
    setter(doc = "Set the address to listen on. Port 0 means any free port. Optional, defaults to `127.0.0.1:0`."))]
    pub listen_addr: SocketAddr,
    #[builder(default, setter(strip_option, into,
    doc = "Set the host advertised to peers. Optional, defaults to the bound IP, or the outbound IP when bound to `0.0.0.0`."))]
    pub advertise_host: Option<String>,
    #[builder(default, setter(strip_option, into,
    doc = "Set the directory the table's blocks are stored in. Optional, defaults to `./tablechain__{table_name}`."))]
    pub data_dir: Option<PathBuf>,
    #[builder(default = Difficulty::new(4),
    setter(doc = "Set the number of leading zero hex digits a proof-of-work hash must have. Optional, defaults to 4."))]
    pub pow_difficulty: Difficulty,
    #[builder(default = Duration::from_secs(5),
    setter(doc = "Set how long joining a cluster may wait for the cluster's chain. Optional, defaults to 5 seconds."))]
    pub sync_timeout: Duration,
    #[builder(default = Duration::from_secs(30),
    setter(doc = "Set how long to wait for the result of a remote job. Optional, defaults to 30 seconds."))]
    pub execute_timeout: Duration,
    #[builder(default = Duration::from_millis(50),
    setter(doc = "Set how long background threads sleep between checks for work and shutdown. Optional, defaults to 50 milliseconds."))]
    pub poll_interval: Duration,
    #[builder(default = DEFAULT_MAX_FRAME_LEN,
    setter(doc = "Set the largest network frame accepted, in bytes. Optional, defaults to 64 MiB."))]
    pub max_frame_len: u32,
    #[builder(default = false, setter(doc = "Enable logging of events? Optional, defaults to false."))]
    pub log_events: bool,
}
