/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/
//! The persistent state of a replica: pluggable key-value storage and the layout of the log in it.

pub mod dir_db;
pub mod kv_store;
pub mod paths;
pub mod write_batch;

pub use dir_db::DirDB;
pub use kv_store::{KVGet, KVGetError, KVStore};
pub use write_batch::{ChainWriteBatch, KVSetError, WriteBatch};
