/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/
//! [`DirDB`], a [`KVStore`] that keeps every key in its own file inside one directory.
//!
//! Since the ledger stores each block under its own key, this amounts to one file per block, which
//! keeps the on-disk log easy to inspect and to copy around. File names are the URL-safe Base64
//! encodings of the keys.

use std::{
    fs,
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

use super::kv_store::{KVGet, KVStore};
use super::write_batch::{KVSetError, WriteBatch};

/// A directory-backed implementation of [`KVStore`]. Clones share the same directory and lock.
#[derive(Clone)]
pub struct DirDB {
    dir: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl DirDB {
    /// Open (creating it if needed) the store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> io::Result<DirDB> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(DirDB {
            dir: Arc::new(dir.as_ref().to_path_buf()),
            lock: Arc::new(Mutex::new(())),
        })
    }

    /// Open the default store for the table called `table_name`: `./tablechain__{table_name}`.
    pub fn for_table(table_name: &str) -> io::Result<DirDB> {
        Self::open(default_dir(table_name))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(dir: &Path, key: &[u8]) -> PathBuf {
        dir.join(URL_SAFE_NO_PAD.encode(key))
    }

    fn read(dir: &Path, key: &[u8]) -> Option<Vec<u8>> {
        match fs::read(Self::path_of(dir, key)) {
            Ok(bytes) => Some(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                log::error!("DirDB, failed to read key from {}: {}", dir.display(), err);
                None
            }
        }
    }

    // Write to a temporary file first so that readers never observe a half-written value.
    fn write_file(dir: &Path, key: &[u8], value: &[u8]) -> io::Result<()> {
        let path = Self::path_of(dir, key);
        let tmp = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(value)?;
        file.sync_all()?;
        fs::rename(tmp, path)
    }

    fn remove_file(dir: &Path, key: &[u8]) -> io::Result<()> {
        match fs::remove_file(Self::path_of(dir, key)) {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}

/// The directory a table's store lives in unless configured otherwise.
pub fn default_dir(table_name: &str) -> PathBuf {
    PathBuf::from(format!("./tablechain__{}", table_name))
}

impl KVStore for DirDB {
    type WriteBatch = DirWriteBatch;
    type Snapshot<'a> = DirDBSnapshot<'a>;

    // The ledger sets the chain length after the blocks it counts, so applying operations in order and
    // stopping at the first failure never leaves a length that names a missing block.
    fn write(&mut self, wb: Self::WriteBatch) -> Result<(), KVSetError> {
        // Safety: the lock guards no data, so a poisoned lock carries no broken invariant.
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for (key, value) in wb.operations {
            let result = match value {
                Some(value) => Self::write_file(&self.dir, &key, &value),
                None => Self::remove_file(&self.dir, &key),
            };
            if let Err(err) = result {
                log::error!("DirDB, failed to apply a write batch to {}: {}", self.dir.display(), err);
                return Err(KVSetError::WriteError(err));
            }
        }
        Ok(())
    }

    fn snapshot<'b>(&'b self) -> DirDBSnapshot<'b> {
        DirDBSnapshot {
            _guard: self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner()),
            dir: &self.dir,
        }
    }
}

impl KVGet for DirDB {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Self::read(&self.dir, key)
    }
}

/// Insertions (`Some`) and deletions (`None`) waiting to be applied to a [`DirDB`], in the order they
/// were added.
pub struct DirWriteBatch {
    operations: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl WriteBatch for DirWriteBatch {
    fn new() -> Self {
        DirWriteBatch { operations: Vec::new() }
    }

    fn set(&mut self, key: &[u8], value: &[u8]) {
        self.operations.push((key.to_vec(), Some(value.to_vec())));
    }

    fn delete(&mut self, key: &[u8]) {
        self.operations.push((key.to_vec(), None));
    }
}

/// A consistent view of a [`DirDB`]: writers are held off for as long as the snapshot lives.
pub struct DirDBSnapshot<'a> {
    _guard: MutexGuard<'a, ()>,
    dir: &'a Path,
}

impl KVGet for DirDBSnapshot<'_> {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        DirDB::read(self.dir, key)
    }
}
