/*
 * IP Organization Database
 * Copyright (C) 2025 Akaere Networks
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Persistent ordered key/value store backed by LMDB.
//!
//! LMDB keeps keys in lexicographic order and gives us cursors, atomic
//! single-key writes and atomic multi-op write transactions, which is the
//! entire contract the range indexes need. Values are serde-encoded JSON
//! documents: self-describing, named fields, and old records keep decoding
//! after fields are added.

pub mod keys;
pub mod search;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use lmdb::{Cursor, Database as LmdbDatabase, Environment, Transaction, WriteFlags};
use once_cell::sync::Lazy;
use sysinfo::System;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Map size computed once: 10% of system RAM with a 256MB floor.
static LMDB_MAP_SIZE: Lazy<usize> = Lazy::new(|| {
    let mut sys = System::new_all();
    sys.refresh_memory();

    let total_memory = sys.total_memory() as usize;
    let ten_percent = total_memory / 10;
    let min_size = 256 * 1024 * 1024;

    let map_size = ten_percent.max(min_size);
    debug!(
        "LMDB map size: {} MB (system memory: {} MB)",
        map_size / 1024 / 1024,
        total_memory / 1024 / 1024
    );
    map_size
});

/// A single operation inside an atomic batch.
pub enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Shared LMDB environment wrapper used by every index in the crate.
pub struct Store {
    pub(crate) env: Environment,
    pub(crate) db: LmdbDatabase,
    path: PathBuf,
    closed: AtomicBool,
}

impl Store {
    /// Opens or creates the store directory.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        let env = Environment::new()
            .set_map_size(*LMDB_MAP_SIZE)
            .set_max_dbs(1)
            .open(path)?;
        let db = env.open_db(None)?;

        debug!("opened store at {}", path.display());
        Ok(Store {
            env,
            db,
            path: path.to_path_buf(),
            closed: AtomicBool::new(false),
        })
    }

    /// Removes any existing store at `path` and creates a fresh one.
    /// Bulk-index builds use this; the main build updates in place.
    pub fn open_destructive(path: &Path) -> Result<Self> {
        if path.exists() {
            fs::remove_dir_all(path)?;
            info!("removed existing store at {}", path.display());
        }
        Store::open(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Marks the store closed. In-flight write transactions finish before
    /// this returns because LMDB serializes writers; later calls fail with
    /// `DatabaseClosed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.env.sync(true).ok();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn guard(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::DatabaseClosed);
        }
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.guard()?;
        let txn = self.env.begin_ro_txn()?;
        match txn.get(self.db, &key) {
            Ok(bytes) => Ok(Some(bytes.to_vec())),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.guard()?;
        let mut txn = self.env.begin_rw_txn()?;
        txn.put(self.db, &key, &value, WriteFlags::empty())?;
        txn.commit()?;
        Ok(())
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.guard()?;
        let mut txn = self.env.begin_rw_txn()?;
        match txn.del(self.db, &key, None) {
            Ok(()) => {}
            Err(lmdb::Error::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        txn.commit()?;
        Ok(())
    }

    /// Applies every operation in one write transaction.
    pub fn write_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        self.guard()?;
        let mut txn = self.env.begin_rw_txn()?;
        for op in &ops {
            match op {
                BatchOp::Put(key, value) => {
                    txn.put(self.db, key, value, WriteFlags::empty())?;
                }
                BatchOp::Delete(key) => match txn.del(self.db, key, None) {
                    Ok(()) | Err(lmdb::Error::NotFound) => {}
                    Err(e) => return Err(e.into()),
                },
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn put_json<T: serde::Serialize>(&self, key: &[u8], value: &T) -> Result<()> {
        self.put(key, &serde_json::to_vec(value)?)
    }

    pub fn get_json<T: serde::de::DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// In-order scan over every key in a namespace. The callback returns
    /// `false` to stop early.
    pub fn iterate_ns<F>(&self, ns: &[u8], mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<bool>,
    {
        self.guard()?;
        let txn = self.env.begin_ro_txn()?;
        let mut cursor = txn.open_ro_cursor(self.db)?;
        for (key, value) in cursor.iter_from(ns) {
            if !key.starts_with(ns) {
                break;
            }
            if !f(key, value)? {
                break;
            }
        }
        Ok(())
    }

    /// Number of keys in a namespace, by full scan.
    pub fn count_ns(&self, ns: &[u8]) -> Result<u64> {
        let mut count = 0u64;
        self.iterate_ns(ns, |_, _| {
            count += 1;
            Ok(true)
        })?;
        Ok(count)
    }

    pub fn set_meta(&self, name: &str, value: &str) -> Result<()> {
        self.put(&keys::meta_key(name), value.as_bytes())
    }

    pub fn get_meta(&self, name: &str) -> Result<Option<String>> {
        match self.get(&keys::meta_key(name))? {
            Some(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            None => Ok(None),
        }
    }
}
