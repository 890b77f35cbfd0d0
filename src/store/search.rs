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

//! Most-specific covering-range candidate collection.
//!
//! The seek/scan shape is shared by every range index: seek to the query
//! start, walk backward collecting entries that start at or before it, then
//! take a handful of forward steps to catch entries whose end-byte
//! tiebreaker sorted them just past the seek point. Candidate filtering
//! (end >= query end, smallest span wins) stays with the callers because
//! IPv6 keys carry no end address.

use lmdb::{Cursor, Transaction};
use lmdb_sys::{MDB_LAST, MDB_NEXT, MDB_PREV, MDB_SET_RANGE};

use crate::config::{FORWARD_SCAN_STEPS, MAX_BACKWARD_SCAN};
use crate::error::Result;
use crate::store::Store;

/// Scan parameters for one namespace.
pub struct ScanSpec {
    pub ns: &'static [u8],
    /// Address width inside the key (4 or 16).
    pub start_len: usize,
    /// Early-exit distance: stop the backward walk once the gap between the
    /// query start and the entry start exceeds the largest plausible block.
    pub max_span: u128,
}

/// A raw key/value pair copied out of the store.
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

fn start_int(spec: &ScanSpec, key: &[u8]) -> Option<u128> {
    let body = key.get(spec.ns.len()..spec.ns.len() + spec.start_len)?;
    let mut n = 0u128;
    for b in body {
        n = (n << 8) | *b as u128;
    }
    Some(n)
}

/// Collects every entry whose start IP is at or before the query start,
/// bounded by the scan limit and the early-exit distance.
///
/// `seek_key` must be the namespace-prefixed query start with zeroed end
/// bytes (see `keys::RangeKey::seek`).
pub fn covering_candidates(
    store: &Store,
    spec: &ScanSpec,
    seek_key: &[u8],
) -> Result<Vec<RawEntry>> {
    store.guard()?;

    let qs = match start_int(spec, seek_key) {
        Some(n) => n,
        None => return Ok(Vec::new()),
    };

    let txn = store.env.begin_ro_txn()?;
    let cursor = txn.open_ro_cursor(store.db)?;

    let mut out: Vec<RawEntry> = Vec::new();

    // Position on the last entry with start <= qs: seek to the first entry
    // at or past the query start, then step back if we overshot.
    let mut current = match cursor.get(Some(seek_key), None, MDB_SET_RANGE) {
        Ok((Some(key), value)) => {
            let past = !key.starts_with(spec.ns)
                || start_int(spec, key).map_or(true, |s| s > qs);
            if past {
                step(&cursor, MDB_PREV)
            } else {
                Some((key.to_vec(), value.to_vec()))
            }
        }
        Ok((None, _)) | Err(lmdb::Error::NotFound) => step(&cursor, MDB_LAST),
        Err(e) => return Err(e.into()),
    };

    // Backward walk.
    let mut scanned = 0usize;
    while let Some((key, value)) = current {
        if scanned >= MAX_BACKWARD_SCAN || !key.starts_with(spec.ns) {
            break;
        }
        scanned += 1;

        match start_int(spec, &key) {
            Some(s) if s <= qs => {
                if qs - s > spec.max_span {
                    break;
                }
                out.push(RawEntry { key, value });
            }
            _ => {}
        }
        current = step(&cursor, MDB_PREV);
    }

    // Forward steps from the seek point: entries sharing the query start
    // sort after the zero-end seek key.
    let mut current = match cursor.get(Some(seek_key), None, MDB_SET_RANGE) {
        Ok((Some(key), value)) => Some((key.to_vec(), value.to_vec())),
        _ => None,
    };
    for _ in 0..FORWARD_SCAN_STEPS {
        let Some((key, value)) = current else { break };
        if !key.starts_with(spec.ns) {
            break;
        }
        match start_int(spec, &key) {
            Some(s) if s <= qs => {
                if !out.iter().any(|e| e.key == key) {
                    out.push(RawEntry { key, value });
                }
            }
            _ => break,
        }
        current = step(&cursor, MDB_NEXT);
    }

    Ok(out)
}

/// The entry with the greatest key strictly before `seek_key`, if it lives
/// in the same namespace.
pub fn floor_entry(store: &Store, ns: &[u8], seek_key: &[u8]) -> Result<Option<RawEntry>> {
    store.guard()?;
    let txn = store.env.begin_ro_txn()?;
    let cursor = txn.open_ro_cursor(store.db)?;

    let entry = match cursor.get(Some(seek_key), None, MDB_SET_RANGE) {
        Ok(_) => step(&cursor, MDB_PREV),
        Err(lmdb::Error::NotFound) => step(&cursor, MDB_LAST),
        Err(e) => return Err(e.into()),
    };

    Ok(entry
        .filter(|(key, _)| key.starts_with(ns))
        .map(|(key, value)| RawEntry { key, value }))
}

/// Forward in-order walk starting at `seek_key`, confined to a namespace.
/// The callback returns `false` to stop.
pub fn window_from<F>(store: &Store, ns: &[u8], seek_key: &[u8], mut f: F) -> Result<()>
where
    F: FnMut(&[u8], &[u8]) -> Result<bool>,
{
    store.guard()?;
    let txn = store.env.begin_ro_txn()?;
    let mut cursor = txn.open_ro_cursor(store.db)?;
    for (key, value) in cursor.iter_from(seek_key) {
        if !key.starts_with(ns) {
            break;
        }
        if !f(key, value)? {
            break;
        }
    }
    Ok(())
}

fn step<'txn, C: Cursor<'txn>>(cursor: &C, op: u32) -> Option<(Vec<u8>, Vec<u8>)> {
    match cursor.get(None, None, op) {
        Ok((Some(key), value)) => Some((key.to_vec(), value.to_vec())),
        _ => None,
    }
}
