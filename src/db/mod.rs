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

//! The main IPORG range index.
//!
//! Stores one [`Record`] per announced prefix (or per geo block in Mode B)
//! with overlap resolution on write: the builder presents prefixes
//! least-specific first, so a more specific range arriving while its parent
//! exists is an expected skip, while a less specific range arriving late
//! replaces every child it covers.

pub mod metadata;
pub mod record;

use std::net::IpAddr;
use std::path::Path;
use std::sync::Mutex;

use tracing::debug;

use crate::error::{Error, Result};
use crate::ipcodec::{self, Family};
use crate::store::keys::{self, RangeKey};
use crate::store::search;
use crate::store::{BatchOp, Store};

pub use record::{LookupResult, Record};

fn scan_spec(family: Family) -> &'static search::ScanSpec {
    match family {
        Family::V4 => &crate::config::V4_SCAN_SPEC,
        Family::V6 => &crate::config::V6_SCAN_SPEC,
    }
}

/// Result of a range insertion.
#[derive(Debug, PartialEq, Eq)]
pub enum PutOutcome {
    /// New range written; covered children were removed first.
    Inserted { replaced_children: usize },
    /// Exact duplicate key: record overwritten in place.
    Updated,
}

pub struct Database {
    store: Store,
    // put_range plans reads and applies writes as separate transactions;
    // the lock keeps plan and apply consistent under concurrent workers.
    write_lock: Mutex<()>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Database {
            store: Store::open(path)?,
            write_lock: Mutex::new(()),
        })
    }

    pub fn open_destructive(path: &Path) -> Result<Self> {
        Ok(Database {
            store: Store::open_destructive(path)?,
            write_lock: Mutex::new(()),
        })
    }

    pub fn close(&self) {
        self.store.close();
    }

    pub fn is_closed(&self) -> bool {
        self.store.is_closed()
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    /// Inserts or updates a range record, enforcing the overlap rules.
    pub fn put_range(&self, rec: &Record) -> Result<PutOutcome> {
        self.store.guard()?;
        rec.validate()?;

        let _guard = self.write_lock.lock().expect("write lock poisoned");

        let family = Family::of(&rec.start);
        let ns = keys::range_ns(family);
        let new_key = RangeKey::exact(&rec.start, &rec.end);
        let seek = RangeKey::seek(&rec.start);
        let new_start = ipcodec::to_integer(&rec.start);
        let new_end = ipcodec::to_integer(&rec.end);

        // The neighbor just before the new start is the only candidate for
        // an enclosing or left-crossing range: the index holds disjoint
        // ranges, so anything further back ends before this neighbor starts.
        if let Some(entry) = search::floor_entry(&self.store, ns, &seek)? {
            let existing: Record = serde_json::from_slice(&entry.value)?;
            let es = ipcodec::to_integer(&existing.start);
            let ee = ipcodec::to_integer(&existing.end);
            if es < new_start && ee >= new_start {
                if ee >= new_end {
                    return Err(Error::OverlapCoveredByLessSpecific {
                        new: rec.prefix.clone(),
                        existing: existing.prefix.clone(),
                    });
                }
                return Err(Error::OverlapConflict {
                    new: rec.prefix.clone(),
                    existing: existing.prefix.clone(),
                });
            }
        }

        // Walk entries starting inside [new_start, new_end].
        let mut updated = false;
        let mut deletes: Vec<Vec<u8>> = Vec::new();
        let mut covered_by: Option<String> = None;
        let mut conflict_with: Option<String> = None;

        search::window_from(&self.store, ns, &seek, |key, value| {
            let decoded = RangeKey::decode(key)?;
            let es = ipcodec::to_integer(&decoded.start);
            if es > new_end {
                return Ok(false);
            }
            let existing: Record = serde_json::from_slice(value)?;
            let ee = ipcodec::to_integer(&existing.end);

            if es == new_start && ee == new_end {
                updated = true;
            } else if ee <= new_end {
                // Strictly contained child; removed before the insert.
                deletes.push(key.to_vec());
            } else if es == new_start {
                // Same start, larger end: the existing range encloses the
                // new one.
                covered_by = Some(existing.prefix.clone());
                return Ok(false);
            } else {
                conflict_with = Some(existing.prefix.clone());
                return Ok(false);
            }
            Ok(true)
        })?;

        if let Some(existing) = covered_by {
            return Err(Error::OverlapCoveredByLessSpecific {
                new: rec.prefix.clone(),
                existing,
            });
        }
        if let Some(existing) = conflict_with {
            return Err(Error::OverlapConflict {
                new: rec.prefix.clone(),
                existing,
            });
        }

        let replaced_children = deletes.len();
        if replaced_children > 0 {
            debug!(
                "replacing {} more specific ranges covered by {}",
                replaced_children, rec.prefix
            );
        }

        let mut ops: Vec<BatchOp> = deletes.into_iter().map(BatchOp::Delete).collect();
        ops.push(BatchOp::Put(new_key, serde_json::to_vec(rec)?));
        self.store.write_batch(ops)?;

        if updated {
            Ok(PutOutcome::Updated)
        } else {
            Ok(PutOutcome::Inserted { replaced_children })
        }
    }

    /// Most-specific range containing a single address.
    pub fn get_by_ip(&self, ip: &IpAddr) -> Result<Record> {
        let q = ipcodec::to_integer(ip);
        self.most_specific(Family::of(ip), ip, q, q)
    }

    /// Most-specific range fully covering a prefix.
    pub fn get_by_prefix(&self, cidr: &str) -> Result<Record> {
        let (start, end) = ipcodec::cidr_to_range(cidr)?;
        self.most_specific(
            Family::of(&start),
            &start,
            ipcodec::to_integer(&start),
            ipcodec::to_integer(&end),
        )
    }

    /// Convenience wrapper: parse an address string and look it up.
    pub fn lookup_str(&self, s: &str) -> Result<Record> {
        self.get_by_ip(&ipcodec::parse_ip(s)?)
    }

    fn most_specific(
        &self,
        family: Family,
        seek_addr: &IpAddr,
        qs: u128,
        qe: u128,
    ) -> Result<Record> {
        let seek = RangeKey::seek(seek_addr);
        let candidates = search::covering_candidates(&self.store, scan_spec(family), &seek)?;

        let mut best: Option<(u128, Vec<u8>, Record)> = None;
        for entry in candidates {
            let rec: Record = match serde_json::from_slice(&entry.value) {
                Ok(rec) => rec,
                Err(e) => {
                    debug!("skipping undecodable record: {e}");
                    continue;
                }
            };
            let start = ipcodec::to_integer(&rec.start);
            let end = ipcodec::to_integer(&rec.end);
            if start > qs || end < qe {
                continue;
            }
            let span = end - start;
            let better = match &best {
                None => true,
                Some((best_span, best_key, _)) => {
                    span < *best_span || (span == *best_span && entry.key < *best_key)
                }
            };
            if better {
                best = Some((span, entry.key, rec));
            }
        }

        best.map(|(_, _, rec)| rec).ok_or(Error::NotFound)
    }

    /// In-order scan over one family. The callback returns `false` to stop.
    pub fn iterate<F>(&self, family: Family, mut f: F) -> Result<()>
    where
        F: FnMut(Record) -> Result<bool>,
    {
        self.store.iterate_ns(keys::range_ns(family), |_, value| {
            let rec: Record = serde_json::from_slice(value)?;
            f(rec)
        })
    }

    /// Exact per-family record counts by full scan.
    pub fn count(&self) -> Result<(u64, u64)> {
        let v4 = self.store.count_ns(keys::NS_RANGE_V4)?;
        let v6 = self.store.count_ns(keys::NS_RANGE_V6)?;
        Ok((v4, v6))
    }

    pub fn put_org<T: serde::Serialize>(&self, handle: &str, org: &T) -> Result<()> {
        self.store.put_json(&keys::org_key(handle), org)
    }

    pub fn get_org<T: serde::de::DeserializeOwned>(&self, handle: &str) -> Result<Option<T>> {
        self.store.get_json(&keys::org_key(handle))
    }
}
