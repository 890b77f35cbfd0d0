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

//! Persistent store for iptoasn data: a global ordered IPv4 prefix list
//! plus raw and collapsed per-ASN lists with summary entries.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;

use chrono::Utc;
use tracing::info;

use super::{AsnIndexEntry, CanonicalPrefix, IpToAsnStats};
use crate::config::IPTOASN_SCHEMA_VERSION;
use crate::error::{Error, Result};
use crate::ipcodec::{self, Family};
use crate::store::{keys, BatchOp, Store};

const META_STATS: &str = "stats";
const META_SCHEMA: &str = "schema";

pub struct IpToAsnStore {
    store: Store,
}

impl IpToAsnStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(IpToAsnStore {
            store: Store::open(path)?,
        })
    }

    pub fn open_destructive(path: &Path) -> Result<Self> {
        Ok(IpToAsnStore {
            store: Store::open_destructive(path)?,
        })
    }

    pub fn close(&self) {
        self.store.close();
    }

    pub fn is_closed(&self) -> bool {
        self.store.is_closed()
    }

    fn v4_start(prefix: &CanonicalPrefix) -> Option<u32> {
        let (start, _) = ipcodec::cidr_to_range(&prefix.cidr).ok()?;
        match start {
            IpAddr::V4(v4) => Some(ipcodec::ipv4_to_u32(v4)),
            IpAddr::V6(_) => None,
        }
    }

    /// Writes one batch of prefixes: the global ordered list plus the raw
    /// and collapsed per-ASN lists and their summaries, atomically.
    pub fn put_batch(
        &self,
        prefixes: &[CanonicalPrefix],
        collapsed_by_asn: &HashMap<u32, Vec<CanonicalPrefix>>,
    ) -> Result<()> {
        let mut ops: Vec<BatchOp> = Vec::new();

        for p in prefixes {
            let Some(start) = Self::v4_start(p) else {
                continue; // only IPv4 goes in the global list
            };
            ops.push(BatchOp::Put(
                keys::global_v4_key(start),
                serde_json::to_vec(p)?,
            ));
        }

        let mut raw_by_asn: HashMap<u32, Vec<&CanonicalPrefix>> = HashMap::new();
        for p in prefixes {
            raw_by_asn.entry(p.asn).or_default().push(p);
        }

        for (asn, raw) in &raw_by_asn {
            for (i, p) in raw.iter().enumerate() {
                ops.push(BatchOp::Put(
                    keys::asn_raw_key(*asn, i),
                    serde_json::to_vec(p)?,
                ));
            }

            let collapsed_count = match collapsed_by_asn.get(asn) {
                Some(collapsed) => {
                    for (i, p) in collapsed.iter().enumerate() {
                        ops.push(BatchOp::Put(
                            keys::asn_collapsed_key(*asn, i),
                            serde_json::to_vec(p)?,
                        ));
                    }
                    collapsed.len()
                }
                None => raw.len(),
            };

            let entry = AsnIndexEntry {
                asn: *asn,
                v4_count: raw.len() as u64,
                v4_collapsed: collapsed_count as u64,
                last_modified: Utc::now(),
            };
            ops.push(BatchOp::Put(
                keys::asn_index_key(*asn),
                serde_json::to_vec(&entry)?,
            ));
        }

        self.store.write_batch(ops)
    }

    /// Ordered walk over the global IPv4 prefix list. `start_key` of `None`
    /// begins at the first prefix; the callback returns `false` to stop.
    pub fn walk_v4<F>(&self, start_key: Option<&[u8]>, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], CanonicalPrefix) -> Result<bool>,
    {
        let from = start_key.unwrap_or(keys::NS_GLOBAL_V4);
        crate::store::search::window_from(&self.store, keys::NS_GLOBAL_V4, from, |key, value| {
            let p: CanonicalPrefix = serde_json::from_slice(value)?;
            f(key, p)
        })
    }

    /// All prefixes announced by one ASN, raw or collapsed.
    pub fn list_by_asn(&self, asn: u32, collapsed: bool) -> Result<Vec<CanonicalPrefix>> {
        let ns = if collapsed {
            keys::asn_collapsed_prefix(asn)
        } else {
            keys::asn_raw_prefix(asn)
        };

        let mut out = Vec::new();
        self.store.iterate_ns(&ns, |_, value| {
            out.push(serde_json::from_slice(value)?);
            Ok(true)
        })?;

        if out.is_empty() && self.get_asn_index(asn)?.is_none() {
            return Err(Error::NotFound);
        }
        Ok(out)
    }

    /// Every ASN present in the store, ascending.
    pub fn list_asns(&self) -> Result<Vec<u32>> {
        let mut asns = Vec::new();
        self.store.iterate_ns(keys::NS_ASN_INDEX, |key, _| {
            if let Some(asn) = keys::asn_from_index_key(key) {
                asns.push(asn);
            }
            Ok(true)
        })?;
        asns.sort_unstable();
        Ok(asns)
    }

    pub fn get_asn_index(&self, asn: u32) -> Result<Option<AsnIndexEntry>> {
        self.store.get_json(&keys::asn_index_key(asn))
    }

    pub fn set_stats(&self, stats: &IpToAsnStats) -> Result<()> {
        self.store.put_json(&keys::meta_key(META_STATS), stats)?;
        self.store
            .set_meta(META_SCHEMA, &IPTOASN_SCHEMA_VERSION.to_string())?;
        self.store
            .set_meta("total_prefixes", &stats.total_prefixes.to_string())?;
        self.store
            .set_meta("ipv4_prefixes", &stats.ipv4_prefixes.to_string())?;
        self.store
            .set_meta("collapsed_v4", &stats.collapsed_v4.to_string())?;
        self.store
            .set_meta("unique_asns", &stats.unique_asns.to_string())
    }

    pub fn get_stats(&self) -> Result<Option<IpToAsnStats>> {
        self.store.get_json(&keys::meta_key(META_STATS))
    }

    pub fn set_metadata(&self, name: &str, value: &str) -> Result<()> {
        self.store.set_meta(name, value)
    }

    pub fn get_metadata(&self, name: &str) -> Result<Option<String>> {
        self.store.get_meta(name)
    }
}

/// Full build: dedupe, collapse per ASN, write everything, record stats.
pub fn build(path: &Path, prefixes: Vec<CanonicalPrefix>) -> Result<IpToAsnStore> {
    info!(
        "building iptoasn store at {}: {} raw prefixes",
        path.display(),
        prefixes.len()
    );
    let store = IpToAsnStore::open_destructive(path)?;

    let deduped = super::aggregator::deduplicate(prefixes);
    let collapsed = super::aggregator::collapse_by_asn(&deduped);

    store.put_batch(&deduped, &collapsed)?;

    let ipv4 = deduped
        .iter()
        .filter(|p| {
            ipcodec::cidr_to_range(&p.cidr)
                .map(|(s, _)| Family::of(&s) == Family::V4)
                .unwrap_or(false)
        })
        .count() as u64;
    let stats = IpToAsnStats {
        total_prefixes: deduped.len() as u64,
        ipv4_prefixes: ipv4,
        collapsed_v4: collapsed.values().map(|v| v.len() as u64).sum(),
        unique_asns: collapsed.len() as u64,
    };
    store.set_stats(&stats)?;

    info!(
        "iptoasn store build complete: {} prefixes, {} ASNs",
        stats.total_prefixes, stats.unique_asns
    );
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn prefix(cidr: &str, asn: u32) -> CanonicalPrefix {
        CanonicalPrefix {
            cidr: cidr.to_string(),
            asn,
            country: "US".to_string(),
            registry: "ARIN".to_string(),
            as_name: "TEST-AS".to_string(),
        }
    }

    #[test]
    fn test_build_and_list_by_asn() {
        let dir = TempDir::new().unwrap();
        let store = build(
            dir.path(),
            vec![
                prefix("1.0.0.0/24", 13335),
                prefix("1.0.1.0/24", 13335),
                prefix("1.0.2.0/24", 13335),
                prefix("1.0.3.0/24", 13335),
                prefix("9.9.9.0/24", 19281),
            ],
        )
        .unwrap();

        let raw = store.list_by_asn(13335, false).unwrap();
        assert_eq!(raw.len(), 4);

        let collapsed = store.list_by_asn(13335, true).unwrap();
        assert_eq!(collapsed.len(), 1);
        assert_eq!(collapsed[0].cidr, "1.0.0.0/22");

        assert!(matches!(
            store.list_by_asn(64500, false),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn test_collapsed_covers_same_ip_set_as_raw() {
        let dir = TempDir::new().unwrap();
        let store = build(
            dir.path(),
            vec![
                prefix("10.0.0.0/25", 1),
                prefix("10.0.0.128/25", 1),
                prefix("10.0.3.0/24", 1),
            ],
        )
        .unwrap();

        for asn in store.list_asns().unwrap() {
            let addr_count = |list: &[CanonicalPrefix]| -> u128 {
                list.iter()
                    .map(|p| {
                        let (s, e) = ipcodec::cidr_to_range(&p.cidr).unwrap();
                        ipcodec::to_integer(&e) - ipcodec::to_integer(&s) + 1
                    })
                    .sum()
            };
            let raw = store.list_by_asn(asn, false).unwrap();
            let collapsed = store.list_by_asn(asn, true).unwrap();
            assert_eq!(addr_count(&raw), addr_count(&collapsed));
        }
    }

    #[test]
    fn test_list_asns_and_index_entries() {
        let dir = TempDir::new().unwrap();
        let store = build(
            dir.path(),
            vec![
                prefix("1.0.0.0/24", 13335),
                prefix("9.9.9.0/24", 19281),
                prefix("10.0.0.0/24", 4200000001),
            ],
        )
        .unwrap();

        assert_eq!(store.list_asns().unwrap(), vec![13335, 19281, 4200000001]);

        let entry = store.get_asn_index(13335).unwrap().unwrap();
        assert_eq!(entry.v4_count, 1);
        assert_eq!(entry.v4_collapsed, 1);
    }

    #[test]
    fn test_walk_v4_in_start_order() {
        let dir = TempDir::new().unwrap();
        let store = build(
            dir.path(),
            vec![
                prefix("9.9.9.0/24", 19281),
                prefix("1.0.0.0/24", 13335),
            ],
        )
        .unwrap();

        let mut seen = Vec::new();
        store
            .walk_v4(None, |_, p| {
                seen.push(p.cidr);
                Ok(true)
            })
            .unwrap();
        assert_eq!(seen, vec!["1.0.0.0/24".to_string(), "9.9.9.0/24".to_string()]);
    }

    #[test]
    fn test_stats_recorded() {
        let dir = TempDir::new().unwrap();
        let store = build(
            dir.path(),
            vec![prefix("1.0.0.0/24", 13335), prefix("1.0.0.0/24", 13335)],
        )
        .unwrap();

        let stats = store.get_stats().unwrap().unwrap();
        // Duplicate removed.
        assert_eq!(stats.total_prefixes, 1);
        assert_eq!(stats.ipv4_prefixes, 1);
        assert_eq!(stats.unique_asns, 1);
    }
}
