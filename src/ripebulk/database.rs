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

//! RIPE bulk index: covering-range lookups over parsed inetnums with the
//! organisation-name fallback chain.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use chrono::Utc;
use tracing::info;

use super::{Inetnum, Organisation, RipeMatch, RipeMetadata};
use crate::config::{
    ORG_BATCH_SIZE, RANGE_BATCH_SIZE, RIPE_DUMP_BASE_URL, RIPE_SCHEMA_VERSION, V4_SCAN_SPEC,
};
use crate::error::Result;
use crate::ipcodec::{self, u32_to_ipv4};
use crate::store::keys::{self, RangeKey};
use crate::store::search;
use crate::store::{BatchOp, Store};

const PLACEHOLDER_NETNAME: &str = "NON-RIPE-NCC-MANAGED-ADDRESS-BLOCK";
const META_BUILD: &str = "build";

/// Filters strings that cannot be an organization label: separator bars,
/// PEM blocks, URLs, mail contacts and boilerplate advisories that pollute
/// `descr:` and `remarks:` fields.
pub fn is_valid_org_remark(remark: &str) -> bool {
    if remark.chars().count() < 3 {
        return false;
    }

    let lower = remark.to_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return false;
    }
    if remark.contains('@') || lower.contains("mailto:") {
        return false;
    }

    let trimmed = remark.trim();
    if trimmed.starts_with('*') || trimmed.starts_with('-') {
        return false;
    }

    const INSTRUCTIONAL_PREFIXES: &[&str] = &[
        "please ",
        "for registration",
        "you can consult",
        "this network",
        "abuse",
        "contact",
        "send ",
        "see ",
        "visit ",
        "refer to",
    ];
    if INSTRUCTIONAL_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return false;
    }

    let total = remark.chars().count();
    let separators = remark
        .chars()
        .filter(|c| matches!(c, '-' | '*' | '=' | '_' | '#'))
        .count();
    if separators * 5 > total * 4 {
        return false;
    }

    true
}

pub struct RipeDatabase {
    store: Store,
}

impl RipeDatabase {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(RipeDatabase {
            store: Store::open(path)?,
        })
    }

    pub fn close(&self) {
        self.store.close();
    }

    /// Builds a fresh index from parsed dump data, replacing any existing
    /// index at `path`.
    pub fn build(
        path: &Path,
        mut inetnums: Vec<Inetnum>,
        orgs: HashMap<String, Organisation>,
    ) -> Result<Self> {
        info!(
            "building RIPE bulk index at {}: {} inetnums, {} organisations",
            path.display(),
            inetnums.len(),
            orgs.len()
        );
        let store = Store::open_destructive(path)?;

        // Start ascending, end descending: a seek that lands on a start IP
        // meets the widest enclosing range first.
        inetnums.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

        let mut batch: Vec<BatchOp> = Vec::with_capacity(RANGE_BATCH_SIZE);
        for inet in &inetnums {
            let key = RangeKey::exact(
                &IpAddr::V4(u32_to_ipv4(inet.start)),
                &IpAddr::V4(u32_to_ipv4(inet.end)),
            );
            batch.push(BatchOp::Put(key, serde_json::to_vec(inet)?));
            if batch.len() >= RANGE_BATCH_SIZE {
                store.write_batch(std::mem::take(&mut batch))?;
            }
        }
        if !batch.is_empty() {
            store.write_batch(std::mem::take(&mut batch))?;
        }

        for org in orgs.values() {
            batch.push(BatchOp::Put(
                keys::org_key(&org.org_id),
                serde_json::to_vec(org)?,
            ));
            if batch.len() >= ORG_BATCH_SIZE {
                store.write_batch(std::mem::take(&mut batch))?;
            }
        }
        if !batch.is_empty() {
            store.write_batch(std::mem::take(&mut batch))?;
        }

        let metadata = RipeMetadata {
            schema_version: RIPE_SCHEMA_VERSION,
            build_time: Utc::now(),
            inetnum_count: inetnums.len() as u64,
            org_count: orgs.len() as u64,
            source_url: RIPE_DUMP_BASE_URL.to_string(),
        };
        store.put_json(&keys::meta_key(META_BUILD), &metadata)?;
        store.set_meta("schema", &RIPE_SCHEMA_VERSION.to_string())?;
        store.set_meta("built_at", &metadata.build_time.to_rfc3339())?;
        store.set_meta("inetnum_count", &metadata.inetnum_count.to_string())?;
        store.set_meta("org_count", &metadata.org_count.to_string())?;

        info!("RIPE bulk index build complete");
        Ok(RipeDatabase { store })
    }

    pub fn metadata(&self) -> Result<Option<RipeMetadata>> {
        self.store.get_json(&keys::meta_key(META_BUILD))
    }

    pub fn get_organisation(&self, org_id: &str) -> Result<Option<Organisation>> {
        self.store.get_json(&keys::org_key(org_id))
    }

    /// Most specific inetnum containing an address. `Ok(None)` means the
    /// match was a placeholder for space RIPE does not manage; the caller
    /// should consult other sources.
    pub fn lookup_ip(&self, ip: Ipv4Addr) -> Result<Option<RipeMatch>> {
        let q = ipcodec::ipv4_to_u32(ip);
        self.lookup_range(q, q)
    }

    /// Most specific inetnum fully covering a prefix.
    pub fn lookup_prefix(&self, prefix: &cidr::IpCidr) -> Result<Option<RipeMatch>> {
        let (start, end) = ipcodec::prefix_to_range(prefix);
        let (IpAddr::V4(s), IpAddr::V4(e)) = (start, end) else {
            return Ok(None); // IPv6 is not indexed here.
        };
        self.lookup_range(ipcodec::ipv4_to_u32(s), ipcodec::ipv4_to_u32(e))
    }

    fn lookup_range(&self, qs: u32, qe: u32) -> Result<Option<RipeMatch>> {
        let seek = RangeKey::seek(&IpAddr::V4(u32_to_ipv4(qs)));
        let candidates = search::covering_candidates(&self.store, &V4_SCAN_SPEC, &seek)?;

        let mut best: Option<(u32, Vec<u8>, Inetnum)> = None;
        for entry in candidates {
            let inet: Inetnum = serde_json::from_slice(&entry.value)?;
            if inet.start > qs || inet.end < qe {
                continue;
            }
            let span = inet.end - inet.start;
            let better = match &best {
                None => true,
                Some((best_span, best_key, _)) => {
                    span < *best_span || (span == *best_span && entry.key < *best_key)
                }
            };
            if better {
                best = Some((span, entry.key, inet));
            }
        }

        let Some((_, _, inet)) = best else {
            return Ok(None);
        };

        // Catch-all entries for non-RIPE address space decline the match.
        if inet.netname == PLACEHOLDER_NETNAME {
            return Ok(None);
        }

        Ok(Some(self.resolve_match(inet)?))
    }

    /// Applies the organisation-name fallback chain:
    /// org handle, then descr, then remarks, then netname.
    fn resolve_match(&self, inet: Inetnum) -> Result<RipeMatch> {
        let mut org_name = String::new();
        let mut org_type = String::new();

        if !inet.org_id.is_empty() {
            if let Some(org) = self.get_organisation(&inet.org_id)? {
                if !org.org_name.is_empty() {
                    org_name = org.org_name;
                    org_type = org.org_type;
                }
            }
        }

        if org_name.is_empty() && !inet.descr.is_empty() {
            let descr = inet.descr.trim();
            if is_valid_org_remark(descr) {
                org_name = descr.to_string();
            }
        }

        if org_name.is_empty() {
            if let Some(remark) = inet
                .remarks
                .iter()
                .map(|r| r.trim())
                .find(|r| is_valid_org_remark(r))
            {
                org_name = remark.to_string();
            }
        }

        if org_name.is_empty() && !inet.netname.is_empty() {
            org_name = inet.netname.clone();
        }

        Ok(RipeMatch {
            start: u32_to_ipv4(inet.start),
            end: u32_to_ipv4(inet.end),
            org_id: inet.org_id,
            org_name,
            org_type,
            status: inet.status,
            country: inet.country,
            netname: inet.netname,
            matched_at: Utc::now(),
        })
    }

    /// In-order scan over all inetnums.
    pub fn iterate<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(Inetnum) -> Result<bool>,
    {
        self.store.iterate_ns(keys::NS_RANGE_V4, |_, value| {
            let inet: Inetnum = serde_json::from_slice(value)?;
            f(inet)
        })
    }

    pub fn count(&self) -> Result<u64> {
        self.store.count_ns(keys::NS_RANGE_V4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use tempfile::TempDir;

    fn inetnum(start: &str, end: &str, netname: &str, org_id: &str) -> Inetnum {
        Inetnum {
            start: ipcodec::ipv4_to_u32(Ipv4Addr::from_str(start).unwrap()),
            end: ipcodec::ipv4_to_u32(Ipv4Addr::from_str(end).unwrap()),
            org_id: org_id.to_string(),
            netname: netname.to_string(),
            status: "ASSIGNED-PA".to_string(),
            ..Inetnum::default()
        }
    }

    fn org(id: &str, name: &str) -> (String, Organisation) {
        (
            id.to_string(),
            Organisation {
                org_id: id.to_string(),
                org_name: name.to_string(),
                org_type: "LIR".to_string(),
            },
        )
    }

    #[test]
    fn test_nested_lookup_returns_most_specific() {
        let dir = TempDir::new().unwrap();
        let mut inetnums = vec![
            inetnum("10.0.0.0", "10.255.255.255", "PARENT-NET", "ORG-P1-RIPE"),
            inetnum("10.1.0.0", "10.1.255.255", "CHILD-NET", "ORG-C1-RIPE"),
            inetnum("10.1.1.0", "10.1.1.255", "GRANDCHILD-NET", "ORG-G1-RIPE"),
        ];
        inetnums[0].status = "ALLOCATED-PA".into();
        inetnums[2].status = "SUB-ALLOCATED-PA".into();

        let orgs: HashMap<_, _> = [
            org("ORG-P1-RIPE", "Parent"),
            org("ORG-C1-RIPE", "Child"),
            org("ORG-G1-RIPE", "Grandchild"),
        ]
        .into_iter()
        .collect();

        let db = RipeDatabase::build(dir.path(), inetnums, orgs).unwrap();

        let m = db
            .lookup_ip(Ipv4Addr::from_str("10.1.1.1").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(m.org_name, "Grandchild");
        assert_eq!(m.start, Ipv4Addr::from_str("10.1.1.0").unwrap());
        assert_eq!(m.end, Ipv4Addr::from_str("10.1.1.255").unwrap());

        let m = db
            .lookup_ip(Ipv4Addr::from_str("10.1.2.1").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(m.org_name, "Child");

        let m = db
            .lookup_ip(Ipv4Addr::from_str("10.2.0.1").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(m.org_name, "Parent");

        assert!(db
            .lookup_ip(Ipv4Addr::from_str("192.0.2.1").unwrap())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_same_start_ranges_stay_distinct() {
        let dir = TempDir::new().unwrap();
        let inetnums = vec![
            inetnum("147.147.0.0", "147.152.255.255", "PARENT", "ORG-P-RIPE"),
            inetnum("147.147.0.0", "147.147.255.255", "CHILD", "ORG-C-RIPE"),
        ];
        let orgs: HashMap<_, _> = [org("ORG-P-RIPE", "Parent"), org("ORG-C-RIPE", "Child")]
            .into_iter()
            .collect();

        let db = RipeDatabase::build(dir.path(), inetnums, orgs).unwrap();

        let m = db
            .lookup_ip(Ipv4Addr::from_str("147.147.1.1").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(m.org_name, "Child");

        let m = db
            .lookup_ip(Ipv4Addr::from_str("147.148.32.2").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(m.org_name, "Parent");
    }

    #[test]
    fn test_placeholder_netname_declines_match() {
        let dir = TempDir::new().unwrap();
        let inetnums = vec![inetnum(
            "8.0.0.0",
            "8.255.255.255",
            "NON-RIPE-NCC-MANAGED-ADDRESS-BLOCK",
            "",
        )];
        let db = RipeDatabase::build(dir.path(), inetnums, HashMap::new()).unwrap();

        assert!(db
            .lookup_ip(Ipv4Addr::from_str("8.8.8.8").unwrap())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_org_fallback_chain() {
        let dir = TempDir::new().unwrap();

        // No org handle: descr wins.
        let mut a = inetnum("10.0.0.0", "10.0.0.255", "NET-A", "");
        a.descr = "Amazon.com, Inc.".into();

        // Invalid descr, valid remark.
        let mut b = inetnum("10.0.1.0", "10.0.1.255", "NET-B", "");
        b.descr = "http://example.com".into();
        b.remarks = vec![
            "----------------".into(),
            "TBS Engineering".into(),
        ];

        // Nothing usable: netname is last resort.
        let c = inetnum("10.0.2.0", "10.0.2.255", "NET-C", "");

        let db = RipeDatabase::build(dir.path(), vec![a, b, c], HashMap::new()).unwrap();

        let m = db
            .lookup_ip(Ipv4Addr::from_str("10.0.0.1").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(m.org_name, "Amazon.com, Inc.");

        let m = db
            .lookup_ip(Ipv4Addr::from_str("10.0.1.1").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(m.org_name, "TBS Engineering");

        let m = db
            .lookup_ip(Ipv4Addr::from_str("10.0.2.1").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(m.org_name, "NET-C");
    }

    #[test]
    fn test_metadata_written() {
        let dir = TempDir::new().unwrap();
        let db = RipeDatabase::build(
            dir.path(),
            vec![inetnum("10.0.0.0", "10.0.0.255", "N", "")],
            HashMap::new(),
        )
        .unwrap();
        let meta = db.metadata().unwrap().unwrap();
        assert_eq!(meta.schema_version, RIPE_SCHEMA_VERSION);
        assert_eq!(meta.inetnum_count, 1);
        assert_eq!(meta.org_count, 0);
        assert_eq!(db.count().unwrap(), 1);
    }

    #[test]
    fn test_valid_org_remark_filter_table() {
        let cases = [
            ("Amazon.com, Inc.", true),
            ("---------------------------", false),
            ("http://example.com", false),
            ("contact@example.com", false),
            ("* THIS OBJECT IS MODIFIED", false),
            ("-----BEGIN CERTIFICATE-----", false),
            ("Please send abuse reports", false),
            ("ab", false),
            ("ABC", true),
            ("A-B-C", true),
        ];
        for (input, expected) in cases {
            assert_eq!(is_valid_org_remark(input), expected, "{input:?}");
        }
    }
}
