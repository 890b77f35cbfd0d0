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

//! ARIN bulk index built by streaming the XML dump.
//!
//! Organizations go straight to the store as the parser emits them; net
//! blocks are held only long enough to be sorted and batch-written.

use std::io::BufRead;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use chrono::Utc;
use tracing::info;

use super::{is_valid_org_name, ArinMatch, ArinMetadata, NetBlock, Organization};
use crate::config::{ARIN_SCHEMA_VERSION, ORG_BATCH_SIZE, RANGE_BATCH_SIZE, V4_SCAN_SPEC};
use crate::error::Result;
use crate::ipcodec::{self, u32_to_ipv4};
use crate::store::keys::{self, RangeKey};
use crate::store::search;
use crate::store::{BatchOp, Store};

const META_BUILD: &str = "build";

pub struct ArinDatabase {
    store: Store,
}

impl ArinDatabase {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(ArinDatabase {
            store: Store::open(path)?,
        })
    }

    pub fn close(&self) {
        self.store.close();
    }

    /// Builds a fresh index from the bulk XML dump, replacing any existing
    /// index at `path`.
    pub fn build_from_reader<R: BufRead>(
        path: &Path,
        reader: R,
        source_date: &str,
    ) -> Result<Self> {
        info!("building ARIN bulk index at {}", path.display());
        let store = Store::open_destructive(path)?;

        let mut org_batch: Vec<BatchOp> = Vec::with_capacity(ORG_BATCH_SIZE);
        let mut org_count = 0u64;

        let mut nets = super::parser::parse_stream(reader, |org: Organization| {
            org_count += 1;
            org_batch.push(BatchOp::Put(
                keys::org_key(&org.org_id),
                serde_json::to_vec(&org)?,
            ));
            if org_batch.len() >= ORG_BATCH_SIZE {
                store.write_batch(std::mem::take(&mut org_batch))?;
            }
            Ok(())
        })?;
        if !org_batch.is_empty() {
            store.write_batch(std::mem::take(&mut org_batch))?;
        }

        info!("parsed {} net blocks, {} organizations", nets.len(), org_count);

        // Start ascending, end descending, same as the RIPE index.
        nets.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

        let net_count = nets.len() as u64;
        let mut batch: Vec<BatchOp> = Vec::with_capacity(RANGE_BATCH_SIZE);
        for net in &nets {
            let key = RangeKey::exact(
                &IpAddr::V4(u32_to_ipv4(net.start)),
                &IpAddr::V4(u32_to_ipv4(net.end)),
            );
            batch.push(BatchOp::Put(key, serde_json::to_vec(net)?));
            if batch.len() >= RANGE_BATCH_SIZE {
                store.write_batch(std::mem::take(&mut batch))?;
            }
        }
        if !batch.is_empty() {
            store.write_batch(std::mem::take(&mut batch))?;
        }

        let metadata = ArinMetadata {
            schema_version: ARIN_SCHEMA_VERSION,
            build_time: Utc::now(),
            net_count,
            org_count,
            source_date: source_date.to_string(),
        };
        store.put_json(&keys::meta_key(META_BUILD), &metadata)?;
        store.set_meta("schema", &ARIN_SCHEMA_VERSION.to_string())?;
        store.set_meta("built_at", &metadata.build_time.to_rfc3339())?;
        store.set_meta("net_count", &net_count.to_string())?;
        store.set_meta("org_count", &org_count.to_string())?;

        info!("ARIN bulk index build complete: {net_count} nets, {org_count} orgs");
        Ok(ArinDatabase { store })
    }

    pub fn metadata(&self) -> Result<Option<ArinMetadata>> {
        self.store.get_json(&keys::meta_key(META_BUILD))
    }

    pub fn get_organization(&self, org_id: &str) -> Result<Option<Organization>> {
        self.store.get_json(&keys::org_key(org_id))
    }

    /// Most specific net block containing an address.
    pub fn lookup_ip(&self, ip: Ipv4Addr) -> Result<Option<ArinMatch>> {
        let q = ipcodec::ipv4_to_u32(ip);
        self.lookup_range(q, q)
    }

    /// Most specific net block fully covering a prefix.
    pub fn lookup_prefix(&self, prefix: &cidr::IpCidr) -> Result<Option<ArinMatch>> {
        let (start, end) = ipcodec::prefix_to_range(prefix);
        let (IpAddr::V4(s), IpAddr::V4(e)) = (start, end) else {
            return Ok(None); // IPv6 is not indexed here.
        };
        self.lookup_range(ipcodec::ipv4_to_u32(s), ipcodec::ipv4_to_u32(e))
    }

    fn lookup_range(&self, qs: u32, qe: u32) -> Result<Option<ArinMatch>> {
        let seek = RangeKey::seek(&IpAddr::V4(u32_to_ipv4(qs)));
        let candidates = search::covering_candidates(&self.store, &V4_SCAN_SPEC, &seek)?;

        let mut best: Option<(u32, Vec<u8>, NetBlock)> = None;
        for entry in candidates {
            let net: NetBlock = serde_json::from_slice(&entry.value)?;
            if net.start > qs || net.end < qe {
                continue;
            }
            let span = net.end - net.start;
            let better = match &best {
                None => true,
                Some((best_span, best_key, _)) => {
                    span < *best_span || (span == *best_span && entry.key < *best_key)
                }
            };
            if better {
                best = Some((span, entry.key, net));
            }
        }

        let Some((_, _, net)) = best else {
            return Ok(None);
        };

        // Org name only when the handle resolves to something real; never
        // substitute NetName, which is usually an internal label.
        let mut org_name = String::new();
        let mut country = String::new();
        if !net.org_id.is_empty() {
            if let Some(org) = self.get_organization(&net.org_id)? {
                if is_valid_org_name(&org.org_name) {
                    org_name = org.org_name;
                }
                country = org.country;
            }
        }

        Ok(Some(ArinMatch {
            start: u32_to_ipv4(net.start),
            end: u32_to_ipv4(net.end),
            net_handle: net.net_handle,
            org_id: net.org_id,
            org_name,
            net_type: net.net_type,
            net_name: net.net_name,
            country,
            matched_at: Utc::now(),
        }))
    }

    /// In-order scan over all net blocks.
    pub fn iterate<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(NetBlock) -> Result<bool>,
    {
        self.store.iterate_ns(keys::NS_RANGE_V4, |_, value| {
            let net: NetBlock = serde_json::from_slice(value)?;
            f(net)
        })
    }

    pub fn count(&self) -> Result<u64> {
        self.store.count_ns(keys::NS_RANGE_V4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::str::FromStr;
    use tempfile::TempDir;

    fn build_sample(dir: &Path) -> ArinDatabase {
        let xml = r#"<?xml version="1.0"?>
<arin>
  <net>
    <handle>NET-8-0-0-0-1</handle>
    <name>LVLT-ORG-8-8</name>
    <orgHandle>LPL-141</orgHandle>
    <version>4</version>
    <netBlocks>
      <netBlock>
        <startAddress>008.000.000.000</startAddress>
        <endAddress>008.255.255.255</endAddress>
        <cidrLength>8</cidrLength>
        <type>DA</type>
      </netBlock>
    </netBlocks>
  </net>
  <net>
    <handle>NET-8-8-8-0-1</handle>
    <name>LVLT-GOGL-8-8-8</name>
    <orgHandle>GOGL</orgHandle>
    <version>4</version>
    <netBlocks>
      <netBlock>
        <startAddress>008.008.008.000</startAddress>
        <endAddress>008.008.008.255</endAddress>
        <cidrLength>24</cidrLength>
        <type>S</type>
      </netBlock>
    </netBlocks>
  </net>
  <net>
    <handle>NET-9-0-0-0-1</handle>
    <name>RESV-NET</name>
    <orgHandle>RSV-1</orgHandle>
    <version>4</version>
    <netBlocks>
      <netBlock>
        <startAddress>009.000.000.000</startAddress>
        <endAddress>009.000.000.255</endAddress>
        <cidrLength>24</cidrLength>
        <type>IR</type>
      </netBlock>
    </netBlocks>
  </net>
  <org>
    <handle>LPL-141</handle>
    <name>Level 3 Parent, LLC</name>
    <iso3166-1><code2>US</code2></iso3166-1>
  </org>
  <org>
    <handle>GOGL</handle>
    <name>Google LLC</name>
    <iso3166-1><code2>US</code2></iso3166-1>
  </org>
  <org>
    <handle>RSV-1</handle>
    <name>Reserved Space</name>
  </org>
</arin>
"#;
        ArinDatabase::build_from_reader(dir, Cursor::new(xml), "2025-06-01").unwrap()
    }

    #[test]
    fn test_most_specific_lookup() {
        let dir = TempDir::new().unwrap();
        let db = build_sample(dir.path());

        let m = db
            .lookup_ip(Ipv4Addr::from_str("8.8.8.8").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(m.org_name, "Google LLC");
        assert_eq!(m.net_type, "S");

        let m = db
            .lookup_ip(Ipv4Addr::from_str("8.1.2.3").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(m.org_name, "Level 3 Parent, LLC");
        assert_eq!(m.country, "US");

        assert!(db
            .lookup_ip(Ipv4Addr::from_str("7.0.0.1").unwrap())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_placeholder_org_yields_empty_name() {
        let dir = TempDir::new().unwrap();
        let db = build_sample(dir.path());

        // "Reserved Space" fails the filter; NetName is not substituted.
        let m = db
            .lookup_ip(Ipv4Addr::from_str("9.0.0.1").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(m.org_name, "");
        assert_eq!(m.net_name, "RESV-NET");
    }

    #[test]
    fn test_metadata_counts() {
        let dir = TempDir::new().unwrap();
        let db = build_sample(dir.path());
        let meta = db.metadata().unwrap().unwrap();
        assert_eq!(meta.net_count, 3);
        assert_eq!(meta.org_count, 3);
        assert_eq!(meta.source_date, "2025-06-01");
        assert_eq!(db.count().unwrap(), 3);
    }

    #[test]
    fn test_prefix_lookup_requires_cover() {
        let dir = TempDir::new().unwrap();
        let db = build_sample(dir.path());

        let prefix = crate::ipcodec::parse_prefix("8.8.8.0/25").unwrap();
        let m = db.lookup_prefix(&prefix).unwrap().unwrap();
        assert_eq!(m.org_name, "Google LLC");

        // Wider than any single net: the /8 covers it.
        let prefix = crate::ipcodec::parse_prefix("8.8.0.0/16").unwrap();
        let m = db.lookup_prefix(&prefix).unwrap().unwrap();
        assert_eq!(m.org_name, "Level 3 Parent, LLC");
    }
}
