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

//! MaxMind database readers: the external ASN and geography sources, plus
//! the Mode-B geo splitter.

use std::net::IpAddr;
use std::path::Path;

use maxminddb::geoip2;
use tracing::debug;

use crate::error::{Error, Result};
use crate::ipcodec::{self, Family};

/// Geography for one address. Mode-B equality compares the place fields
/// only; coordinates always differ slightly and are ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoInfo {
    pub country: String,
    pub region: String,
    pub city: String,
    pub lat: f64,
    pub lon: f64,
}

impl GeoInfo {
    pub fn same_place(&self, other: &GeoInfo) -> bool {
        self.country == other.country && self.region == other.region && self.city == other.city
    }
}

/// A prefix with uniform geography, produced by the Mode-B splitter.
#[derive(Debug, Clone)]
pub struct GeoBlock {
    pub prefix: cidr::IpCidr,
    pub geo: Option<GeoInfo>,
}

impl GeoBlock {
    fn same_geo(&self, other: &GeoBlock) -> bool {
        match (&self.geo, &other.geo) {
            (Some(a), Some(b)) => a.same_place(b),
            (None, None) => true,
            _ => false,
        }
    }
}

pub struct MaxMindReaders {
    asn: maxminddb::Reader<Vec<u8>>,
    city: maxminddb::Reader<Vec<u8>>,
}

impl MaxMindReaders {
    pub fn open(asn_path: &Path, city_path: &Path) -> Result<MaxMindReaders> {
        let asn = maxminddb::Reader::open_readfile(asn_path)
            .map_err(|e| Error::ParseError(format!("ASN mmdb: {e}")))?;
        let city = maxminddb::Reader::open_readfile(city_path)
            .map_err(|e| Error::ParseError(format!("City mmdb: {e}")))?;
        Ok(MaxMindReaders { asn, city })
    }

    /// ASN number and organization name for an address.
    pub fn asn_info(&self, ip: &IpAddr) -> Result<(u32, String)> {
        let lookup = self
            .asn
            .lookup(*ip)
            .map_err(|e| Error::ParseError(format!("ASN lookup: {e}")))?;
        if !lookup.has_data() {
            return Err(Error::NotFound);
        }
        let record: geoip2::Asn = match lookup.decode() {
            Ok(Some(record)) => record,
            Ok(None) => return Err(Error::NotFound),
            Err(e) => return Err(Error::ParseError(format!("ASN decode: {e}"))),
        };
        Ok((
            record.autonomous_system_number.unwrap_or(0),
            record
                .autonomous_system_organization
                .map(|s| s.to_string())
                .unwrap_or_default(),
        ))
    }

    /// Geography for an address; `None` when the city database has no
    /// entry.
    pub fn geo(&self, ip: &IpAddr) -> Result<Option<GeoInfo>> {
        let lookup = self
            .city
            .lookup(*ip)
            .map_err(|e| Error::ParseError(format!("geo lookup: {e}")))?;
        if !lookup.has_data() {
            return Ok(None);
        }
        let record: geoip2::City = match lookup.decode() {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(None),
            Err(e) => return Err(Error::ParseError(format!("geo decode: {e}"))),
        };

        let mut info = GeoInfo {
            country: record
                .country
                .iso_code
                .map(|s| s.to_string())
                .unwrap_or_default(),
            lat: record.location.latitude.unwrap_or(0.0),
            lon: record.location.longitude.unwrap_or(0.0),
            ..GeoInfo::default()
        };
        if let Some(subdivision) = record.subdivisions.first() {
            info.region = subdivision
                .names
                .english
                .map(|s| s.to_string())
                .unwrap_or_default();
        }
        info.city = record
            .city
            .names
            .english
            .map(|s| s.to_string())
            .unwrap_or_default();

        Ok(Some(info))
    }

    /// Mode B: splits a prefix into the largest sub-blocks whose first and
    /// last addresses agree on geography, never finer than `min_len`.
    pub fn split_prefix_by_geo(
        &self,
        prefix: &cidr::IpCidr,
        min_len: u8,
    ) -> Result<Vec<GeoBlock>> {
        let mut blocks = Vec::new();
        self.split_recursive(prefix, min_len, &mut blocks)?;
        let merged = merge_adjacent_blocks(blocks);
        debug!(
            "split {} into {} geo blocks",
            prefix,
            merged.len()
        );
        Ok(merged)
    }

    fn split_recursive(
        &self,
        prefix: &cidr::IpCidr,
        min_len: u8,
        out: &mut Vec<GeoBlock>,
    ) -> Result<()> {
        let (first, last) = ipcodec::prefix_to_range(prefix);

        if prefix.network_length() >= min_len {
            out.push(GeoBlock {
                prefix: *prefix,
                geo: self.geo(&first)?,
            });
            return Ok(());
        }

        let first_geo = self.geo(&first)?;
        let last_geo = self.geo(&last)?;
        let uniform = match (&first_geo, &last_geo) {
            (Some(a), Some(b)) => a.same_place(b),
            (None, None) => true,
            _ => false,
        };

        if uniform {
            out.push(GeoBlock {
                prefix: *prefix,
                geo: first_geo,
            });
            return Ok(());
        }

        let Some((lo, hi)) = ipcodec::split_prefix(prefix) else {
            out.push(GeoBlock {
                prefix: *prefix,
                geo: first_geo,
            });
            return Ok(());
        };
        self.split_recursive(&lo, min_len, out)?;
        self.split_recursive(&hi, min_len, out)
    }
}

/// Merges contiguous sibling blocks with identical geography until no two
/// adjacent output blocks share a place tuple and every block is one valid
/// prefix.
pub fn merge_adjacent_blocks(mut blocks: Vec<GeoBlock>) -> Vec<GeoBlock> {
    if blocks.len() <= 1 {
        return blocks;
    }

    loop {
        let mut merged: Vec<GeoBlock> = Vec::with_capacity(blocks.len());
        let mut changed = false;
        let mut i = 0;

        while i < blocks.len() {
            if i + 1 < blocks.len() && blocks[i].same_geo(&blocks[i + 1]) {
                if let Some(parent) =
                    ipcodec::merge_adjacent(&blocks[i].prefix, &blocks[i + 1].prefix)
                {
                    merged.push(GeoBlock {
                        prefix: parent,
                        geo: blocks[i].geo.clone(),
                    });
                    i += 2;
                    changed = true;
                    continue;
                }
            }
            merged.push(blocks[i].clone());
            i += 1;
        }

        blocks = merged;
        if !changed {
            return blocks;
        }
    }
}

impl Family {
    /// The Mode-B floor for this family.
    pub fn min_prefix(self, v4: u8, v6: u8) -> u8 {
        match self {
            Family::V4 => v4,
            Family::V6 => v6,
        }
    }
}
