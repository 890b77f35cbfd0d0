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

//! Typed key construction for every namespace in the indexes.
//!
//! Keys sort lexicographically in LMDB, so range keys embed big-endian
//! address bytes: numeric start-IP order equals key order. IPv4 range keys
//! carry the end address as well because a parent and its first child share
//! a start IP and the key must stay unique.

use std::net::IpAddr;

use crate::error::{Error, Result};
use crate::ipcodec::{self, Family};

/// IPv4 range namespace (`R4:` + 4-byte start + 4-byte end).
pub const NS_RANGE_V4: &[u8] = b"R4:";
/// IPv6 range namespace (`R6:` + 16-byte start).
pub const NS_RANGE_V6: &[u8] = b"R6:";
/// Organization records (`ORG:` + handle).
pub const NS_ORG: &[u8] = b"ORG:";
/// Build metadata (`META:` + name).
pub const NS_META: &[u8] = b"META:";
/// External-lookup caches (`CACHE:` + category + `:` + key).
pub const NS_CACHE: &[u8] = b"CACHE:";

/// Global ordered IPv4 prefix list in the iptoasn store (`P4:` + 4-byte start).
pub const NS_GLOBAL_V4: &[u8] = b"P4:";
/// Per-ASN raw prefix lists (`A:<asn>:v4:<index>`).
pub const NS_ASN_RAW: &[u8] = b"A:";
/// Per-ASN collapsed prefix lists (`Ac:<asn>:v4:<index>`).
pub const NS_ASN_COLLAPSED: &[u8] = b"Ac:";
/// Per-ASN summaries (`AIDX:<asn>`).
pub const NS_ASN_INDEX: &[u8] = b"AIDX:";

pub fn range_ns(family: Family) -> &'static [u8] {
    match family {
        Family::V4 => NS_RANGE_V4,
        Family::V6 => NS_RANGE_V6,
    }
}

/// A decoded range key: namespace plus start (and, for IPv4, end).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeKey {
    pub family: Family,
    pub start: IpAddr,
    /// Present only in IPv4 keys; IPv6 keys carry the end in the value.
    pub end: Option<IpAddr>,
}

impl RangeKey {
    pub fn encode(&self) -> Vec<u8> {
        let ns = range_ns(self.family);
        let mut key = Vec::with_capacity(ns.len() + 8);
        key.extend_from_slice(ns);
        key.extend_from_slice(&ipcodec::addr_bytes(&self.start));
        if self.family == Family::V4 {
            if let Some(end) = &self.end {
                key.extend_from_slice(&ipcodec::addr_bytes(end));
            } else {
                // Zero end sorts before every real end byte, which is what
                // seek keys want.
                key.extend_from_slice(&[0u8; 4]);
            }
        }
        key
    }

    pub fn decode(key: &[u8]) -> Result<RangeKey> {
        if key.starts_with(NS_RANGE_V4) {
            let body = &key[NS_RANGE_V4.len()..];
            if body.len() != 8 {
                return Err(Error::ParseError(format!(
                    "IPv4 range key has {} body bytes",
                    body.len()
                )));
            }
            Ok(RangeKey {
                family: Family::V4,
                start: ipcodec::bytes_to_addr(&body[..4])?,
                end: Some(ipcodec::bytes_to_addr(&body[4..])?),
            })
        } else if key.starts_with(NS_RANGE_V6) {
            let body = &key[NS_RANGE_V6.len()..];
            if body.len() != 16 {
                return Err(Error::ParseError(format!(
                    "IPv6 range key has {} body bytes",
                    body.len()
                )));
            }
            Ok(RangeKey {
                family: Family::V6,
                start: ipcodec::bytes_to_addr(body)?,
                end: None,
            })
        } else {
            Err(Error::ParseError("unknown range key namespace".into()))
        }
    }

    /// Seek key for a query start: zero end bytes land the cursor on the
    /// first entry with this start IP.
    pub fn seek(start: &IpAddr) -> Vec<u8> {
        RangeKey {
            family: Family::of(start),
            start: *start,
            end: None,
        }
        .encode()
    }

    pub fn exact(start: &IpAddr, end: &IpAddr) -> Vec<u8> {
        let family = Family::of(start);
        RangeKey {
            family,
            start: *start,
            end: match family {
                Family::V4 => Some(*end),
                Family::V6 => None,
            },
        }
        .encode()
    }
}

pub fn org_key(handle: &str) -> Vec<u8> {
    let mut key = NS_ORG.to_vec();
    key.extend_from_slice(handle.as_bytes());
    key
}

pub fn meta_key(name: &str) -> Vec<u8> {
    let mut key = NS_META.to_vec();
    key.extend_from_slice(name.as_bytes());
    key
}

pub fn cache_key(category: &str, key: &str) -> Vec<u8> {
    let mut out = NS_CACHE.to_vec();
    out.extend_from_slice(category.as_bytes());
    out.push(b':');
    out.extend_from_slice(key.as_bytes());
    out
}

pub fn global_v4_key(start: u32) -> Vec<u8> {
    let mut key = NS_GLOBAL_V4.to_vec();
    key.extend_from_slice(&start.to_be_bytes());
    key
}

pub fn asn_raw_key(asn: u32, index: usize) -> Vec<u8> {
    format!("A:{asn}:v4:{index}").into_bytes()
}

pub fn asn_collapsed_key(asn: u32, index: usize) -> Vec<u8> {
    format!("Ac:{asn}:v4:{index}").into_bytes()
}

pub fn asn_raw_prefix(asn: u32) -> Vec<u8> {
    format!("A:{asn}:v4:").into_bytes()
}

pub fn asn_collapsed_prefix(asn: u32) -> Vec<u8> {
    format!("Ac:{asn}:v4:").into_bytes()
}

pub fn asn_index_key(asn: u32) -> Vec<u8> {
    format!("AIDX:{asn}").into_bytes()
}

/// Parses the ASN back out of an `AIDX:` key.
pub fn asn_from_index_key(key: &[u8]) -> Option<u32> {
    let rest = key.strip_prefix(NS_ASN_INDEX)?;
    std::str::from_utf8(rest).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipcodec::parse_ip;

    #[test]
    fn test_v4_key_round_trip() {
        let start = parse_ip("10.0.0.0").unwrap();
        let end = parse_ip("10.0.255.255").unwrap();
        let key = RangeKey::exact(&start, &end);
        let decoded = RangeKey::decode(&key).unwrap();
        assert_eq!(decoded.start, start);
        assert_eq!(decoded.end, Some(end));
        assert_eq!(decoded.family, Family::V4);
    }

    #[test]
    fn test_v6_key_round_trip() {
        let start = parse_ip("2001:db8::").unwrap();
        let key = RangeKey::seek(&start);
        let decoded = RangeKey::decode(&key).unwrap();
        assert_eq!(decoded.start, start);
        assert_eq!(decoded.end, None);
    }

    #[test]
    fn test_key_order_matches_ip_order() {
        let a = RangeKey::seek(&parse_ip("9.255.255.255").unwrap());
        let b = RangeKey::seek(&parse_ip("10.0.0.0").unwrap());
        let c = RangeKey::seek(&parse_ip("10.0.0.1").unwrap());
        assert!(a < b && b < c);
    }

    #[test]
    fn test_same_start_differs_by_end() {
        let start = parse_ip("147.147.0.0").unwrap();
        let child = RangeKey::exact(&start, &parse_ip("147.147.255.255").unwrap());
        let parent = RangeKey::exact(&start, &parse_ip("147.152.255.255").unwrap());
        assert_ne!(child, parent);
        // Seek key with zero end sorts before both.
        assert!(RangeKey::seek(&start) < child);
        assert!(child < parent);
    }

    #[test]
    fn test_asn_index_key_round_trip() {
        let key = asn_index_key(4200000001);
        assert_eq!(asn_from_index_key(&key), Some(4200000001));
        assert_eq!(asn_from_index_key(b"A:123:v4:0"), None);
    }
}
