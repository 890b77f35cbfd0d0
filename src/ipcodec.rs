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

//! IP address codec and CIDR algebra.
//!
//! Everything here is pure arithmetic: address/integer conversion, CIDR to
//! inclusive range and back, minimal covering CIDR sets, prefix
//! normalization and sibling merging. The index key layouts in
//! `store::keys` are built on these conversions.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use cidr::{IpCidr, IpInet};

use crate::error::{Error, Result};

/// Address family tag used by key layouts and per-family scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub fn of(addr: &IpAddr) -> Family {
        match addr {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }

    /// Key byte width of an address in this family.
    pub fn addr_len(self) -> usize {
        match self {
            Family::V4 => 4,
            Family::V6 => 16,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Family::V4 => 32,
            Family::V6 => 128,
        }
    }
}

pub fn ipv4_to_u32(addr: Ipv4Addr) -> u32 {
    u32::from_be_bytes(addr.octets())
}

pub fn u32_to_ipv4(n: u32) -> Ipv4Addr {
    Ipv4Addr::from(n.to_be_bytes())
}

pub fn ipv6_to_u128(addr: Ipv6Addr) -> u128 {
    u128::from_be_bytes(addr.octets())
}

pub fn u128_to_ipv6(n: u128) -> Ipv6Addr {
    Ipv6Addr::from(n.to_be_bytes())
}

/// Widens any address to a u128 for family-agnostic comparisons.
pub fn to_integer(addr: &IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => ipv4_to_u32(*v4) as u128,
        IpAddr::V6(v6) => ipv6_to_u128(*v6),
    }
}

pub fn from_integer(n: u128, family: Family) -> Result<IpAddr> {
    match family {
        Family::V4 => {
            if n > u32::MAX as u128 {
                return Err(Error::InvalidAddress(format!("{n} out of IPv4 range")));
            }
            Ok(IpAddr::V4(u32_to_ipv4(n as u32)))
        }
        Family::V6 => Ok(IpAddr::V6(u128_to_ipv6(n))),
    }
}

/// Big-endian key bytes for an address (4 for IPv4, 16 for IPv6).
pub fn addr_bytes(addr: &IpAddr) -> Vec<u8> {
    match addr {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

pub fn bytes_to_addr(bytes: &[u8]) -> Result<IpAddr> {
    match bytes.len() {
        4 => {
            let mut b = [0u8; 4];
            b.copy_from_slice(bytes);
            Ok(IpAddr::V4(Ipv4Addr::from(b)))
        }
        16 => {
            let mut b = [0u8; 16];
            b.copy_from_slice(bytes);
            Ok(IpAddr::V6(Ipv6Addr::from(b)))
        }
        n => Err(Error::InvalidAddress(format!("{n}-byte address"))),
    }
}

pub fn parse_ip(s: &str) -> Result<IpAddr> {
    IpAddr::from_str(s.trim()).map_err(|_| Error::InvalidAddress(s.to_string()))
}

/// Parses a CIDR string into its canonical (host bits masked) prefix.
pub fn parse_prefix(s: &str) -> Result<IpCidr> {
    let inet = IpInet::from_str(s.trim()).map_err(|_| Error::InvalidCidr(s.to_string()))?;
    Ok(inet.network())
}

/// Canonical `network/length` string for a prefix. Explicit, because the
/// cidr crate's Display drops the length on host prefixes.
pub fn prefix_string(prefix: &IpCidr) -> String {
    format!("{}/{}", prefix.first_address(), prefix.network_length())
}

/// Canonical `network/length` form of a CIDR string.
pub fn normalize_prefix(s: &str) -> Result<String> {
    Ok(prefix_string(&parse_prefix(s)?))
}

/// First address of a prefix, used as the representative for point lookups.
pub fn representative_ip(s: &str) -> Result<IpAddr> {
    Ok(parse_prefix(s)?.first_address())
}

/// Inclusive (start, end) addresses of a CIDR.
///
/// The end address is derived from the prefix's own last-address
/// computation, which works byte-wise and therefore survives IPv6 host-bit
/// counts above 63 without wrap-around.
pub fn cidr_to_range(s: &str) -> Result<(IpAddr, IpAddr)> {
    let prefix = parse_prefix(s)?;
    Ok((prefix.first_address(), prefix.last_address()))
}

pub fn prefix_to_range(prefix: &IpCidr) -> (IpAddr, IpAddr) {
    (prefix.first_address(), prefix.last_address())
}

/// True iff `[outer_start, outer_end]` fully contains `[inner_start, inner_end]`.
pub fn contains_range(outer: (&IpAddr, &IpAddr), inner: (&IpAddr, &IpAddr)) -> bool {
    Family::of(outer.0) == Family::of(inner.0)
        && to_integer(outer.0) <= to_integer(inner.0)
        && to_integer(outer.1) >= to_integer(inner.1)
}

pub fn prefix_contains_addr(prefix: &IpCidr, addr: &IpAddr) -> bool {
    prefix.contains(addr)
}

/// Minimal list of aligned CIDRs exactly covering `[start, end]` inclusive.
///
/// Greedy: at each step emit the largest block that is aligned at the
/// current start and does not extend past the end.
pub fn range_to_cidrs(start: &IpAddr, end: &IpAddr) -> Result<Vec<IpCidr>> {
    if Family::of(start) != Family::of(end) {
        return Err(Error::MixedFamily);
    }
    let (s, e) = (to_integer(start), to_integer(end));
    if s > e {
        return Err(Error::InvalidRange(format!("{start} > {end}")));
    }

    let family = Family::of(start);
    let bits = family.bits() as u32;

    // The full address space cannot be walked with block arithmetic without
    // overflowing, so emit the zero-length prefix directly.
    let space_max = if bits == 32 {
        u32::MAX as u128
    } else {
        u128::MAX
    };
    if s == 0 && e == space_max {
        let zero = from_integer(0, family)?;
        return Ok(vec![
            IpCidr::new(zero, 0).map_err(|e| Error::InvalidCidr(e.to_string()))?
        ]);
    }

    let mut out = Vec::new();
    let mut cur = s;
    loop {
        // Largest power-of-two block aligned at cur. The full-space case
        // returned above, so a k of bits is never needed and the shift
        // stays in range.
        let align = if cur == 0 {
            bits
        } else {
            (cur.trailing_zeros()).min(bits)
        };
        let mut k = align.min(127);
        loop {
            match cur.checked_add((1u128 << k) - 1) {
                Some(block_end) if block_end <= e => break,
                _ if k == 0 => break,
                _ => k -= 1,
            }
        }

        let addr = from_integer(cur, family)?;
        let len = (bits - k) as u8;
        out.push(IpCidr::new(addr, len).map_err(|e| Error::InvalidCidr(e.to_string()))?);

        match cur.checked_add(1u128 << k) {
            Some(next) if next <= e => cur = next,
            _ => break,
        }
    }

    Ok(out)
}

/// Splits a prefix into its two halves. Returns `None` for host prefixes.
pub fn split_prefix(prefix: &IpCidr) -> Option<(IpCidr, IpCidr)> {
    let family = Family::of(&prefix.first_address());
    let len = prefix.network_length();
    if len >= family.bits() {
        return None;
    }
    let new_len = len + 1;
    let start = to_integer(&prefix.first_address());
    let half_size = 1u128 << (family.bits() as u32 - new_len as u32);
    let lo = IpCidr::new(prefix.first_address(), new_len).ok()?;
    let hi_addr = from_integer(start + half_size, family).ok()?;
    let hi = IpCidr::new(hi_addr, new_len).ok()?;
    Some((lo, hi))
}

/// Merges two equal-length sibling prefixes into their parent.
///
/// Returns `None` when the inputs are not the two halves of a single
/// parent prefix (different lengths, different families, not adjacent, or
/// the pair is not aligned on the parent boundary).
pub fn merge_adjacent(a: &IpCidr, b: &IpCidr) -> Option<IpCidr> {
    let fam_a = Family::of(&a.first_address());
    if fam_a != Family::of(&b.first_address()) {
        return None;
    }
    let len = a.network_length();
    if len != b.network_length() || len == 0 {
        return None;
    }

    let (first, second) = if a.first_address() <= b.first_address() {
        (a, b)
    } else {
        (b, a)
    };

    let size = 1u128 << (fam_a.bits() as u32 - len as u32);
    let first_start = to_integer(&first.first_address());
    let second_start = to_integer(&second.first_address());

    // Adjacent, and the pair starts on a parent-sized boundary.
    if second_start != first_start.checked_add(size)? {
        return None;
    }
    if first_start % (size.checked_mul(2)?) != 0 {
        return None;
    }

    IpCidr::new(first.first_address(), len - 1).ok()
}

pub fn is_ipv6_prefix(s: &str) -> bool {
    s.contains(':')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cidrs(start: &str, end: &str) -> Vec<String> {
        range_to_cidrs(&parse_ip(start).unwrap(), &parse_ip(end).unwrap())
            .unwrap()
            .iter()
            .map(prefix_string)
            .collect()
    }

    #[test]
    fn test_integer_round_trip() {
        for s in ["0.0.0.0", "10.1.2.3", "255.255.255.255", "2001:db8::1", "::"] {
            let addr = parse_ip(s).unwrap();
            let back = from_integer(to_integer(&addr), Family::of(&addr)).unwrap();
            assert_eq!(addr, back);
        }
    }

    #[test]
    fn test_cidr_to_range_basic() {
        let (start, end) = cidr_to_range("10.0.0.0/8").unwrap();
        assert_eq!(start, parse_ip("10.0.0.0").unwrap());
        assert_eq!(end, parse_ip("10.255.255.255").unwrap());

        let (start, end) = cidr_to_range("192.0.2.1/32").unwrap();
        assert_eq!(start, end);
    }

    #[test]
    fn test_cidr_to_range_v6_wide_host_bits() {
        // 96 host bits: must not wrap.
        let (start, end) = cidr_to_range("2001:db8::/32").unwrap();
        assert_eq!(start, parse_ip("2001:db8::").unwrap());
        assert_eq!(
            end,
            parse_ip("2001:db8:ffff:ffff:ffff:ffff:ffff:ffff").unwrap()
        );
    }

    #[test]
    fn test_cidr_to_range_invalid() {
        assert!(matches!(
            cidr_to_range("not-a-cidr"),
            Err(Error::InvalidCidr(_))
        ));
    }

    #[test]
    fn test_range_to_cidrs_exact_prefix() {
        assert_eq!(cidrs("10.0.0.0", "10.0.0.255"), vec!["10.0.0.0/24"]);
        assert_eq!(cidrs("10.0.0.0", "10.255.255.255"), vec!["10.0.0.0/8"]);
    }

    #[test]
    fn test_range_to_cidrs_single_address() {
        assert_eq!(cidrs("192.0.2.7", "192.0.2.7"), vec!["192.0.2.7/32"]);
    }

    #[test]
    fn test_range_to_cidrs_multi_block() {
        // The iptoasn scenario: a /24 followed by a /23.
        assert_eq!(
            cidrs("204.110.219.0", "204.110.221.255"),
            vec!["204.110.219.0/24", "204.110.220.0/23"]
        );
    }

    #[test]
    fn test_range_to_cidrs_unaligned() {
        assert_eq!(
            cidrs("10.0.0.1", "10.0.0.4"),
            vec!["10.0.0.1/32", "10.0.0.2/31", "10.0.0.4/32"]
        );
    }

    #[test]
    fn test_range_to_cidrs_full_space() {
        assert_eq!(cidrs("0.0.0.0", "255.255.255.255"), vec!["0.0.0.0/0"]);
    }

    #[test]
    fn test_range_to_cidrs_covers_exactly() {
        // Union of output equals the input range, blocks are disjoint.
        let start = parse_ip("10.0.0.3").unwrap();
        let end = parse_ip("10.0.2.200").unwrap();
        let blocks = range_to_cidrs(&start, &end).unwrap();

        let mut cursor = to_integer(&start);
        for block in &blocks {
            assert_eq!(to_integer(&block.first_address()), cursor);
            cursor = to_integer(&block.last_address()) + 1;
        }
        assert_eq!(cursor, to_integer(&end) + 1);
    }

    #[test]
    fn test_range_to_cidrs_mixed_family() {
        let v4 = parse_ip("10.0.0.0").unwrap();
        let v6 = parse_ip("2001:db8::").unwrap();
        assert!(matches!(
            range_to_cidrs(&v4, &v6),
            Err(Error::MixedFamily)
        ));
    }

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("10.0.0.55/24").unwrap(), "10.0.0.0/24");
        // Idempotent.
        let once = normalize_prefix("192.168.17.3/20").unwrap();
        assert_eq!(normalize_prefix(&once).unwrap(), once);
    }

    #[test]
    fn test_merge_adjacent_siblings() {
        let a = parse_prefix("10.0.0.0/24").unwrap();
        let b = parse_prefix("10.0.1.0/24").unwrap();
        assert_eq!(
            prefix_string(&merge_adjacent(&a, &b).unwrap()),
            "10.0.0.0/23"
        );
        // Order does not matter.
        assert_eq!(
            prefix_string(&merge_adjacent(&b, &a).unwrap()),
            "10.0.0.0/23"
        );
    }

    #[test]
    fn test_merge_adjacent_non_siblings() {
        // Adjacent but straddling the parent boundary.
        let a = parse_prefix("10.0.1.0/24").unwrap();
        let b = parse_prefix("10.0.2.0/24").unwrap();
        assert!(merge_adjacent(&a, &b).is_none());

        // Different lengths.
        let a = parse_prefix("10.0.0.0/24").unwrap();
        let b = parse_prefix("10.0.1.0/25").unwrap();
        assert!(merge_adjacent(&a, &b).is_none());

        // Not adjacent at all.
        let a = parse_prefix("10.0.0.0/24").unwrap();
        let b = parse_prefix("10.0.4.0/24").unwrap();
        assert!(merge_adjacent(&a, &b).is_none());
    }

    #[test]
    fn test_split_then_merge_round_trip() {
        let parent = parse_prefix("172.16.0.0/12").unwrap();
        let (lo, hi) = split_prefix(&parent).unwrap();
        assert_eq!(merge_adjacent(&lo, &hi).unwrap(), parent);
    }

    #[test]
    fn test_round_trip_cidr_range_cidr() {
        for s in ["10.0.0.0/8", "192.0.2.0/24", "2001:db8::/48", "1.2.3.4/32"] {
            let (start, end) = cidr_to_range(s).unwrap();
            let blocks = range_to_cidrs(&start, &end).unwrap();
            assert_eq!(blocks.len(), 1);
            assert_eq!(prefix_string(&blocks[0]), s);
        }
    }
}
