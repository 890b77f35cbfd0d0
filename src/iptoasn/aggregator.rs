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

//! Per-ASN prefix aggregation: exact-duplicate removal and collapsing of
//! touching or overlapping prefixes into wider blocks.

use std::collections::{HashMap, HashSet};

use super::CanonicalPrefix;
use crate::ipcodec::{self, Family};

/// Removes exact duplicates (same CIDR string and same ASN), keeping the
/// first occurrence. The key carries the full 32-bit ASN; two ASNs sharing
/// a prefix string stay distinct.
pub fn deduplicate(prefixes: Vec<CanonicalPrefix>) -> Vec<CanonicalPrefix> {
    let mut seen: HashSet<(String, u32)> = HashSet::new();
    prefixes
        .into_iter()
        .filter(|p| seen.insert((p.cidr.clone(), p.asn)))
        .collect()
}

/// Collapses one ASN's prefixes: sort by start, merge ranges that overlap
/// or touch (`next.start <= end + 1`), then re-cover each merged range with
/// its minimal CIDR list. Metadata comes from the first contributor.
pub fn collapse(prefixes: &[CanonicalPrefix]) -> Vec<CanonicalPrefix> {
    // Parse to integer ranges, dropping anything unparseable.
    let mut parsed: Vec<(u128, u128, &CanonicalPrefix)> = prefixes
        .iter()
        .filter_map(|p| {
            let (start, end) = ipcodec::cidr_to_range(&p.cidr).ok()?;
            if Family::of(&start) != Family::V4 {
                return None; // only IPv4 is collapsed
            }
            Some((ipcodec::to_integer(&start), ipcodec::to_integer(&end), p))
        })
        .collect();

    if parsed.is_empty() {
        return Vec::new();
    }

    parsed.sort_by_key(|(start, _, _)| *start);

    let mut out = Vec::new();
    let (mut cur_start, mut cur_end, mut template) = parsed[0];

    for &(start, end, prefix) in &parsed[1..] {
        if start <= cur_end + 1 {
            // Overlapping or adjacent: widen the current range.
            cur_end = cur_end.max(end);
        } else {
            emit_range(&mut out, cur_start, cur_end, template);
            (cur_start, cur_end, template) = (start, end, prefix);
        }
    }
    emit_range(&mut out, cur_start, cur_end, template);

    out
}

fn emit_range(out: &mut Vec<CanonicalPrefix>, start: u128, end: u128, template: &CanonicalPrefix) {
    let start_addr = match ipcodec::from_integer(start, Family::V4) {
        Ok(a) => a,
        Err(_) => return,
    };
    let end_addr = match ipcodec::from_integer(end, Family::V4) {
        Ok(a) => a,
        Err(_) => return,
    };
    if let Ok(cidrs) = ipcodec::range_to_cidrs(&start_addr, &end_addr) {
        out.extend(cidrs.into_iter().map(|cidr| CanonicalPrefix {
            cidr: ipcodec::prefix_string(&cidr),
            asn: template.asn,
            country: template.country.clone(),
            registry: template.registry.clone(),
            as_name: template.as_name.clone(),
        }));
    }
}

/// Groups prefixes by ASN and collapses each group.
pub fn collapse_by_asn(prefixes: &[CanonicalPrefix]) -> HashMap<u32, Vec<CanonicalPrefix>> {
    let mut by_asn: HashMap<u32, Vec<CanonicalPrefix>> = HashMap::new();
    for p in prefixes {
        by_asn.entry(p.asn).or_default().push(p.clone());
    }

    by_asn
        .into_iter()
        .map(|(asn, group)| (asn, collapse(&group)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn test_collapse_four_siblings_into_supernet() {
        let input = vec![
            prefix("1.0.0.0/24", 13335),
            prefix("1.0.1.0/24", 13335),
            prefix("1.0.2.0/24", 13335),
            prefix("1.0.3.0/24", 13335),
        ];
        let collapsed = collapse(&input);
        assert_eq!(collapsed.len(), 1);
        assert_eq!(collapsed[0].cidr, "1.0.0.0/22");
        assert_eq!(collapsed[0].asn, 13335);
    }

    #[test]
    fn test_collapse_keeps_gaps_apart() {
        let input = vec![prefix("1.0.0.0/24", 1), prefix("1.0.4.0/24", 1)];
        let collapsed = collapse(&input);
        let cidrs: Vec<_> = collapsed.iter().map(|p| p.cidr.as_str()).collect();
        assert_eq!(cidrs, vec!["1.0.0.0/24", "1.0.4.0/24"]);
    }

    #[test]
    fn test_collapse_overlapping_ranges() {
        let input = vec![prefix("1.0.0.0/23", 1), prefix("1.0.1.0/24", 1)];
        let collapsed = collapse(&input);
        assert_eq!(collapsed.len(), 1);
        assert_eq!(collapsed[0].cidr, "1.0.0.0/23");
    }

    #[test]
    fn test_collapse_unaligned_merge_needs_two_cidrs() {
        // /24 + /24 adjacent across a parent boundary cannot be one block.
        let input = vec![prefix("1.0.1.0/24", 1), prefix("1.0.2.0/24", 1)];
        let collapsed = collapse(&input);
        let cidrs: Vec<_> = collapsed.iter().map(|p| p.cidr.as_str()).collect();
        assert_eq!(cidrs, vec!["1.0.1.0/24", "1.0.2.0/24"]);
    }

    #[test]
    fn test_collapse_preserves_ip_set() {
        let input = vec![
            prefix("10.0.0.0/25", 1),
            prefix("10.0.0.128/25", 1),
            prefix("10.0.1.0/24", 1),
            prefix("10.0.3.0/24", 1),
        ];
        let collapsed = collapse(&input);

        let mut before: Vec<(u128, u128)> = input
            .iter()
            .map(|p| {
                let (s, e) = ipcodec::cidr_to_range(&p.cidr).unwrap();
                (ipcodec::to_integer(&s), ipcodec::to_integer(&e))
            })
            .collect();
        before.sort_unstable();

        // Flatten both sides to address counts and boundaries.
        let count_before: u128 = before.iter().map(|(s, e)| e - s + 1).sum();
        let count_after: u128 = collapsed
            .iter()
            .map(|p| {
                let (s, e) = ipcodec::cidr_to_range(&p.cidr).unwrap();
                ipcodec::to_integer(&e) - ipcodec::to_integer(&s) + 1
            })
            .sum();
        assert_eq!(count_before, count_after);
    }

    #[test]
    fn test_deduplicate_keys_on_full_asn() {
        // Two 32-bit ASNs that a byte-truncating key would conflate.
        let input = vec![
            prefix("10.0.0.0/24", 4200000001),
            prefix("10.0.0.0/24", 4200065537),
            prefix("10.0.0.0/24", 4200000001),
        ];
        let deduped = deduplicate(input);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn test_collapse_by_asn_groups() {
        let input = vec![
            prefix("1.0.0.0/24", 1),
            prefix("1.0.1.0/24", 1),
            prefix("2.0.0.0/24", 2),
        ];
        let map = collapse_by_asn(&input);
        assert_eq!(map[&1].len(), 1);
        assert_eq!(map[&1][0].cidr, "1.0.0.0/23");
        assert_eq!(map[&2].len(), 1);
    }
}
