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

//! Parser for the iptoasn.com TSV dump.
//!
//! Row format: `start_ip TAB end_ip TAB asn TAB country TAB registry
//! [TAB as_name]`. Each row's range expands to its minimal CIDR cover, one
//! canonical prefix per CIDR; bad rows are counted and skipped.

use std::io::BufRead;

use tracing::debug;

use super::CanonicalPrefix;
use crate::error::{Error, Result};
use crate::ipcodec::{self, Family};

/// Expands one TSV line into canonical prefixes. `Ok(None)` for blank and
/// comment lines.
pub fn parse_line(line: &str) -> Result<Option<Vec<CanonicalPrefix>>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 5 {
        return Err(Error::ParseError(format!(
            "expected 5 fields, got {}",
            fields.len()
        )));
    }

    let start = ipcodec::parse_ip(fields[0])?;
    let end = ipcodec::parse_ip(fields[1])?;
    if Family::of(&start) != Family::of(&end) {
        return Err(Error::MixedFamily);
    }

    let asn: u32 = fields[2]
        .trim()
        .parse()
        .map_err(|_| Error::ParseError(format!("invalid ASN: {}", fields[2])))?;

    let country = fields[3].trim();
    // Anything that is not a two-letter code becomes the unknown marker.
    let country = if country.len() == 2 { country } else { "ZZ" };

    let registry = fields[4].trim();
    let as_name = fields.get(5).map(|s| s.trim()).unwrap_or("");

    let cidrs = ipcodec::range_to_cidrs(&start, &end)?;
    Ok(Some(
        cidrs
            .into_iter()
            .map(|cidr| CanonicalPrefix {
                cidr: ipcodec::prefix_string(&cidr),
                asn,
                country: country.to_string(),
                registry: registry.to_string(),
                as_name: as_name.to_string(),
            })
            .collect(),
    ))
}

/// Parses an entire TSV dump, returning the prefixes and the number of
/// rejected lines.
pub fn parse_all<R: BufRead>(reader: R) -> Result<(Vec<CanonicalPrefix>, u64)> {
    let mut prefixes = Vec::new();
    let mut errors = 0u64;

    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        match parse_line(&line) {
            Ok(Some(rows)) => prefixes.extend(rows),
            Ok(None) => {}
            Err(e) => {
                errors += 1;
                debug!("line {}: {e}", line_num + 1);
            }
        }
    }

    Ok((prefixes, errors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_single_cidr_row() {
        let rows = parse_line("1.0.0.0\t1.0.0.255\t13335\tUS\tARIN\tCLOUDFLARENET")
            .unwrap()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cidr, "1.0.0.0/24");
        assert_eq!(rows[0].asn, 13335);
        assert_eq!(rows[0].country, "US");
        assert_eq!(rows[0].registry, "ARIN");
        assert_eq!(rows[0].as_name, "CLOUDFLARENET");
    }

    #[test]
    fn test_multi_cidr_expansion() {
        // One row, two aligned blocks: a /24 and a /23.
        let rows = parse_line("204.110.219.0\t204.110.221.255\t16509\tUS\tARIN\tAMAZON-02")
            .unwrap()
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cidr, "204.110.219.0/24");
        assert_eq!(rows[1].cidr, "204.110.220.0/23");
        for row in &rows {
            assert_eq!(row.asn, 16509);
            assert_eq!(row.country, "US");
            assert_eq!(row.registry, "ARIN");
            assert_eq!(row.as_name, "AMAZON-02");
        }
    }

    #[test]
    fn test_comments_and_blanks_skipped() {
        assert!(parse_line("# header").unwrap().is_none());
        assert!(parse_line("   ").unwrap().is_none());
    }

    #[test]
    fn test_mixed_family_rejected() {
        let err = parse_line("1.0.0.0\t2001:db8::1\t1\tUS\tARIN").unwrap_err();
        assert!(matches!(err, Error::MixedFamily));
    }

    #[test]
    fn test_missing_fields_rejected() {
        assert!(parse_line("1.0.0.0\t1.0.0.255\t13335").is_err());
    }

    #[test]
    fn test_unknown_country_normalized() {
        let rows = parse_line("1.0.0.0\t1.0.0.255\t13335\tNone\tARIN")
            .unwrap()
            .unwrap();
        assert_eq!(rows[0].country, "ZZ");
    }

    #[test]
    fn test_parse_all_counts_errors() {
        let input = "\
# comment
1.0.0.0\t1.0.0.255\t13335\tUS\tARIN\tCLOUDFLARENET
bogus line without tabs
1.0.4.0\t1.0.7.255\t38803\tAU\tAPNIC\tWPL-AS-AP
";
        let (prefixes, errors) = parse_all(Cursor::new(input)).unwrap();
        assert_eq!(prefixes.len(), 2);
        assert_eq!(errors, 1);
    }

    #[test]
    fn test_32bit_asn() {
        let rows = parse_line("10.0.0.0\t10.0.0.255\t4200000001\tZZ\tRIPE")
            .unwrap()
            .unwrap();
        assert_eq!(rows[0].asn, 4200000001);
    }
}
