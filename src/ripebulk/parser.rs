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

//! RPSL parser for the RIPE split dumps.
//!
//! RPSL is line-oriented `attribute: value` text. Continuation lines start
//! with a space or tab and append to the previous attribute; a blank line
//! terminates the object; `#` and `%` lines are comments. Objects with an
//! unparseable primary range are skipped, not fatal.

use std::collections::HashMap;
use std::io::BufRead;
use std::net::Ipv4Addr;
use std::str::FromStr;

use tracing::debug;

use super::{Inetnum, Organisation};
use crate::error::{Error, Result};
use crate::ipcodec::ipv4_to_u32;

fn parse_attribute(line: &str) -> Option<(&str, &str)> {
    let idx = line.find(':')?;
    Some((line[..idx].trim(), line[idx + 1..].trim()))
}

/// Parses `a.b.c.d - e.f.g.h` into inclusive (start, end) integers.
fn parse_inetnum_range(s: &str) -> Result<(u32, u32)> {
    let (start_str, end_str) = s
        .split_once('-')
        .ok_or_else(|| Error::InvalidRange(s.to_string()))?;

    let start = Ipv4Addr::from_str(start_str.trim())
        .map_err(|_| Error::InvalidAddress(start_str.trim().to_string()))?;
    let end = Ipv4Addr::from_str(end_str.trim())
        .map_err(|_| Error::InvalidAddress(end_str.trim().to_string()))?;

    let (start, end) = (ipv4_to_u32(start), ipv4_to_u32(end));
    if start > end {
        return Err(Error::InvalidRange(s.to_string()));
    }
    Ok((start, end))
}

fn apply_inetnum_attr(inet: &mut Inetnum, key: &str, value: &str) {
    match key {
        "org" => {
            if inet.org_id.is_empty() {
                inet.org_id = value.to_string();
            }
        }
        "status" => {
            if inet.status.is_empty() {
                inet.status = value.to_string();
            }
        }
        "country" => {
            if inet.country.is_empty() {
                inet.country = value.to_string();
            }
        }
        "netname" => {
            if inet.netname.is_empty() {
                inet.netname = value.to_string();
            } else {
                inet.netname.push(' ');
                inet.netname.push_str(value);
            }
        }
        "descr" => {
            if inet.descr.is_empty() && !value.is_empty() {
                inet.descr = value.to_string();
            }
        }
        "remarks" => {
            if !value.is_empty() {
                inet.remarks.push(value.to_string());
            }
        }
        _ => {}
    }
}

fn apply_org_attr(org: &mut Organisation, key: &str, value: &str) {
    match key {
        "org-name" => {
            if org.org_name.is_empty() {
                org.org_name = value.to_string();
            } else {
                org.org_name.push(' ');
                org.org_name.push_str(value);
            }
        }
        "org-type" => {
            if org.org_type.is_empty() {
                org.org_type = value.to_string();
            }
        }
        _ => {}
    }
}

/// Parses every inetnum object from a RIPE dump reader.
pub fn parse_inetnums<R: BufRead>(reader: R) -> Result<Vec<Inetnum>> {
    let mut inetnums = Vec::new();
    let mut current: Option<Inetnum> = None;
    let mut current_key = String::new();
    let mut skipped = 0usize;

    for line in reader.lines() {
        let line = line?;

        if line.is_empty() {
            if let Some(inet) = current.take() {
                inetnums.push(inet);
            }
            current_key.clear();
            continue;
        }
        if line.starts_with('#') || line.starts_with('%') {
            continue;
        }

        // Continuation line: extend the previous attribute.
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(inet) = current.as_mut() {
                if !current_key.is_empty() {
                    apply_inetnum_attr(inet, &current_key, line.trim());
                }
            }
            continue;
        }

        let Some((key, value)) = parse_attribute(&line) else {
            continue;
        };
        current_key = key.to_string();

        if key == "inetnum" {
            match parse_inetnum_range(value) {
                Ok((start, end)) => {
                    current = Some(Inetnum {
                        start,
                        end,
                        ..Inetnum::default()
                    });
                }
                Err(_) => {
                    skipped += 1;
                    current = None;
                }
            }
            continue;
        }

        if let Some(inet) = current.as_mut() {
            apply_inetnum_attr(inet, key, value);
        }
    }

    // Final object when the file does not end with a blank line.
    if let Some(inet) = current.take() {
        inetnums.push(inet);
    }

    if skipped > 0 {
        debug!("skipped {skipped} inetnums with unparseable ranges");
    }
    Ok(inetnums)
}

/// Parses every organisation object from a RIPE dump reader.
pub fn parse_organisations<R: BufRead>(reader: R) -> Result<HashMap<String, Organisation>> {
    let mut orgs = HashMap::new();
    let mut current: Option<Organisation> = None;
    let mut current_key = String::new();

    for line in reader.lines() {
        let line = line?;

        if line.is_empty() {
            if let Some(org) = current.take() {
                if !org.org_id.is_empty() {
                    orgs.insert(org.org_id.clone(), org);
                }
            }
            current_key.clear();
            continue;
        }
        if line.starts_with('#') || line.starts_with('%') {
            continue;
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(org) = current.as_mut() {
                if !current_key.is_empty() {
                    apply_org_attr(org, &current_key, line.trim());
                }
            }
            continue;
        }

        let Some((key, value)) = parse_attribute(&line) else {
            continue;
        };
        current_key = key.to_string();

        if key == "organisation" {
            current = Some(Organisation {
                org_id: value.to_string(),
                ..Organisation::default()
            });
            continue;
        }

        if let Some(org) = current.as_mut() {
            apply_org_attr(org, key, value);
        }
    }

    if let Some(org) = current.take() {
        if !org.org_id.is_empty() {
            orgs.insert(org.org_id.clone(), org);
        }
    }

    Ok(orgs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_single_inetnum() {
        let input = "\
inetnum:        31.90.0.0 - 31.91.255.255
netname:        UK-VODAFONE-20110902
country:        GB
org:            ORG-VL225-RIPE
status:         ALLOCATED PA
descr:          Vodafone Limited

";
        let inetnums = parse_inetnums(Cursor::new(input)).unwrap();
        assert_eq!(inetnums.len(), 1);
        let inet = &inetnums[0];
        assert_eq!(inet.start, u32::from(Ipv4Addr::new(31, 90, 0, 0)));
        assert_eq!(inet.end, u32::from(Ipv4Addr::new(31, 91, 255, 255)));
        assert_eq!(inet.org_id, "ORG-VL225-RIPE");
        assert_eq!(inet.netname, "UK-VODAFONE-20110902");
        assert_eq!(inet.descr, "Vodafone Limited");
    }

    #[test]
    fn test_continuation_lines_extend_netname() {
        let input = "\
inetnum:        10.0.0.0 - 10.0.0.255
netname:        FIRST-PART
                SECOND-PART
";
        let inetnums = parse_inetnums(Cursor::new(input)).unwrap();
        assert_eq!(inetnums[0].netname, "FIRST-PART SECOND-PART");
    }

    #[test]
    fn test_comments_and_invalid_ranges_skipped() {
        let input = "\
% RIPE database dump
inetnum:        not-an-ip - also-not
netname:        BROKEN

# comment
inetnum:        192.0.2.0 - 192.0.2.255
netname:        GOOD
";
        let inetnums = parse_inetnums(Cursor::new(input)).unwrap();
        assert_eq!(inetnums.len(), 1);
        assert_eq!(inetnums[0].netname, "GOOD");
    }

    #[test]
    fn test_multiple_remarks_collected() {
        let input = "\
inetnum:        192.0.2.0 - 192.0.2.255
remarks:        first remark
remarks:        second remark
";
        let inetnums = parse_inetnums(Cursor::new(input)).unwrap();
        assert_eq!(
            inetnums[0].remarks,
            vec!["first remark".to_string(), "second remark".to_string()]
        );
    }

    #[test]
    fn test_final_object_without_trailing_blank_line() {
        let input = "inetnum:        192.0.2.0 - 192.0.2.255\nnetname:        EOF-NET";
        let inetnums = parse_inetnums(Cursor::new(input)).unwrap();
        assert_eq!(inetnums.len(), 1);
        assert_eq!(inetnums[0].netname, "EOF-NET");
    }

    #[test]
    fn test_parse_organisations() {
        let input = "\
organisation:   ORG-EA123-RIPE
org-name:       Example Networks
                Amsterdam B.V.
org-type:       LIR

organisation:   ORG-NONAME-RIPE
org-type:       OTHER
";
        let orgs = parse_organisations(Cursor::new(input)).unwrap();
        assert_eq!(orgs.len(), 2);
        assert_eq!(
            orgs["ORG-EA123-RIPE"].org_name,
            "Example Networks Amsterdam B.V."
        );
        assert_eq!(orgs["ORG-EA123-RIPE"].org_type, "LIR");
        // Organisations without org-name are still stored.
        assert_eq!(orgs["ORG-NONAME-RIPE"].org_name, "");
    }

    #[test]
    fn test_inverted_range_rejected() {
        let input = "inetnum:        10.0.1.0 - 10.0.0.0\nnetname:        X\n";
        let inetnums = parse_inetnums(Cursor::new(input)).unwrap();
        assert!(inetnums.is_empty());
    }
}
