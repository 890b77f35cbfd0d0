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

//! ARIN bulk dump support: streaming XML parsing and the IPv4 net index.

pub mod database;
pub mod parser;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use database::ArinDatabase;

/// One network block from an ARIN `<net>` element. IPv4 only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetBlock {
    /// Start IP as a big-endian integer, inclusive.
    pub start: u32,
    /// End IP as a big-endian integer, inclusive.
    pub end: u32,
    #[serde(default)]
    pub net_name: String,
    /// ARIN net handle (e.g. `NET-8-0-0-0-1`).
    #[serde(default)]
    pub net_handle: String,
    /// Organization handle (e.g. `LPL-141`).
    #[serde(default)]
    pub org_id: String,
    /// Coded net type: DA, DS, S, A, ...
    #[serde(default)]
    pub net_type: String,
    #[serde(default)]
    pub parent_net: String,
    /// CIDR representations; a net with several blocks yields several.
    #[serde(default)]
    pub cidrs: Vec<String>,
    #[serde(default)]
    pub update_date: String,
}

/// One `<org>` element from the ARIN dump.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Organization {
    pub org_id: String,
    #[serde(default)]
    pub org_name: String,
    /// ISO-3166-1 alpha-2.
    #[serde(default)]
    pub country: String,
    /// ISO-3166-2 subdivision code.
    #[serde(default)]
    pub state_prov: String,
    #[serde(default)]
    pub update_date: String,
}

/// Result of an ARIN bulk lookup. `org_name` is empty when the resolved
/// organization fails the placeholder filter; callers fall back to their
/// ASN source rather than the often-internal NetName.
#[derive(Debug, Clone)]
pub struct ArinMatch {
    pub start: std::net::Ipv4Addr,
    pub end: std::net::Ipv4Addr,
    pub net_handle: String,
    pub org_id: String,
    pub org_name: String,
    pub net_type: String,
    pub net_name: String,
    pub country: String,
    pub matched_at: DateTime<Utc>,
}

/// Build metadata stored under `META:build`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArinMetadata {
    pub schema_version: u32,
    pub build_time: DateTime<Utc>,
    pub net_count: u64,
    pub org_count: u64,
    #[serde(default)]
    pub source_date: String,
}

/// Human-readable description of an ARIN coded net type.
pub fn expand_net_type(net_type: &str) -> &str {
    match net_type {
        "A" => "Reallocation",
        "AF" => "Allocated to AFRINIC",
        "AP" => "Allocated to APNIC",
        "AR" => "Allocated to ARIN",
        "AV" => "Early registration (ARIN)",
        "DA" => "Direct Allocation",
        "DS" => "Direct Assignment",
        "FX" => "Transferred to AFRINIC",
        "IR" => "IANA Reserved",
        "IU" => "IANA Special Use",
        "LN" => "Allocated to LACNIC",
        "LX" => "Transferred to LACNIC",
        "PV" => "Early registration (APNIC)",
        "PX" => "Transferred to APNIC",
        "RN" => "Allocated to RIPE NCC",
        "RV" => "Early registration (RIPE)",
        "RX" => "Transferred to RIPE",
        "S" => "Reassignment",
        other => other,
    }
}

/// Rejects placeholder and administrative org names. Anything failing this
/// filter is useless as an organization label.
pub fn is_valid_org_name(name: &str) -> bool {
    if name.chars().count() < 3 {
        return false;
    }
    let lower = name.to_lowercase();
    const PLACEHOLDERS: &[&str] = &[
        "unallocated",
        "reserved",
        "legacy-",
        "arin-",
        "not disclosed",
        "none",
        "n/a",
    ];
    !PLACEHOLDERS.iter().any(|p| lower.contains(p))
}
