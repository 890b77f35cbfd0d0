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

//! iptoasn.com TSV support: parsing, per-ASN aggregation and the prefix
//! store used for offline announced-prefix discovery.

pub mod aggregator;
pub mod parser;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use store::IpToAsnStore;

/// One canonical announced prefix. A TSV row covering a range that is not
/// a single aligned block expands into several of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalPrefix {
    /// Canonical `network/length` form.
    pub cidr: String,
    pub asn: u32,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub registry: String,
    #[serde(default)]
    pub as_name: String,
}

/// Per-ASN summary stored under `AIDX:<asn>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsnIndexEntry {
    pub asn: u32,
    pub v4_count: u64,
    pub v4_collapsed: u64,
    pub last_modified: DateTime<Utc>,
}

/// Whole-store totals written at the end of a build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IpToAsnStats {
    pub total_prefixes: u64,
    pub ipv4_prefixes: u64,
    pub collapsed_v4: u64,
    pub unique_asns: u64,
}
