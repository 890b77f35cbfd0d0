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

//! RIPE bulk dump support: RPSL parsing and the IPv4 inetnum index.

pub mod database;
pub mod parser;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use database::RipeDatabase;

/// One `inetnum:` object from the RIPE split dump. IPv4 only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inetnum {
    /// Start IP as a big-endian integer, inclusive.
    pub start: u32,
    /// End IP as a big-endian integer, inclusive.
    pub end: u32,
    /// Organisation handle (e.g. `ORG-EA123-RIPE`); often absent.
    #[serde(default)]
    pub org_id: String,
    /// ALLOCATED-PA, ASSIGNED-PA, LEGACY, ...
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub netname: String,
    /// First non-empty `descr:` line; often carries the org name.
    #[serde(default)]
    pub descr: String,
    /// All `remarks:` lines, mined as a last-resort org source.
    #[serde(default)]
    pub remarks: Vec<String>,
}

/// One `organisation:` object from the RIPE split dump.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Organisation {
    pub org_id: String,
    #[serde(default)]
    pub org_name: String,
    #[serde(default)]
    pub org_type: String,
}

/// Result of a RIPE bulk lookup.
#[derive(Debug, Clone)]
pub struct RipeMatch {
    pub start: std::net::Ipv4Addr,
    pub end: std::net::Ipv4Addr,
    pub org_id: String,
    pub org_name: String,
    pub org_type: String,
    pub status: String,
    pub country: String,
    pub netname: String,
    pub matched_at: DateTime<Utc>,
}

/// Build metadata stored under `META:build`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RipeMetadata {
    pub schema_version: u32,
    pub build_time: DateTime<Utc>,
    pub inetnum_count: u64,
    pub org_count: u64,
    #[serde(default)]
    pub source_url: String,
}
