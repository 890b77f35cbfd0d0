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

use std::time::Duration;

use crate::store::keys::{NS_RANGE_V4, NS_RANGE_V6};
use crate::store::search::ScanSpec;

// Schema versions, recorded under META:schema and bumped on incompatible
// key or value layout changes.
pub const SCHEMA_VERSION: u32 = 2; // v2: range keys carry start and end
pub const RIPE_SCHEMA_VERSION: u32 = 2;
pub const ARIN_SCHEMA_VERSION: u32 = 1;
pub const IPTOASN_SCHEMA_VERSION: u32 = 1;

// Covering-range scan bounds. The backward walk is capped both by entry
// count and by distance: no real-world allocation spans more than a /8, so
// an entry starting further back cannot cover the query.
pub const MAX_BACKWARD_SCAN: usize = 10_000;
pub const FORWARD_SCAN_STEPS: usize = 5;
pub const V4_MAX_SPAN: u128 = 1 << 24;
pub const V6_MAX_SPAN: u128 = 1 << 104;

pub const V4_SCAN_SPEC: ScanSpec = ScanSpec {
    ns: NS_RANGE_V4,
    start_len: 4,
    max_span: V4_MAX_SPAN,
};

pub const V6_SCAN_SPEC: ScanSpec = ScanSpec {
    ns: NS_RANGE_V6,
    start_len: 16,
    max_span: V6_MAX_SPAN,
};

// External services.
pub const DEFAULT_RDAP_BOOTSTRAP_URL: &str = "https://rdap.db.ripe.net";
pub const DEFAULT_RIPESTAT_BASE_URL: &str = "https://stat.ripe.net";
pub const DEFAULT_USER_AGENT: &str = concat!("iporg/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_RDAP_RATE_LIMIT: f64 = 5.0;
pub const RIPESTAT_RATE_LIMIT: f64 = 10.0;
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

// Retry backoff: 1s -> 2s -> 4s ... capped at 30s, three attempts total.
pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);
pub const RETRY_MAX_ATTEMPTS: usize = 3;

// RDAP results are cached in the main index for a week.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

// Bulk-index build batching.
pub const RANGE_BATCH_SIZE: usize = 10_000;
pub const ORG_BATCH_SIZE: usize = 1_000;

pub const DEFAULT_WORKERS: usize = 8;

// Mode B never splits below these prefix lengths.
pub const DEFAULT_MIN_PREFIX_V4: u8 = 24;
pub const DEFAULT_MIN_PREFIX_V6: u8 = 48;

// RIPE catch-all entries for address space it tracks but does not manage.
pub const RIPE_PLACEHOLDER_NAMES: &[&str] = &[
    "NON-RIPE-NCC-MANAGED-ADDRESS-BLOCK",
    "UNALLOCATED",
    "RESERVED",
];

pub const RIPE_DUMP_BASE_URL: &str = "https://ftp.ripe.net/ripe/dbase/split";

/// Knobs for the main enrichment build.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// ASN list file; ignored when `all_asns` is set.
    pub asn_file: Option<String>,
    pub mmdb_asn_path: String,
    pub mmdb_city_path: String,
    /// Optional iptoasn store for offline prefix discovery.
    pub iptoasn_db_path: Option<String>,
    /// Optional RIPE bulk index consulted before RDAP.
    pub ripe_bulk_db_path: Option<String>,
    /// Optional ARIN bulk index consulted before RDAP.
    pub arin_bulk_db_path: Option<String>,

    pub db_path: String,

    pub workers: usize,
    pub cache_ttl: Duration,
    /// Mode B: split prefixes into geo-uniform blocks before writing.
    pub split_by_geo: bool,
    pub min_prefix_v4: u8,
    pub min_prefix_v6: u8,
    pub ipv4_only: bool,
    /// Enumerate every ASN in the iptoasn store instead of reading a file.
    pub all_asns: bool,
    /// Skip prefixes with no bulk-index coverage instead of calling RDAP.
    pub bulk_only: bool,

    pub ripestat_base_url: String,
    pub rdap_bootstrap_url: String,
    pub user_agent: String,
    pub rdap_rate_limit: f64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            asn_file: None,
            mmdb_asn_path: String::new(),
            mmdb_city_path: String::new(),
            iptoasn_db_path: None,
            ripe_bulk_db_path: None,
            arin_bulk_db_path: None,
            db_path: "./iporg-db".to_string(),
            workers: DEFAULT_WORKERS,
            cache_ttl: DEFAULT_CACHE_TTL,
            split_by_geo: false,
            min_prefix_v4: DEFAULT_MIN_PREFIX_V4,
            min_prefix_v6: DEFAULT_MIN_PREFIX_V6,
            ipv4_only: false,
            all_asns: false,
            bulk_only: false,
            ripestat_base_url: DEFAULT_RIPESTAT_BASE_URL.to_string(),
            rdap_bootstrap_url: DEFAULT_RDAP_BOOTSTRAP_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            rdap_rate_limit: DEFAULT_RDAP_RATE_LIMIT,
        }
    }
}
