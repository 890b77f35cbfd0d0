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

//! Build progress counters, updated atomically from every worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug)]
pub struct BuildStats {
    start: Instant,
    pub asns_processed: AtomicU64,
    pub prefixes_fetched: AtomicU64,
    pub prefixes_processed: AtomicU64,
    pub records_written: AtomicU64,
    pub records_updated: AtomicU64,
    pub records_skipped: AtomicU64,
    pub rdap_cache_hits: AtomicU64,
    pub rdap_cache_misses: AtomicU64,
    pub ripe_bulk_hits: AtomicU64,
    pub arin_bulk_hits: AtomicU64,
    pub errors: AtomicU64,
}

/// Point-in-time copy of the counters, serializable for callers.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub elapsed_secs: u64,
    pub asns_processed: u64,
    pub prefixes_fetched: u64,
    pub prefixes_processed: u64,
    pub records_written: u64,
    pub records_updated: u64,
    pub records_skipped: u64,
    pub rdap_cache_hits: u64,
    pub rdap_cache_misses: u64,
    pub ripe_bulk_hits: u64,
    pub arin_bulk_hits: u64,
    pub errors: u64,
}

impl BuildStats {
    pub fn new() -> BuildStats {
        BuildStats {
            start: Instant::now(),
            asns_processed: AtomicU64::new(0),
            prefixes_fetched: AtomicU64::new(0),
            prefixes_processed: AtomicU64::new(0),
            records_written: AtomicU64::new(0),
            records_updated: AtomicU64::new(0),
            records_skipped: AtomicU64::new(0),
            rdap_cache_hits: AtomicU64::new(0),
            rdap_cache_misses: AtomicU64::new(0),
            ripe_bulk_hits: AtomicU64::new(0),
            arin_bulk_hits: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            elapsed_secs: self.start.elapsed().as_secs(),
            asns_processed: get(&self.asns_processed),
            prefixes_fetched: get(&self.prefixes_fetched),
            prefixes_processed: get(&self.prefixes_processed),
            records_written: get(&self.records_written),
            records_updated: get(&self.records_updated),
            records_skipped: get(&self.records_skipped),
            rdap_cache_hits: get(&self.rdap_cache_hits),
            rdap_cache_misses: get(&self.rdap_cache_misses),
            ripe_bulk_hits: get(&self.ripe_bulk_hits),
            arin_bulk_hits: get(&self.arin_bulk_hits),
            errors: get(&self.errors),
        }
    }

    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!("build summary:");
        info!("  duration:            {}s", s.elapsed_secs);
        info!("  ASNs processed:      {}", s.asns_processed);
        info!("  prefixes fetched:    {}", s.prefixes_fetched);
        info!("  prefixes processed:  {}", s.prefixes_processed);
        info!("  records written:     {}", s.records_written);
        info!("  records updated:     {}", s.records_updated);
        info!("  records skipped:     {}", s.records_skipped);
        info!("  RIPE bulk hits:      {}", s.ripe_bulk_hits);
        info!("  ARIN bulk hits:      {}", s.arin_bulk_hits);
        info!("  RDAP cache hits:     {}", s.rdap_cache_hits);
        info!("  RDAP cache misses:   {}", s.rdap_cache_misses);
        info!("  errors:              {}", s.errors);
        if s.errors > 0 {
            warn!("build completed with {} errors", s.errors);
        }
    }
}

impl Default for BuildStats {
    fn default() -> Self {
        BuildStats::new()
    }
}
