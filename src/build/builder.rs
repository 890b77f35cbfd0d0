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

//! The main build orchestrator: ASN loading, per-ASN prefix discovery,
//! specificity sorting and the bounded enrichment worker pool.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::io::AsyncBufReadExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::enrich::{process_prefix, EnrichContext};
use super::stats::{BuildStats, StatsSnapshot};
use crate::arinbulk::ArinDatabase;
use crate::config::BuildConfig;
use crate::db::Database;
use crate::error::Error;
use crate::ipcodec;
use crate::iptoasn::IpToAsnStore;
use crate::ripebulk::RipeDatabase;
use crate::sources::maxmind::MaxMindReaders;
use crate::sources::rdap::{CachedRdapClient, RdapClient};
use crate::sources::ripestat::{self, RipeStatClient};

const BUILDER_VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct Builder {
    cfg: Arc<BuildConfig>,
    stats: Arc<BuildStats>,
}

impl Builder {
    pub fn new(cfg: BuildConfig) -> Builder {
        Builder {
            cfg: Arc::new(cfg),
            stats: Arc::new(BuildStats::new()),
        }
    }

    pub fn stats(&self) -> Arc<BuildStats> {
        Arc::clone(&self.stats)
    }

    /// Runs the complete build pipeline. The returned snapshot reflects
    /// partial progress when the token fires mid-build.
    pub async fn build(&self, cancel: CancellationToken) -> Result<StatsSnapshot> {
        info!("starting build");

        let iptoasn = match &self.cfg.iptoasn_db_path {
            Some(path) => {
                let store = IpToAsnStore::open(Path::new(path))
                    .with_context(|| format!("failed to open iptoasn store at {path}"))?;
                if let Some(stats) = store.get_stats()? {
                    info!(
                        "opened iptoasn store: {} prefixes, {} ASNs",
                        stats.total_prefixes, stats.unique_asns
                    );
                }
                Some(Arc::new(store))
            }
            None => None,
        };

        let asns = self.load_asns(iptoasn.as_deref()).await?;
        info!("loaded {} ASNs", asns.len());

        let db = Arc::new(
            Database::open(Path::new(&self.cfg.db_path))
                .with_context(|| format!("failed to open database at {}", self.cfg.db_path))?,
        );
        db.initialize_metadata(BUILDER_VERSION)?;

        let maxmind = Arc::new(
            MaxMindReaders::open(
                Path::new(&self.cfg.mmdb_asn_path),
                Path::new(&self.cfg.mmdb_city_path),
            )
            .context("failed to open MaxMind databases")?,
        );

        let rdap = Arc::new(CachedRdapClient::new(
            RdapClient::new(
                &self.cfg.rdap_bootstrap_url,
                &self.cfg.user_agent,
                self.cfg.rdap_rate_limit,
            )?,
            Arc::clone(&db),
            self.cfg.cache_ttl,
        ));

        let ripe_bulk = match &self.cfg.ripe_bulk_db_path {
            Some(path) => {
                let ripe = RipeDatabase::open(Path::new(path))
                    .with_context(|| format!("failed to open RIPE bulk index at {path}"))?;
                match ripe.metadata()? {
                    Some(meta) => info!(
                        "opened RIPE bulk index: {} inetnums, {} orgs (built {})",
                        meta.inetnum_count,
                        meta.org_count,
                        meta.build_time.format("%Y-%m-%d")
                    ),
                    None => warn!("RIPE bulk index at {path} has no metadata"),
                }
                Some(Arc::new(ripe))
            }
            None => {
                info!("RIPE bulk index not configured, using RDAP for RIPE space");
                None
            }
        };

        let arin_bulk = match &self.cfg.arin_bulk_db_path {
            Some(path) => {
                let arin = ArinDatabase::open(Path::new(path))
                    .with_context(|| format!("failed to open ARIN bulk index at {path}"))?;
                match arin.metadata()? {
                    Some(meta) => info!(
                        "opened ARIN bulk index: {} nets, {} orgs (built {})",
                        meta.net_count,
                        meta.org_count,
                        meta.build_time.format("%Y-%m-%d")
                    ),
                    None => warn!("ARIN bulk index at {path} has no metadata"),
                }
                Some(Arc::new(arin))
            }
            None => {
                info!("ARIN bulk index not configured, using RDAP for ARIN space");
                None
            }
        };

        let prefixes = match &iptoasn {
            Some(store) => self.discover_from_iptoasn(store, &asns)?,
            None => self.discover_from_ripestat(&asns).await?,
        };
        info!("discovered {} unique prefixes", prefixes.len());

        let sorted = sort_by_specificity(prefixes);

        let ctx = EnrichContext {
            db: Arc::clone(&db),
            maxmind,
            rdap,
            ripe_bulk,
            arin_bulk,
            stats: Arc::clone(&self.stats),
            cfg: Arc::clone(&self.cfg),
        };

        self.enrich_all(ctx, sorted, &cancel).await;

        let (v4, v6) = db.finalize_counts()?;
        info!("index now holds {v4} IPv4 and {v6} IPv6 records");

        // Hard requirement: drain in-flight writes before reporting.
        db.close();
        if let Some(store) = iptoasn {
            store.close();
        }

        self.stats.log_summary();
        Ok(self.stats.snapshot())
    }

    /// Loads ASNs from the configured file, or enumerates the iptoasn
    /// store in all-ASNs mode.
    async fn load_asns(&self, iptoasn: Option<&IpToAsnStore>) -> Result<Vec<u32>> {
        if self.cfg.all_asns {
            let store =
                iptoasn.ok_or_else(|| anyhow!("all-asns mode requires an iptoasn store"))?;
            let asns = store.list_asns()?;
            info!("enumerated {} ASNs from iptoasn store", asns.len());
            return Ok(asns);
        }

        let path = self
            .cfg
            .asn_file
            .as_deref()
            .ok_or_else(|| anyhow!("no ASN file configured"))?;
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("failed to open ASN file {path}"))?;
        let mut lines = tokio::io::BufReader::new(file).lines();

        let mut asns = Vec::new();
        let mut line_num = 0usize;
        while let Some(line) = lines.next_line().await? {
            line_num += 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let digits = if line.len() > 2 && line[..2].eq_ignore_ascii_case("as") {
                &line[2..]
            } else {
                line
            };
            match digits.parse::<u32>() {
                Ok(asn) if asn > 0 => asns.push(asn),
                _ => warn!("invalid ASN on line {line_num}: {line}"),
            }
        }

        if asns.is_empty() {
            return Err(anyhow!("no valid ASNs found in {path}"));
        }
        Ok(asns)
    }

    fn discover_from_iptoasn(
        &self,
        store: &IpToAsnStore,
        asns: &[u32],
    ) -> Result<Vec<String>> {
        info!("discovering prefixes for {} ASNs from iptoasn store", asns.len());
        let mut seen: HashSet<String> = HashSet::new();
        let mut skipped_v6 = 0u64;

        for &asn in asns {
            self.stats.add(&self.stats.asns_processed, 1);
            let prefixes = match store.list_by_asn(asn, false) {
                Ok(prefixes) => prefixes,
                Err(Error::NotFound) => {
                    warn!("AS{asn} not found in iptoasn store");
                    continue;
                }
                Err(e) => return Err(e).context("iptoasn prefix discovery failed"),
            };

            self.stats.add(&self.stats.prefixes_fetched, prefixes.len() as u64);
            for p in prefixes {
                if self.cfg.ipv4_only && ipcodec::is_ipv6_prefix(&p.cidr) {
                    skipped_v6 += 1;
                    continue;
                }
                seen.insert(p.cidr);
            }
        }

        if skipped_v6 > 0 {
            info!("skipped {skipped_v6} IPv6 prefixes (IPv4-only mode)");
        }
        Ok(seen.into_iter().collect())
    }

    async fn discover_from_ripestat(&self, asns: &[u32]) -> Result<Vec<String>> {
        info!(
            "discovering prefixes for {} ASNs via RIPEstat",
            asns.len()
        );
        let client = Arc::new(RipeStatClient::new(
            &self.cfg.ripestat_base_url,
            &self.cfg.user_agent,
            crate::config::RIPESTAT_RATE_LIMIT,
        )?);

        let by_asn = ripestat::fetch_for_asns(client, asns, self.cfg.workers).await;

        let mut seen: HashSet<String> = HashSet::new();
        let mut skipped_v6 = 0u64;
        for (_, prefixes) in by_asn {
            self.stats.add(&self.stats.asns_processed, 1);
            self.stats.add(&self.stats.prefixes_fetched, prefixes.len() as u64);
            for p in prefixes {
                if self.cfg.ipv4_only && ipcodec::is_ipv6_prefix(&p) {
                    skipped_v6 += 1;
                    continue;
                }
                seen.insert(p);
            }
        }

        if skipped_v6 > 0 {
            info!("skipped {skipped_v6} IPv6 prefixes (IPv4-only mode)");
        }
        Ok(seen.into_iter().collect())
    }

    /// Fans prefixes out over a bounded worker pool. Parents were sorted
    /// first, but a semaphore permit is acquired in submission order so the
    /// least-specific prefixes also start first.
    async fn enrich_all(
        &self,
        ctx: EnrichContext,
        prefixes: Vec<String>,
        cancel: &CancellationToken,
    ) {
        let total = prefixes.len();
        info!("enriching {total} prefixes with {} workers", self.cfg.workers);

        let semaphore = Arc::new(Semaphore::new(self.cfg.workers.max(1)));
        let mut set = JoinSet::new();
        let mut submitted = 0usize;

        for prefix in prefixes {
            if cancel.is_cancelled() {
                warn!(
                    "build cancelled after submitting {submitted}/{total} prefixes"
                );
                break;
            }
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let ctx = ctx.clone();
            set.spawn(async move {
                let _permit = permit;
                process_prefix(ctx, prefix).await;
            });
            submitted += 1;
        }

        // Drain in-flight workers, including on cancellation.
        while let Some(result) = set.join_next().await {
            if let Err(e) = result {
                warn!("worker task failed: {e}");
                self.stats.add(&self.stats.errors, 1);
            }
        }
    }
}

/// Least-specific first, ties broken lexicographically for determinism.
fn sort_by_specificity(prefixes: Vec<String>) -> Vec<String> {
    let mut parsed: Vec<(u8, String)> = prefixes
        .into_iter()
        .filter_map(|p| match ipcodec::parse_prefix(&p) {
            Ok(cidr) => Some((cidr.network_length(), p)),
            Err(e) => {
                warn!("dropping unparseable prefix {p}: {e}");
                None
            }
        })
        .collect();
    parsed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    parsed.into_iter().map(|(_, p)| p).collect()
}
