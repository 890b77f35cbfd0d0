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

//! Per-prefix enrichment: the source-precedence chain and record writing.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, warn};

use super::stats::BuildStats;
use crate::arinbulk::ArinDatabase;
use crate::config::{BuildConfig, RIPE_PLACEHOLDER_NAMES, SCHEMA_VERSION};
use crate::db::{Database, PutOutcome, Record};
use crate::error::Error;
use crate::ipcodec::{self, Family};
use crate::ripebulk::RipeDatabase;
use crate::sources::maxmind::{GeoInfo, MaxMindReaders};
use crate::sources::rdap::{clean_org_name, CachedRdapClient, RdapOrg};

/// Everything a worker needs, cheap to clone per task.
pub(crate) struct EnrichContext {
    pub db: Arc<Database>,
    pub maxmind: Arc<MaxMindReaders>,
    pub rdap: Arc<CachedRdapClient>,
    pub ripe_bulk: Option<Arc<RipeDatabase>>,
    pub arin_bulk: Option<Arc<ArinDatabase>>,
    pub stats: Arc<BuildStats>,
    pub cfg: Arc<BuildConfig>,
}

impl Clone for EnrichContext {
    fn clone(&self) -> Self {
        EnrichContext {
            db: Arc::clone(&self.db),
            maxmind: Arc::clone(&self.maxmind),
            rdap: Arc::clone(&self.rdap),
            ripe_bulk: self.ripe_bulk.clone(),
            arin_bulk: self.arin_bulk.clone(),
            stats: Arc::clone(&self.stats),
            cfg: Arc::clone(&self.cfg),
        }
    }
}

enum OrgResolution {
    /// One of the sources produced a usable organization.
    Hit(RdapOrg),
    /// Every source declined; use the ASN organization as a fallback.
    Fallback,
    /// Bulk-only mode and neither bulk index covered the prefix.
    BulkMiss,
}

/// The source-precedence chain: RIPE bulk, then ARIN bulk, then RDAP.
async fn resolve_org(ctx: &EnrichContext, prefix: &cidr::IpCidr) -> OrgResolution {
    let is_v4 = prefix.is_ipv4();

    if is_v4 {
        if let Some(ripe) = &ctx.ripe_bulk {
            match ripe.lookup_prefix(prefix) {
                Ok(Some(m))
                    if !m.org_name.is_empty()
                        && !RIPE_PLACEHOLDER_NAMES.contains(&m.org_name.as_str()) =>
                {
                    ctx.stats.add(&ctx.stats.ripe_bulk_hits, 1);
                    return OrgResolution::Hit(RdapOrg {
                        org_name: m.org_name,
                        rir: "RIPE".to_string(),
                        source_role: "ripe_bulk".to_string(),
                        status_label: m.status,
                        country: m.country,
                    });
                }
                Ok(_) => {}
                Err(e) => warn!("RIPE bulk lookup failed for {prefix}: {e}"),
            }
        }

        if let Some(arin) = &ctx.arin_bulk {
            match arin.lookup_prefix(prefix) {
                // The ARIN index leaves org_name empty when the resolved
                // organization failed the placeholder filter.
                Ok(Some(m)) if !m.org_name.is_empty() => {
                    ctx.stats.add(&ctx.stats.arin_bulk_hits, 1);
                    return OrgResolution::Hit(RdapOrg {
                        org_name: m.org_name,
                        rir: "ARIN".to_string(),
                        source_role: "arin_bulk".to_string(),
                        status_label: m.net_type,
                        country: m.country,
                    });
                }
                Ok(_) => {}
                Err(e) => warn!("ARIN bulk lookup failed for {prefix}: {e}"),
            }
        }
    }

    if ctx.cfg.bulk_only {
        return OrgResolution::BulkMiss;
    }

    match ctx.rdap.org_for_prefix(&ipcodec::prefix_string(prefix)).await {
        Ok((org, from_cache)) => {
            if from_cache {
                ctx.stats.add(&ctx.stats.rdap_cache_hits, 1);
            } else {
                ctx.stats.add(&ctx.stats.rdap_cache_misses, 1);
            }
            OrgResolution::Hit(org)
        }
        Err(e) => {
            warn!("RDAP lookup failed for {prefix}: {e}");
            ctx.stats.add(&ctx.stats.rdap_cache_misses, 1);
            OrgResolution::Fallback
        }
    }
}

fn write_record(ctx: &EnrichContext, rec: &Record) {
    match ctx.db.put_range(rec) {
        Ok(PutOutcome::Inserted { .. }) => {
            ctx.stats.add(&ctx.stats.records_written, 1);
        }
        Ok(PutOutcome::Updated) => {
            ctx.stats.add(&ctx.stats.records_updated, 1);
        }
        Err(Error::OverlapCoveredByLessSpecific { .. }) => {
            // Expected: parents are written first.
            ctx.stats.add(&ctx.stats.records_skipped, 1);
        }
        Err(Error::OverlapConflict { new, existing }) => {
            error!("overlap conflict: {new} crosses {existing}");
            ctx.stats.add(&ctx.stats.errors, 1);
        }
        Err(e) => {
            error!("failed to write record for {}: {e}", rec.prefix);
            ctx.stats.add(&ctx.stats.errors, 1);
        }
    }
}

fn base_record(
    prefix: &str,
    start: IpAddr,
    end: IpAddr,
    asn: u32,
    asn_name: &str,
    geo: Option<&GeoInfo>,
    org: &RdapOrg,
) -> Record {
    Record {
        start,
        end,
        asn,
        asn_name: asn_name.to_string(),
        org_name: org.org_name.clone(),
        rir: org.rir.clone(),
        country: geo.map(|g| g.country.clone()).unwrap_or_default(),
        region: geo.map(|g| g.region.clone()).unwrap_or_default(),
        city: geo.map(|g| g.city.clone()).unwrap_or_default(),
        lat: geo.map(|g| g.lat).unwrap_or(0.0),
        lon: geo.map(|g| g.lon).unwrap_or(0.0),
        source_role: org.source_role.clone(),
        status_label: org.status_label.clone(),
        prefix: prefix.to_string(),
        last_checked: Utc::now(),
        schema: SCHEMA_VERSION,
    }
}

/// Final guarantee: every written record carries a non-empty organization.
fn finish_org(org: &mut RdapOrg, asn: u32, asn_name: &str) {
    org.org_name = clean_org_name(&org.org_name);
    if org.org_name.is_empty() {
        org.org_name = if asn_name.is_empty() {
            format!("AS{asn}")
        } else {
            asn_name.to_string()
        };
        org.source_role = "asn_fallback".to_string();
    }
}

fn asn_fallback_org() -> RdapOrg {
    RdapOrg {
        org_name: String::new(),
        rir: "UNKNOWN".to_string(),
        source_role: "asn_fallback".to_string(),
        status_label: String::new(),
        country: String::new(),
    }
}

/// Processes one announced prefix end to end (Mode A), or split into geo
/// blocks first (Mode B).
pub(crate) async fn process_prefix(ctx: EnrichContext, raw_prefix: String) {
    let normalized = match ipcodec::normalize_prefix(&raw_prefix) {
        Ok(p) => p,
        Err(e) => {
            error!("invalid prefix {raw_prefix}: {e}");
            ctx.stats.add(&ctx.stats.errors, 1);
            return;
        }
    };
    let prefix = match ipcodec::parse_prefix(&normalized) {
        Ok(p) => p,
        Err(e) => {
            error!("invalid prefix {normalized}: {e}");
            ctx.stats.add(&ctx.stats.errors, 1);
            return;
        }
    };

    if ctx.cfg.split_by_geo {
        process_mode_b(&ctx, &normalized, &prefix).await;
    } else {
        process_mode_a(&ctx, &normalized, &prefix).await;
    }
    ctx.stats.add(&ctx.stats.prefixes_processed, 1);
}

async fn process_mode_a(ctx: &EnrichContext, normalized: &str, prefix: &cidr::IpCidr) {
    let (start, end) = ipcodec::prefix_to_range(prefix);
    let rep = prefix.first_address();

    let (asn, asn_name) = match ctx.maxmind.asn_info(&rep) {
        Ok(info) => info,
        Err(e) => {
            debug!("no ASN info for {normalized}: {e}");
            (0, String::new())
        }
    };
    let geo = ctx.maxmind.geo(&rep).ok().flatten();

    let mut org = match resolve_org(ctx, prefix).await {
        OrgResolution::Hit(org) => org,
        OrgResolution::Fallback => asn_fallback_org(),
        OrgResolution::BulkMiss => {
            ctx.stats.add(&ctx.stats.records_skipped, 1);
            return;
        }
    };
    finish_org(&mut org, asn, &asn_name);

    let rec = base_record(normalized, start, end, asn, &asn_name, geo.as_ref(), &org);
    write_record(ctx, &rec);
}

async fn process_mode_b(ctx: &EnrichContext, normalized: &str, prefix: &cidr::IpCidr) {
    let family = Family::of(&prefix.first_address());
    let min_len = family.min_prefix(ctx.cfg.min_prefix_v4, ctx.cfg.min_prefix_v6);

    let blocks = match ctx.maxmind.split_prefix_by_geo(prefix, min_len) {
        Ok(blocks) => blocks,
        Err(e) => {
            error!("failed to split {normalized}: {e}");
            ctx.stats.add(&ctx.stats.errors, 1);
            return;
        }
    };
    debug!("split {normalized} into {} blocks", blocks.len());

    for block in blocks {
        let (start, end) = ipcodec::prefix_to_range(&block.prefix);
        let rep = block.prefix.first_address();

        let (asn, asn_name) = ctx.maxmind.asn_info(&rep).unwrap_or((0, String::new()));

        // Large announced prefixes often contain sub-allocations with
        // different organizations, so each block is resolved on its own.
        let mut org = match resolve_org(ctx, &block.prefix).await {
            OrgResolution::Hit(org) => org,
            OrgResolution::Fallback => asn_fallback_org(),
            OrgResolution::BulkMiss => {
                ctx.stats.add(&ctx.stats.records_skipped, 1);
                continue;
            }
        };
        finish_org(&mut org, asn, &asn_name);

        // The record keeps the announced prefix; only start/end and the
        // geography narrow to the block.
        let rec = base_record(
            normalized,
            start,
            end,
            asn,
            &asn_name,
            block.geo.as_ref(),
            &org,
        );
        write_record(ctx, &rec);
    }
}
