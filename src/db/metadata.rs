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

//! Build metadata, lookup caches and whole-index statistics.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::Database;
use crate::config::SCHEMA_VERSION;
use crate::error::Result;
use crate::ipcodec::Family;
use crate::store::keys;

const META_SCHEMA: &str = "schema";
const META_BUILT_AT: &str = "built_at";
const META_BUILDER_VERSION: &str = "builder_version";
const META_V4_COUNT: &str = "v4_count";
const META_V6_COUNT: &str = "v6_count";

/// Aggregate view over the whole index, printed by the `stats` subcommand.
#[derive(Debug, Default, Serialize)]
pub struct Stats {
    pub total_records: u64,
    pub ipv4_records: u64,
    pub ipv6_records: u64,
    pub records_by_rir: HashMap<String, u64>,
    pub records_by_role: HashMap<String, u64>,
    pub records_by_country: HashMap<String, u64>,
    pub schema_version: u32,
    pub built_at: Option<DateTime<Utc>>,
    pub builder_version: String,
}

impl Database {
    pub fn set_metadata(&self, name: &str, value: &str) -> Result<()> {
        self.store().set_meta(name, value)
    }

    pub fn get_metadata(&self, name: &str) -> Result<Option<String>> {
        self.store().get_meta(name)
    }

    pub fn schema_version(&self) -> Result<u32> {
        Ok(self
            .get_metadata(META_SCHEMA)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    pub fn built_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .get_metadata(META_BUILT_AT)?
            .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            .map(|t| t.with_timezone(&Utc)))
    }

    pub fn builder_version(&self) -> Result<String> {
        Ok(self.get_metadata(META_BUILDER_VERSION)?.unwrap_or_default())
    }

    /// Writes schema version, build time and builder version at the start
    /// of a build.
    pub fn initialize_metadata(&self, builder_version: &str) -> Result<()> {
        self.set_metadata(META_SCHEMA, &SCHEMA_VERSION.to_string())?;
        self.set_metadata(META_BUILT_AT, &Utc::now().to_rfc3339())?;
        self.set_metadata(META_BUILDER_VERSION, builder_version)?;
        Ok(())
    }

    /// Records the final per-family counts after a build.
    pub fn finalize_counts(&self) -> Result<(u64, u64)> {
        let (v4, v6) = self.count()?;
        self.set_metadata(META_V4_COUNT, &v4.to_string())?;
        self.set_metadata(META_V6_COUNT, &v6.to_string())?;
        Ok((v4, v6))
    }

    pub fn set_cache<T: Serialize>(&self, category: &str, key: &str, value: &T) -> Result<()> {
        self.store()
            .put_json(&keys::cache_key(category, key), value)
    }

    pub fn get_cache<T: for<'de> Deserialize<'de>>(
        &self,
        category: &str,
        key: &str,
    ) -> Result<Option<T>> {
        self.store().get_json(&keys::cache_key(category, key))
    }

    pub fn delete_cache(&self, category: &str, key: &str) -> Result<()> {
        self.store().delete(&keys::cache_key(category, key))
    }

    /// Full-scan statistics over both families.
    pub fn stats(&self) -> Result<Stats> {
        let mut stats = Stats {
            schema_version: self.schema_version()?,
            built_at: self.built_at()?,
            builder_version: self.builder_version()?,
            ..Stats::default()
        };

        let (v4, v6) = self.count()?;
        stats.ipv4_records = v4;
        stats.ipv6_records = v6;
        stats.total_records = v4 + v6;

        for family in [Family::V4, Family::V6] {
            let result = self.iterate(family, |rec| {
                *stats.records_by_rir.entry(rec.rir).or_insert(0) += 1;
                *stats.records_by_role.entry(rec.source_role).or_insert(0) += 1;
                *stats.records_by_country.entry(rec.country).or_insert(0) += 1;
                Ok(true)
            });
            if let Err(e) = result {
                warn!("stats iteration failed: {e}");
            }
        }

        Ok(stats)
    }
}
