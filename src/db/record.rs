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

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ipcodec::{self, Family};

/// One IP range with its resolved organization and geography.
///
/// The start address is duplicated between key and value so a record
/// decodes without its key; the end address lives only here for IPv6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub start: IpAddr,
    pub end: IpAddr,
    #[serde(default)]
    pub asn: u32,
    #[serde(default)]
    pub asn_name: String,
    #[serde(default)]
    pub org_name: String,
    /// ARIN / RIPE / APNIC / LACNIC / AFRINIC / UNKNOWN.
    #[serde(default)]
    pub rir: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lon: f64,
    /// Which extraction branch produced the org name (see RDAP parser).
    #[serde(default)]
    pub source_role: String,
    /// Status from the originating RIR (e.g. ASSIGNED-PA) or net type.
    #[serde(default)]
    pub status_label: String,
    /// The announced prefix this record derives from, canonical form.
    pub prefix: String,
    pub last_checked: DateTime<Utc>,
    pub schema: u32,
}

impl Record {
    /// Checks the stored-record invariants before a write.
    pub fn validate(&self) -> Result<()> {
        if Family::of(&self.start) != Family::of(&self.end) {
            return Err(Error::MixedFamily);
        }
        if ipcodec::to_integer(&self.start) > ipcodec::to_integer(&self.end) {
            return Err(Error::InvalidRange(format!(
                "start {} > end {}",
                self.start, self.end
            )));
        }
        let prefix = ipcodec::parse_prefix(&self.prefix)?;
        let (pstart, pend) = ipcodec::prefix_to_range(&prefix);
        if !ipcodec::contains_range((&pstart, &pend), (&self.start, &self.end)) {
            return Err(Error::InvalidRange(format!(
                "announced prefix {} does not contain [{}, {}]",
                self.prefix, self.start, self.end
            )));
        }
        Ok(())
    }

    pub fn span(&self) -> u128 {
        ipcodec::to_integer(&self.end) - ipcodec::to_integer(&self.start)
    }
}

/// Query-time projection of a [`Record`].
#[derive(Debug, Clone, Serialize)]
pub struct LookupResult {
    pub ip: String,
    pub asn: u32,
    pub asn_name: String,
    pub org_name: String,
    pub rir: String,
    pub country: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    pub prefix: String,
    pub source_role: String,
}

impl LookupResult {
    pub fn from_record(ip: &str, rec: &Record) -> LookupResult {
        LookupResult {
            ip: ip.to_string(),
            asn: rec.asn,
            asn_name: rec.asn_name.clone(),
            org_name: rec.org_name.clone(),
            rir: rec.rir.clone(),
            country: rec.country.clone(),
            region: (!rec.region.is_empty()).then(|| rec.region.clone()),
            city: (!rec.city.is_empty()).then(|| rec.city.clone()),
            lat: (rec.lat != 0.0 || rec.lon != 0.0).then_some(rec.lat),
            lon: (rec.lat != 0.0 || rec.lon != 0.0).then_some(rec.lon),
            prefix: rec.prefix.clone(),
            source_role: rec.source_role.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipcodec::parse_ip;

    fn record(start: &str, end: &str, prefix: &str) -> Record {
        Record {
            start: parse_ip(start).unwrap(),
            end: parse_ip(end).unwrap(),
            asn: 64500,
            asn_name: "EXAMPLE-AS".into(),
            org_name: "Example Org".into(),
            rir: "RIPE".into(),
            country: "NL".into(),
            region: String::new(),
            city: String::new(),
            lat: 0.0,
            lon: 0.0,
            source_role: "registrant".into(),
            status_label: "ASSIGNED-PA".into(),
            prefix: prefix.into(),
            last_checked: Utc::now(),
            schema: crate::config::SCHEMA_VERSION,
        }
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        record("10.0.0.0", "10.0.0.255", "10.0.0.0/24")
            .validate()
            .unwrap();
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let rec = record("10.0.0.255", "10.0.0.0", "10.0.0.0/24");
        assert!(matches!(rec.validate(), Err(Error::InvalidRange(_))));
    }

    #[test]
    fn test_validate_rejects_prefix_mismatch() {
        let rec = record("10.0.0.0", "10.0.1.255", "10.0.0.0/24");
        assert!(matches!(rec.validate(), Err(Error::InvalidRange(_))));
    }

    #[test]
    fn test_lookup_result_omits_empty_optionals() {
        let rec = record("10.0.0.0", "10.0.0.255", "10.0.0.0/24");
        let result = LookupResult::from_record("10.0.0.1", &rec);
        assert!(result.region.is_none());
        assert!(result.lat.is_none());
        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("region"));
    }
}
