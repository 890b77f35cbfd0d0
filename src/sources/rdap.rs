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

//! RDAP client and response parser.
//!
//! The client queries `/ip/{address}` on an RDAP bootstrap endpoint with a
//! global token bucket and retry-with-backoff. The parser distills an
//! organization name out of the response's entity soup; the ordering of the
//! extraction branches is deliberate and load-bearing, each data source
//! omits the name under different conditions.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::limiter::TokenBucket;
use crate::config::HTTP_TIMEOUT;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::ipcodec;

/// Organization information distilled from one RDAP response (or a bulk
/// index acting as one).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RdapOrg {
    pub org_name: String,
    pub rir: String,
    /// Which extraction branch produced the name: customer, registrant,
    /// network_name, administrative, technical, abuse, entity, remark or
    /// asn_fallback.
    pub source_role: String,
    #[serde(default)]
    pub status_label: String,
    #[serde(default)]
    pub country: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RdapResponse {
    pub handle: String,
    pub start_address: String,
    pub end_address: String,
    pub name: String,
    #[serde(rename = "type")]
    pub net_type: String,
    pub country: String,
    pub status: Vec<String>,
    pub entities: Vec<RdapEntity>,
    pub remarks: Vec<RdapRemark>,
    pub links: Vec<RdapLink>,
    pub port43: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RdapEntity {
    pub handle: String,
    pub roles: Vec<String>,
    /// Raw jCard: `["vcard", [[field, params, type, value], ...]]`.
    pub vcard_array: serde_json::Value,
    pub entities: Vec<RdapEntity>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RdapRemark {
    pub title: String,
    pub description: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RdapLink {
    pub rel: String,
    pub href: String,
}

/// Extracts a display name from an entity's jCard: the first non-empty
/// `fn` or `org` value.
pub fn entity_name(entity: &RdapEntity) -> Option<String> {
    let fields = entity.vcard_array.get(1)?.as_array()?;
    for field in fields {
        let tuple = field.as_array()?;
        if tuple.len() < 4 {
            continue;
        }
        let field_name = tuple[0].as_str()?;
        if field_name == "fn" || field_name == "org" {
            if let Some(value) = tuple[3].as_str() {
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

/// Determines the RIR from the `port43` hostname, falling back to the RIR
/// domains in `links`.
pub fn determine_rir(response: &RdapResponse) -> &'static str {
    const RIRS: &[(&str, &str)] = &[
        ("ripe", "RIPE"),
        ("arin", "ARIN"),
        ("apnic", "APNIC"),
        ("lacnic", "LACNIC"),
        ("afrinic", "AFRINIC"),
    ];

    let port43 = response.port43.to_lowercase();
    if !port43.is_empty() {
        for (needle, rir) in RIRS {
            if port43.contains(needle) {
                return rir;
            }
        }
    }

    for link in &response.links {
        let href = link.href.to_lowercase();
        for (needle, rir) in RIRS {
            if href.contains(&format!("{needle}.net")) {
                return rir;
            }
        }
    }

    "UNKNOWN"
}

/// Trims, strips wrapping quotes and collapses runs of whitespace.
pub fn clean_org_name(name: &str) -> String {
    let name = name.trim().trim_matches(|c| c == '"' || c == '\'');
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_remark_line(response: &RdapResponse) -> Option<String> {
    response
        .remarks
        .iter()
        .flat_map(|r| r.description.iter())
        .map(|d| d.trim())
        .find(|d| !d.is_empty())
        .map(|d| d.to_string())
}

/// Distills organization info from a response. `None` when no branch
/// produced a name.
pub fn parse_org(response: &RdapResponse) -> Option<RdapOrg> {
    let mut org = RdapOrg {
        org_name: String::new(),
        rir: determine_rir(response).to_string(),
        source_role: String::new(),
        status_label: response.status.first().cloned().unwrap_or_default(),
        country: response.country.clone(),
    };

    // Classify entities by role, skipping maintainer references.
    let mut customer = None;
    let mut org_registrant = None;
    let mut registrant = None;
    let mut administrative = None;
    let mut technical = None;
    let mut abuse = None;

    for entity in &response.entities {
        if entity.handle.ends_with("-MNT") {
            continue;
        }
        let is_org_handle = entity.handle.starts_with("ORG-");

        for role in &entity.roles {
            match role.to_lowercase().as_str() {
                "customer" => customer = Some(entity),
                "registrant" => {
                    if is_org_handle && org_registrant.is_none() {
                        org_registrant = Some(entity);
                    } else if registrant.is_none() {
                        registrant = Some(entity);
                    }
                }
                "administrative" => {
                    if administrative.is_none() {
                        administrative = Some(entity);
                    }
                }
                "technical" => {
                    if technical.is_none() {
                        technical = Some(entity);
                    }
                }
                "abuse" => abuse = Some(entity),
                _ => {}
            }
        }
    }

    // A network name is usable when it is not a maintainer label, long
    // enough to mean something, and not a UK- style aggregate.
    let has_good_network_name = !response.name.is_empty()
        && !response.name.ends_with("-MNT")
        && response.name.len() > 3
        && !response.name.starts_with("UK-");

    let selected: Option<(&RdapEntity, &str)> = if let Some(e) = customer {
        Some((e, "customer"))
    } else if let Some(e) = org_registrant {
        Some((e, "registrant"))
    } else if let Some(e) = registrant {
        Some((e, "registrant"))
    } else if has_good_network_name {
        org.org_name = response.name.clone();
        org.source_role = "network_name".to_string();
        return Some(org);
    } else if let Some(e) = administrative {
        Some((e, "administrative"))
    } else if let Some(e) = technical {
        Some((e, "technical"))
    } else if let Some(e) = abuse {
        Some((e, "abuse"))
    } else {
        None
    };

    if let Some((entity, role)) = selected {
        org.source_role = role.to_string();
        if let Some(name) = entity_name(entity) {
            org.org_name = name;
        } else {
            // One level of nested entities.
            for nested in &entity.entities {
                if let Some(name) = entity_name(nested) {
                    org.org_name = name;
                    break;
                }
            }
        }
    }

    // Any entity with a usable name beats the weaker fallbacks below.
    if org.org_name.is_empty() {
        for entity in &response.entities {
            if let Some(name) = entity_name(entity) {
                org.org_name = name;
                org.source_role = "entity".to_string();
                break;
            }
        }
    }

    if org.org_name.is_empty() && !response.name.is_empty() && !response.name.ends_with("-MNT") {
        org.org_name = response.name.clone();
        org.source_role = "network_name".to_string();
    }

    if org.org_name.is_empty() {
        if let Some(remark) = first_remark_line(response) {
            org.org_name = remark;
            org.source_role = "remark".to_string();
        }
    }

    if org.org_name.is_empty() {
        return None;
    }
    Some(org)
}

/// HTTP RDAP client with rate limiting and retry.
pub struct RdapClient {
    http: reqwest::Client,
    bootstrap_url: String,
    limiter: TokenBucket,
}

impl RdapClient {
    pub fn new(bootstrap_url: &str, user_agent: &str, rate_limit: f64) -> Result<RdapClient> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::RdapFailed(e.to_string()))?;
        Ok(RdapClient {
            http,
            bootstrap_url: bootstrap_url.trim_end_matches('/').to_string(),
            limiter: TokenBucket::new(rate_limit),
        })
    }

    /// One RDAP IP query. `Ok(None)` for 404 (no data is not an error).
    pub async fn query_ip(&self, ip: &IpAddr) -> Result<Option<RdapResponse>> {
        let url = format!("{}/ip/{}", self.bootstrap_url, ip);
        self.limiter.acquire().await;

        tokio_retry::RetryIf::spawn(
            super::retry_strategy(),
            || self.fetch(&url),
            |e: &Error| e.is_retriable(),
        )
        .await
    }

    async fn fetch(&self, url: &str) -> Result<Option<RdapResponse>> {
        debug!("RDAP GET {url}");
        let response = self
            .http
            .get(url)
            .header("Accept", "application/rdap+json")
            .send()
            .await
            .map_err(|e| Error::RdapFailed(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::TOO_MANY_REQUESTS => {
                warn!("rate limited by RDAP server");
                Err(Error::RateLimited)
            }
            status if status.is_success() => {
                let parsed: RdapResponse = response
                    .json()
                    .await
                    .map_err(|e| Error::RdapFailed(format!("bad RDAP body: {e}")))?;
                Ok(Some(parsed))
            }
            status => Err(Error::RdapFailed(format!("unexpected status {status}"))),
        }
    }

    /// Queries the representative (first) address of a prefix.
    pub async fn query_prefix(&self, prefix: &str) -> Result<Option<RdapResponse>> {
        let ip = ipcodec::representative_ip(prefix)?;
        self.query_ip(&ip).await
    }

    pub async fn org_for_prefix(&self, prefix: &str) -> Result<RdapOrg> {
        let response = self
            .query_prefix(prefix)
            .await?
            .ok_or_else(|| Error::RdapFailed(format!("no RDAP data for {prefix}")))?;
        parse_org(&response)
            .ok_or_else(|| Error::RdapFailed(format!("no organization name for {prefix}")))
    }
}

/// Cached RDAP entry stored under `CACHE:rdap:<normalized-prefix>`.
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    org: RdapOrg,
    fetched_at: DateTime<Utc>,
}

/// RDAP client backed by the main index as its cache.
pub struct CachedRdapClient {
    client: RdapClient,
    db: Arc<Database>,
    ttl: chrono::Duration,
}

const CACHE_CATEGORY: &str = "rdap";

impl CachedRdapClient {
    pub fn new(client: RdapClient, db: Arc<Database>, ttl: std::time::Duration) -> Self {
        CachedRdapClient {
            client,
            db,
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(7)),
        }
    }

    /// Cached lookup for a prefix. The boolean is true on a fresh cache
    /// hit. On upstream rate limiting a stale entry is better than
    /// nothing.
    pub async fn org_for_prefix(&self, prefix: &str) -> Result<(RdapOrg, bool)> {
        let normalized = ipcodec::normalize_prefix(prefix)?;

        let cached: Option<CacheEntry> = self.db.get_cache(CACHE_CATEGORY, &normalized)?;
        if let Some(entry) = &cached {
            if Utc::now() - entry.fetched_at < self.ttl {
                debug!("RDAP cache hit for {normalized}");
                return Ok((entry.org.clone(), true));
            }
            debug!("RDAP cache expired for {normalized}");
        }

        match self.client.org_for_prefix(&normalized).await {
            Ok(org) => {
                let entry = CacheEntry {
                    org: org.clone(),
                    fetched_at: Utc::now(),
                };
                if let Err(e) = self.db.set_cache(CACHE_CATEGORY, &normalized, &entry) {
                    warn!("failed to cache RDAP result for {normalized}: {e}");
                }
                Ok((org, false))
            }
            Err(Error::RateLimited) => {
                if let Some(entry) = cached {
                    warn!("rate limited, serving stale cache for {normalized}");
                    return Ok((entry.org, true));
                }
                Err(Error::RateLimited)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(handle: &str, roles: &[&str], name: Option<&str>) -> RdapEntity {
        let vcard = match name {
            Some(n) => json!([
                "vcard",
                [
                    ["version", {}, "text", "4.0"],
                    ["fn", {}, "text", n],
                ]
            ]),
            None => serde_json::Value::Null,
        };
        RdapEntity {
            handle: handle.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            vcard_array: vcard,
            entities: Vec::new(),
        }
    }

    #[test]
    fn test_customer_role_wins() {
        let response = RdapResponse {
            name: "SOME-NET-NAME".into(),
            entities: vec![
                entity("REG-1", &["registrant"], Some("Registrant Org")),
                entity("CUST-1", &["customer"], Some("Customer Org")),
            ],
            ..RdapResponse::default()
        };
        let org = parse_org(&response).unwrap();
        assert_eq!(org.org_name, "Customer Org");
        assert_eq!(org.source_role, "customer");
    }

    #[test]
    fn test_org_registrant_preferred_over_plain_registrant() {
        let response = RdapResponse {
            entities: vec![
                entity("PLAIN-1", &["registrant"], Some("Plain Registrant")),
                entity("ORG-ABC1-RIPE", &["registrant"], Some("Org Registrant")),
            ],
            ..RdapResponse::default()
        };
        let org = parse_org(&response).unwrap();
        assert_eq!(org.org_name, "Org Registrant");
        assert_eq!(org.source_role, "registrant");
    }

    #[test]
    fn test_mnt_entities_skipped() {
        let response = RdapResponse {
            entities: vec![entity("EXAMPLE-MNT", &["registrant"], Some("Maintainer"))],
            name: "REAL-NETWORK-NAME".into(),
            ..RdapResponse::default()
        };
        let org = parse_org(&response).unwrap();
        assert_eq!(org.org_name, "REAL-NETWORK-NAME");
        assert_eq!(org.source_role, "network_name");
    }

    #[test]
    fn test_network_name_requires_quality() {
        // Short and UK- prefixed names are not good network names, and an
        // entity without roles still carries a usable vcard.
        let response = RdapResponse {
            name: "UK-BT-CENTRAL".into(),
            entities: vec![entity("E-1", &[], Some("Entity Name"))],
            ..RdapResponse::default()
        };
        let org = parse_org(&response).unwrap();
        assert_eq!(org.org_name, "Entity Name");
        assert_eq!(org.source_role, "entity");
    }

    #[test]
    fn test_nested_entity_recursion() {
        let mut parent = entity("REG-1", &["registrant"], None);
        parent.entities = vec![entity("SUB-1", &[], Some("Nested Org"))];
        let response = RdapResponse {
            entities: vec![parent],
            ..RdapResponse::default()
        };
        let org = parse_org(&response).unwrap();
        assert_eq!(org.org_name, "Nested Org");
        assert_eq!(org.source_role, "registrant");
    }

    #[test]
    fn test_remark_fallback() {
        let response = RdapResponse {
            remarks: vec![RdapRemark {
                title: String::new(),
                description: vec!["".into(), "FTIP004051138 TBS ENGINEERING".into()],
            }],
            ..RdapResponse::default()
        };
        let org = parse_org(&response).unwrap();
        assert_eq!(org.org_name, "FTIP004051138 TBS ENGINEERING");
        assert_eq!(org.source_role, "remark");
    }

    #[test]
    fn test_empty_response_yields_none() {
        assert!(parse_org(&RdapResponse::default()).is_none());
    }

    #[test]
    fn test_rir_from_port43() {
        let response = RdapResponse {
            port43: "whois.ripe.net".into(),
            ..RdapResponse::default()
        };
        assert_eq!(determine_rir(&response), "RIPE");
    }

    #[test]
    fn test_rir_from_links() {
        let response = RdapResponse {
            links: vec![RdapLink {
                rel: "self".into(),
                href: "https://rdap.arin.net/registry/ip/8.8.8.0".into(),
            }],
            ..RdapResponse::default()
        };
        assert_eq!(determine_rir(&response), "ARIN");
    }

    #[test]
    fn test_rir_unknown() {
        assert_eq!(determine_rir(&RdapResponse::default()), "UNKNOWN");
    }

    #[test]
    fn test_clean_org_name() {
        assert_eq!(clean_org_name("  \"Example  Corp\"  "), "Example Corp");
        assert_eq!(clean_org_name("Plain"), "Plain");
    }

    #[test]
    fn test_entity_name_org_field() {
        let e = RdapEntity {
            vcard_array: json!([
                "vcard",
                [
                    ["version", {}, "text", "4.0"],
                    ["org", {}, "text", "Acme Networks"],
                ]
            ]),
            ..RdapEntity::default()
        };
        assert_eq!(entity_name(&e).as_deref(), Some("Acme Networks"));
    }

    #[test]
    fn test_status_label_from_first_status() {
        let response = RdapResponse {
            name: "GOOD-NAME".into(),
            status: vec!["active".into(), "administrative".into()],
            ..RdapResponse::default()
        };
        let org = parse_org(&response).unwrap();
        assert_eq!(org.status_label, "active");
    }
}
