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

//! RIPEstat announced-prefixes client, used for prefix discovery when no
//! iptoasn store is configured.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use super::limiter::TokenBucket;
use crate::config::HTTP_TIMEOUT;
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct PrefixesResponse {
    data: Option<PrefixesData>,
    status: String,
}

#[derive(Debug, Deserialize)]
struct PrefixesData {
    prefixes: Option<Vec<PrefixEntry>>,
}

#[derive(Debug, Deserialize)]
struct PrefixEntry {
    prefix: String,
}

pub struct RipeStatClient {
    http: reqwest::Client,
    base_url: String,
    limiter: TokenBucket,
}

impl RipeStatClient {
    pub fn new(base_url: &str, user_agent: &str, rate_limit: f64) -> Result<RipeStatClient> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::RdapFailed(e.to_string()))?;
        Ok(RipeStatClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter: TokenBucket::new(rate_limit),
        })
    }

    /// Currently announced prefixes for one ASN.
    pub async fn announced_prefixes(&self, asn: u32) -> Result<Vec<String>> {
        let url = format!(
            "{}/data/announced-prefixes/data.json?resource=AS{asn}",
            self.base_url
        );
        self.limiter.acquire().await;

        let response = tokio_retry::RetryIf::spawn(
            super::retry_strategy(),
            || self.fetch(&url),
            |e: &Error| e.is_retriable(),
        )
        .await?;

        let prefixes = response
            .data
            .and_then(|d| d.prefixes)
            .unwrap_or_default()
            .into_iter()
            .map(|p| p.prefix)
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>();

        debug!("AS{asn}: {} announced prefixes", prefixes.len());
        Ok(prefixes)
    }

    async fn fetch(&self, url: &str) -> Result<PrefixesResponse> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::RdapFailed(e.to_string()))?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => Err(Error::RateLimited),
            status if status.is_success() => {
                let parsed: PrefixesResponse = response
                    .json()
                    .await
                    .map_err(|e| Error::RdapFailed(format!("bad RIPEstat body: {e}")))?;
                if parsed.status != "ok" {
                    return Err(Error::RdapFailed(format!(
                        "RIPEstat status {}",
                        parsed.status
                    )));
                }
                Ok(parsed)
            }
            status => Err(Error::RdapFailed(format!("unexpected status {status}"))),
        }
    }
}

/// Concurrent prefix discovery for many ASNs. Individual failures are
/// logged and leave the ASN out of the result instead of failing the
/// whole discovery.
pub async fn fetch_for_asns(
    client: Arc<RipeStatClient>,
    asns: &[u32],
    workers: usize,
) -> HashMap<u32, Vec<String>> {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut set = JoinSet::new();

    for &asn in asns {
        let client = Arc::clone(&client);
        let semaphore = Arc::clone(&semaphore);
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            (asn, client.announced_prefixes(asn).await)
        });
    }

    let mut results = HashMap::new();
    let mut failed = 0usize;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((asn, Ok(prefixes))) => {
                results.insert(asn, prefixes);
            }
            Ok((asn, Err(e))) => {
                failed += 1;
                error!("failed to fetch prefixes for AS{asn}: {e}");
            }
            Err(e) => {
                failed += 1;
                error!("prefix discovery task panicked: {e}");
            }
        }
    }

    if failed > 0 {
        info!("{failed} ASNs failed prefix discovery");
    }
    results
}
