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

//! External data sources: RDAP, MaxMind readers and the RIPEstat API.

pub mod limiter;
pub mod maxmind;
pub mod rdap;
pub mod ripestat;

use std::time::Duration;

use tokio_retry::strategy::ExponentialBackoff;

use crate::config::{RETRY_MAX_ATTEMPTS, RETRY_MAX_DELAY};

/// Exponential backoff: 1s, 2s, 4s ... capped, limited to the configured
/// attempt count (initial try plus retries).
pub fn retry_strategy() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(2)
        .factor(500)
        .max_delay(RETRY_MAX_DELAY)
        .take(RETRY_MAX_ATTEMPTS - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_strategy_shape() {
        let delays: Vec<_> = retry_strategy().collect();
        assert_eq!(delays.len(), RETRY_MAX_ATTEMPTS - 1);
        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[1], Duration::from_secs(2));
    }
}
