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

//! Token-bucket rate limiter shared by the HTTP clients.
//!
//! The bucket is global per client, not per worker: concurrent callers
//! queue on the deficit and sleep out their share, which keeps the
//! aggregate request rate at the configured limit.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;

pub struct TokenBucket {
    /// Tokens per second; zero or negative disables limiting.
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    pub fn new(rate: f64) -> TokenBucket {
        let burst = if rate > 0.0 { rate + 1.0 } else { 0.0 };
        TokenBucket {
            rate,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }

    /// Takes one token, sleeping until it is available.
    pub async fn acquire(&self) {
        if self.rate <= 0.0 {
            return;
        }

        let wait = {
            let mut st = self.state.lock().await;
            let now = Instant::now();
            let elapsed = now.duration_since(st.last).as_secs_f64();
            st.tokens = (st.tokens + elapsed * self.rate).min(self.burst);
            st.last = now;
            st.tokens -= 1.0;
            if st.tokens >= 0.0 {
                None
            } else {
                // Negative balance is queued debt; sleep it off outside
                // the lock.
                Some(Duration::from_secs_f64(-st.tokens / self.rate))
            }
        };

        if let Some(delay) = wait {
            tokio::time::sleep(delay).await;
        }
    }
}
