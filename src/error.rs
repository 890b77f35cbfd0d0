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

use thiserror::Error;

/// Error taxonomy shared by every index and source in the crate.
///
/// The display strings are part of the CLI contract: callers match on the
/// variant, humans read the message.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IP not found in database")]
    NotFound,

    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    #[error("invalid CIDR: {0}")]
    InvalidCidr(String),

    #[error("invalid IP range: {0}")]
    InvalidRange(String),

    #[error("start and end addresses belong to different families")]
    MixedFamily,

    #[error("overlapping range detected: {new} overlaps with {existing}")]
    OverlapConflict { new: String, existing: String },

    #[error("{new} is covered by less specific {existing}")]
    OverlapCoveredByLessSpecific { new: String, existing: String },

    #[error("rate limited by upstream service")]
    RateLimited,

    #[error("RDAP query failed: {0}")]
    RdapFailed(String),

    #[error("database is closed")]
    DatabaseClosed,

    #[error("parse error: {0}")]
    ParseError(String),

    #[error(transparent)]
    Storage(#[from] lmdb::Error),

    #[error(transparent)]
    Encoding(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for errors that a retry loop may reasonably attempt again.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::RateLimited | Error::RdapFailed(_))
    }
}
