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

//! # iporg
//!
//! Offline IP-to-organization database builder and lookup engine.
//!
//! The crate fuses bulk registry data (RIPE RPSL dumps, ARIN XML dumps,
//! the iptoasn.com TSV) with RDAP and MaxMind lookups into a persistent
//! range index that answers "who operates this address" without network
//! access at query time.
//!
//! Basic usage:
//! ```no_run
//! use iporg::db::{Database, LookupResult};
//!
//! fn main() -> anyhow::Result<()> {
//!     let db = Database::open(std::path::Path::new("./iporg-db"))?;
//!     let rec = db.lookup_str("8.8.8.8")?;
//!     println!("{}", serde_json::to_string_pretty(&LookupResult::from_record("8.8.8.8", &rec))?);
//!     Ok(())
//! }
//! ```

pub mod arinbulk;
pub mod build;
pub mod config;
pub mod db;
pub mod error;
pub mod ipcodec;
pub mod iptoasn;
pub mod ripebulk;
pub mod sources;
pub mod store;

pub use db::{Database, LookupResult, Record};
pub use error::{Error, Result};
