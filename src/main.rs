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

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

use iporg::build::Builder;
use iporg::config::{self, BuildConfig};
use iporg::db::{Database, LookupResult};
use iporg::ipcodec;
use iporg::iptoasn;
use iporg::ripebulk::{self, RipeDatabase};
use iporg::arinbulk::ArinDatabase;

#[derive(Parser)]
#[command(author, version, about = "Offline IP-to-organization database")]
struct Cli {
    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,

    /// Enable trace output (extremely verbose)
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the main index from an ASN list and the configured sources
    Build {
        /// ASN list file (one ASN per line, optional AS prefix)
        #[arg(long, conflicts_with = "all_asns")]
        asn_file: Option<String>,

        /// Enumerate every ASN in the iptoasn store instead
        #[arg(long, requires = "iptoasn_db")]
        all_asns: bool,

        /// Output database directory
        #[arg(long, default_value = "./iporg-db")]
        db: String,

        /// MaxMind ASN database path
        #[arg(long)]
        mmdb_asn: String,

        /// MaxMind City database path
        #[arg(long)]
        mmdb_city: String,

        /// iptoasn store for offline prefix discovery
        #[arg(long)]
        iptoasn_db: Option<String>,

        /// RIPE bulk index consulted before RDAP
        #[arg(long)]
        ripe_bulk_db: Option<String>,

        /// ARIN bulk index consulted before RDAP
        #[arg(long)]
        arin_bulk_db: Option<String>,

        /// Worker pool size
        #[arg(long, default_value_t = config::DEFAULT_WORKERS)]
        workers: usize,

        /// RDAP requests per second
        #[arg(long, default_value_t = config::DEFAULT_RDAP_RATE_LIMIT)]
        rdap_rate: f64,

        /// Mode B: split prefixes into geo-uniform blocks
        #[arg(long)]
        split_by_geo: bool,

        /// Skip IPv6 prefixes entirely
        #[arg(long)]
        ipv4_only: bool,

        /// Skip prefixes without bulk-index coverage instead of calling RDAP
        #[arg(long)]
        bulk_only: bool,
    },

    /// Look up one IP in the main index
    Lookup {
        /// Database directory
        #[arg(long, default_value = "./iporg-db")]
        db: String,

        /// IP address to look up
        ip: String,
    },

    /// Print main-index statistics
    Stats {
        #[arg(long, default_value = "./iporg-db")]
        db: String,
    },

    /// Build the RIPE bulk index from split dump files
    RipeBuild {
        /// ripe.db.inetnum dump (decompressed)
        #[arg(long)]
        inetnum: PathBuf,

        /// ripe.db.organisation dump (decompressed)
        #[arg(long)]
        organisation: PathBuf,

        /// Output index directory
        #[arg(long, default_value = "./ripe-bulk-db")]
        db: String,
    },

    /// Query the RIPE bulk index
    RipeQuery {
        #[arg(long, default_value = "./ripe-bulk-db")]
        db: String,
        ip: String,
    },

    /// Build the ARIN bulk index from the bulk XML dump
    ArinBuild {
        /// arin_db.xml dump (decompressed)
        #[arg(long)]
        xml: PathBuf,

        /// Output index directory
        #[arg(long, default_value = "./arin-bulk-db")]
        db: String,

        /// Source date label recorded in metadata
        #[arg(long, default_value = "")]
        source_date: String,
    },

    /// Query the ARIN bulk index
    ArinQuery {
        #[arg(long, default_value = "./arin-bulk-db")]
        db: String,
        ip: String,
    },

    /// Build the iptoasn store from a TSV dump
    IptoasnBuild {
        /// ip2asn-combined.tsv (decompressed)
        #[arg(long)]
        tsv: PathBuf,

        /// Output store directory
        #[arg(long, default_value = "./iptoasn-db")]
        db: String,
    },

    /// List prefixes for an ASN from the iptoasn store
    IptoasnQuery {
        #[arg(long, default_value = "./iptoasn-db")]
        db: String,

        /// Return the collapsed prefix list
        #[arg(long)]
        collapsed: bool,

        asn: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.trace {
        Level::TRACE
    } else if cli.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(log_level).init();

    match cli.command {
        Command::Build {
            asn_file,
            all_asns,
            db,
            mmdb_asn,
            mmdb_city,
            iptoasn_db,
            ripe_bulk_db,
            arin_bulk_db,
            workers,
            rdap_rate,
            split_by_geo,
            ipv4_only,
            bulk_only,
        } => {
            let cfg = BuildConfig {
                asn_file,
                all_asns,
                db_path: db,
                mmdb_asn_path: mmdb_asn,
                mmdb_city_path: mmdb_city,
                iptoasn_db_path: iptoasn_db,
                ripe_bulk_db_path: ripe_bulk_db,
                arin_bulk_db_path: arin_bulk_db,
                workers,
                rdap_rate_limit: rdap_rate,
                split_by_geo,
                ipv4_only,
                bulk_only,
                ..BuildConfig::default()
            };

            let cancel = CancellationToken::new();
            let signal_token = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, draining workers");
                    signal_token.cancel();
                }
            });

            let snapshot = Builder::new(cfg).build(cancel).await?;
            if snapshot.errors > 0 {
                std::process::exit(1);
            }
        }

        Command::Lookup { db, ip } => {
            let db = Database::open(Path::new(&db))?;
            let rec = db.lookup_str(&ip)?;
            let result = LookupResult::from_record(&ip, &rec);
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Command::Stats { db } => {
            let db = Database::open(Path::new(&db))?;
            let stats = db.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }

        Command::RipeBuild {
            inetnum,
            organisation,
            db,
        } => {
            info!("parsing {}", inetnum.display());
            let inetnums = ripebulk::parser::parse_inetnums(BufReader::new(
                File::open(&inetnum).context("failed to open inetnum dump")?,
            ))?;
            info!("parsing {}", organisation.display());
            let orgs = ripebulk::parser::parse_organisations(BufReader::new(
                File::open(&organisation).context("failed to open organisation dump")?,
            ))?;
            let built = RipeDatabase::build(Path::new(&db), inetnums, orgs)?;
            built.close();
        }

        Command::RipeQuery { db, ip } => {
            let db = RipeDatabase::open(Path::new(&db))?;
            let addr = ipcodec::parse_ip(&ip)?;
            let std::net::IpAddr::V4(v4) = addr else {
                anyhow::bail!("RIPE bulk index is IPv4-only");
            };
            match db.lookup_ip(v4)? {
                Some(m) => println!(
                    "{} - {}  {}  {}  {}",
                    m.start, m.end, m.org_name, m.status, m.netname
                ),
                None => println!("no match"),
            }
        }

        Command::ArinBuild {
            xml,
            db,
            source_date,
        } => {
            let reader =
                BufReader::new(File::open(&xml).context("failed to open ARIN XML dump")?);
            let built = ArinDatabase::build_from_reader(Path::new(&db), reader, &source_date)?;
            built.close();
        }

        Command::ArinQuery { db, ip } => {
            let db = ArinDatabase::open(Path::new(&db))?;
            let addr = ipcodec::parse_ip(&ip)?;
            let std::net::IpAddr::V4(v4) = addr else {
                anyhow::bail!("ARIN bulk index is IPv4-only");
            };
            match db.lookup_ip(v4)? {
                Some(m) => println!(
                    "{} - {}  {}  {}  {}",
                    m.start,
                    m.end,
                    m.org_name,
                    iporg::arinbulk::expand_net_type(&m.net_type),
                    m.net_handle
                ),
                None => println!("no match"),
            }
        }

        Command::IptoasnBuild { tsv, db } => {
            let reader = BufReader::new(File::open(&tsv).context("failed to open TSV dump")?);
            let (prefixes, errors) = iptoasn::parser::parse_all(reader)?;
            if errors > 0 {
                warn!("{errors} TSV lines rejected");
            }
            let store = iptoasn::store::build(Path::new(&db), prefixes)?;
            store.close();
        }

        Command::IptoasnQuery { db, collapsed, asn } => {
            let store = iptoasn::IpToAsnStore::open(Path::new(&db))?;
            let prefixes = store.list_by_asn(asn, collapsed)?;
            for p in prefixes {
                println!("{}\tAS{}\t{}\t{}\t{}", p.cidr, p.asn, p.country, p.registry, p.as_name);
            }
        }
    }

    Ok(())
}
