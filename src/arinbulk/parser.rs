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

//! Streaming parser for the ARIN bulk XML dump.
//!
//! The dump is far too large for a DOM, so this walks the event stream and
//! materializes only `<net>` and `<org>` subtrees; `<asn>` and `<poc>`
//! elements pass through untouched. Organizations are handed to the caller
//! as they complete so the build never holds them all in memory.

use std::io::BufRead;
use std::net::Ipv4Addr;
use std::str::FromStr;

use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::debug;

use super::{NetBlock, Organization};
use crate::error::{Error, Result};
use crate::ipcodec::ipv4_to_u32;

/// ARIN zero-pads octets (`001.002.003.004`); strip per octet before
/// parsing, keeping a lone zero.
fn strip_leading_zeros(ip: &str) -> String {
    ip.split('.')
        .map(|part| {
            let stripped = part.trim_start_matches('0');
            if stripped.is_empty() { "0" } else { stripped }
        })
        .collect::<Vec<_>>()
        .join(".")
}

#[derive(Debug, Default)]
struct NetXml {
    handle: String,
    name: String,
    org_handle: String,
    parent_handle: String,
    update_date: String,
    version: String,
    blocks: Vec<BlockXml>,
}

#[derive(Debug, Default)]
struct BlockXml {
    start_address: String,
    end_address: String,
    cidr_length: String,
    block_type: String,
}

fn finish_net(net: NetXml, out: &mut Vec<NetBlock>, skipped: &mut usize) {
    // Only IPv4 nets are indexed.
    if net.version != "4" {
        return;
    }
    for block in &net.blocks {
        match parse_block(&net, block) {
            Ok(nb) => out.push(nb),
            Err(_) => *skipped += 1,
        }
    }
}

fn parse_block(net: &NetXml, block: &BlockXml) -> Result<NetBlock> {
    let start = Ipv4Addr::from_str(&strip_leading_zeros(&block.start_address))
        .map_err(|_| Error::InvalidAddress(block.start_address.clone()))?;
    let end = Ipv4Addr::from_str(&strip_leading_zeros(&block.end_address))
        .map_err(|_| Error::InvalidAddress(block.end_address.clone()))?;

    let mut cidrs = Vec::new();
    if !block.cidr_length.is_empty() {
        cidrs.push(format!("{start}/{}", block.cidr_length));
    }

    Ok(NetBlock {
        start: ipv4_to_u32(start),
        end: ipv4_to_u32(end),
        net_name: net.name.clone(),
        net_handle: net.handle.clone(),
        org_id: net.org_handle.clone(),
        net_type: block.block_type.clone(),
        parent_net: net.parent_handle.clone(),
        cidrs,
        update_date: net.update_date.clone(),
    })
}

/// Walks the XML stream. Completed organizations are passed to `on_org`
/// immediately; net blocks are returned once the stream ends.
pub fn parse_stream<R, F>(reader: R, mut on_org: F) -> Result<Vec<NetBlock>>
where
    R: BufRead,
    F: FnMut(Organization) -> Result<()>,
{
    let mut xml = Reader::from_reader(reader);
    xml.trim_text(true);

    let mut buf = Vec::new();
    let mut nets: Vec<NetBlock> = Vec::new();
    let mut skipped = 0usize;

    let mut net: Option<NetXml> = None;
    let mut org: Option<Organization> = None;
    let mut block: Option<BlockXml> = None;
    // Element context for the text handler.
    let mut field = String::new();
    let mut in_iso3166_1 = false;
    let mut in_iso3166_2 = false;

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match name.as_str() {
                    "net" => net = Some(NetXml::default()),
                    "org" => org = Some(Organization::default()),
                    "netBlock" => {
                        if net.is_some() {
                            block = Some(BlockXml::default());
                        }
                    }
                    "iso3166-1" => in_iso3166_1 = true,
                    "iso3166-2" => in_iso3166_2 = true,
                    _ => {}
                }
                field = name;
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|e| Error::ParseError(e.to_string()))?
                    .into_owned();

                if let Some(block) = block.as_mut() {
                    match field.as_str() {
                        "startAddress" => block.start_address = text,
                        "endAddress" => block.end_address = text,
                        "cidrLength" => block.cidr_length = text,
                        "type" => block.block_type = text,
                        _ => {}
                    }
                } else if let Some(org) = org.as_mut() {
                    let in_iso = in_iso3166_1 || in_iso3166_2;
                    match field.as_str() {
                        "handle" if !in_iso => org.org_id = text,
                        "name" if !in_iso => org.org_name = text.trim().to_string(),
                        "code2" if in_iso3166_1 => org.country = text,
                        "code" | "code2" | "code3" if in_iso3166_2 => org.state_prov = text,
                        "updateDate" if !in_iso => org.update_date = text,
                        _ => {}
                    }
                } else if let Some(net) = net.as_mut() {
                    match field.as_str() {
                        "handle" => net.handle = text,
                        "name" => net.name = text,
                        "orgHandle" => net.org_handle = text,
                        "parentNetHandle" => net.parent_handle = text,
                        "updateDate" => net.update_date = text,
                        "version" => net.version = text,
                        _ => {}
                    }
                }
            }
            Ok(Event::End(e)) => {
                match e.name().as_ref() {
                    b"net" => {
                        if let Some(net) = net.take() {
                            finish_net(net, &mut nets, &mut skipped);
                        }
                    }
                    b"org" => {
                        if let Some(org) = org.take() {
                            if !org.org_id.is_empty() {
                                on_org(org)?;
                            }
                        }
                    }
                    b"netBlock" => {
                        if let (Some(net), Some(done)) = (net.as_mut(), block.take()) {
                            net.blocks.push(done);
                        }
                    }
                    b"iso3166-1" => in_iso3166_1 = false,
                    b"iso3166-2" => in_iso3166_2 = false,
                    _ => {}
                }
                field.clear();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(Error::ParseError(format!("XML decode error: {e}"))),
        }
        buf.clear();
    }

    if skipped > 0 {
        debug!("skipped {skipped} net blocks with unparseable addresses");
    }
    Ok(nets)
}
