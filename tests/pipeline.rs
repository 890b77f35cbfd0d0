//! End-to-end scenarios: dump text in, covering-range answers out.

use std::collections::HashMap;
use std::io::Cursor;
use std::net::Ipv4Addr;
use std::str::FromStr;

use chrono::Utc;
use tempfile::TempDir;

use iporg::arinbulk::ArinDatabase;
use iporg::config::SCHEMA_VERSION;
use iporg::db::{Database, LookupResult, PutOutcome, Record};
use iporg::error::Error;
use iporg::ipcodec;
use iporg::iptoasn;
use iporg::ripebulk::{self, RipeDatabase};

fn record(prefix: &str, org: &str, asn: u32) -> Record {
    let (start, end) = ipcodec::cidr_to_range(prefix).unwrap();
    Record {
        start,
        end,
        asn,
        asn_name: format!("AS{asn}-NAME"),
        org_name: org.to_string(),
        rir: "RIPE".to_string(),
        country: "NL".to_string(),
        region: String::new(),
        city: String::new(),
        lat: 0.0,
        lon: 0.0,
        source_role: "registrant".to_string(),
        status_label: String::new(),
        prefix: prefix.to_string(),
        last_checked: Utc::now(),
        schema: SCHEMA_VERSION,
    }
}

#[test]
fn ripe_dump_to_nested_lookups() {
    // The three-level nesting scenario, driven through the RPSL parser.
    let inetnum_dump = "\
inetnum:        10.0.0.0 - 10.255.255.255
netname:        PARENT-NET
org:            ORG-P1-RIPE
status:         ALLOCATED-PA

inetnum:        10.1.0.0 - 10.1.255.255
netname:        CHILD-NET
org:            ORG-C1-RIPE
status:         ASSIGNED-PA

inetnum:        10.1.1.0 - 10.1.1.255
netname:        GRANDCHILD-NET
org:            ORG-G1-RIPE
status:         SUB-ALLOCATED-PA
";
    let org_dump = "\
organisation:   ORG-P1-RIPE
org-name:       Parent

organisation:   ORG-C1-RIPE
org-name:       Child

organisation:   ORG-G1-RIPE
org-name:       Grandchild
";

    let inetnums = ripebulk::parser::parse_inetnums(Cursor::new(inetnum_dump)).unwrap();
    let orgs = ripebulk::parser::parse_organisations(Cursor::new(org_dump)).unwrap();
    assert_eq!(inetnums.len(), 3);
    assert_eq!(orgs.len(), 3);

    let dir = TempDir::new().unwrap();
    let db = RipeDatabase::build(dir.path(), inetnums, orgs).unwrap();

    let cases = [
        ("10.1.1.1", "Grandchild", "10.1.1.0", "10.1.1.255"),
        ("10.1.2.1", "Child", "10.1.0.0", "10.1.255.255"),
        ("10.2.0.1", "Parent", "10.0.0.0", "10.255.255.255"),
    ];
    for (ip, org, start, end) in cases {
        let m = db
            .lookup_ip(Ipv4Addr::from_str(ip).unwrap())
            .unwrap()
            .unwrap_or_else(|| panic!("no match for {ip}"));
        assert_eq!(m.org_name, org, "{ip}");
        assert_eq!(m.start, Ipv4Addr::from_str(start).unwrap());
        assert_eq!(m.end, Ipv4Addr::from_str(end).unwrap());
    }

    assert!(db
        .lookup_ip(Ipv4Addr::from_str("192.0.2.1").unwrap())
        .unwrap()
        .is_none());
}

#[test]
fn ripe_placeholder_declines_so_other_sources_take_over() {
    let dump = "\
inetnum:        8.0.0.0 - 8.255.255.255
netname:        NON-RIPE-NCC-MANAGED-ADDRESS-BLOCK
descr:          IPv4 address block not managed by the RIPE NCC
";
    let inetnums = ripebulk::parser::parse_inetnums(Cursor::new(dump)).unwrap();
    let dir = TempDir::new().unwrap();
    let db = RipeDatabase::build(dir.path(), inetnums, HashMap::new()).unwrap();

    for ip in ["8.0.0.1", "8.8.8.8", "8.255.255.254"] {
        assert!(
            db.lookup_ip(Ipv4Addr::from_str(ip).unwrap()).unwrap().is_none(),
            "{ip} must not match the placeholder"
        );
    }
}

#[test]
fn iptoasn_tsv_to_collapsed_store() {
    // Row expansion (one line, two CIDRs) plus sibling collapse.
    let tsv = "\
204.110.219.0\t204.110.221.255\t16509\tUS\tARIN\tAMAZON-02
1.0.0.0\t1.0.0.255\t13335\tUS\tARIN\tCLOUDFLARENET
1.0.1.0\t1.0.1.255\t13335\tUS\tARIN\tCLOUDFLARENET
1.0.2.0\t1.0.2.255\t13335\tUS\tARIN\tCLOUDFLARENET
1.0.3.0\t1.0.3.255\t13335\tUS\tARIN\tCLOUDFLARENET
";
    let (prefixes, errors) = iptoasn::parser::parse_all(Cursor::new(tsv)).unwrap();
    assert_eq!(errors, 0);

    let amazon: Vec<_> = prefixes.iter().filter(|p| p.asn == 16509).collect();
    assert_eq!(amazon.len(), 2);
    assert_eq!(amazon[0].cidr, "204.110.219.0/24");
    assert_eq!(amazon[1].cidr, "204.110.220.0/23");

    let dir = TempDir::new().unwrap();
    let store = iptoasn::store::build(dir.path(), prefixes).unwrap();

    let collapsed = store.list_by_asn(13335, true).unwrap();
    assert_eq!(collapsed.len(), 1);
    assert_eq!(collapsed[0].cidr, "1.0.0.0/22");
    assert_eq!(collapsed[0].as_name, "CLOUDFLARENET");

    // Raw and collapsed lists cover the same address set.
    for asn in store.list_asns().unwrap() {
        let count = |list: &[iptoasn::CanonicalPrefix]| -> u128 {
            list.iter()
                .map(|p| {
                    let (s, e) = ipcodec::cidr_to_range(&p.cidr).unwrap();
                    ipcodec::to_integer(&e) - ipcodec::to_integer(&s) + 1
                })
                .sum()
        };
        assert_eq!(
            count(&store.list_by_asn(asn, false).unwrap()),
            count(&store.list_by_asn(asn, true).unwrap()),
            "AS{asn}"
        );
    }

    let stats = store.get_stats().unwrap().unwrap();
    assert_eq!(stats.unique_asns, 2);
    assert_eq!(stats.total_prefixes, 6);
}

#[test]
fn main_index_overlap_resolution_and_projection() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();

    // Builder order: least specific first, so the child is the expected
    // skip.
    db.put_range(&record("10.0.0.0/22", "Broad Org", 64500)).unwrap();
    let err = db
        .put_range(&record("10.0.1.0/24", "Specific Org", 64500))
        .unwrap_err();
    assert!(matches!(err, Error::OverlapCoveredByLessSpecific { .. }));

    // A later, wider authoritative range replaces its children.
    let outcome = db.put_range(&record("10.0.0.0/16", "Wider Org", 64500)).unwrap();
    assert_eq!(outcome, PutOutcome::Inserted { replaced_children: 1 });

    let rec = db.lookup_str("10.0.1.77").unwrap();
    assert_eq!(rec.org_name, "Wider Org");

    let view = LookupResult::from_record("10.0.1.77", &rec);
    assert_eq!(view.ip, "10.0.1.77");
    assert_eq!(view.org_name, "Wider Org");
    assert_eq!(view.prefix, "10.0.0.0/16");
    assert_eq!(view.asn, 64500);

    db.initialize_metadata("test").unwrap();
    let (v4, v6) = db.finalize_counts().unwrap();
    assert_eq!((v4, v6), (1, 0));
}

#[test]
fn arin_xml_to_lookup() {
    let xml = r#"<?xml version="1.0"?>
<arin>
  <net>
    <handle>NET-198-51-100-0-1</handle>
    <name>EXAMPLE-NET</name>
    <orgHandle>EXMP</orgHandle>
    <version>4</version>
    <netBlocks>
      <netBlock>
        <startAddress>198.051.100.000</startAddress>
        <endAddress>198.051.100.255</endAddress>
        <cidrLength>24</cidrLength>
        <type>DS</type>
      </netBlock>
    </netBlocks>
  </net>
  <org>
    <handle>EXMP</handle>
    <name>Example Corporation</name>
    <iso3166-1><code2>US</code2></iso3166-1>
  </org>
</arin>
"#;
    let dir = TempDir::new().unwrap();
    let db = ArinDatabase::build_from_reader(dir.path(), Cursor::new(xml), "2025-07-01").unwrap();

    let m = db
        .lookup_ip(Ipv4Addr::from_str("198.51.100.50").unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(m.org_name, "Example Corporation");
    assert_eq!(m.net_type, "DS");
    assert_eq!(m.country, "US");
    assert!(db
        .lookup_ip(Ipv4Addr::from_str("198.51.101.1").unwrap())
        .unwrap()
        .is_none());
}
