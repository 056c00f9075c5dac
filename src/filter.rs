//! Entry inclusion test, evaluated once per acquired entry.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::addr;
use crate::types::{ConnectionEntry, Family, FilterSpec};

const LOOPBACK_V4: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
const LOOPBACK_V6: IpAddr = IpAddr::V6(Ipv6Addr::LOCALHOST);

fn matches_addr(entry_addr: &IpAddr, wanted: &(IpAddr, Option<u8>)) -> bool {
    match wanted.1 {
        Some(prefix) => addr::within_network(entry_addr, &wanted.0, prefix),
        None => addr::equals(entry_addr, &wanted.0),
    }
}

/// Decide whether an entry is retained. Pure function of (entry, spec).
///
/// The loopback and DNS shortcuts run first and are never inverted; the
/// four user predicates are each individually negated under `spec.invert`
/// and then ANDed. Inactive predicates are vacuously true. First failing
/// check wins (the caller counts the skip).
pub fn should_include(entry: &ConnectionEntry, spec: &FilterSpec) -> bool {
    if spec.skip_loopback {
        let lo = match entry.family {
            Family::V4 => &LOOPBACK_V4,
            Family::V6 => &LOOPBACK_V6,
        };
        if addr::equals(&entry.src, lo) {
            return false;
        }
    }
    if spec.skip_dns && entry.dport == 53 {
        return false;
    }

    let inv = |pass: bool| pass != spec.invert;

    if let Some(wanted) = &spec.src {
        if !inv(matches_addr(&entry.src, wanted)) {
            return false;
        }
    }
    if let Some(port) = spec.sport {
        if !inv(entry.sport == port) {
            return false;
        }
    }
    if let Some(wanted) = &spec.dst {
        if !inv(matches_addr(&entry.dst, wanted)) {
            return false;
        }
    }
    if let Some(port) = spec.dport {
        if !inv(entry.dport == port) {
            return false;
        }
    }
    true
}

/// Parse an `addr[/prefix]` filter argument. The prefix must fit the
/// address family (32 for v4, 128 for v6).
pub fn parse_addr_spec(s: &str) -> Result<(IpAddr, Option<u8>), String> {
    let (addr_part, prefix_part) = match s.split_once('/') {
        Some((a, p)) => (a, Some(p)),
        None => (s, None),
    };
    let addr: IpAddr = addr_part
        .parse()
        .map_err(|_| format!("invalid address: {addr_part}"))?;
    let prefix = match prefix_part {
        None => None,
        Some(p) => {
            let bits: u8 = p.parse().map_err(|_| format!("invalid prefix: {p}"))?;
            let max = match addr {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            };
            if bits > max {
                return Err(format!("prefix /{bits} does not fit a /{max} address"));
            }
            Some(bits)
        }
    };
    Ok((addr, prefix))
}
