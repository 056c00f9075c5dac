use std::net::IpAddr;

use serde::Serialize;

/// Address family of a tracked flow. A single entry never mixes families;
/// v4-in-v6 tunnels are not modeled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub fn of(addr: &IpAddr) -> Family {
        match addr {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }
}

/// One row of the state table, rebuilt from scratch every refresh cycle.
#[derive(Clone, Debug, Serialize)]
pub struct ConnectionEntry {
    pub family: Family,
    pub proto: String,
    pub src: IpAddr,
    pub dst: IpAddr,
    /// Meaningful for tcp/udp only; 0 otherwise.
    pub sport: u16,
    pub dport: u16,
    /// TCP state name, "type/code (id)" for icmp, empty for udp.
    pub state: String,
    /// Remaining lifetime as h:mm:ss.
    pub ttl: String,
    pub bytes: u64,
    pub packets: u64,
    /// Display forms, filled by the stringify step after filtering:
    /// resolved hostnames/services when lookup is on, literal strings
    /// otherwise.
    pub src_name: String,
    pub dst_name: String,
    pub sport_name: String,
    pub dport_name: String,
}

impl ConnectionEntry {
    pub fn has_ports(&self) -> bool {
        self.proto == "tcp" || self.proto == "udp"
    }
}

/// User-configured filter state. The two skip shortcuts are display-noise
/// reducers and are never subject to inversion; the four predicates are
/// each individually negated by `invert` before the final AND.
#[derive(Clone, Debug, Default)]
pub struct FilterSpec {
    pub src: Option<(IpAddr, Option<u8>)>,
    pub dst: Option<(IpAddr, Option<u8>)>,
    pub sport: Option<u16>,
    pub dport: Option<u16>,
    pub invert: bool,
    pub skip_loopback: bool,
    pub skip_dns: bool,
}

impl FilterSpec {
    /// True when any user predicate is set (the shortcuts do not count;
    /// they do not get a filter-summary header line).
    pub fn any_active(&self) -> bool {
        self.src.is_some() || self.dst.is_some() || self.sport.is_some() || self.dport.is_some()
    }
}

/// Per-cycle totals shown in the optional header line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Totals {
    pub tcp: usize,
    pub udp: usize,
    pub icmp: usize,
    pub other: usize,
    pub skipped: usize,
}

impl Totals {
    pub fn count(&mut self, proto: &str) {
        match proto {
            "tcp" => self.tcp += 1,
            "udp" => self.udp += 1,
            "icmp" | "icmpv6" => self.icmp += 1,
            _ => self.other += 1,
        }
    }
}

/// The nine orderable columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortKey {
    SrcIp,
    SrcPort,
    DstIp,
    DstPort,
    Proto,
    State,
    Ttl,
    Bytes,
    Packets,
}

impl SortKey {
    pub const ALL: [SortKey; 9] = [
        SortKey::SrcIp,
        SortKey::SrcPort,
        SortKey::DstIp,
        SortKey::DstPort,
        SortKey::Proto,
        SortKey::State,
        SortKey::Ttl,
        SortKey::Bytes,
        SortKey::Packets,
    ];

    pub fn next(self) -> SortKey {
        let i = Self::ALL.iter().position(|k| *k == self).unwrap_or(0);
        Self::ALL[(i + 1) % Self::ALL.len()]
    }

    pub fn prev(self) -> SortKey {
        let i = Self::ALL.iter().position(|k| *k == self).unwrap_or(0);
        Self::ALL[(i + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDir {
    Ascending,
    Descending,
}

impl SortDir {
    pub fn toggled(self) -> SortDir {
        match self {
            SortDir::Ascending => SortDir::Descending,
            SortDir::Descending => SortDir::Ascending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_key_cycle_covers_all_nine() {
        let mut key = SortKey::SrcIp;
        let mut seen = Vec::new();
        for _ in 0..SortKey::ALL.len() {
            seen.push(key);
            key = key.next();
        }
        assert_eq!(key, SortKey::SrcIp);
        assert_eq!(seen.len(), 9);
        for k in SortKey::ALL {
            assert!(seen.contains(&k));
        }
    }

    #[test]
    fn sort_key_prev_inverts_next() {
        for k in SortKey::ALL {
            assert_eq!(k.next().prev(), k);
        }
    }

    #[test]
    fn filter_shortcuts_are_not_active_predicates() {
        let spec = FilterSpec {
            skip_loopback: true,
            skip_dns: true,
            ..Default::default()
        };
        assert!(!spec.any_active());
    }
}
