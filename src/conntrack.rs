//! Acquisition source and deletion sink for the kernel connection-tracking
//! table.
//!
//! Reads the text table at `/proc/net/nf_conntrack` (path overridable, which
//! also makes the parser testable against fixture files) and yields raw
//! records as an ordinary sequence. Deletion goes through the `conntrack(8)`
//! utility as a subprocess; a failed delete is reported, never fatal.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::net::IpAddr;

use anyhow::{bail, Context, Result};
use log::debug;
use tokio::process::Command;

use crate::types::{ConnectionEntry, Family};

/// The kernel's tcp conntrack states, indexed by state code. Code 9 is
/// SYN_SENT2 in the kernel; it is displayed as LISTEN.
pub const TCP_STATES: [&str; 10] = [
    "NONE",
    "SYN_SENT",
    "SYN_RECV",
    "ESTABLISHED",
    "FIN_WAIT",
    "CLOSE_WAIT",
    "LAST_ACK",
    "TIME_WAIT",
    "CLOSE",
    "LISTEN",
];

pub fn tcp_state_name(code: u8) -> &'static str {
    TCP_STATES.get(code as usize).copied().unwrap_or("NONE")
}

fn canonical_tcp_state(token: &str) -> String {
    if token == "SYN_SENT2" {
        return "LISTEN".into();
    }
    if let Ok(code) = token.parse::<u8>() {
        return tcp_state_name(code).into();
    }
    token.to_string()
}

/// Layer-4 protocol registry; unknown numbers render as the numeric string.
pub fn proto_name(num: u8) -> String {
    match num {
        1 => "icmp".into(),
        2 => "igmp".into(),
        6 => "tcp".into(),
        17 => "udp".into(),
        33 => "dccp".into(),
        47 => "gre".into(),
        50 => "esp".into(),
        51 => "ah".into(),
        58 => "icmpv6".into(),
        132 => "sctp".into(),
        136 => "udplite".into(),
        n => n.to_string(),
    }
}

/// Remaining lifetime as h:mm:ss, zero-padded except the hours.
pub fn format_ttl(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs / 60) % 60;
    let seconds = secs % 60;
    format!("{}:{:02}:{:02}", hours, minutes, seconds)
}

/// Digit count of a counter column; 0 still needs one column.
pub fn digits(mut n: u64) -> usize {
    let mut width = 1;
    while n >= 10 {
        n /= 10;
        width += 1;
    }
    width
}

/// One parsed line of the conntrack table, before normalization.
#[derive(Clone, Debug)]
pub struct RawEntry {
    pub family: Family,
    pub proto_num: u8,
    pub ttl_secs: u64,
    pub src: IpAddr,
    pub dst: IpAddr,
    pub sport: u16,
    pub dport: u16,
    /// tcp state token, verbatim from the table.
    pub state: Option<String>,
    pub icmp_type: Option<u16>,
    pub icmp_code: Option<u16>,
    pub icmp_id: Option<u16>,
    /// Direction-summed counters; present only when kernel accounting is on.
    pub bytes: u64,
    pub packets: u64,
    pub has_counters: bool,
}

/// Dump the whole table. Open or read failure is fatal to the caller: a
/// partial table from a mid-read failure is never used.
pub fn read_table(path: &str, family_filter: Option<Family>) -> Result<Vec<RawEntry>> {
    let file = File::open(path)
        .with_context(|| format!("cannot open connection-tracking table {path}"))?;
    let reader = BufReader::new(file);
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line.with_context(|| format!("cannot read {path}"))?;
        if let Some(raw) = parse_line(&line) {
            if family_filter.map_or(true, |f| raw.family == f) {
                out.push(raw);
            }
        }
    }
    debug!("conntrack dump: {} entries from {}", out.len(), path);
    Ok(out)
}

/// Leading tokens that identify the old ip_conntrack format, which starts
/// straight at the l4 column.
fn is_l4_token(tok: &str) -> bool {
    matches!(
        tok,
        "tcp" | "udp" | "icmp" | "icmpv6" | "igmp" | "dccp" | "gre" | "esp" | "ah" | "sctp"
            | "udplite" | "unknown"
    ) || tok.parse::<u8>().is_ok()
}

/// Parse one nf_conntrack line. The old ip_conntrack format (no leading l3
/// columns) is accepted as ipv4; a line with an unrecognized family tag is
/// dropped, never guessed at. Returns None for lines that do not carry a
/// complete flow tuple.
pub fn parse_line(line: &str) -> Option<RawEntry> {
    let mut parts = line.split_whitespace().peekable();

    let family = match *parts.peek()? {
        "ipv4" => {
            parts.next();
            parts.next()?; // l3 protocol number
            Family::V4
        }
        "ipv6" => {
            parts.next();
            parts.next()?;
            Family::V6
        }
        tok if is_l4_token(tok) => Family::V4,
        _ => return None,
    };

    // l4 name column is informational; the number column is authoritative.
    let mut proto_num: Option<u8> = None;
    let mut ttl_secs: Option<u64> = None;
    let mut state: Option<String> = None;
    let mut src: Option<IpAddr> = None;
    let mut dst: Option<IpAddr> = None;
    let mut sport: Option<u16> = None;
    let mut dport: Option<u16> = None;
    let mut icmp_type: Option<u16> = None;
    let mut icmp_code: Option<u16> = None;
    let mut icmp_id: Option<u16> = None;
    let mut bytes = 0u64;
    let mut packets = 0u64;
    let mut has_counters = false;

    for p in parts {
        if let Some((key, value)) = p.split_once('=') {
            match key {
                // Only the original direction's tuple is kept; the reply
                // direction repeats the addresses swapped.
                "src" if src.is_none() => src = value.parse().ok(),
                "dst" if dst.is_none() => dst = value.parse().ok(),
                "sport" if sport.is_none() => sport = value.parse().ok(),
                "dport" if dport.is_none() => dport = value.parse().ok(),
                "type" if icmp_type.is_none() => icmp_type = value.parse().ok(),
                "code" if icmp_code.is_none() => icmp_code = value.parse().ok(),
                "id" if icmp_id.is_none() => icmp_id = value.parse().ok(),
                // Counters appear once per direction; the display shows
                // the combined total.
                "bytes" => {
                    bytes = bytes.saturating_add(value.parse().unwrap_or(0));
                    has_counters = true;
                }
                "packets" => {
                    packets = packets.saturating_add(value.parse().unwrap_or(0));
                    has_counters = true;
                }
                _ => {}
            }
        } else if proto_num.is_none() {
            if let Ok(n) = p.parse::<u8>() {
                proto_num = Some(n);
                continue;
            }
            // the l4 protocol name column, e.g. "tcp"
        } else if ttl_secs.is_none() {
            ttl_secs = p.parse().ok();
        } else if state.is_none() && !p.starts_with('[') {
            state = Some(p.to_string());
        }
    }

    Some(RawEntry {
        family,
        proto_num: proto_num?,
        ttl_secs: ttl_secs?,
        src: src?,
        dst: dst?,
        sport: sport.unwrap_or(0),
        dport: dport.unwrap_or(0),
        state,
        icmp_type,
        icmp_code,
        icmp_id,
        bytes,
        packets,
        has_counters,
    })
}

/// Normalize a raw record into a display entry. Width accounting is the
/// caller's job (`ObservedMaxima::note_entry`), so filtered-out entries
/// never widen a column.
pub fn build_entry(raw: &RawEntry) -> ConnectionEntry {
    let proto = proto_name(raw.proto_num);
    let state = match proto.as_str() {
        "tcp" => raw
            .state
            .as_deref()
            .map(canonical_tcp_state)
            .unwrap_or_else(|| "NONE".into()),
        "icmp" | "icmpv6" => format!(
            "{}/{} ({})",
            raw.icmp_type.unwrap_or(0),
            raw.icmp_code.unwrap_or(0),
            raw.icmp_id.unwrap_or(0)
        ),
        _ => String::new(),
    };
    let ttl = format_ttl(raw.ttl_secs);

    ConnectionEntry {
        family: raw.family,
        proto,
        src: raw.src,
        dst: raw.dst,
        sport: raw.sport,
        dport: raw.dport,
        state,
        ttl,
        bytes: raw.bytes,
        packets: raw.packets,
        src_name: String::new(),
        dst_name: String::new(),
        sport_name: String::new(),
        dport_name: String::new(),
    }
}

/// Pull type/code/id back out of the synthesized icmp state string.
fn parse_icmp_state(state: &str) -> Option<(u16, u16, u16)> {
    let (tc, rest) = state.split_once(' ')?;
    let (t, c) = tc.split_once('/')?;
    let id = rest.trim_start_matches('(').trim_end_matches(')');
    Some((t.parse().ok()?, c.parse().ok()?, id.parse().ok()?))
}

/// Argument list for `conntrack -D`, keyed the way the entry was acquired.
pub fn delete_args(entry: &ConnectionEntry) -> Vec<String> {
    let mut args = vec![
        "-D".into(),
        "-f".into(),
        match entry.family {
            Family::V4 => "ipv4".into(),
            Family::V6 => "ipv6".into(),
        },
        "-p".into(),
        entry.proto.clone(),
        "-s".into(),
        entry.src.to_string(),
        "-d".into(),
        entry.dst.to_string(),
    ];
    if entry.has_ports() {
        args.push("--sport".into());
        args.push(entry.sport.to_string());
        args.push("--dport".into());
        args.push(entry.dport.to_string());
    } else if let Some((t, c, id)) = parse_icmp_state(&entry.state) {
        // conntrack(8) keys icmpv6 entries with a separate flag family
        let flag = match entry.family {
            Family::V4 => "icmp",
            Family::V6 => "icmpv6",
        };
        args.push(format!("--{flag}-type"));
        args.push(t.to_string());
        args.push(format!("--{flag}-code"));
        args.push(c.to_string());
        args.push(format!("--{flag}-id"));
        args.push(id.to_string());
    }
    args
}

/// Ask the kernel to drop one tracked connection.
pub async fn delete_entry(entry: &ConnectionEntry) -> Result<()> {
    let args = delete_args(entry);
    let output = Command::new("conntrack")
        .args(&args)
        .output()
        .await
        .context("cannot run conntrack")?;
    if !output.status.success() {
        let err = String::from_utf8_lossy(&output.stderr);
        bail!("conntrack -D failed: {}", err.trim());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TCP_LINE: &str = "ipv4     2 tcp      6 431999 ESTABLISHED src=192.168.1.10 dst=10.0.0.2 sport=41234 dport=443 packets=12 bytes=1840 src=10.0.0.2 dst=192.168.1.10 sport=443 dport=41234 packets=10 bytes=5200 [ASSURED] mark=0 use=2";
    const UDP_LINE: &str = "ipv4     2 udp      17 29 src=192.168.1.10 dst=192.168.1.1 sport=40125 dport=53 src=192.168.1.1 dst=192.168.1.10 sport=53 dport=40125 mark=0 use=1";
    const ICMP_LINE: &str = "ipv4     2 icmp     1 27 src=192.168.1.10 dst=8.8.8.8 type=8 code=0 id=3321 packets=2 bytes=168 src=8.8.8.8 dst=192.168.1.10 type=0 code=0 id=3321 packets=2 bytes=168 mark=0 use=1";
    const V6_LINE: &str = "ipv6     10 tcp      6 117 TIME_WAIT src=2001:db8::10 dst=2001:db8::1 sport=55110 dport=8080 src=2001:db8::1 dst=2001:db8::10 sport=8080 dport=55110 [ASSURED] mark=0 use=1";

    #[test]
    fn digits_table() {
        assert_eq!(digits(0), 1);
        assert_eq!(digits(9), 1);
        assert_eq!(digits(10), 2);
        assert_eq!(digits(99999), 5);
        assert_eq!(digits(100000), 6);
    }

    #[test]
    fn ttl_is_zero_padded_except_hours() {
        assert_eq!(format_ttl(0), "0:00:00");
        assert_eq!(format_ttl(29), "0:00:29");
        assert_eq!(format_ttl(61), "0:01:01");
        assert_eq!(format_ttl(431999), "119:59:59");
    }

    #[test]
    fn parses_tcp_line_and_sums_counters() {
        let raw = parse_line(TCP_LINE).unwrap();
        assert_eq!(raw.family, Family::V4);
        assert_eq!(raw.proto_num, 6);
        assert_eq!(raw.ttl_secs, 431999);
        assert_eq!(raw.src, "192.168.1.10".parse::<IpAddr>().unwrap());
        assert_eq!(raw.dst, "10.0.0.2".parse::<IpAddr>().unwrap());
        assert_eq!(raw.sport, 41234);
        assert_eq!(raw.dport, 443);
        assert_eq!(raw.state.as_deref(), Some("ESTABLISHED"));
        assert_eq!(raw.bytes, 1840 + 5200);
        assert_eq!(raw.packets, 22);
        assert!(raw.has_counters);
    }

    #[test]
    fn parses_udp_line_without_counters() {
        let raw = parse_line(UDP_LINE).unwrap();
        assert_eq!(raw.proto_num, 17);
        assert_eq!(raw.dport, 53);
        assert!(raw.state.is_none());
        assert!(!raw.has_counters);
        assert_eq!(raw.bytes, 0);
    }

    #[test]
    fn parses_icmp_line_into_type_code_id() {
        let raw = parse_line(ICMP_LINE).unwrap();
        assert_eq!(raw.icmp_type, Some(8));
        assert_eq!(raw.icmp_code, Some(0));
        assert_eq!(raw.icmp_id, Some(3321));
        let entry = build_entry(&raw);
        assert_eq!(entry.state, "8/0 (3321)");
        assert_eq!(parse_icmp_state(&entry.state), Some((8, 0, 3321)));
    }

    #[test]
    fn parses_v6_line() {
        let raw = parse_line(V6_LINE).unwrap();
        assert_eq!(raw.family, Family::V6);
        assert_eq!(raw.src, "2001:db8::10".parse::<IpAddr>().unwrap());
        assert_eq!(raw.state.as_deref(), Some("TIME_WAIT"));
    }

    #[test]
    fn rejects_garbage_lines() {
        assert!(parse_line("").is_none());
        assert!(parse_line("not a conntrack line at all").is_none());
    }

    #[test]
    fn foreign_family_tags_are_dropped_not_misread_as_ipv4() {
        let line = "ipv7     2 tcp      6 100 ESTABLISHED src=10.0.0.1 dst=10.0.0.2 sport=1 dport=2 use=1";
        assert!(parse_line(line).is_none());
        // the old ip_conntrack format starts at the l4 column and is ipv4
        let old = "tcp      6 100 ESTABLISHED src=10.0.0.1 dst=10.0.0.2 sport=1 dport=2 use=1";
        let raw = parse_line(old).unwrap();
        assert_eq!(raw.family, Family::V4);
        assert_eq!(raw.proto_num, 6);
        assert_eq!(raw.state.as_deref(), Some("ESTABLISHED"));
    }

    #[test]
    fn unknown_protocols_render_numeric() {
        assert_eq!(proto_name(6), "tcp");
        assert_eq!(proto_name(58), "icmpv6");
        assert_eq!(proto_name(99), "99");
    }

    #[test]
    fn tcp_state_codes_map_to_the_ten_names() {
        assert_eq!(tcp_state_name(0), "NONE");
        assert_eq!(tcp_state_name(3), "ESTABLISHED");
        assert_eq!(tcp_state_name(9), "LISTEN");
        assert_eq!(tcp_state_name(200), "NONE");
        assert_eq!(canonical_tcp_state("SYN_SENT2"), "LISTEN");
        assert_eq!(canonical_tcp_state("FIN_WAIT"), "FIN_WAIT");
    }

    #[test]
    fn build_entry_normalizes_the_tcp_tuple() {
        let entry = build_entry(&parse_line(TCP_LINE).unwrap());
        assert_eq!(entry.proto, "tcp");
        assert_eq!(entry.state, "ESTABLISHED");
        assert_eq!(entry.ttl, "119:59:59");
        assert_eq!(entry.bytes, 7040);
        assert!(entry.has_ports());
    }

    #[test]
    fn delete_args_for_tcp_carry_ports() {
        let entry = build_entry(&parse_line(TCP_LINE).unwrap());
        let args = delete_args(&entry);
        assert_eq!(
            args,
            vec![
                "-D", "-f", "ipv4", "-p", "tcp", "-s", "192.168.1.10", "-d", "10.0.0.2",
                "--sport", "41234", "--dport", "443",
            ]
        );
    }

    #[test]
    fn delete_args_for_icmp_reparse_the_state_string() {
        let entry = build_entry(&parse_line(ICMP_LINE).unwrap());
        let args = delete_args(&entry);
        assert!(args.contains(&"--icmp-type".to_string()));
        assert!(args.contains(&"3321".to_string()));
        assert!(!args.contains(&"--sport".to_string()));
    }

    #[test]
    fn delete_args_for_icmpv6_use_the_v6_flag_family() {
        let line = "ipv6     10 icmpv6   58 3 src=2001:db8::10 dst=2001:db8::1 type=128 code=0 id=77 src=2001:db8::1 dst=2001:db8::10 type=129 code=0 id=77 use=1";
        let entry = build_entry(&parse_line(line).unwrap());
        assert_eq!(entry.state, "128/0 (77)");
        let args = delete_args(&entry);
        assert!(args.contains(&"--icmpv6-type".to_string()));
        assert!(args.contains(&"128".to_string()));
        assert!(args.contains(&"--icmpv6-id".to_string()));
        assert!(!args.contains(&"--icmp-type".to_string()));
    }
}
