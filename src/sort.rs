//! Total-order comparators over the nine sortable columns.

use std::cmp::Ordering;

use crate::addr;
use crate::types::{ConnectionEntry, SortDir, SortKey};

fn compare_by(a: &ConnectionEntry, b: &ConnectionEntry, key: SortKey, lookup: bool) -> Ordering {
    match key {
        // With lookup on, the resolved display names order the rows; raw
        // family-tagged bytes otherwise (every v4 before every v6).
        SortKey::SrcIp => {
            if lookup {
                a.src_name.cmp(&b.src_name)
            } else {
                addr::compare(&a.src, &b.src)
            }
        }
        SortKey::DstIp => {
            if lookup {
                a.dst_name.cmp(&b.dst_name)
            } else {
                addr::compare(&a.dst, &b.dst)
            }
        }
        SortKey::SrcPort => a.sport.cmp(&b.sport),
        SortKey::DstPort => a.dport.cmp(&b.dport),
        SortKey::Proto => a.proto.cmp(&b.proto),
        SortKey::State => a.state.cmp(&b.state),
        SortKey::Ttl => a.ttl.cmp(&b.ttl),
        SortKey::Bytes => a.bytes.cmp(&b.bytes),
        SortKey::Packets => a.packets.cmp(&b.packets),
    }
}

/// Stable full reorder of the filtered entries, once per refresh cycle.
/// Direction is applied by flipping the comparator's sign, so toggling it
/// reverses the whole order without re-deriving comparators.
pub fn sort_entries(entries: &mut [ConnectionEntry], key: SortKey, dir: SortDir, lookup: bool) {
    entries.sort_by(|a, b| {
        let ord = compare_by(a, b, key, lookup);
        match dir {
            SortDir::Ascending => ord,
            SortDir::Descending => ord.reverse(),
        }
    });
}

/// Column caption shown next to the sort indicator; address columns change
/// label when name resolution is active.
pub fn header_label(key: SortKey, lookup: bool) -> &'static str {
    match key {
        SortKey::SrcIp => {
            if lookup {
                "SrcName"
            } else {
                "SrcIP"
            }
        }
        SortKey::DstIp => {
            if lookup {
                "DstName"
            } else {
                "DstIP"
            }
        }
        SortKey::SrcPort => "SPort",
        SortKey::DstPort => "DPort",
        SortKey::Proto => "Proto",
        SortKey::State => "State",
        SortKey::Ttl => "TTL",
        SortKey::Bytes => "Bytes",
        SortKey::Packets => "Packets",
    }
}
