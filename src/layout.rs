//! Column-width allocation and truncation.
//!
//! `ObservedMaxima` accumulates the widest string seen per field during a
//! cycle; `allocate` turns that plus the terminal width into the final
//! `ColumnWidths`. The two are distinct types on purpose: after layout,
//! callers only ever see widths to render, never the raw maxima.

use crate::types::ConnectionEntry;

/// Base minimum terminal width for the table.
pub const MIN_WIDTH: u16 = 72;
/// Counters need more room; below this they are force-disabled.
pub const MIN_WIDTH_COUNTERS: u16 = 80;

/// Interior separator spaces between the five base columns.
const BASE_SEPARATORS: usize = 4;

/// Widest string observed per field during one acquisition cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ObservedMaxima {
    pub src: usize,
    pub dst: usize,
    pub proto: usize,
    pub state: usize,
    pub ttl: usize,
    pub bytes: usize,
    pub packets: usize,
}

impl ObservedMaxima {
    /// Fold in a retained entry's fixed columns.
    pub fn note_entry(&mut self, entry: &ConnectionEntry) {
        self.proto = self.proto.max(entry.proto.len());
        self.state = self.state.max(entry.state.len());
        self.ttl = self.ttl.max(entry.ttl.len());
        self.bytes = self.bytes.max(crate::conntrack::digits(entry.bytes));
        self.packets = self.packets.max(crate::conntrack::digits(entry.packets));
    }

    /// Fold in an entry's display strings. Called after the stringify step,
    /// when the src/dst forms (with port suffixes) exist.
    pub fn note_display(&mut self, entry: &ConnectionEntry) {
        self.src = self.src.max(display_len(entry, true));
        self.dst = self.dst.max(display_len(entry, false));
    }

    /// Floor the fixed columns at their header captions so headers never
    /// overflow their own columns.
    pub fn floor_at_headers(&mut self) {
        self.src = self.src.max("Source".len());
        self.dst = self.dst.max("Destination".len());
        self.proto = self.proto.max("Proto".len());
        self.state = self.state.max("State".len());
        self.ttl = self.ttl.max("TTL".len());
        self.bytes = self.bytes.max("Bytes".len());
        self.packets = self.packets.max("Packets".len());
    }
}

fn display_len(entry: &ConnectionEntry, src: bool) -> usize {
    let (name, port) = if src {
        (&entry.src_name, &entry.sport_name)
    } else {
        (&entry.dst_name, &entry.dport_name)
    };
    if entry.has_ports() {
        name.len() + 1 + port.len()
    } else {
        name.len()
    }
}

/// Final allocated widths; together with the separators these always sum to
/// the terminal width.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColumnWidths {
    pub src: usize,
    pub dst: usize,
    pub proto: usize,
    pub state: usize,
    pub ttl: usize,
    pub bytes: usize,
    pub packets: usize,
    pub counters: bool,
}

impl ColumnWidths {
    pub fn total(&self) -> usize {
        let mut t = self.src + self.dst + self.proto + self.state + self.ttl + BASE_SEPARATORS;
        if self.counters {
            t += self.bytes + self.packets + 2;
        }
        t
    }
}

/// Static fallback layout for environments with inconsistent sizing.
pub fn static_widths(counters: bool) -> ColumnWidths {
    ColumnWidths {
        src: 21,
        dst: 21,
        proto: 7,
        state: 12,
        ttl: 9,
        bytes: 10,
        packets: 10,
        counters,
    }
}

/// Divide the flexible space between source and destination.
///
/// Preference order: the even split (odd remainder to source); the even
/// split with the remainder swapped; clamp a loosely-fitting column to its
/// maximum and give the surplus to the other; otherwise the larger-maximum
/// column wins its full request (tie goes to source) and the other column
/// takes whatever remains.
fn split_flexible(left: usize, src_max: usize, dst_max: usize) -> (usize, usize) {
    let dst_even = left / 2;
    let src_even = left - dst_even;
    if src_max <= src_even && dst_max <= dst_even {
        (src_even, dst_even)
    } else if src_max <= dst_even && dst_max <= src_even {
        (dst_even, src_even)
    } else if dst_max < dst_even {
        (left - dst_max, dst_max)
    } else if src_max < src_even {
        (src_max, left - src_max)
    } else if src_max >= dst_max {
        let src_w = src_max.min(left);
        (src_w, left - src_w)
    } else {
        let dst_w = dst_max.min(left);
        (left - dst_w, dst_w)
    }
}

/// Compute the final column widths for this cycle.
///
/// Callers must have checked `term_width >= MIN_WIDTH` (and the counters
/// threshold) beforehand; below the minimum the table has no sane layout.
pub fn allocate(maxima: &ObservedMaxima, term_width: u16, counters: bool) -> ColumnWidths {
    let width = term_width as usize;
    let mut fixed = maxima.proto + maxima.state + maxima.ttl + BASE_SEPARATORS;
    if counters {
        fixed += maxima.bytes + maxima.packets + 2;
    }
    let left = width.saturating_sub(fixed);
    let (src, dst) = split_flexible(left, maxima.src, maxima.dst);
    ColumnWidths {
        src,
        dst,
        proto: maxima.proto,
        state: maxima.state,
        ttl: maxima.ttl,
        bytes: maxima.bytes,
        packets: maxima.packets,
        counters,
    }
}

fn truncate_keep_head(name: &str, budget: usize, mark: bool) -> String {
    let mut kept: String = name.chars().take(budget).collect();
    if mark && budget > 0 {
        kept.pop();
        kept.push('+');
    }
    kept
}

fn truncate_keep_tail(name: &str, budget: usize, mark: bool) -> String {
    let len = name.chars().count();
    let mut kept: String = name.chars().skip(len - budget).collect();
    if mark && budget > 0 {
        kept.remove(0);
        kept.insert(0, '+');
    }
    kept
}

/// Fit one endpoint's display string into its column.
///
/// The `:port` suffix is always preserved in full; only the name or address
/// part is cut. The side that survives is deliberately asymmetric: an
/// unresolved source keeps its head and a resolved source keeps its tail
/// (the domain suffix), with the destination mirrored, so one direction
/// keeps the most specific label and the other the domain. When `mark` is
/// set, the character at the cut boundary becomes `+`.
pub fn format_src_dst(
    name: &str,
    port: Option<&str>,
    width: usize,
    is_src: bool,
    resolving: bool,
    mark: bool,
) -> String {
    let suffix = port.map(|p| format!(":{p}")).unwrap_or_default();
    let name_len = name.chars().count();
    if name_len + suffix.len() <= width {
        return format!("{name}{suffix}");
    }
    let budget = width.saturating_sub(suffix.len());
    let keep_head = is_src != resolving;
    let cut = if keep_head {
        truncate_keep_head(name, budget, mark)
    } else {
        truncate_keep_tail(name, budget, mark)
    };
    format!("{cut}{suffix}")
}

/// One fully formatted table row. Text columns are left-aligned, counters
/// right-aligned; the line always comes out exactly the allocated width.
pub fn format_row(
    entry: &ConnectionEntry,
    widths: &ColumnWidths,
    resolving: bool,
    mark: bool,
) -> String {
    let port = |p: &str| if entry.has_ports() { Some(p.to_string()) } else { None };
    let sport = port(&entry.sport_name);
    let dport = port(&entry.dport_name);
    let src = format_src_dst(
        &entry.src_name,
        sport.as_deref(),
        widths.src,
        true,
        resolving,
        mark,
    );
    let dst = format_src_dst(
        &entry.dst_name,
        dport.as_deref(),
        widths.dst,
        false,
        resolving,
        mark,
    );
    let mut row = format!(
        "{:<sw$} {:<dw$} {:<pw$} {:<stw$}",
        src,
        dst,
        entry.proto,
        clip(&entry.state, widths.state),
        sw = widths.src,
        dw = widths.dst,
        pw = widths.proto,
        stw = widths.state,
    );
    if widths.counters {
        row.push_str(&format!(
            " {:>bw$} {:>kw$}",
            entry.bytes,
            entry.packets,
            bw = widths.bytes,
            kw = widths.packets,
        ));
    }
    row.push_str(&format!(" {:>tw$}", entry.ttl, tw = widths.ttl));
    row
}

/// Column caption line matching `format_row`'s geometry.
pub fn header_row(widths: &ColumnWidths) -> String {
    let mut row = format!(
        "{:<sw$} {:<dw$} {:<pw$} {:<stw$}",
        clip("Source", widths.src),
        clip("Destination", widths.dst),
        clip("Proto", widths.proto),
        clip("State", widths.state),
        sw = widths.src,
        dw = widths.dst,
        pw = widths.proto,
        stw = widths.state,
    );
    if widths.counters {
        row.push_str(&format!(
            " {:>bw$} {:>kw$}",
            clip("Bytes", widths.bytes),
            clip("Packets", widths.packets),
            bw = widths.bytes,
            kw = widths.packets,
        ));
    }
    row.push_str(&format!(" {:>tw$}", "TTL", tw = widths.ttl));
    row
}

fn clip(s: &str, width: usize) -> String {
    s.chars().take(width).collect()
}
