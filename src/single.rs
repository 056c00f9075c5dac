//! Single-shot mode: one acquire/filter/sort/layout pass to a plain
//! stream, then exit. `--json` emits the rows as JSON instead of the
//! formatted table.

use anyhow::Result;
use log::warn;

use crate::layout::{self, MIN_WIDTH};
use crate::resolve::Resolver;
use crate::sort;
use crate::tui::{collect, Settings};
use crate::types::SortDir;

pub async fn run(mut s: Settings, json: bool) -> Result<()> {
    let mut resolver = Resolver::new();
    // not necessarily a tty in single-shot mode
    let width = crossterm::terminal::size()
        .map(|(w, _)| w.max(MIN_WIDTH))
        .unwrap_or(80);

    let mut snap = collect(&s, &mut resolver, width).await?;
    if s.counters && !snap.counters_seen {
        warn!("kernel accounting is off, counters disabled");
        s.counters = false;
        snap = collect(&s, &mut resolver, width).await?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&snap.entries)?);
        return Ok(());
    }

    let dir = match s.sort_dir {
        SortDir::Ascending => "",
        SortDir::Descending => " (reversed)",
    };
    println!(
        "cttop -- sorted by {}{}",
        sort::header_label(s.sort_key, s.lookup),
        dir
    );
    println!("{}", layout::header_row(&snap.widths));
    for entry in &snap.entries {
        let row = layout::format_row(entry, &snap.widths, s.lookup, s.mark_truncated);
        println!("{}", row.trim_end());
    }
    if s.totals {
        let t = snap.totals;
        println!(
            "Totals: {} tcp, {} udp, {} icmp, {} other, {} skipped",
            t.tcp, t.udp, t.icmp, t.other, t.skipped
        );
    }
    Ok(())
}
