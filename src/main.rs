use std::net::IpAddr;
use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;
use log::error;

use cttop::filter::parse_addr_spec;
use cttop::single;
use cttop::tui::{self, Settings, TooNarrow};
use cttop::types::{Family, FilterSpec, SortDir, SortKey};

/// Top-like viewer for the kernel connection-tracking table.
#[derive(Parser, Debug)]
#[command(name = "cttop", version, about)]
struct Cli {
    /// Run one cycle to stdout and exit instead of the interactive view
    #[arg(short, long)]
    single: bool,

    /// Refresh rate in seconds (1-60)
    #[arg(short, long, default_value_t = 1)]
    rate: u64,

    /// Initial sort column
    #[arg(short = 'b', long, value_parser = parse_sort_key, default_value = "src")]
    sort: SortKey,

    /// Reverse the sort order
    #[arg(short = 'R', long)]
    reverse: bool,

    /// Only show entries from this source address or network
    #[arg(long, value_parser = parse_addr_arg)]
    src: Option<(IpAddr, Option<u8>)>,

    /// Only show entries to this destination address or network
    #[arg(long, value_parser = parse_addr_arg)]
    dst: Option<(IpAddr, Option<u8>)>,

    /// Only show entries from this source port
    #[arg(long)]
    sport: Option<u16>,

    /// Only show entries to this destination port
    #[arg(long)]
    dport: Option<u16>,

    /// Invert every address/port filter
    #[arg(short, long)]
    invert: bool,

    /// Skip entries with a loopback source
    #[arg(short = 'L', long)]
    no_loopback: bool,

    /// Skip entries to destination port 53
    #[arg(short = 'D', long)]
    no_dns: bool,

    /// Resolve hostnames and service names
    #[arg(short, long)]
    lookup: bool,

    /// Show byte and packet counters (needs kernel accounting)
    #[arg(short = 'C', long)]
    counters: bool,

    /// Show a totals line in the header
    #[arg(short, long)]
    totals: bool,

    /// Mark truncated fields with a '+'
    #[arg(short, long)]
    mark_truncated: bool,

    /// Disable colors
    #[arg(long)]
    no_colors: bool,

    /// Fixed column widths instead of dynamic allocation
    #[arg(long)]
    static_layout: bool,

    /// Single fixed window, no scrolling
    #[arg(long)]
    no_scroll: bool,

    /// Only IPv4 entries
    #[arg(short = '4', conflicts_with = "ipv6")]
    ipv4: bool,

    /// Only IPv6 entries
    #[arg(short = '6')]
    ipv6: bool,

    /// Emit JSON in single-shot mode
    #[arg(long, requires = "single")]
    json: bool,

    /// Connection-tracking table to read
    #[arg(long, default_value = "/proc/net/nf_conntrack")]
    conntrack_path: String,
}

fn parse_sort_key(s: &str) -> Result<SortKey, String> {
    match s {
        "src" => Ok(SortKey::SrcIp),
        "sport" => Ok(SortKey::SrcPort),
        "dst" => Ok(SortKey::DstIp),
        "dport" => Ok(SortKey::DstPort),
        "proto" => Ok(SortKey::Proto),
        "state" => Ok(SortKey::State),
        "ttl" => Ok(SortKey::Ttl),
        "bytes" => Ok(SortKey::Bytes),
        "packets" => Ok(SortKey::Packets),
        _ => Err(format!(
            "unknown sort key: {s} (src, sport, dst, dport, proto, state, ttl, bytes, packets)"
        )),
    }
}

fn parse_addr_arg(s: &str) -> Result<(IpAddr, Option<u8>), String> {
    parse_addr_spec(s)
}

impl Cli {
    fn settings(&self) -> Settings {
        // an out-of-range rate falls back to the default rather than failing
        let rate = if (1..=60).contains(&self.rate) {
            self.rate
        } else {
            log::warn!("refresh rate {} out of range, using 1s", self.rate);
            1
        };
        Settings {
            path: self.conntrack_path.clone(),
            rate,
            sort_key: self.sort,
            sort_dir: if self.reverse {
                SortDir::Descending
            } else {
                SortDir::Ascending
            },
            filter: FilterSpec {
                src: self.src,
                dst: self.dst,
                sport: self.sport,
                dport: self.dport,
                invert: self.invert,
                skip_loopback: self.no_loopback,
                skip_dns: self.no_dns,
            },
            family: if self.ipv4 {
                Some(Family::V4)
            } else if self.ipv6 {
                Some(Family::V6)
            } else {
                None
            },
            lookup: self.lookup,
            counters: self.counters,
            totals: self.totals,
            mark_truncated: self.mark_truncated,
            colors: !self.no_colors,
            static_layout: self.static_layout,
            no_scroll: self.no_scroll,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    color_eyre::install().ok();
    env_logger::init_from_env(Env::default().filter_or("RUST_LOG", "warn"));

    let cli = Cli::parse();
    let settings = cli.settings();

    let result = if cli.single {
        single::run(settings, cli.json).await
    } else {
        tui::run(settings).await
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(narrow) = e.downcast_ref::<TooNarrow>() {
                error!("{narrow}");
                ExitCode::from(3)
            } else {
                error!("{e:#}");
                ExitCode::from(2)
            }
        }
    }
}
