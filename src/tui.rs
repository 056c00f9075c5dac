//! Continuous mode: one cooperative loop per refresh cycle.
//!
//! acquire -> filter -> stringify -> sort -> layout -> render -> wait for a
//! key or the timer -> handle input -> repeat. The poll timeout is the only
//! suspension point; a resize is recorded as a pending flag during event
//! drain and applied before the next cycle, never mid-render.

use std::fmt;
use std::io::Stdout;
use std::time::Duration;

use anyhow::{bail, Result};
use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::{
    event, execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::debug;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Line;
use ratatui::widgets::Paragraph;
use ratatui::Terminal;
use tokio::time::Instant;

use crate::conntrack;
use crate::filter;
use crate::layout::{self, ColumnWidths, ObservedMaxima, MIN_WIDTH, MIN_WIDTH_COUNTERS};
use crate::resolve::Resolver;
use crate::sort;
use crate::types::{ConnectionEntry, Family, FilterSpec, SortDir, SortKey, Totals};
use crate::viewport::Viewport;

/// Everything the pipeline needs, from the CLI or mutated by keystrokes.
#[derive(Clone, Debug)]
pub struct Settings {
    pub path: String,
    pub rate: u64,
    pub sort_key: SortKey,
    pub sort_dir: SortDir,
    pub filter: FilterSpec,
    pub family: Option<Family>,
    pub lookup: bool,
    pub counters: bool,
    pub totals: bool,
    pub mark_truncated: bool,
    pub colors: bool,
    pub static_layout: bool,
    pub no_scroll: bool,
}

/// Raised when the window cannot hold the base table. A hard boundary, not
/// a warning: layout has no sane result below the minimum.
#[derive(Debug)]
pub struct TooNarrow(pub u16);

impl fmt::Display for TooNarrow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "terminal is {} columns wide, at least {} are required",
            self.0, MIN_WIDTH
        )
    }
}

impl std::error::Error for TooNarrow {}

/// One refresh cycle's output: the filtered, sorted, stringified entries
/// and the widths to render them at.
pub struct Snapshot {
    pub entries: Vec<ConnectionEntry>,
    pub totals: Totals,
    pub widths: ColumnWidths,
    /// Whether the kernel reported byte/packet counters this cycle.
    pub counters_seen: bool,
}

/// Run the full data pipeline once. Acquisition failure is fatal to the
/// caller; everything downstream is pure.
pub async fn collect(s: &Settings, resolver: &mut Resolver, width: u16) -> Result<Snapshot> {
    let raws = conntrack::read_table(&s.path, s.family)?;
    let counters_seen = raws.iter().any(|r| r.has_counters);
    let mut maxima = ObservedMaxima::default();
    let mut totals = Totals::default();
    let mut entries = Vec::with_capacity(raws.len());
    for raw in &raws {
        let mut entry = conntrack::build_entry(raw);
        if !filter::should_include(&entry, &s.filter) {
            totals.skipped += 1;
            continue;
        }
        totals.count(&entry.proto);
        resolver.stringify(&mut entry, s.lookup).await;
        maxima.note_entry(&entry);
        maxima.note_display(&entry);
        entries.push(entry);
    }
    maxima.floor_at_headers();
    sort::sort_entries(&mut entries, s.sort_key, s.sort_dir, s.lookup);
    let widths = if s.static_layout {
        layout::static_widths(s.counters)
    } else {
        layout::allocate(&maxima, width, s.counters)
    };
    debug!(
        "cycle: {} entries, {} skipped",
        entries.len(),
        totals.skipped
    );
    Ok(Snapshot {
        entries,
        totals,
        widths,
        counters_seen,
    })
}

/// Header height for the current settings: title, status, optional totals,
/// optional filter summary, column captions.
pub fn header_lines(s: &Settings) -> usize {
    3 + usize::from(s.totals) + usize::from(s.filter.any_active())
}

enum Prompt {
    SrcFilter,
    DstFilter,
    SrcPort,
    DstPort,
    Rate,
    /// Carries the selected connection itself: the table may refresh and
    /// reorder while the confirmation is open, so a row index would go
    /// stale before the answer arrives.
    ConfirmDelete(Box<ConnectionEntry>),
}

impl Prompt {
    fn label(&self) -> &'static str {
        match self {
            Prompt::SrcFilter => "source filter (addr[/prefix], empty clears): ",
            Prompt::DstFilter => "destination filter (addr[/prefix], empty clears): ",
            Prompt::SrcPort => "source port (empty clears): ",
            Prompt::DstPort => "destination port (empty clears): ",
            Prompt::Rate => "refresh rate in seconds (1-60): ",
            Prompt::ConfirmDelete(_) => "delete the selected entry? (y/n)",
        }
    }
}

enum Action {
    Continue,
    Refresh,
    Quit,
}

pub async fn run(mut settings: Settings) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = event_loop(&mut terminal, &mut settings).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

async fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    s: &mut Settings,
) -> Result<()> {
    let mut resolver = Resolver::new();
    let (width, height) = crossterm::terminal::size()?;
    if width < MIN_WIDTH {
        bail!(TooNarrow(width));
    }
    let mut vp = Viewport::new(width, height, s.no_scroll);
    let mut warning: Option<String> = None;
    let mut prompt: Option<(Prompt, String)> = None;
    let mut resize_pending = false;

    if s.counters && width < MIN_WIDTH_COUNTERS {
        s.counters = false;
        warning = Some("terminal too narrow for counters, disabled".into());
    }
    let mut snap = collect(s, &mut resolver, vp.width).await?;
    if s.counters && !snap.counters_seen {
        s.counters = false;
        warning = Some("kernel accounting is off, counters disabled".into());
        snap = collect(s, &mut resolver, vp.width).await?;
    }
    let mut last_refresh = Instant::now();
    vp.refresh(snap.entries.len(), header_lines(s));

    loop {
        terminal.draw(|f| draw(f, s, &snap, &vp, warning.as_deref(), prompt.as_ref()))?;

        let interval = Duration::from_secs(s.rate);
        let timeout = interval
            .checked_sub(last_refresh.elapsed())
            .unwrap_or_default();
        let mut force = false;

        if event::poll(timeout)? {
            match event::read()? {
                Event::Key(key) => {
                    if warning.take().is_some() {
                        // the keystroke only acknowledges the banner
                    } else if let Some((kind, mut buf)) = prompt.take() {
                        if let Prompt::ConfirmDelete(entry) = &kind {
                            if matches!(key.code, KeyCode::Char('y') | KeyCode::Char('Y')) {
                                match conntrack::delete_entry(entry).await {
                                    Ok(()) => force = true,
                                    Err(e) => warning = Some(format!("delete failed: {e}")),
                                }
                            }
                        } else {
                            match key.code {
                                KeyCode::Esc => {}
                                KeyCode::Enter => match commit_prompt(&kind, buf.trim(), s) {
                                    Ok(()) => force = true,
                                    Err(e) => warning = Some(e),
                                },
                                KeyCode::Backspace => {
                                    buf.pop();
                                    prompt = Some((kind, buf));
                                }
                                KeyCode::Char(c) => {
                                    buf.push(c);
                                    prompt = Some((kind, buf));
                                }
                                _ => prompt = Some((kind, buf)),
                            }
                        }
                    } else {
                        match handle_key(key, s, &mut vp, &mut snap, &mut prompt, &mut warning) {
                            Action::Quit => return Ok(()),
                            Action::Refresh => force = true,
                            Action::Continue => {}
                        }
                    }
                }
                Event::Resize(_, _) => resize_pending = true,
                _ => {}
            }
        }

        if resize_pending {
            resize_pending = false;
            let (w, h) = crossterm::terminal::size()?;
            if w < MIN_WIDTH {
                bail!(TooNarrow(w));
            }
            if s.counters && w < MIN_WIDTH_COUNTERS {
                s.counters = false;
                warning = Some("terminal too narrow for counters, disabled".into());
            }
            vp.resize(w, h);
            force = true;
        }

        if force || last_refresh.elapsed() >= interval {
            snap = collect(s, &mut resolver, vp.width).await?;
            if s.counters && !snap.counters_seen {
                s.counters = false;
                warning = Some("kernel accounting is off, counters disabled".into());
                snap = collect(s, &mut resolver, vp.width).await?;
            }
            last_refresh = Instant::now();
            vp.refresh(snap.entries.len(), header_lines(s));
        }
    }
}

/// Apply a committed prompt line. Invalid input leaves the settings
/// untouched and comes back as the warning text.
fn commit_prompt(kind: &Prompt, input: &str, s: &mut Settings) -> std::result::Result<(), String> {
    match kind {
        Prompt::SrcFilter => {
            s.filter.src = if input.is_empty() {
                None
            } else {
                Some(filter::parse_addr_spec(input)?)
            };
        }
        Prompt::DstFilter => {
            s.filter.dst = if input.is_empty() {
                None
            } else {
                Some(filter::parse_addr_spec(input)?)
            };
        }
        Prompt::SrcPort => {
            s.filter.sport = parse_port(input)?;
        }
        Prompt::DstPort => {
            s.filter.dport = parse_port(input)?;
        }
        Prompt::Rate => {
            let rate: u64 = input
                .parse()
                .map_err(|_| format!("invalid refresh rate: {input}"))?;
            if !(1..=60).contains(&rate) {
                return Err(format!("refresh rate must be 1-60 seconds, got {rate}"));
            }
            s.rate = rate;
        }
        Prompt::ConfirmDelete(_) => {}
    }
    Ok(())
}

fn parse_port(input: &str) -> std::result::Result<Option<u16>, String> {
    if input.is_empty() {
        return Ok(None);
    }
    input
        .parse::<u16>()
        .map(Some)
        .map_err(|_| format!("invalid port: {input}"))
}

fn handle_key(
    key: KeyEvent,
    s: &mut Settings,
    vp: &mut Viewport,
    snap: &mut Snapshot,
    prompt: &mut Option<(Prompt, String)>,
    warning: &mut Option<String>,
) -> Action {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Char('q') | KeyCode::Char('Q') => return Action::Quit,

        KeyCode::Down | KeyCode::Char('j') if !ctrl => vp.cursor_down(),
        KeyCode::Up | KeyCode::Char('k') if !ctrl => vp.cursor_up(),
        KeyCode::PageDown => vp.page_down(),
        KeyCode::PageUp => vp.page_up(),
        KeyCode::Char('d') if ctrl => vp.page_down(),
        KeyCode::Char('u') if ctrl => vp.page_up(),
        KeyCode::Home => vp.home(),
        KeyCode::End => vp.end(),

        KeyCode::Char(' ') => return Action::Refresh,

        KeyCode::Char('s') => {
            s.sort_key = s.sort_key.next();
            sort::sort_entries(&mut snap.entries, s.sort_key, s.sort_dir, s.lookup);
        }
        KeyCode::Char('S') => {
            s.sort_key = s.sort_key.prev();
            sort::sort_entries(&mut snap.entries, s.sort_key, s.sort_dir, s.lookup);
        }
        KeyCode::Char('r') => {
            s.sort_dir = s.sort_dir.toggled();
            sort::sort_entries(&mut snap.entries, s.sort_key, s.sort_dir, s.lookup);
        }

        KeyCode::Char('l') => {
            s.lookup = !s.lookup;
            return Action::Refresh;
        }
        KeyCode::Char('c') => {
            if !s.counters && vp.width < MIN_WIDTH_COUNTERS {
                *warning = Some("terminal too narrow for counters".into());
            } else if !s.counters && !snap.counters_seen {
                *warning = Some("kernel accounting is off, no counters available".into());
            } else {
                s.counters = !s.counters;
                return Action::Refresh;
            }
        }
        KeyCode::Char('t') => {
            s.totals = !s.totals;
            return Action::Refresh;
        }
        KeyCode::Char('m') => {
            s.mark_truncated = !s.mark_truncated;
        }
        KeyCode::Char('L') => {
            s.filter.skip_loopback = !s.filter.skip_loopback;
            return Action::Refresh;
        }
        KeyCode::Char('d') => {
            s.filter.skip_dns = !s.filter.skip_dns;
            return Action::Refresh;
        }
        KeyCode::Char('i') => {
            s.filter.invert = !s.filter.invert;
            return Action::Refresh;
        }

        KeyCode::Char('f') => *prompt = Some((Prompt::SrcFilter, String::new())),
        KeyCode::Char('F') => *prompt = Some((Prompt::DstFilter, String::new())),
        KeyCode::Char('p') => *prompt = Some((Prompt::SrcPort, String::new())),
        KeyCode::Char('P') => *prompt = Some((Prompt::DstPort, String::new())),
        KeyCode::Char('R') => *prompt = Some((Prompt::Rate, String::new())),

        KeyCode::Char('x') | KeyCode::Delete => {
            if let Some(entry) = snap.entries.get(vp.cursor_row) {
                *prompt = Some((
                    Prompt::ConfirmDelete(Box::new(entry.clone())),
                    String::new(),
                ));
            }
        }
        _ => {}
    }
    Action::Continue
}

fn filter_summary(spec: &FilterSpec) -> String {
    let mut parts = Vec::new();
    if let Some((addr, prefix)) = &spec.src {
        match prefix {
            Some(p) => parts.push(format!("src {addr}/{p}")),
            None => parts.push(format!("src {addr}")),
        }
    }
    if let Some((addr, prefix)) = &spec.dst {
        match prefix {
            Some(p) => parts.push(format!("dst {addr}/{p}")),
            None => parts.push(format!("dst {addr}")),
        }
    }
    if let Some(p) = spec.sport {
        parts.push(format!("sport {p}"));
    }
    if let Some(p) = spec.dport {
        parts.push(format!("dport {p}"));
    }
    let mut line = format!("Filters: {}", parts.join(", "));
    if spec.invert {
        line.push_str(" (inverted)");
    }
    line
}

fn draw(
    f: &mut ratatui::Frame,
    s: &Settings,
    snap: &Snapshot,
    vp: &Viewport,
    warning: Option<&str>,
    prompt: Option<&(Prompt, String)>,
) {
    let area = f.area();
    let h = vp.header_lines;
    let n = snap.entries.len();
    let bold = Style::default().add_modifier(Modifier::BOLD);
    let title_style = if s.colors {
        bold.fg(Color::Cyan)
    } else {
        bold
    };

    let totals_at = if s.totals { Some(2) } else { None };
    let lines: Vec<Line> = vp
        .visible_lines()
        .map(|ln| {
            if ln == 0 {
                Line::styled("cttop - connection tracking state top", title_style).centered()
            } else if ln == 1 {
                let dir = match s.sort_dir {
                    SortDir::Ascending => "",
                    SortDir::Descending => " (rev)",
                };
                Line::raw(format!(
                    "Sort: {}{}   Rate: {}s   s/S sort  r reverse  x delete  q quit",
                    sort::header_label(s.sort_key, s.lookup),
                    dir,
                    s.rate
                ))
            } else if ln == h - 1 {
                Line::styled(layout::header_row(&snap.widths), bold)
            } else if Some(ln) == totals_at {
                let t = snap.totals;
                Line::raw(format!(
                    "Totals: {} tcp, {} udp, {} icmp, {} other, {} skipped",
                    t.tcp, t.udp, t.icmp, t.other, t.skipped
                ))
            } else if ln < h {
                Line::raw(filter_summary(&s.filter))
            } else if ln < h + n {
                let row = ln - h;
                let text =
                    layout::format_row(&snap.entries[row], &snap.widths, s.lookup, s.mark_truncated);
                if row == vp.cursor_row {
                    Line::styled(text, Style::default().add_modifier(Modifier::REVERSED))
                } else {
                    Line::raw(text)
                }
            } else {
                Line::raw("")
            }
        })
        .collect();
    f.render_widget(Paragraph::new(lines), area);

    if area.height == 0 {
        return;
    }
    let bottom = Rect::new(0, area.height - 1, area.width, 1);
    if let Some(w) = warning {
        let style = if s.colors {
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)
        } else {
            bold
        };
        f.render_widget(
            Paragraph::new(Line::styled(format!("{w} -- press any key"), style)),
            bottom,
        );
    } else if let Some((kind, buf)) = prompt {
        f.render_widget(
            Paragraph::new(Line::raw(format!("{}{}", kind.label(), buf))),
            bottom,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn settings(path: &str) -> Settings {
        Settings {
            path: path.into(),
            rate: 1,
            sort_key: SortKey::SrcIp,
            sort_dir: SortDir::Ascending,
            filter: FilterSpec::default(),
            family: None,
            lookup: false,
            counters: false,
            totals: false,
            mark_truncated: false,
            colors: true,
            static_layout: false,
            no_scroll: false,
        }
    }

    fn fixture(name: &str, contents: &str) -> String {
        let dir = std::env::temp_dir().join("cttop-tui-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn header_grows_with_totals_and_filters() {
        let mut s = settings("/dev/null");
        assert_eq!(header_lines(&s), 3);
        s.totals = true;
        assert_eq!(header_lines(&s), 4);
        s.filter.dport = Some(53);
        assert_eq!(header_lines(&s), 5);
        s.filter.skip_dns = true;
        assert_eq!(header_lines(&s), 5, "shortcuts do not add a header line");
    }

    #[test]
    fn prompt_commits_roll_back_on_bad_input() {
        let mut s = settings("/dev/null");
        assert!(commit_prompt(&Prompt::Rate, "0", &mut s).is_err());
        assert!(commit_prompt(&Prompt::Rate, "61", &mut s).is_err());
        assert_eq!(s.rate, 1);
        assert!(commit_prompt(&Prompt::Rate, "5", &mut s).is_ok());
        assert_eq!(s.rate, 5);

        assert!(commit_prompt(&Prompt::SrcFilter, "bogus", &mut s).is_err());
        assert!(s.filter.src.is_none());
        assert!(commit_prompt(&Prompt::SrcFilter, "10.0.0.0/8", &mut s).is_ok());
        assert_eq!(s.filter.src, Some(("10.0.0.0".parse().unwrap(), Some(8))));
        assert!(commit_prompt(&Prompt::SrcFilter, "", &mut s).is_ok());
        assert!(s.filter.src.is_none());

        assert!(commit_prompt(&Prompt::DstPort, "99999", &mut s).is_err());
        assert!(commit_prompt(&Prompt::DstPort, "443", &mut s).is_ok());
        assert_eq!(s.filter.dport, Some(443));
    }

    #[test]
    fn filter_summary_lists_active_predicates() {
        let mut s = settings("/dev/null");
        s.filter.src = Some(("10.0.0.0".parse().unwrap(), Some(8)));
        s.filter.dport = Some(53);
        s.filter.invert = true;
        let line = filter_summary(&s.filter);
        assert!(line.contains("src 10.0.0.0/8"));
        assert!(line.contains("dport 53"));
        assert!(line.ends_with("(inverted)"));
    }

    #[tokio::test]
    async fn collect_reads_filters_and_sorts() {
        let text = "\
ipv4     2 tcp      6 100 ESTABLISHED src=10.0.0.1 dst=10.0.0.9 sport=80 dport=2000 src=10.0.0.9 dst=10.0.0.1 sport=2000 dport=80 [ASSURED] use=1
ipv4     2 tcp      6 100 ESTABLISHED src=10.0.0.2 dst=10.0.0.9 sport=443 dport=2001 src=10.0.0.9 dst=10.0.0.2 sport=2001 dport=443 [ASSURED] use=1
ipv4     2 tcp      6 100 ESTABLISHED src=10.0.0.3 dst=10.0.0.9 sport=22 dport=2002 src=10.0.0.9 dst=10.0.0.3 sport=2002 dport=22 [ASSURED] use=1
";
        let path = fixture("three-tcp", text);
        let mut s = settings(&path);
        s.sort_key = SortKey::SrcPort;
        let mut resolver = Resolver::default();
        let snap = collect(&s, &mut resolver, 100).await.unwrap();
        let ports: Vec<u16> = snap.entries.iter().map(|e| e.sport).collect();
        assert_eq!(ports, vec![22, 80, 443]);
        assert_eq!(snap.totals.tcp, 3);
        assert!(!snap.counters_seen);
        assert_eq!(snap.widths.total(), 100);

        s.sort_dir = SortDir::Descending;
        let snap = collect(&s, &mut resolver, 100).await.unwrap();
        let ports: Vec<u16> = snap.entries.iter().map(|e| e.sport).collect();
        assert_eq!(ports, vec![443, 80, 22]);
    }

    #[test]
    fn delete_confirmation_pins_the_selected_entry() {
        let lines = [
            "ipv4     2 tcp      6 100 ESTABLISHED src=10.0.0.1 dst=10.0.0.9 sport=80 dport=2000 src=10.0.0.9 dst=10.0.0.1 sport=2000 dport=80 use=1",
            "ipv4     2 tcp      6 100 ESTABLISHED src=10.0.0.2 dst=10.0.0.9 sport=443 dport=2001 src=10.0.0.9 dst=10.0.0.2 sport=2001 dport=443 use=1",
        ];
        let entries: Vec<_> = lines
            .iter()
            .map(|l| conntrack::build_entry(&conntrack::parse_line(l).unwrap()))
            .collect();
        let mut snap = Snapshot {
            entries,
            totals: Totals::default(),
            widths: layout::static_widths(false),
            counters_seen: false,
        };
        let mut s = settings("/dev/null");
        let mut vp = Viewport::new(100, 30, false);
        vp.refresh(snap.entries.len(), 3);
        vp.cursor_down();

        let mut prompt = None;
        let mut warning: Option<String> = None;
        handle_key(
            KeyEvent::new(KeyCode::Char('x'), KeyModifiers::NONE),
            &mut s,
            &mut vp,
            &mut snap,
            &mut prompt,
            &mut warning,
        );

        // a timer refresh while the confirmation is open may drop or
        // reorder rows; the captured connection must not move with them
        snap.entries.remove(0);
        match &prompt {
            Some((Prompt::ConfirmDelete(entry), _)) => {
                assert_eq!(entry.sport, 443);
                assert_eq!(entry.src.to_string(), "10.0.0.2");
            }
            _ => panic!("expected a delete confirmation"),
        }
    }

    #[test]
    fn delete_prompt_needs_a_row_under_the_cursor() {
        let mut snap = Snapshot {
            entries: Vec::new(),
            totals: Totals::default(),
            widths: layout::static_widths(false),
            counters_seen: false,
        };
        let mut s = settings("/dev/null");
        let mut vp = Viewport::new(100, 30, false);
        let mut prompt = None;
        let mut warning: Option<String> = None;
        handle_key(
            KeyEvent::new(KeyCode::Char('x'), KeyModifiers::NONE),
            &mut s,
            &mut vp,
            &mut snap,
            &mut prompt,
            &mut warning,
        );
        assert!(prompt.is_none());
    }

    #[tokio::test]
    async fn collect_fails_on_a_missing_table() {
        let s = settings("/nonexistent/conntrack-table");
        let mut resolver = Resolver::default();
        assert!(collect(&s, &mut resolver, 100).await.is_err());
    }
}
