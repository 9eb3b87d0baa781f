//! Fixed-column text layout of a monitor frame.

use crate::{
    connection::ServerIdentity,
    rates::{Counter, DerivedMetrics, Usage},
};

pub const GAP: &str = "  ";
pub const MIN_INSTANCE_WIDTH: usize = 8;
pub const MAX_INSTANCE_WIDTH: usize = 22;

const ELLIPSIS: &str = "...";
const UNLIMITED: &str = "UNLD";
const TOTAL_LABEL_WIDTH: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Instance,
    Usage,
    Hit,
    Connections,
    Time,
    Evictions,
    Gets,
    Sets,
    Read,
    Write,
}

impl Column {
    pub const ALL: [Column; 10] = [
        Column::Instance,
        Column::Usage,
        Column::Hit,
        Column::Connections,
        Column::Time,
        Column::Evictions,
        Column::Gets,
        Column::Sets,
        Column::Read,
        Column::Write,
    ];

    const RATES: [(Column, Counter); 5] = [
        (Column::Evictions, Counter::Evictions),
        (Column::Gets, Counter::Gets),
        (Column::Sets, Counter::Sets),
        (Column::Read, Counter::BytesRead),
        (Column::Write, Counter::BytesWritten),
    ];

    pub fn title(self) -> &'static str {
        match self {
            Self::Instance => "INSTANCE",
            Self::Usage => "USAGE",
            Self::Hit => "HIT %",
            Self::Connections => "CONN",
            Self::Time => "TIME",
            Self::Evictions => "EVICT/s",
            Self::Gets => "GETS/s",
            Self::Sets => "SETS/s",
            Self::Read => "READ/s",
            Self::Write => "WRITE/s",
        }
    }

    /// `None` for the instance column, which takes what is left.
    fn fixed_width(self) -> Option<usize> {
        match self {
            Self::Instance => None,
            Self::Usage | Self::Hit | Self::Connections => Some(5),
            Self::Time | Self::Gets | Self::Sets | Self::Read => Some(6),
            Self::Evictions | Self::Write => Some(7),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnWidths {
    instance: usize,
}

impl ColumnWidths {
    /// Gives the instance column whatever the fixed columns leave of
    /// `terminal_width`, clamped to `[MIN_INSTANCE_WIDTH, MAX_INSTANCE_WIDTH]`.
    pub fn for_terminal(terminal_width: u16) -> Self {
        let fixed = Column::ALL.iter().filter_map(|c| c.fixed_width());
        let taken: usize = fixed.map(|w| w + GAP.len()).sum();
        let instance = usize::from(terminal_width)
            .saturating_sub(taken)
            .clamp(MIN_INSTANCE_WIDTH, MAX_INSTANCE_WIDTH);
        Self { instance }
    }

    pub fn width(&self, column: Column) -> usize {
        column.fixed_width().unwrap_or(self.instance)
    }

    pub fn instance(&self) -> usize {
        self.instance
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Title,
    Blank,
    Header,
    Server,
    Down,
    Summary,
    Footer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLine {
    pub kind: LineKind,
    pub text: String,
}

impl FrameLine {
    fn new(kind: LineKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    fn blank() -> Self {
        Self::new(LineKind::Blank, "")
    }
}

/// Builds the lines of one frame. `servers` holds `None` for servers that
/// were down this tick.
pub fn render_frame(
    widths: ColumnWidths,
    timestamp: &str,
    servers: &[(ServerIdentity, Option<DerivedMetrics>)],
) -> Vec<FrameLine> {
    let mut lines = vec![
        FrameLine::new(LineKind::Title, format!("[{timestamp}]")),
        FrameLine::blank(),
        FrameLine::new(
            LineKind::Header,
            join(Column::ALL.map(|c| left(c.title(), widths.width(c)))),
        ),
    ];

    for (identity, metrics) in servers {
        let label = left(&instance_label(identity, widths.instance()), widths.instance());
        let line = match metrics {
            Some(metrics) => FrameLine::new(LineKind::Server, server_row(widths, label, metrics)),
            None => FrameLine::new(LineKind::Down, format!("{label}{GAP}DOWN")),
        };
        lines.push(line);
    }

    let up: Vec<&DerivedMetrics> = servers.iter().filter_map(|(_, m)| m.as_ref()).collect();
    if !up.is_empty() {
        lines.push(FrameLine::blank());
        lines.push(FrameLine::new(LineKind::Summary, average_row(widths, &up)));
        lines.push(FrameLine::blank());
        lines.push(FrameLine::new(LineKind::Summary, total_row(widths, &up)));
    }

    lines.push(FrameLine::new(LineKind::Footer, "(q or ctrl-c to quit.)"));
    lines
}

fn server_row(widths: ColumnWidths, label: String, metrics: &DerivedMetrics) -> String {
    let usage = match metrics.usage {
        Usage::Percent(pct) => format!("{pct:.1}%"),
        Usage::Unlimited => UNLIMITED.to_string(),
    };
    let mut cells = vec![
        label,
        left(&usage, widths.width(Column::Usage)),
        left(&format!("{:.1}%", metrics.hit_ratio), widths.width(Column::Hit)),
        left(
            &format_number(metrics.connections as f64),
            widths.width(Column::Connections),
        ),
        left(&millis(metrics.latency.as_secs_f64() * 1000.0), widths.width(Column::Time)),
    ];
    for (column, counter) in Column::RATES {
        let rate = metrics.rate(counter).map(format_number).unwrap_or_default();
        cells.push(left(&rate, widths.width(column)));
    }
    join(cells)
}

/// Ratios and latency are averaged; rates are averaged over the servers
/// whose rate is known this tick.
fn average_row(widths: ColumnWidths, up: &[&DerivedMetrics]) -> String {
    let usage = mean(up.iter().filter_map(|m| match m.usage {
        Usage::Percent(pct) => Some(pct),
        Usage::Unlimited => None,
    }))
    .map_or_else(|| UNLIMITED.to_string(), |pct| format!("{pct:.1}%"));
    let hit = mean(up.iter().map(|m| m.hit_ratio)).unwrap_or_default();
    let connections = mean(up.iter().map(|m| m.connections as f64)).unwrap_or_default();
    let time = mean(up.iter().map(|m| m.latency.as_secs_f64() * 1000.0)).unwrap_or_default();

    let mut cells = vec![
        left("AVERAGE:", widths.instance()),
        left(&usage, widths.width(Column::Usage)),
        left(&format!("{hit:.1}%"), widths.width(Column::Hit)),
        left(&format_number(round1(connections)), widths.width(Column::Connections)),
        left(&millis(time), widths.width(Column::Time)),
    ];
    for (column, counter) in Column::RATES {
        let rate = mean(up.iter().filter_map(|m| m.rate(counter)))
            .map(|rate| format_number(round1(rate)))
            .unwrap_or_default();
        cells.push(left(&rate, widths.width(column)));
    }
    join(cells)
}

/// Counters and rates are summed. Memory is summed over servers that have a
/// limit, shown as `used / limit` across the label and usage columns.
fn total_row(widths: ColumnWidths, up: &[&DerivedMetrics]) -> String {
    let limited: Vec<&&DerivedMetrics> = up
        .iter()
        .filter(|m| matches!(m.usage, Usage::Percent(_)))
        .collect();

    let mut cells = if limited.is_empty() {
        vec![
            left("TOTAL:", widths.instance()),
            left("", widths.width(Column::Usage)),
        ]
    } else {
        let bytes: u64 = limited.iter().map(|m| m.bytes).sum();
        let max: u64 = limited.iter().map(|m| m.limit_max_bytes).sum();
        let memory = format!(
            "{}B / {}B",
            format_number(bytes as f64),
            format_number(max as f64)
        );
        let span = widths.instance() + widths.width(Column::Usage) - TOTAL_LABEL_WIDTH;
        vec![left("TOTAL:", TOTAL_LABEL_WIDTH), right(&memory, span)]
    };

    let connections: u64 = up.iter().map(|m| m.connections).sum();
    let time: f64 = up.iter().map(|m| m.latency.as_secs_f64() * 1000.0).sum();
    cells.push(left("", widths.width(Column::Hit)));
    cells.push(left(&format_number(connections as f64), widths.width(Column::Connections)));
    cells.push(left(&millis(time), widths.width(Column::Time)));
    for (column, counter) in Column::RATES {
        let known: Vec<f64> = up.iter().filter_map(|m| m.rate(counter)).collect();
        let rate = if known.is_empty() {
            String::new()
        } else {
            format_number(known.iter().sum())
        };
        cells.push(left(&rate, widths.width(column)));
    }
    join(cells)
}

/// `host:port` if it fits, otherwise the host cut short with an ellipsis.
pub fn instance_label(identity: &ServerIdentity, width: usize) -> String {
    let full = identity.to_string();
    if full.chars().count() <= width {
        return full;
    }
    let keep = width.saturating_sub(ELLIPSIS.len());
    let host: String = identity.host().chars().take(keep).collect();
    format!("{host}{ELLIPSIS}")
}

/// Plain below 1024, then `K`, `M` and `G` with one decimal.
pub fn format_number(value: f64) -> String {
    if value < 1024.0 {
        return if value.fract() == 0.0 {
            format!("{value:.0}")
        } else {
            format!("{value:.1}")
        };
    }
    let mut scaled = value / 1024.0;
    for unit in ["K", "M"] {
        if scaled < 1024.0 {
            return format!("{scaled:.1}{unit}");
        }
        scaled /= 1024.0;
    }
    format!("{scaled:.1}G")
}

fn millis(ms: f64) -> String {
    format!("{ms:.1}ms")
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn left(text: &str, width: usize) -> String {
    format!("{text:<width$}")
}

fn right(text: &str, width: usize) -> String {
    format!("{text:>width$}")
}

fn join(cells: impl IntoIterator<Item = String>) -> String {
    cells.into_iter().collect::<Vec<_>>().join(GAP)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn metrics(usage: Usage, gets: Option<f64>) -> DerivedMetrics {
        DerivedMetrics {
            bytes: 512,
            limit_max_bytes: 1024,
            usage,
            hit_ratio: 50.0,
            connections: 10,
            latency: Duration::from_micros(1500),
            evictions: Some(0.0),
            gets,
            sets: None,
            bytes_read: Some(2048.0),
            bytes_written: Some(100.0),
        }
    }

    #[test]
    fn instance_width_fills_the_terminal() {
        assert_eq!(ColumnWidths::for_terminal(80).instance(), 9);
        assert_eq!(ColumnWidths::for_terminal(200).instance(), MAX_INSTANCE_WIDTH);
        assert_eq!(ColumnWidths::for_terminal(40).instance(), MIN_INSTANCE_WIDTH);
        assert_eq!(ColumnWidths::for_terminal(0).instance(), MIN_INSTANCE_WIDTH);
    }

    #[test]
    fn header_spans_the_terminal_width() {
        for width in [79u16, 80, 85, 93] {
            let frame = render_frame(ColumnWidths::for_terminal(width), "now", &[]);
            let header = frame.iter().find(|l| l.kind == LineKind::Header).unwrap();
            assert_eq!(header.text.len(), usize::from(width), "width {width}");
        }
    }

    #[test]
    fn long_identities_are_truncated_to_host_prefix() {
        let id = ServerIdentity::new("memcached-primary.internal", "11211");
        assert_eq!(instance_label(&id, 22), "memcached-primary.i...");
        assert_eq!(instance_label(&id, 22).len(), 22);

        let short = ServerIdentity::new("10.0.0.1", "11211");
        assert_eq!(instance_label(&short, 22), "10.0.0.1:11211");
        assert_eq!(instance_label(&short, 8), "10.0....");
    }

    #[test]
    fn numbers_scale_at_1024() {
        assert_eq!(format_number(0.0), "0");
        assert_eq!(format_number(12.0), "12");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(1023.0), "1023");
        assert_eq!(format_number(1024.0), "1.0K");
        assert_eq!(format_number(1536.0), "1.5K");
        assert_eq!(format_number(3.0 * 1024.0 * 1024.0), "3.0M");
        assert_eq!(format_number(5.0 * 1024.0 * 1024.0 * 1024.0), "5.0G");
    }

    #[test]
    fn frame_has_rows_average_and_total() {
        let widths = ColumnWidths::for_terminal(80);
        let servers = vec![
            (ServerIdentity::new("a", "11211"), Some(metrics(Usage::Percent(50.0), Some(10.0)))),
            (ServerIdentity::new("b", "11211"), None),
            (ServerIdentity::new("c", "11211"), Some(metrics(Usage::Unlimited, Some(30.0)))),
        ];
        let frame = render_frame(widths, "2026-10-19 12:00:00", &servers);
        let kinds: Vec<LineKind> = frame.iter().map(|l| l.kind).collect();
        assert_eq!(
            kinds,
            vec![
                LineKind::Title,
                LineKind::Blank,
                LineKind::Header,
                LineKind::Server,
                LineKind::Down,
                LineKind::Server,
                LineKind::Blank,
                LineKind::Summary,
                LineKind::Blank,
                LineKind::Summary,
                LineKind::Footer,
            ]
        );
        assert_eq!(frame[0].text, "[2026-10-19 12:00:00]");
        assert_eq!(frame[4].text, "b:11211    DOWN");

        assert_eq!(
            frame[3].text,
            "a:11211    50.0%  50.0%  10     1.5ms   0        10              2.0K    100    "
        );
        assert_eq!(
            frame[5].text,
            "c:11211    UNLD   50.0%  10     1.5ms   0        30              2.0K    100    "
        );
        assert_eq!(
            frame[7].text,
            "AVERAGE:   50.0%  50.0%  10     1.5ms   0        20              2.0K    100    "
        );
        assert_eq!(
            frame[9].text,
            "TOTAL:  512B / 1.0KB         20     3.0ms   0        40              4.0K    200    "
        );
    }

    #[test]
    fn all_down_has_no_summary() {
        let servers = vec![(ServerIdentity::new("a", "11211"), None)];
        let frame = render_frame(ColumnWidths::for_terminal(80), "now", &servers);
        assert!(frame.iter().all(|l| l.kind != LineKind::Summary));
    }

    #[test]
    fn unknown_rates_render_blank() {
        let mut m = metrics(Usage::Unlimited, None);
        m.evictions = None;
        m.bytes_read = None;
        m.bytes_written = None;
        let servers = vec![(ServerIdentity::new("a", "11211"), Some(m))];
        let frame = render_frame(ColumnWidths::for_terminal(80), "now", &servers);
        let row = &frame[3].text;
        assert!(row.starts_with("a:11211    UNLD   50.0%  10     1.5ms"));
        assert_eq!(row.trim_end(), "a:11211    UNLD   50.0%  10     1.5ms");
        let total = frame.iter().rev().find(|l| l.kind == LineKind::Summary).unwrap();
        assert!(total.text.starts_with("TOTAL:   "));
    }
}
