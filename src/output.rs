use std::fmt::Write as _;

use indexmap::IndexMap;
use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Rect},
    widgets::{Row, Table, Widget},
};
use serde::Serialize;

use crate::{
    connection::Item,
    error::Result,
    parser::{ServerStats, SizeHistogram},
    slabs::SlabRow,
};

const COLUMN_SPACING: u16 = 2;

/// How command results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Aligned columns.
    Table,
    Json,
    /// Escaped string literal of a value.
    Export,
    /// Hex dump of a value.
    Dump,
    /// Raw value bytes.
    Serialize,
}

impl OutputFormat {
    fn is_json(self) -> bool {
        self == Self::Json
    }
}

pub fn render_stats(stats: &ServerStats, format: OutputFormat) -> Result<String> {
    if format.is_json() {
        return json(stats);
    }
    let rows = stats
        .iter()
        .map(|(name, value)| vec![name.clone(), value.clone()])
        .collect();
    Ok(render_table(None, rows))
}

pub fn render_slabs(rows: &IndexMap<u32, SlabRow>, format: OutputFormat) -> Result<String> {
    if format.is_json() {
        return json(rows);
    }
    let header = [
        "#", "Item_Size", "Max_age", "Pages", "Count", "Full?", "Evicted", "Evict_Time", "OOM",
        "Chunks Size", "Pages Size", "Wasted",
    ]
    .map(String::from)
    .to_vec();
    let body = rows
        .values()
        .map(|row| {
            vec![
                row.id.to_string(),
                row.item_size.clone(),
                format!("{}s", row.max_age),
                row.total_pages.to_string(),
                row.number.to_string(),
                if row.full { "yes" } else { "no" }.to_string(),
                row.evicted.to_string(),
                row.evicted_time.to_string(),
                row.outofmemory.to_string(),
                row.chunk_size.clone(),
                row.pages_size.clone(),
                format!("{:.2}", row.waste),
            ]
        })
        .collect();
    Ok(render_table(Some(header), body))
}

pub fn render_sizes(sizes: &SizeHistogram, format: OutputFormat) -> Result<String> {
    if format.is_json() {
        return json(sizes);
    }
    let header = vec!["Size".to_string(), "Count".to_string()];
    let body = sizes
        .iter()
        .map(|(size, count)| vec![size.to_string(), count.to_string()])
        .collect();
    Ok(render_table(Some(header), body))
}

pub fn render_keys(keys: &[String], format: OutputFormat) -> Result<String> {
    if format.is_json() {
        return json(keys);
    }
    Ok(keys.join("\n"))
}

#[derive(Serialize)]
struct ItemJson<'a> {
    key: &'a str,
    flags: u32,
    bytes: usize,
    value: String,
}

/// Bytes to print for a fetched value. Only `Serialize` passes the value
/// through untouched; every other format is text.
pub fn render_item(item: &Item, format: OutputFormat) -> Result<Vec<u8>> {
    let text = match format {
        OutputFormat::Serialize => return Ok(item.value.clone()),
        OutputFormat::Json => json(&ItemJson {
            key: &item.key,
            flags: item.flags,
            bytes: item.value.len(),
            value: String::from_utf8_lossy(&item.value).into_owned(),
        })?,
        OutputFormat::Export => format!("{:?}", String::from_utf8_lossy(&item.value)),
        OutputFormat::Dump => hex_dump(item),
        OutputFormat::Table => render_table(
            None,
            vec![
                vec!["key".into(), item.key.clone()],
                vec!["flags".into(), item.flags.to_string()],
                vec!["bytes".into(), item.value.len().to_string()],
                vec!["value".into(), String::from_utf8_lossy(&item.value).into_owned()],
            ],
        ),
    };
    Ok(text.into_bytes())
}

fn json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn hex_dump(item: &Item) -> String {
    let mut out = format!(
        "key={} flags={} bytes={}",
        item.key,
        item.flags,
        item.value.len()
    );
    for (line, chunk) in item.value.chunks(16).enumerate() {
        let hex = chunk
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect::<Vec<_>>()
            .join(" ");
        let ascii: String = chunk
            .iter()
            .map(|&byte| {
                if byte.is_ascii_graphic() || byte == b' ' {
                    char::from(byte)
                } else {
                    '.'
                }
            })
            .collect();
        let _ = write!(out, "\n{:08x}  {hex:<47}  |{ascii}|", line * 16);
    }
    out
}

/// Lays `rows` out with ratatui's table widget on an off-screen buffer sized
/// to fit, then reads the cells back as text.
fn render_table(header: Option<Vec<String>>, rows: Vec<Vec<String>>) -> String {
    let mut widths: Vec<u16> = Vec::new();
    for cells in header.iter().chain(rows.iter()) {
        if widths.len() < cells.len() {
            widths.resize(cells.len(), 0);
        }
        for (width, cell) in widths.iter_mut().zip(cells) {
            let len = u16::try_from(cell.chars().count()).unwrap_or(u16::MAX);
            *width = (*width).max(len);
        }
    }
    let spacing = COLUMN_SPACING.saturating_mul(u16::try_from(widths.len().saturating_sub(1)).unwrap_or(0));
    let width = widths.iter().fold(spacing, |sum, w| sum.saturating_add(*w));
    let height = u16::try_from(rows.len() + usize::from(header.is_some())).unwrap_or(u16::MAX);
    if width == 0 || height == 0 {
        return String::new();
    }

    let mut table = Table::new(
        rows.into_iter().map(Row::new),
        widths.iter().map(|&w| Constraint::Length(w)),
    )
    .column_spacing(COLUMN_SPACING);
    if let Some(header) = header {
        table = table.header(Row::new(header));
    }

    let area = Rect::new(0, 0, width, height);
    let mut buf = Buffer::empty(area);
    table.render(area, &mut buf);

    (0..height)
        .map(|y| {
            let line: String = (0..width).map(|x| buf[(x, y)].symbol()).collect();
            line.trim_end().to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sizes_are_sorted_in_every_format() {
        let sizes = SizeHistogram::from([(64, 3), (16, 5)]);

        let table = render_sizes(&sizes, OutputFormat::Table).unwrap();
        assert_eq!(table, "Size  Count\n16    5\n64    3");

        let json = render_sizes(&sizes, OutputFormat::Json).unwrap();
        let at16 = json.find("\"16\"").unwrap();
        let at64 = json.find("\"64\"").unwrap();
        assert!(at16 < at64);
    }

    #[test]
    fn slab_rows_show_the_waste_ratio() {
        let stats = crate::parser::parse_slab_stats(
            "STAT items:3:number 10\r\nSTAT items:3:age 120\r\nEND\r\n",
            "STAT 3:chunk_size 512\r\nSTAT 3:total_pages 2\r\nSTAT 3:free_chunks_end 0\r\nEND\r\n",
        );
        let rows = crate::slabs::SlabAnalyzer::default().refine(&stats);
        let table = render_slabs(&rows, OutputFormat::Table).unwrap();
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Chunks Size"));
        assert!(lines[0].contains("Pages Size"));
        assert!(lines[0].ends_with("Wasted"));
        assert_eq!(
            lines[1].split_whitespace().collect::<Vec<_>>(),
            ["3", "512", "120s", "2", "10", "yes", "0", "0", "0", "5.0K", "4.0M", "1.00"]
        );
    }

    #[test]
    fn stats_table_aligns_values() {
        let stats: ServerStats = [("pid", "1"), ("version", "1.6.21")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let table = render_stats(&stats, OutputFormat::Table).unwrap();
        assert_eq!(table, "pid      1\nversion  1.6.21");
    }

    #[test]
    fn stats_json_keeps_server_order() {
        let stats: ServerStats = [("uptime", "5"), ("pid", "1")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let json = render_stats(&stats, OutputFormat::Json).unwrap();
        assert!(json.find("uptime").unwrap() < json.find("pid").unwrap());
    }

    #[test]
    fn empty_table_is_empty() {
        assert_eq!(render_table(None, Vec::new()), "");
    }

    fn item(value: &[u8]) -> Item {
        Item {
            key: "k".to_string(),
            flags: 7,
            value: value.to_vec(),
        }
    }

    #[test]
    fn serialize_passes_bytes_through() {
        let raw = [0u8, 159, 146, 150];
        assert_eq!(render_item(&item(&raw), OutputFormat::Serialize).unwrap(), raw);
    }

    #[test]
    fn export_escapes_control_characters() {
        let out = render_item(&item(b"a\"b\n"), OutputFormat::Export).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), r#""a\"b\n""#);
    }

    #[test]
    fn dump_shows_header_and_hex() {
        let out = render_item(&item(b"hi\x01"), OutputFormat::Dump).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "key=k flags=7 bytes=3");
        assert!(lines[1].starts_with("00000000  68 69 01 "));
        assert!(lines[1].ends_with("|hi.|"));
    }

    #[test]
    fn keys_list_one_per_line() {
        let keys = vec!["a".to_string(), "b".to_string()];
        assert_eq!(render_keys(&keys, OutputFormat::Table).unwrap(), "a\nb");
        assert_eq!(
            render_keys(&keys, OutputFormat::Json).unwrap(),
            "[\n  \"a\",\n  \"b\"\n]"
        );
    }
}
