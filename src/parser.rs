//! Parsers for the text blocks returned by the `stats` family of commands.
//!
//! Every parser works line by line and skips whatever it does not
//! recognise, so a truncated or partly garbled response still yields the
//! entries that were readable.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::Serialize;

/// Generic `stats` (or `stats settings`) output, in server order. Values are
/// kept verbatim.
pub type ServerStats = IndexMap<String, String>;

/// Chunk size → item count, always ascending by size.
pub type SizeHistogram = BTreeMap<u64, u64>;

/// Value stored for a slab property the server did not report.
pub const UNKNOWN: &str = "unknown";

/// Properties every [`SlabRecord`] is guaranteed to carry.
pub const SLAB_PROPERTIES: [&str; 26] = [
    "number",
    "age",
    "evicted",
    "evicted_nonzero",
    "evicted_time",
    "outofmemory",
    "tailrepairs",
    "reclaimed",
    "expired_unfetched",
    "evicted_unfetched",
    "chunk_size",
    "chunks_per_page",
    "total_pages",
    "total_chunks",
    "used_chunks",
    "free_chunks",
    "free_chunks_end",
    "mem_requested",
    "get_hits",
    "cmd_set",
    "delete_hits",
    "incr_hits",
    "decr_hits",
    "cas_hits",
    "cas_badval",
    "touch_hits",
];

/// Properties of one slab class, merged from `stats items` and `stats slabs`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SlabRecord(IndexMap<String, String>);

impl SlabRecord {
    /// Raw value, `None` if absent or back-filled as [`UNKNOWN`].
    pub fn get(&self, property: &str) -> Option<&str> {
        self.0
            .get(property)
            .map(String::as_str)
            .filter(|value| *value != UNKNOWN)
    }

    pub fn number(&self, property: &str) -> Option<u64> {
        self.get(property)?.parse().ok()
    }

    pub fn raw(&self, property: &str) -> Option<&str> {
        self.0.get(property).map(String::as_str)
    }

    pub fn insert(&mut self, property: impl Into<String>, value: impl Into<String>) {
        self.0.insert(property.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Slab id → properties, in the order ids first appeared.
pub type SlabStats = IndexMap<u32, SlabRecord>;

/// `STAT <name> <value>` lines.
pub fn parse_flat_stats(text: &str) -> ServerStats {
    let mut stats = ServerStats::new();
    for line in text.lines() {
        let Some(rest) = line.trim().strip_prefix("STAT ") else {
            continue;
        };
        let Some((name, value)) = rest.split_once(' ') else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        stats.insert(name.to_string(), value.trim().to_string());
    }
    stats
}

/// Merges `stats items` (`STAT items:<id>:<property> <value>`) and `stats
/// slabs` (`STAT <id>:<property> <value>`) into one record per slab id, then
/// back-fills [`SLAB_PROPERTIES`] with [`UNKNOWN`].
pub fn parse_slab_stats(items_text: &str, slabs_text: &str) -> SlabStats {
    let mut slabs = SlabStats::new();

    let item_lines = items_text
        .lines()
        .filter_map(|line| line.trim().strip_prefix("STAT items:"));
    let slab_lines = slabs_text
        .lines()
        .filter_map(|line| line.trim().strip_prefix("STAT "));

    for entry in item_lines.chain(slab_lines) {
        if let Some((id, property, value)) = split_slab_entry(entry) {
            slabs.entry(id).or_default().insert(property, value);
        }
    }

    for record in slabs.values_mut() {
        for property in SLAB_PROPERTIES {
            if !record.0.contains_key(property) {
                record.insert(property, UNKNOWN);
            }
        }
    }
    slabs
}

/// `<id>:<property> <value>`
fn split_slab_entry(entry: &str) -> Option<(u32, &str, &str)> {
    let (key, value) = entry.split_once(' ')?;
    let (id, property) = key.split_once(':')?;
    let id = id.parse().ok()?;
    let word = |c: char| c.is_ascii_alphanumeric() || c == '_';
    if property.is_empty() || !property.chars().all(word) {
        return None;
    }
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    Some((id, property, value))
}

/// `STAT <size> <count>` lines from `stats sizes`.
pub fn parse_size_histogram(text: &str) -> SizeHistogram {
    let mut sizes = SizeHistogram::new();
    for line in text.lines() {
        let Some(rest) = line.trim().strip_prefix("STAT") else {
            continue;
        };
        let mut parts = rest.split_whitespace();
        let (Some(size), Some(count)) = (parts.next(), parts.next()) else {
            continue;
        };
        if let (Ok(size), Ok(count)) = (size.parse(), count.parse()) {
            sizes.insert(size, count);
        }
    }
    sizes
}

/// Builds the command that dumps keys of one slab. A limit of 0 lets the
/// server decide how many keys to return.
pub fn cachedump_command(slab: u32, limit: usize) -> String {
    format!("stats cachedump {slab} {limit}")
}

/// `ITEM <key> [<size> b; <expiry> s]` lines. `None` means the dump held no
/// keys at all.
pub fn parse_key_scan(text: &str, limit: Option<usize>) -> Option<Vec<String>> {
    let keys = text
        .lines()
        .filter_map(|line| line.trim().strip_prefix("ITEM "))
        .filter_map(|rest| rest.split_whitespace().next())
        .map(str::to_string);
    let keys: Vec<String> = match limit {
        Some(limit) if limit > 0 => keys.take(limit).collect(),
        _ => keys.collect(),
    };
    (!keys.is_empty()).then_some(keys)
}
