use indexmap::IndexMap;
use serde::Serialize;

use crate::parser::{SlabRecord, SlabStats};

/// Bytes per slab page. The server's real value depends on its
/// `item_size_max`; this default matches a stock 2 MiB configuration and is
/// not queried from the server.
pub const DEFAULT_PAGE_SIZE: u64 = 2_097_152;

const KIB: f64 = 1024.0;
const MIB: f64 = 1024.0 * 1024.0;

/// One slab class as shown to the operator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlabRow {
    pub id: u32,
    pub item_size: String,
    pub max_age: u64,
    pub total_pages: u64,
    pub number: u64,
    pub full: bool,
    pub evicted: u64,
    pub evicted_time: u64,
    pub outofmemory: u64,
    pub chunk_size: String,
    pub pages_size: String,
    pub waste: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct SlabAnalyzer {
    page_size: u64,
}

impl Default for SlabAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl SlabAnalyzer {
    pub fn new(page_size: u64) -> Self {
        Self {
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Refines every slab class that owns at least one page. Rows keep the
    /// order the server reported them in.
    pub fn refine(&self, slabs: &SlabStats) -> IndexMap<u32, SlabRow> {
        slabs
            .iter()
            .filter_map(|(&id, record)| self.refine_one(id, record).map(|row| (id, row)))
            .collect()
    }

    fn refine_one(&self, id: u32, record: &SlabRecord) -> Option<SlabRow> {
        let total_pages = record.number("total_pages").filter(|&pages| pages > 0)?;
        let chunk_size = record.number("chunk_size").unwrap_or(0);
        let number = record.number("number").unwrap_or(0);

        let item_size = if chunk_size < 1024 {
            chunk_size.to_string()
        } else {
            format!("{:.1}K", chunk_size as f64 / KIB)
        };
        let occupied = number.saturating_mul(chunk_size);
        let pages_bytes = total_pages.saturating_mul(self.page_size);
        let waste = if pages_bytes == 0 {
            0.0
        } else {
            1.0 - occupied as f64 / pages_bytes as f64
        };

        Some(SlabRow {
            id,
            item_size,
            max_age: record.number("age").unwrap_or(0),
            total_pages,
            number,
            full: record.number("free_chunks_end").unwrap_or(0) == 0,
            evicted: record.number("evicted").unwrap_or(0),
            evicted_time: record.number("evicted_time").unwrap_or(0),
            outofmemory: record.number("outofmemory").unwrap_or(0),
            chunk_size: scale_bytes(occupied),
            pages_size: scale_bytes(pages_bytes),
            waste,
        })
    }
}

/// `K` below one MiB, `M` from there on.
fn scale_bytes(bytes: u64) -> String {
    let bytes = bytes as f64;
    if bytes < MIB {
        format!("{:.1}K", bytes / KIB)
    } else {
        format!("{:.1}M", bytes / MIB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_slab_stats;

    #[test]
    fn refines_a_populated_slab() {
        let slabs = parse_slab_stats(
            "STAT items:3:number 10\nSTAT items:3:age 120\nSTAT items:3:evicted 4\n",
            "STAT 3:chunk_size 512\nSTAT 3:total_pages 2\nSTAT 3:free_chunks_end 7\n",
        );
        let rows = SlabAnalyzer::default().refine(&slabs);
        let row = &rows[&3];

        assert_eq!(row.item_size, "512");
        assert_eq!(row.chunk_size, "5.0K");
        assert_eq!(row.pages_size, "4.0M");
        assert_eq!(row.max_age, 120);
        assert_eq!(row.evicted, 4);
        assert!(!row.full);
        assert!((row.waste - (1.0 - 5120.0 / 4_194_304.0)).abs() < 1e-12);
    }

    #[test]
    fn skips_slabs_without_pages() {
        let slabs = parse_slab_stats(
            "STAT items:1:number 4\nSTAT items:2:number 9\n",
            "STAT 1:chunk_size 96\nSTAT 1:total_pages 0\nSTAT 2:chunk_size 120\n",
        );
        assert!(SlabAnalyzer::default().refine(&slabs).is_empty());
    }

    #[test]
    fn large_chunks_are_scaled_to_kilobytes() {
        let slabs = parse_slab_stats(
            "STAT items:20:number 1\n",
            "STAT 20:chunk_size 1536\nSTAT 20:total_pages 1\nSTAT 20:free_chunks_end 0\n",
        );
        let rows = SlabAnalyzer::default().refine(&slabs);
        assert_eq!(rows[&20].item_size, "1.5K");
        assert_eq!(rows[&20].pages_size, "2.0M");
        assert!(rows[&20].full);
    }

    #[test]
    fn keeps_server_order() {
        let slabs = parse_slab_stats(
            "",
            "STAT 9:chunk_size 96\nSTAT 9:total_pages 1\nSTAT 2:chunk_size 96\nSTAT 2:total_pages 1\n",
        );
        let ids: Vec<u32> = SlabAnalyzer::default().refine(&slabs).keys().copied().collect();
        assert_eq!(ids, vec![9, 2]);
    }

    #[test]
    fn oversized_counters_saturate() {
        let slabs = parse_slab_stats(
            "STAT items:1:number 18446744073709551615\n",
            "STAT 1:chunk_size 4096\nSTAT 1:total_pages 2\n",
        );
        let row = &SlabAnalyzer::new(u64::MAX).refine(&slabs)[&1];
        assert!(row.waste.is_finite());
        assert_eq!(row.waste, 0.0);

        let row = &SlabAnalyzer::new(0).refine(&slabs)[&1];
        assert_eq!(row.pages_size, "0.0K");
        assert_eq!(row.waste, 0.0);
    }

    #[test]
    fn page_size_is_overridable() {
        let slabs = parse_slab_stats("", "STAT 1:chunk_size 100\nSTAT 1:total_pages 1\n");
        let rows = SlabAnalyzer::new(1_048_576).refine(&slabs);
        assert_eq!(rows[&1].pages_size, "1.0M");
    }
}
