use std::{
    collections::{HashMap, HashSet},
    time::{Duration, Instant},
};

use tracing::debug;

use crate::{connection::ServerIdentity, parser::ServerStats};

/// Monotonic counters turned into per-second rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Evictions,
    Gets,
    Sets,
    BytesRead,
    BytesWritten,
}

impl Counter {
    pub const ALL: [Counter; 5] = [
        Counter::Evictions,
        Counter::Gets,
        Counter::Sets,
        Counter::BytesRead,
        Counter::BytesWritten,
    ];

    pub fn stat_name(self) -> &'static str {
        match self {
            Self::Evictions => "evictions",
            Self::Gets => "cmd_get",
            Self::Sets => "cmd_set",
            Self::BytesRead => "bytes_read",
            Self::BytesWritten => "bytes_written",
        }
    }
}

/// Memory usage relative to `limit_maxbytes`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Usage {
    Percent(f64),
    Unlimited,
}

/// One successful `stats` poll.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub stats: ServerStats,
    /// Round trip of the poll itself.
    pub latency: Duration,
    pub taken_at: Instant,
}

/// Figures for one server for one tick. Rates are `None` when unknown.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedMetrics {
    pub bytes: u64,
    pub limit_max_bytes: u64,
    pub usage: Usage,
    pub hit_ratio: f64,
    pub connections: u64,
    pub latency: Duration,
    pub evictions: Option<f64>,
    pub gets: Option<f64>,
    pub sets: Option<f64>,
    pub bytes_read: Option<f64>,
    pub bytes_written: Option<f64>,
}

impl DerivedMetrics {
    pub fn rate(&self, counter: Counter) -> Option<f64> {
        match counter {
            Counter::Evictions => self.evictions,
            Counter::Gets => self.gets,
            Counter::Sets => self.sets,
            Counter::BytesRead => self.bytes_read,
            Counter::BytesWritten => self.bytes_written,
        }
    }
}

#[derive(Debug)]
struct RateSample {
    stats: ServerStats,
    taken_at: Instant,
}

/// Keeps the previous snapshot per server so rates can be derived from
/// successive polls.
#[derive(Debug, Default)]
pub struct RateTracker {
    history: HashMap<ServerIdentity, RateSample>,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives metrics for `identity` and replaces its history with
    /// `current`. A `None` snapshot (server down) clears the history so the
    /// next successful poll starts over instead of spanning the gap.
    pub fn update(
        &mut self,
        identity: &ServerIdentity,
        current: Option<Snapshot>,
    ) -> Option<DerivedMetrics> {
        let previous = self.history.remove(identity);
        let current = current?;
        let metrics = derive(previous.as_ref(), &current);
        self.history.insert(
            identity.clone(),
            RateSample {
                stats: current.stats,
                taken_at: current.taken_at,
            },
        );
        Some(metrics)
    }

    pub fn forget(&mut self, identity: &ServerIdentity) {
        self.history.remove(identity);
    }

    /// Drops history for servers no longer in `live`.
    pub fn retain<'a>(&mut self, live: impl IntoIterator<Item = &'a ServerIdentity>) {
        let live: HashSet<&ServerIdentity> = live.into_iter().collect();
        self.history.retain(|identity, _| {
            let keep = live.contains(identity);
            if !keep {
                debug!(server = %identity, "dropping rate history");
            }
            keep
        });
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

fn derive(previous: Option<&RateSample>, current: &Snapshot) -> DerivedMetrics {
    let stats = &current.stats;
    let bytes = stat(stats, "bytes").unwrap_or(0);
    let limit_max_bytes = stat(stats, "limit_maxbytes").unwrap_or(0);
    let usage = if limit_max_bytes == 0 {
        Usage::Unlimited
    } else {
        Usage::Percent(bytes as f64 * 100.0 / limit_max_bytes as f64)
    };
    let hit_ratio = match stat(stats, "cmd_get") {
        Some(gets) if gets > 0 => {
            stat(stats, "get_hits").unwrap_or(0) as f64 * 100.0 / gets as f64
        }
        _ => 0.0,
    };

    let rate = |counter: Counter| {
        let previous = previous?;
        let elapsed = current
            .taken_at
            .checked_duration_since(previous.taken_at)?
            .as_secs_f64();
        let before = stat(&previous.stats, counter.stat_name())?;
        let now = stat(stats, counter.stat_name())?;
        if before > now || elapsed <= 0.0 {
            return None;
        }
        Some((now - before) as f64 / elapsed)
    };

    DerivedMetrics {
        bytes,
        limit_max_bytes,
        usage,
        hit_ratio,
        connections: stat(stats, "curr_connections").unwrap_or(0),
        latency: current.latency,
        evictions: rate(Counter::Evictions),
        gets: rate(Counter::Gets),
        sets: rate(Counter::Sets),
        bytes_read: rate(Counter::BytesRead),
        bytes_written: rate(Counter::BytesWritten),
    }
}

fn stat(stats: &ServerStats, name: &str) -> Option<u64> {
    stats.get(name)?.trim().parse().ok()
}
