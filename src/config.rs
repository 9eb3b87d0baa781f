use std::time::Duration;

use crate::slabs::DEFAULT_PAGE_SIZE;

/// Shortest refresh interval the monitor accepts.
pub const MIN_REFRESH: Duration = Duration::from_millis(500);
pub const DEFAULT_REFRESH: Duration = Duration::from_secs(1);
/// Longest refresh interval the monitor accepts.
pub const MAX_REFRESH: Duration = Duration::from_secs(24 * 60 * 60);
/// Socket timeout applied to connect, read and write.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorConfig {
    refresh: Duration,
    pub timeout: Option<Duration>,
    pub page_size: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            refresh: DEFAULT_REFRESH,
            timeout: Some(DEFAULT_TIMEOUT),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl MonitorConfig {
    /// Sets the refresh interval in seconds, clamped to
    /// [`MIN_REFRESH`]..=[`MAX_REFRESH`]. NaN gives the minimum.
    pub fn with_refresh_secs(mut self, secs: f64) -> Self {
        self.refresh = if secs.is_nan() {
            MIN_REFRESH
        } else {
            let secs = secs.clamp(MIN_REFRESH.as_secs_f64(), MAX_REFRESH.as_secs_f64());
            Duration::try_from_secs_f64(secs).unwrap_or(MIN_REFRESH)
        };
        self
    }

    /// A zero, negative or NaN value disables the timeout, as does one too
    /// large to represent.
    pub fn with_timeout_secs(mut self, secs: f64) -> Self {
        self.timeout = Duration::try_from_secs_f64(secs)
            .ok()
            .filter(|timeout| !timeout.is_zero());
        self
    }

    pub fn refresh(&self) -> Duration {
        self.refresh
    }
}
