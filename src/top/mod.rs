//! Live, top-style view of a server pool.

mod display;
pub mod layout;

pub use display::{Display, TerminalDisplay};
pub use layout::{ColumnWidths, FrameLine, LineKind};

use std::{
    sync::{Arc, Condvar, Mutex, PoisonError},
    thread,
    time::{Duration, Instant},
};

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use tracing::{debug, info, warn};

use crate::{
    config::MonitorConfig,
    connection::{CacheClient, ServerIdentity},
    error::Result,
    parser::parse_flat_stats,
    rates::{DerivedMetrics, RateTracker, Snapshot},
};

const KEY_POLL: Duration = Duration::from_millis(100);

/// Cooperative stop request shared between the monitor and whoever wants
/// it to end.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        let (flag, wake) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        wake.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps up to `timeout`, returning early with `true` once stopped.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (flag, wake) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let (stopped, _) = wake
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *stopped
    }
}

/// Watches the keyboard on a background thread and raises `stop` on `q`,
/// `Esc` or `Ctrl-C`. Needs the terminal in raw mode.
pub fn spawn_key_watcher(stop: StopSignal) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !stop.is_stopped() {
            match event::poll(KEY_POLL) {
                Ok(false) => {}
                Ok(true) => {
                    if let Ok(Event::Key(key)) = event::read() {
                        let quit = key.kind == KeyEventKind::Press
                            && match key.code {
                                KeyCode::Char('q') | KeyCode::Esc => true,
                                KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
                                _ => false,
                            };
                        if quit {
                            debug!("stop requested from keyboard");
                            stop.stop();
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "keyboard unavailable, stopping");
                    stop.stop();
                }
            }
        }
    })
}

/// Raises `stop` on `SIGINT` or `SIGTERM` until closed.
#[cfg(unix)]
pub struct SignalWatcher {
    handle: signal_hook::iterator::Handle,
    thread: thread::JoinHandle<()>,
}

#[cfg(unix)]
impl SignalWatcher {
    pub fn spawn(stop: StopSignal) -> Result<Self> {
        use signal_hook::consts::{SIGINT, SIGTERM};

        let mut signals = signal_hook::iterator::Signals::new([SIGINT, SIGTERM])?;
        let handle = signals.handle();
        let thread = thread::spawn(move || {
            if let Some(signal) = signals.forever().next() {
                info!(signal, "stop requested by signal");
                stop.stop();
            }
        });
        Ok(Self { handle, thread })
    }

    /// Unregisters the handlers' listener and joins the watcher thread.
    pub fn close(self) {
        self.handle.close();
        if self.thread.join().is_err() {
            warn!("signal watcher panicked");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Polling,
    Rendering,
    Sleeping,
    Stopped,
}

/// Polls every client on a fixed interval and renders the result.
pub struct TopMonitor<D> {
    clients: Vec<Arc<dyn CacheClient>>,
    tracker: RateTracker,
    refresh: Duration,
    display: D,
    widths: Option<(u16, ColumnWidths)>,
    state: MonitorState,
}

impl<D: Display> TopMonitor<D> {
    pub fn new(clients: Vec<Arc<dyn CacheClient>>, config: &MonitorConfig, display: D) -> Self {
        Self {
            clients,
            tracker: RateTracker::new(),
            refresh: config.refresh(),
            display,
            widths: None,
            state: MonitorState::Idle,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    /// Runs until `stop` is raised, then renders one last frame without
    /// clearing the screen.
    pub fn run(&mut self, stop: &StopSignal) -> Result<()> {
        info!(
            servers = self.clients.len(),
            refresh_ms = self.refresh.as_millis() as u64,
            "monitor starting"
        );

        // Prime the tracker so the first frame already has rates.
        let mut cycle_start = Instant::now();
        let polls = self.poll();
        self.track(polls);
        self.state = MonitorState::Sleeping;

        while !stop.wait(self.remaining(cycle_start)) {
            cycle_start = Instant::now();
            let frame = self.tick()?;
            self.display.redraw(&frame)?;
            self.state = MonitorState::Sleeping;
        }

        let frame = self.tick()?;
        self.display.finish(&frame)?;
        self.state = MonitorState::Stopped;
        info!("monitor stopped");
        Ok(())
    }

    /// One poll-and-render cycle.
    pub fn tick(&mut self) -> Result<Vec<FrameLine>> {
        let polls = self.poll();
        self.state = MonitorState::Rendering;
        let servers = self.track(polls);
        let widths = self.widths()?;
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        Ok(layout::render_frame(widths, &timestamp, &servers))
    }

    fn remaining(&self, cycle_start: Instant) -> Duration {
        self.refresh
            .checked_sub(cycle_start.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    /// Polls all clients concurrently; returns once every poll finished.
    fn poll(&mut self) -> Vec<(ServerIdentity, Option<Snapshot>)> {
        self.state = MonitorState::Polling;
        let clients = &self.clients;
        thread::scope(|scope| {
            let handles: Vec<_> = clients
                .iter()
                .map(|client| scope.spawn(move || poll_one(client.as_ref())))
                .collect();
            handles
                .into_iter()
                .zip(clients)
                .map(|(handle, client)| {
                    let snapshot = handle.join().unwrap_or_else(|_| {
                        warn!(server = %client.identity(), "poll thread panicked");
                        None
                    });
                    (client.identity().clone(), snapshot)
                })
                .collect()
        })
    }

    fn track(
        &mut self,
        polls: Vec<(ServerIdentity, Option<Snapshot>)>,
    ) -> Vec<(ServerIdentity, Option<DerivedMetrics>)> {
        self.tracker.retain(polls.iter().map(|(identity, _)| identity));
        polls
            .into_iter()
            .map(|(identity, snapshot)| {
                let metrics = self.tracker.update(&identity, snapshot);
                (identity, metrics)
            })
            .collect()
    }

    /// Column widths for the current terminal width, recomputed whenever
    /// the width changes.
    fn widths(&mut self) -> Result<ColumnWidths> {
        let width = self.display.width()?;
        match self.widths {
            Some((known, widths)) if known == width => Ok(widths),
            _ => {
                let widths = ColumnWidths::for_terminal(width);
                debug!(width, instance = widths.instance(), "terminal width changed");
                self.widths = Some((width, widths));
                Ok(widths)
            }
        }
    }
}

fn poll_one(client: &dyn CacheClient) -> Option<Snapshot> {
    let started = Instant::now();
    match client.request("stats") {
        Ok(text) => {
            let latency = started.elapsed();
            let stats = parse_flat_stats(&text);
            if stats.is_empty() {
                debug!(server = %client.identity(), "stats response had no entries");
                return None;
            }
            Some(Snapshot {
                stats,
                latency,
                taken_at: Instant::now(),
            })
        }
        Err(err) => {
            debug!(server = %client.identity(), error = %err, "poll failed");
            None
        }
    }
}
