use std::{
    io::{self, Write},
    process::ExitCode,
};

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mctop::{
    CacheClient, ConnectionPool, KeyHash, ServerIdentity, commands,
    config::MonitorConfig,
    connection::DEFAULT_PORT,
    output::{self, OutputFormat},
    slabs::{DEFAULT_PAGE_SIZE, SlabAnalyzer},
    top::{StopSignal, TerminalDisplay, spawn_key_watcher},
};

#[cfg(unix)]
use mctop::top::SignalWatcher;

#[derive(Parser, Debug)]
#[command(name = "mctop", version, about = "Inspect and monitor memcached servers")]
struct Cli {
    /// Server host
    #[arg(short = 'H', long, global = true, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, global = true, default_value = DEFAULT_PORT)]
    port: u16,

    /// Socket timeout in seconds, 0 to wait forever
    #[arg(short, long, global = true, default_value_t = 2.0)]
    timeout: f64,

    /// Output format, defaults to `table` (`serialize` for values)
    #[arg(short, long, global = true, value_enum)]
    format: Option<OutputFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// General server statistics
    Stats,
    /// Server settings
    Settings,
    /// Per slab class usage
    Slabs {
        /// Slab page size in bytes
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE, value_parser = clap::value_parser!(u64).range(1..))]
        page_size: u64,
    },
    /// Item size histogram
    Sizes,
    /// Keys stored in one slab class, or in all of them
    Keys {
        slab: Option<u32>,
        /// Keys per slab, 0 for as many as the server returns
        #[arg(short, long, default_value_t = 0)]
        limit: usize,
    },
    /// Value of the first key found
    First { slab: Option<u32> },
    /// Value of a key
    Get {
        key: String,
        /// Look the key up by its digest
        #[arg(long, value_enum)]
        hash: Option<KeyHash>,
    },
    /// Delete a key
    Delete {
        key: String,
        #[arg(long, value_enum)]
        hash: Option<KeyHash>,
    },
    /// Live view of a server pool
    Top {
        /// Comma separated host[:port] list
        #[arg(short = 'P', long)]
        pool: String,
        /// Refresh interval in seconds
        #[arg(long, default_value_t = 1.0)]
        freq: f64,
    },
}

fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    init_tracing();
    let cli = Cli::parse();
    let config = MonitorConfig::default().with_timeout_secs(cli.timeout);

    let pool = ConnectionPool::new(config.timeout);
    let client = pool.get(&ServerIdentity::new(cli.host.as_str(), cli.port.to_string()));
    let client = client.as_ref();
    let format = cli.format.unwrap_or(OutputFormat::Table);
    let value_format = cli.format.unwrap_or(OutputFormat::Serialize);

    let rendered = match &cli.command {
        Command::Top { pool, freq } => return top(config.with_refresh_secs(*freq), pool),
        Command::Stats => commands::server_stats(client)?
            .map(|stats| output::render_stats(&stats, format))
            .transpose()?
            .map(String::into_bytes),
        Command::Settings => commands::settings(client)?
            .map(|stats| output::render_stats(&stats, format))
            .transpose()?
            .map(String::into_bytes),
        Command::Slabs { page_size } => commands::slab_stats(client)?
            .map(|stats| {
                let rows = SlabAnalyzer::new(*page_size).refine(&stats);
                output::render_slabs(&rows, format)
            })
            .transpose()?
            .map(String::into_bytes),
        Command::Sizes => commands::size_histogram(client)?
            .map(|sizes| output::render_sizes(&sizes, format))
            .transpose()?
            .map(String::into_bytes),
        Command::Keys { slab, limit } => match slab {
            Some(slab) => commands::keys_in_slab(client, *slab, *limit)?,
            None => commands::keys(client, *limit)?,
        }
        .map(|keys| output::render_keys(&keys, format))
        .transpose()?
        .map(String::into_bytes),
        Command::First { slab } => commands::first_value(client, *slab)?
            .map(|item| output::render_item(&item, value_format))
            .transpose()?,
        Command::Get { key, hash } => commands::value(client, key, *hash)?
            .map(|item| output::render_item(&item, value_format))
            .transpose()?,
        Command::Delete { key, hash } => commands::delete_key(client, key, *hash)?
            .then(|| format!("deleted {key}").into_bytes()),
    };

    let Some(bytes) = rendered else {
        eprintln!("Could not find data on {}", client.identity());
        return Ok(ExitCode::FAILURE);
    };
    let raw = value_format == OutputFormat::Serialize
        && matches!(cli.command, Command::First { .. } | Command::Get { .. });
    let mut stdout = io::stdout().lock();
    stdout.write_all(&bytes)?;
    if !raw && !bytes.ends_with(b"\n") {
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;
    Ok(ExitCode::SUCCESS)
}

fn top(config: MonitorConfig, spec: &str) -> Result<ExitCode> {
    let pool = ConnectionPool::new(config.timeout);
    pool.extend_from_spec(spec)?;
    info!(servers = pool.len(), refresh = ?config.refresh(), "starting monitor");

    let stop = StopSignal::new();
    #[cfg(unix)]
    let signals = SignalWatcher::spawn(stop.clone())?;
    let display = TerminalDisplay::new()?;
    let keys = spawn_key_watcher(stop.clone());
    let result = commands::run_top(&pool, &config, display, &stop);
    stop.stop();
    let _ = keys.join();
    #[cfg(unix)]
    signals.close();
    result?;
    Ok(ExitCode::SUCCESS)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("MCTOP_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}
