//! Tracing setup: stderr diagnostics plus an optional socket transcript.
//!
//! The transcript is a plain-text, append-only file holding every event the
//! socket layer emits (targets under `tcpb::ipc`), one timestamped line each.

use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Local;
use tracing::Subscriber;
use tracing_subscriber::{
    filter::{LevelFilter, Targets},
    fmt::{format::Writer, time::FormatTime},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Tracing target prefix of all socket events.
pub const TRANSCRIPT_TARGET: &str = "tcpb::ipc";

/// Local wall-clock timestamps with millisecond precision.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTime;

impl FormatTime for LocalTime {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the level derived from `verbosity`
/// (0 = warn, 1 = info, 2 = debug, 3+ = trace).
pub fn init_logging(verbosity: u8, transcript: Option<&Path>) -> Result<()> {
    let level = match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("tcpb={}", level)))
        .context("Failed to create log filter")?;

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_filter(env_filter);

    let transcript_layer = transcript.map(transcript_layer).transpose()?;

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(transcript_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(())
}

/// File layer recording socket events to `path`, appending if it exists.
pub fn transcript_layer<S>(path: &Path) -> Result<Box<dyn Layer<S> + Send + Sync>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open transcript {}", path.display()))?;

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_timer(LocalTime)
        .with_target(false)
        .with_filter(Targets::new().with_target(TRANSCRIPT_TARGET, LevelFilter::TRACE));
    Ok(Box::new(layer))
}
