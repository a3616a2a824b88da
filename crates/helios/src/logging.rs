//! Log sink setup for the `helios` binary.
//!
//! Library code logs through the `log` facade and `tracing`; both end up in
//! one `tracing_subscriber` registry writing to stderr or, when
//! `logging.file` is configured, appending to that file.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::LevelFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Resolved logging options.
#[derive(Debug, Clone)]
pub struct LogSettings {
    pub level: LevelFilter,
    pub json: bool,
    pub ansi: bool,
    pub file: Option<PathBuf>,
}

/// Level from the `-q`/`-v` flags, falling back to the configured level.
pub fn resolve_level(quiet: bool, verbose: u8, configured: &str) -> LevelFilter {
    if quiet {
        return LevelFilter::Error;
    }
    match verbose {
        0 => configured.parse().unwrap_or(LevelFilter::Info),
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Open `path` for appending, creating it and its parent directory.
pub fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the global subscriber. `RUST_LOG` overrides `settings.level`.
pub fn init(settings: &LogSettings) -> io::Result<()> {
    if settings.level == LevelFilter::Off {
        log::set_max_level(LevelFilter::Off);
        return Ok(());
    }

    let level = settings.level.as_str().to_ascii_lowercase();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("helios={level},helios_protocol={level}")));

    let (writer, ansi) = match &settings.file {
        Some(path) => (BoxMakeWriter::new(Mutex::new(open_log_file(path)?)), false),
        None => (BoxMakeWriter::new(io::stderr), settings.ansi),
    };

    let installed = if settings.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(ansi)
                    .with_target(false),
            )
            .try_init()
    };

    // a subscriber is already set (tests, embedding); keep `log` records
    // flowing through env_logger instead
    if installed.is_err() {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(settings.level);
        if let Some(path) = &settings.file {
            builder.target(env_logger::Target::Pipe(Box::new(open_log_file(path)?)));
        }
        builder.try_init().ok();
    }

    Ok(())
}
