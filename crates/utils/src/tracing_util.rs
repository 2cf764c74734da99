//! Helpers related to tracing, used by main entrypoints

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Map a count of `-v` flags to the level used when `RUST_LOG` is unset.
fn default_level(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Initialize tracing.
///
/// Messages go to stderr; `RUST_LOG` takes precedence over `verbose`.
/// When running as root, info and above are also sent to the journal so
/// that changes made to the entries directory are recorded.
pub fn initialize_tracing(verbose: u8) {
    let journald_layer = if rustix::process::getuid().is_root() {
        tracing_journald::layer()
            .ok()
            .map(|layer| layer.with_filter(LevelFilter::INFO))
    } else {
        None
    };

    let filter = EnvFilter::builder()
        .with_default_directive(default_level(verbose).into())
        .from_env_lossy();

    let format = tracing_subscriber::fmt::format()
        .without_time()
        .with_target(false)
        .compact();

    let fmt_layer = tracing_subscriber::fmt::layer()
        .event_format(format)
        .with_writer(std::io::stderr)
        .with_filter(filter);

    let registry = tracing_subscriber::registry().with(fmt_layer);
    let r = match journald_layer {
        Some(journald) => registry.with(journald).try_init(),
        None => registry.try_init(),
    };
    // A subscriber may already be installed when called more than once
    if let Err(e) = r {
        tracing::debug!("Not initializing tracing: {e}");
    }
}
