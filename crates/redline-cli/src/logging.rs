//! Subscriber setup for the `redline` binary.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const CRATES: &[&str] = &[
    "redline",
    "redline_core",
    "redline_pipeline",
    "redline_requester",
];

/// Map `-v` occurrences to a level: 0=warn, 1=info, 2=debug, 3+=trace.
pub fn level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn default_directives(verbosity: u8) -> String {
    let level = level(verbosity);
    CRATES
        .iter()
        .map(|krate| format!("{krate}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install a stderr subscriber. `RUST_LOG`, when set, wins over `-v`.
///
/// stdout is left for results so `--json` output can be piped.
pub fn init(verbosity: u8) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbosity)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbosity >= 2)
                .with_file(verbosity >= 3)
                .with_line_number(verbosity >= 3),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
