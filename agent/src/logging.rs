//! Tracing setup for the agent binary.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG` when set. Otherwise logs at `info`, or `debug` when
/// `debug` is true. Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=slick_agent=trace slick-agent --conf agent.yml
/// ```
pub fn init(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
