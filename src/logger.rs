use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global subscriber; `RUST_LOG` wins over the verbosity flag
pub fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let fmt_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let _ = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .try_init();
}
