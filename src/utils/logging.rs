use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Map a configured level name onto a tracing level. Unknown names fall
/// back to `info`.
pub fn parse_level(name: &str) -> Level {
    match name.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" | "warning" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Install the fmt subscriber. `RUST_LOG` wins over the configured level
/// when it is set and parses.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(parse_level(default_level).to_string().to_lowercase())
    });

    // try_init so tests can call this repeatedly
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
