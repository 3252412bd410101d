use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber.
///
/// A default level from the CLI, overridable by `RUST_LOG`, with an
/// optional JSON sink selected by
/// `DUESYNC_LOG_FORMAT=json` (compact text otherwise). Safe to call more
/// than once; subsequent calls are no-ops.
pub fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    let json = std::env::var("DUESYNC_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let result = if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    if let Err(err) = result {
        // A previous call already installed a subscriber; not an error for us.
        tracing::debug!(%err, "tracing subscriber already initialized");
    }
}
