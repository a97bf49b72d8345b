use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber; library `log` records reach it through the
/// `tracing-log` bridge.
///
/// `RUST_LOG` wins over `level` when set.
pub fn init(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
