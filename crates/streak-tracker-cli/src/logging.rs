use tracing_subscriber::EnvFilter;

const DEFAULT_LEVEL: &str = "warn";

/// Installs the stderr subscriber. The explicit level wins over `RUST_LOG`,
/// which wins over the default. Safe to call more than once; later calls are
/// ignored.
pub fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL)),
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
