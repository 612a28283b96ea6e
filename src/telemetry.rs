use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "INVOICE_DESK_LOG";
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Installs the stderr subscriber. `INVOICE_DESK_LOG` wins over `RUST_LOG`,
/// which wins over `fallback`. Calling it twice is a no-op.
pub fn init(fallback: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
