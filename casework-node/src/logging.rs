use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. `RUST_LOG` wins over `level`.
///
/// Returns `false` if a subscriber was already installed, which is normal
/// when several nodes share one process.
pub fn init(level: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .try_init()
        .is_ok()
}
