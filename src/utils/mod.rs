//! Utility functions.

/// Initializes the tracing subscriber for logging.
///
/// The filter is read from `RUST_LOG`, e.g. `RUST_LOG=leafdx=debug`.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();
}
