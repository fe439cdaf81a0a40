use tracing_subscriber::{fmt, EnvFilter};

/// Install the global `fmt` subscriber, filtered by `RUST_LOG` (`info` when unset)
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(env_filter).with_target(false).init();
}
