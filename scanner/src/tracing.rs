use tracing_subscriber::{prelude::*, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber. `RUST_LOG` selects what is logged,
/// `info` when unset.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .init();
}
