//! Tracing subscriber setup.
//!
//! Called once by the binary. `RUST_LOG` overrides `[logging].level`.
//! Logs go to stderr so command output on stdout stays machine-readable.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

pub fn init(config: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(env_filter);

    let layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = if config.json {
        Box::new(fmt::layer().json().with_writer(std::io::stderr))
    } else {
        Box::new(fmt::layer().with_writer(std::io::stderr))
    };

    // A second call keeps the first subscriber.
    let _ = registry.with(layer).try_init();
}
