//! Logging configuration using tracing
//!
//! Everything an app produces (output lines, messages, exit) is logged
//! inside an `app` span, so text output reads `app{name=maze}: stdout: ..`
//! and JSON output carries the name in its `span` object.

use tracing::Span;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the logging system
///
/// `RUST_LOG` wins over the configured `level`; `verbose` forces debug output.
pub fn init(level: &str, verbose: bool, json: bool) -> anyhow::Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?
    };

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()?;
    }

    Ok(())
}

/// Span wrapping the background tasks of one launched app
pub fn app_span(name: &str) -> Span {
    tracing::info_span!("app", name)
}
