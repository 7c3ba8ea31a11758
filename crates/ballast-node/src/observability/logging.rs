//! Structured logging initialization.
//!
//! Output always goes to stderr: in stdio mode stdout carries protocol
//! frames.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable pretty format (for development).
    Pretty,
    /// JSON format (for log aggregation).
    Json,
}

impl LogFormat {
    /// Parse log format from string.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Initialize the logging system.
///
/// `RUST_LOG` takes precedence over `level` when set.
///
/// ```rust,no_run
/// use ballast_node::observability::init_logging;
///
/// init_logging("info", false);
/// ```
pub fn init_logging(level: &str, json_format: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "ballast={level},tower_http=debug,axum::rejection=trace",
            level = level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    if json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            )
            .init();
    } else {
        registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .init();
    }

    tracing::info!(
        level = %level,
        format = if json_format { "json" } else { "pretty" },
        "Logging initialized"
    );
}
