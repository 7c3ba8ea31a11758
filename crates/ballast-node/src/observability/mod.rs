//! Observability for the Ballast node.
//!
//! Structured logging through `tracing`; HTTP requests are traced by the
//! router's `TraceLayer`.

mod logging;

pub use logging::{init_logging, LogFormat};
