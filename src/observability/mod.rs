//! Observability: structured logging to standard error

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{delivery_span, session_span};
