//! Error taxonomy for the subscriber
//!
//! Configuration, authentication and connectivity errors are fatal at startup.
//! Handler errors are per-message and never stop delivery. Connection loss is
//! the terminal result of a run, surfaced to the caller rather than retried.

use crate::config::ConfigError;
use crate::transport::ConnectionState;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Failure reported by a message handler
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Failed to write message: {0}")]
    Io(#[from] std::io::Error),
    #[error("Handler rejected message: {message}")]
    Rejected { message: String },
}

impl HandlerError {
    pub fn rejected<S: Into<String>>(message: S) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }
}

/// Main error type for subscriber operations
#[derive(Debug, Error)]
pub enum SubscriberError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Authentication failed: {reason}")]
    Authentication { reason: String },

    #[error("Broker unreachable: {reason}")]
    Connectivity { reason: String },

    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },

    #[error("Operation '{operation}' not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },
}

impl SubscriberError {
    pub fn authentication<S: Into<String>>(reason: S) -> Self {
        Self::Authentication {
            reason: reason.into(),
        }
    }

    pub fn connectivity<S: Into<String>>(reason: S) -> Self {
        Self::Connectivity {
            reason: reason.into(),
        }
    }

    pub fn connection_lost<S: Into<String>>(reason: S) -> Self {
        Self::ConnectionLost {
            reason: reason.into(),
        }
    }
}

static SECRET_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)(password|token|key|secret|jwt)[=:]\s*\S+").ok());

const MAX_MESSAGE_LEN: usize = 500;

/// Redact credential-looking material and bound the length of a message
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = match SECRET_PATTERN.as_ref() {
        Some(pattern) => pattern.replace_all(message, "${1}=***").to_string(),
        None => message.to_string(),
    };

    if sanitized.len() > MAX_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(truncate_suffix);
    }

    sanitized
}

/// Result type for subscriber operations
pub type SubscriberResult<T> = Result<T, SubscriberError>;
