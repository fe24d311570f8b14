//! Bearer token credential
//!
//! The token is opaque: it is read once, handed to the broker as the MQTT
//! password and never printed. `Debug` and `Display` are redacted so the value
//! cannot leak through logging by accident.

use crate::config::ConfigError;
use std::fmt;

/// Opaque bearer token presented to the broker
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a token, rejecting empty or whitespace-only values
    pub fn new(token: impl Into<String>) -> Result<Self, ConfigError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(ConfigError::EmptyCredential("credential".to_string()));
        }
        Ok(Self(token))
    }

    /// Read the token from an environment variable
    pub fn from_env(var_name: &str) -> Result<Self, ConfigError> {
        let token = std::env::var(var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
        if token.trim().is_empty() {
            return Err(ConfigError::EmptyCredential(var_name.to_string()));
        }
        Ok(Self(token))
    }

    /// The raw token, for handing to the transport only
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}
