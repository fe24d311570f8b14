//! Testing utilities and mock implementations
//!
//! This module provides an in-memory transport so the session and delivery loop
//! can be exercised without a running broker.

pub mod mocks;

pub use mocks::*;
