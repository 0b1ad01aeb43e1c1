//! Tracing/logging setup, shared by every courier process.
//!
//! Logging is configured explicitly: the binary builds a [`LogConfig`] and
//! calls [`init`] once before anything else runs.

pub mod tracing;

pub use crate::tracing::{LogConfig, LogFormat, ObservabilityError, init};
