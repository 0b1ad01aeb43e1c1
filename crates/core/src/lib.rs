//! `courier-core`: foundation types shared by every courier crate.
//!
//! This crate contains **pure** primitives (no IO, no async, no broker concerns).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{CorrelationId, MessageId};
