//! `pedalstream-core`: shared building blocks.
//!
//! Identifiers and the domain error model used by every other crate
//! (no infrastructure concerns).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{DeadLetterId, WorkerId};
