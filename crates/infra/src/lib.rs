//! Infrastructure layer: event log boundary, segment coordination, the
//! pooled event processor, dead letters, read-model storage and projections.

pub mod dead_letter;
pub mod event_log;
pub mod processing;
pub mod projections;
pub mod read_model;

#[cfg(test)]
mod integration_tests;
