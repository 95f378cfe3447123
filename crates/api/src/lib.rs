//! HTTP API: processor control surface and bike status queries.

pub mod app;
pub mod config;
