//! Runtime configuration read from the environment.

use std::net::SocketAddr;
use std::str::FromStr;

use pedalstream_infra::processing::ProcessorConfig;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub processor: ProcessorConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            processor: ProcessorConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Read `PEDALSTREAM_*` variables; unset or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = parse(&lookup, "PEDALSTREAM_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(batch_size) = parse(&lookup, "PEDALSTREAM_BATCH_SIZE") {
            config.processor = config.processor.with_batch_size(batch_size);
        }
        if let Some(segments) = parse(&lookup, "PEDALSTREAM_SEGMENTS") {
            config.processor = config.processor.with_initial_segment_count(segments);
        }
        if let Some(threads) = parse(&lookup, "PEDALSTREAM_WORKER_THREADS") {
            config.processor = config.processor.with_worker_threads(threads);
        }
        config
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable configuration value");
            None
        }
    }
}
