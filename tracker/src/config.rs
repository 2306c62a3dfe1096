//! Runtime configuration for the tracker service.

use crate::error::{Result, TrackerError};
use crate::feed::ChunkOptions;
use shared::{
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_QUERY_TIMEOUT_MS, DEFAULT_SETTLE_DELAY_MS,
    DEFAULT_SWEEP_INTERVAL_MS, DEFAULT_TRACKER_ADDR,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Console line the server prints once it is accepting players
pub const DEFAULT_START_PATTERN: &str = r"LogBrickadia: Server started";

/// Default per-subscriber queue depth
pub const DEFAULT_SINK_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Time between poll cycles
    pub poll_interval: Duration,
    /// Time between cache sweeps; also the maximum idle age of a cache entry
    pub sweep_interval: Duration,
    /// Timing of each console query
    pub query: ChunkOptions,
    /// UDP address listeners talk to
    pub bind_addr: String,
    /// Directory holding persisted state
    pub state_dir: PathBuf,
    /// Queue depth per subscriber before events are dropped
    pub sink_capacity: usize,
    /// Subscribers known ahead of time, resolvable before they ever send a packet
    pub plugins: Vec<(String, SocketAddr)>,
    /// Console line signalling a (re)started server
    pub start_pattern: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            sweep_interval: Duration::from_millis(DEFAULT_SWEEP_INTERVAL_MS),
            query: ChunkOptions {
                timeout_delay: Duration::from_millis(DEFAULT_QUERY_TIMEOUT_MS),
                after_match_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
            },
            bind_addr: DEFAULT_TRACKER_ADDR.to_string(),
            state_dir: PathBuf::from("state"),
            sink_capacity: DEFAULT_SINK_CAPACITY,
            plugins: Vec::new(),
            start_pattern: DEFAULT_START_PATTERN.to_string(),
        }
    }
}

impl TrackerConfig {
    /// Rejects settings the service loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(TrackerError::Config("poll interval must be positive".into()));
        }
        if self.sweep_interval.is_zero() {
            return Err(TrackerError::Config("sweep interval must be positive".into()));
        }
        if self.sink_capacity == 0 {
            return Err(TrackerError::Config("sink capacity must be positive".into()));
        }
        Ok(())
    }
}

/// Parses a `name=host:port` plugin entry
pub fn parse_plugin_entry(entry: &str) -> std::result::Result<(String, SocketAddr), String> {
    let (name, addr) = entry
        .split_once('=')
        .ok_or_else(|| format!("expected name=host:port, got '{}'", entry))?;

    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing plugin name in '{}'", entry));
    }

    let addr = addr
        .trim()
        .parse::<SocketAddr>()
        .map_err(|e| format!("invalid address in '{}': {}", entry, e))?;

    Ok((name.to_string(), addr))
}
