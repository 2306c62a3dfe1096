//! Error types for the tracker.

use std::io;

/// Errors surfaced by the tracker's startup, shutdown and persistence paths.
///
/// Feed and dispatch problems never show up here: malformed lines are dropped
/// and failed deliveries are logged, so the poll loop keeps running.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Persisted state could not be encoded or decoded
    #[error("store error: {0}")]
    Store(#[from] bincode::Error),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex_lite::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("network error: {0}")]
    Network(String),
}

pub type Result<T> = std::result::Result<T, TrackerError>;

/// Why a single event could not be handed to a subscriber
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The subscriber's queue is at capacity
    #[error("subscriber queue is full")]
    Full,

    /// The subscriber went away
    #[error("subscriber is closed")]
    Closed,
}
