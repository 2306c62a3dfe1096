//! # Pawn Tracker Library
//!
//! This library watches a running game server through its console and reports
//! when player-controlled pawns spawn and die. The server offers no structured
//! events for either, so the tracker samples two console listings on a fixed
//! interval and derives the transitions itself.
//!
//! ## Core Responsibilities
//!
//! ### Sampling
//! Every poll issues `GetAll BP_PlayerController_C Pawn` and
//! `GetAll BP_FigureV2_C bIsDead` concurrently and parses the answers. The two
//! listings are not taken atomically, so a snapshot where a possessed pawn is
//! missing from the dead-flag listing is discarded and the cycle skipped.
//!
//! ### Reconciliation
//! Each snapshot is compared against the pawn cache. A pawn seen for the first
//! time with a resolvable player produces a spawn; a cached pawn whose dead flag
//! flips from false to true produces a death. Nothing is reported twice.
//!
//! ### Expiry
//! The console never says a pawn is gone. Cache entries that have not shown up
//! in a listing for a full sweep interval are dropped by a separate timer.
//!
//! ### Fan-out
//! Subscribers register by name. Every spawn of a cycle is delivered before any
//! death of the same cycle, and a slow or dead subscriber only loses its own
//! events.
//!
//! ## Module Organization
//!
//! - `feed` — the console query trait and listing helpers
//! - `console` — runs the game server and answers queries from its stdout
//! - `roster` — connected players, keyed by controller
//! - `extractor` — snapshot capture and line grammars
//! - `cache` — per-pawn state with time-based expiry
//! - `reconciler` — snapshot + cache to spawn/death transitions
//! - `registry` — subscribers and event delivery
//! - `store` — persisted cache and subscriber names
//! - `network` — UDP control packets and per-subscriber event forwarding
//! - `service` — the single-owner loop tying it all together
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use regex_lite::Regex;
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//! use tracker::config::TrackerConfig;
//! use tracker::console::ConsoleFeed;
//! use tracker::network::NetworkServer;
//! use tracker::service::Tracker;
//! use tracker::store::Store;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TrackerConfig::default();
//!
//!     let (feed, _console_events) =
//!         ConsoleFeed::spawn("./server", &[], Regex::new(&config.start_pattern)?)?;
//!     let mut network = NetworkServer::bind(&config.bind_addr, config.sink_capacity).await?;
//!     network.persist_peers(Arc::new(Store::open(&config.state_dir)?))?;
//!     let store = Store::open(&config.state_dir)?;
//!
//!     let (control_tx, control_rx) = mpsc::channel(64);
//!     network.spawn_receiver(control_tx);
//!
//!     let tracker = Tracker::new(config, feed, Arc::new(network.peers()), store)?;
//!     tracker.run(control_rx).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod console;
pub mod error;
pub mod extractor;
pub mod feed;
pub mod network;
pub mod reconciler;
pub mod registry;
pub mod roster;
pub mod service;
pub mod store;
pub mod utils;
