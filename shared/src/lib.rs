//! Types shared between the tracker and its listeners.
//!
//! Everything that crosses the wire or lands in persisted state lives here so
//! both sides agree on the encoding.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default UDP address the tracker binds to
pub const DEFAULT_TRACKER_ADDR: &str = "127.0.0.1:7777";
/// Default poll interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
/// Default cache sweep interval in milliseconds
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 60_000;
/// Default upper bound on a single console query
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 5_000;
/// Default settle delay after the last matching console line
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 250;
/// Receive buffer size for packets on either side
pub const MAX_PACKET_SIZE: usize = 2048;

/// Identifier of a controllable entity, e.g. `BP_FigureV2_C_2147482346`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PawnId(pub String);

/// Identifier of the controller possessing a pawn, e.g. `BP_PlayerController_C_2147482380`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ControllerId(pub String);

impl fmt::Display for PawnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PawnId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for ControllerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A connected player as reported by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRef {
    pub name: String,
    pub controller: ControllerId,
}

impl PlayerRef {
    pub fn new(name: &str, controller: &str) -> Self {
        Self {
            name: name.to_string(),
            controller: ControllerId::from(controller),
        }
    }
}

/// Kind of life-state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Spawn,
    Death,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Spawn => "spawn",
            EventKind::Death => "death",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pawn transition delivered to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PawnEvent {
    pub kind: EventKind,
    pub pawn: PawnId,
    pub player: PlayerRef,
}

impl PawnEvent {
    pub fn spawn(pawn: PawnId, player: PlayerRef) -> Self {
        Self {
            kind: EventKind::Spawn,
            pawn,
            player,
        }
    }

    pub fn death(pawn: PawnId, player: PlayerRef) -> Self {
        Self {
            kind: EventKind::Death,
            pawn,
            player,
        }
    }
}

/// Packets exchanged between the tracker and listeners
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    // Listener -> tracker
    Subscribe { name: String },
    Unsubscribe { name: String },

    // Tracker -> listener
    Subscribed { name: String },
    Unsubscribed { name: String },
    Event(PawnEvent),
}
