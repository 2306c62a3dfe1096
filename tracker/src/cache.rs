//! Last-known state of every pawn associated with a player.
//!
//! The console never announces that a pawn is gone, so entries are reclaimed
//! by age: anything not seen in a listing for a full sweep interval is dropped.

use crate::utils::duration_ms;
use log::debug;
use serde::{Deserialize, Serialize};
use shared::{ControllerId, PawnId, PlayerRef};
use std::collections::HashMap;
use std::time::Duration;

/// What the tracker remembers about one pawn between polls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PawnCacheEntry {
    pub pawn: PawnId,
    pub controller: ControllerId,
    pub player: PlayerRef,
    pub dead: bool,
    /// Last time the pawn appeared in a listing, in milliseconds since the epoch
    pub last_active: u64,
}

impl PawnCacheEntry {
    /// A freshly spawned pawn, alive as of `now`
    pub fn spawned(pawn: PawnId, controller: ControllerId, player: PlayerRef, now: u64) -> Self {
        Self {
            pawn,
            controller,
            player,
            dead: false,
            last_active: now,
        }
    }

    /// Whether the entry has gone `max_age` without being refreshed
    pub fn is_expired(&self, now: u64, max_age: Duration) -> bool {
        now.saturating_sub(self.last_active) >= duration_ms(max_age)
    }
}

#[derive(Debug, Default)]
pub struct PawnCache {
    entries: HashMap<PawnId, PawnCacheEntry>,
}

impl PawnCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a cache from persisted entries
    pub fn from_entries(entries: HashMap<PawnId, PawnCacheEntry>) -> Self {
        Self { entries }
    }

    pub fn get(&self, pawn: &PawnId) -> Option<&PawnCacheEntry> {
        self.entries.get(pawn)
    }

    pub fn get_mut(&mut self, pawn: &PawnId) -> Option<&mut PawnCacheEntry> {
        self.entries.get_mut(pawn)
    }

    pub fn upsert(&mut self, entry: PawnCacheEntry) {
        self.entries.insert(entry.pawn.clone(), entry);
    }

    /// Removes every entry idle for at least `max_age`, returning the removed ids
    pub fn sweep(&mut self, now: u64, max_age: Duration) -> Vec<PawnId> {
        let expired: Vec<PawnId> = self
            .entries
            .values()
            .filter(|entry| entry.is_expired(now, max_age))
            .map(|entry| entry.pawn.clone())
            .collect();

        for pawn in &expired {
            self.entries.remove(pawn);
            debug!("Expired pawn {}", pawn);
        }

        expired
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries in persistable form
    pub fn entries(&self) -> &HashMap<PawnId, PawnCacheEntry> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
