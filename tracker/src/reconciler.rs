//! Turns a snapshot into spawn and death transitions.

use crate::cache::{PawnCache, PawnCacheEntry};
use crate::extractor::Snapshot;
use crate::roster::PlayerDirectory;
use shared::PawnEvent;

/// Transitions found in one cycle
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Transitions {
    pub spawns: Vec<PawnEvent>,
    pub deaths: Vec<PawnEvent>,
}

impl Transitions {
    pub fn is_empty(&self) -> bool {
        self.spawns.is_empty() && self.deaths.is_empty()
    }

    /// All events in dispatch order: every spawn before any death
    pub fn into_events(self) -> impl Iterator<Item = PawnEvent> {
        self.spawns.into_iter().chain(self.deaths)
    }
}

/// Applies `snapshot` to `cache` and returns the transitions it implies.
///
/// Controllers are processed first so that a pawn seen for the first time can
/// be marked dead in the same cycle. A pawn only enters the cache once its
/// controller resolves to a connected player; until then its dead flag is ignored.
pub fn reconcile<D>(
    snapshot: &Snapshot,
    cache: &mut PawnCache,
    directory: &D,
    now: u64,
) -> Transitions
where
    D: PlayerDirectory + ?Sized,
{
    let mut transitions = Transitions::default();

    for record in &snapshot.controllers {
        let Some(pawn) = &record.pawn else {
            continue;
        };

        if let Some(entry) = cache.get_mut(pawn) {
            entry.last_active = now;
            continue;
        }

        // Retried next cycle while the pawn stays uncached
        let Some(player) = directory.resolve_player(&record.controller) else {
            continue;
        };

        transitions
            .spawns
            .push(PawnEvent::spawn(pawn.clone(), player.clone()));
        cache.upsert(PawnCacheEntry::spawned(
            pawn.clone(),
            record.controller.clone(),
            player,
            now,
        ));
    }

    for record in &snapshot.deads {
        let Some(entry) = cache.get_mut(&record.pawn) else {
            continue;
        };

        if record.dead && !entry.dead {
            transitions
                .deaths
                .push(PawnEvent::death(entry.pawn.clone(), entry.player.clone()));
        }

        entry.dead = record.dead;
        entry.last_active = now;
    }

    transitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{ControllerRecord, DeadFlagRecord};
    use shared::{ControllerId, EventKind, PawnId, PlayerRef};
    use std::collections::HashMap;

    fn directory() -> HashMap<ControllerId, PlayerRef> {
        HashMap::from([(ControllerId::from("C1"), PlayerRef::new("Alice", "C1"))])
    }

    fn snapshot(pawn: &str, controller: &str, dead: bool) -> Snapshot {
        Snapshot {
            controllers: vec![ControllerRecord {
                pawn: Some(PawnId::from(pawn)),
                controller: ControllerId::from(controller),
            }],
            deads: vec![DeadFlagRecord {
                pawn: PawnId::from(pawn),
                dead,
            }],
        }
    }

    #[test]
    fn test_first_observation_spawns_once() {
        let mut cache = PawnCache::new();

        let first = reconcile(&snapshot("P1", "C1", false), &mut cache, &directory(), 10);
        assert_eq!(
            first.spawns,
            vec![PawnEvent::spawn(PawnId::from("P1"), PlayerRef::new("Alice", "C1"))]
        );
        assert!(first.deaths.is_empty());
        assert_eq!(cache.len(), 1);

        let second = reconcile(&snapshot("P1", "C1", false), &mut cache, &directory(), 20);
        assert!(second.is_empty());
        assert_eq!(cache.get(&PawnId::from("P1")).unwrap().last_active, 20);
    }

    #[test]
    fn test_unresolvable_controller_skipped() {
        let mut cache = PawnCache::new();

        let transitions = reconcile(&snapshot("P2", "C9", true), &mut cache, &directory(), 10);

        assert!(transitions.is_empty());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_unresolvable_then_resolvable_spawns_later() {
        let mut cache = PawnCache::new();
        let empty: HashMap<ControllerId, PlayerRef> = HashMap::new();

        assert!(reconcile(&snapshot("P1", "C1", false), &mut cache, &empty, 10).is_empty());

        let later = reconcile(&snapshot("P1", "C1", false), &mut cache, &directory(), 20);
        assert_eq!(later.spawns.len(), 1);
    }

    #[test]
    fn test_death_reported_once_per_transition() {
        let mut cache = PawnCache::new();
        reconcile(&snapshot("P1", "C1", false), &mut cache, &directory(), 10);

        let died = reconcile(&snapshot("P1", "C1", true), &mut cache, &directory(), 20);
        assert_eq!(died.deaths.len(), 1);
        assert_eq!(died.deaths[0].kind, EventKind::Death);
        assert_eq!(died.deaths[0].player.name, "Alice");

        let still_dead = reconcile(&snapshot("P1", "C1", true), &mut cache, &directory(), 30);
        assert!(still_dead.is_empty());

        // Respawned under the same id, then died again
        reconcile(&snapshot("P1", "C1", false), &mut cache, &directory(), 40);
        let died_again = reconcile(&snapshot("P1", "C1", true), &mut cache, &directory(), 50);
        assert_eq!(died_again.deaths.len(), 1);
    }

    #[test]
    fn test_spawn_and_death_in_same_cycle() {
        let mut cache = PawnCache::new();

        let transitions = reconcile(&snapshot("P1", "C1", true), &mut cache, &directory(), 10);
        let kinds: Vec<EventKind> = transitions.into_events().map(|event| event.kind).collect();

        assert_eq!(kinds, vec![EventKind::Spawn, EventKind::Death]);
        assert!(cache.get(&PawnId::from("P1")).unwrap().dead);
    }

    #[test]
    fn test_dead_flag_for_uncached_pawn_ignored() {
        let mut cache = PawnCache::new();
        let snapshot = Snapshot {
            controllers: Vec::new(),
            deads: vec![DeadFlagRecord {
                pawn: PawnId::from("P1"),
                dead: true,
            }],
        };

        assert!(reconcile(&snapshot, &mut cache, &directory(), 10).is_empty());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_empty_controller_listing_still_reports_deaths() {
        let mut cache = PawnCache::new();
        reconcile(&snapshot("P1", "C1", false), &mut cache, &directory(), 10);

        let snapshot = Snapshot {
            controllers: Vec::new(),
            deads: vec![DeadFlagRecord {
                pawn: PawnId::from("P1"),
                dead: true,
            }],
        };

        let transitions = reconcile(&snapshot, &mut cache, &directory(), 20);
        assert!(transitions.spawns.is_empty());
        assert_eq!(transitions.deaths.len(), 1);
    }
}
