//! Snapshot extraction from the controller and dead-flag listings.
//!
//! Two independent `GetAll` queries are issued per cycle. They are not atomic
//! with respect to the live server, so a pawn can despawn between them; a
//! snapshot where the listings disagree is thrown away rather than reconciled.

use crate::error::Result;
use crate::feed::{ChunkOptions, LogFeed};
use log::debug;
use regex_lite::Regex;
use shared::{ControllerId, PawnId};
use std::collections::HashSet;

pub const CONTROLLER_QUERY: &str = "GetAll BP_PlayerController_C Pawn";
pub const DEAD_FLAG_QUERY: &str = "GetAll BP_FigureV2_C bIsDead";

const CONTROLLER_PATTERN: &str = r"(?P<index>\d+)\) BP_PlayerController_C .+?PersistentLevel\.(?P<controller>BP_PlayerController_C_\d+)\.Pawn = (?:None|BP_FigureV2_C'.+?:PersistentLevel\.(?P<pawn>BP_FigureV2_C_\d+)')?$";
const DEAD_FLAG_PATTERN: &str = r"(?P<index>\d+)\) BP_FigureV2_C .+?PersistentLevel\.(?P<pawn>BP_FigureV2_C_\d+)\.bIsDead = (?P<dead>True|False)$";

/// A controller and the pawn it currently possesses, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerRecord {
    pub pawn: Option<PawnId>,
    pub controller: ControllerId,
}

/// The server's liveness flag for one pawn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadFlagRecord {
    pub pawn: PawnId,
    pub dead: bool,
}

/// Both listings from one poll, known to agree with each other
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub controllers: Vec<ControllerRecord>,
    pub deads: Vec<DeadFlagRecord>,
}

impl Snapshot {
    /// Builds a snapshot, or `None` if a possessed pawn is missing from the dead-flag listing
    pub fn checked(controllers: Vec<ControllerRecord>, deads: Vec<DeadFlagRecord>) -> Option<Self> {
        let snapshot = Self { controllers, deads };
        snapshot.is_consistent().then_some(snapshot)
    }

    pub fn is_consistent(&self) -> bool {
        let flagged: HashSet<&PawnId> = self.deads.iter().map(|record| &record.pawn).collect();

        self.controllers
            .iter()
            .filter_map(|record| record.pawn.as_ref())
            .all(|pawn| flagged.contains(pawn))
    }
}

pub struct SnapshotExtractor {
    controller_pattern: Regex,
    dead_flag_pattern: Regex,
    options: ChunkOptions,
}

impl SnapshotExtractor {
    pub fn new(options: ChunkOptions) -> Result<Self> {
        Ok(Self {
            controller_pattern: Regex::new(CONTROLLER_PATTERN)?,
            dead_flag_pattern: Regex::new(DEAD_FLAG_PATTERN)?,
            options,
        })
    }

    /// Queries both listings concurrently and returns a consistent snapshot.
    ///
    /// Returns `None` when the listings disagree; the caller should skip the cycle.
    pub async fn capture<F: LogFeed>(&self, feed: &F) -> Option<Snapshot> {
        let (controller_lines, dead_flag_lines) = tokio::join!(
            feed.watch_chunk(CONTROLLER_QUERY, &self.controller_pattern, self.options),
            feed.watch_chunk(DEAD_FLAG_QUERY, &self.dead_flag_pattern, self.options),
        );

        let controllers: Vec<ControllerRecord> = controller_lines
            .iter()
            .filter_map(|line| self.parse_controller(line))
            .collect();
        let deads: Vec<DeadFlagRecord> = dead_flag_lines
            .iter()
            .filter_map(|line| self.parse_dead_flag(line))
            .collect();

        debug!(
            "Captured {} controllers, {} dead flags",
            controllers.len(),
            deads.len()
        );

        Snapshot::checked(controllers, deads)
    }

    pub fn parse_controller(&self, line: &str) -> Option<ControllerRecord> {
        let captures = self.controller_pattern.captures(line)?;

        Some(ControllerRecord {
            pawn: captures.name("pawn").map(|m| PawnId::from(m.as_str())),
            controller: ControllerId::from(captures.name("controller")?.as_str()),
        })
    }

    pub fn parse_dead_flag(&self, line: &str) -> Option<DeadFlagRecord> {
        let captures = self.dead_flag_pattern.captures(line)?;

        Some(DeadFlagRecord {
            pawn: PawnId::from(captures.name("pawn")?.as_str()),
            dead: captures.name("dead")?.as_str() == "True",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::collect_chunk;
    use std::collections::HashMap;
    use std::time::Duration;

    const LEVEL: &str = "/Game/Maps/Plate/Plate.Plate:PersistentLevel";

    fn controller_line(index: u32, controller: &str, pawn: Option<&str>) -> String {
        match pawn {
            Some(pawn) => format!(
                "{index}) BP_PlayerController_C {LEVEL}.{controller}.Pawn = BP_FigureV2_C'{LEVEL}.{pawn}'"
            ),
            None => format!("{index}) BP_PlayerController_C {LEVEL}.{controller}.Pawn = None"),
        }
    }

    fn dead_line(index: u32, pawn: &str, dead: bool) -> String {
        let flag = if dead { "True" } else { "False" };
        format!("{index}) BP_FigureV2_C {LEVEL}.{pawn}.bIsDead = {flag}")
    }

    struct CannedFeed {
        responses: HashMap<&'static str, Vec<String>>,
    }

    impl LogFeed for CannedFeed {
        async fn watch_chunk(
            &self,
            command: &str,
            pattern: &Regex,
            _options: ChunkOptions,
        ) -> Vec<String> {
            let lines = self.responses.get(command).cloned().unwrap_or_default();
            collect_chunk(pattern, lines.iter().map(String::as_str))
        }
    }

    fn extractor() -> SnapshotExtractor {
        SnapshotExtractor::new(ChunkOptions {
            timeout_delay: Duration::from_millis(10),
            after_match_delay: Duration::from_millis(1),
        })
        .unwrap()
    }

    #[test]
    fn test_parse_controller_with_pawn() {
        let line = controller_line(
            0,
            "BP_PlayerController_C_2147482380",
            Some("BP_FigureV2_C_2147482346"),
        );
        let record = extractor().parse_controller(&line).unwrap();

        assert_eq!(record.controller, ControllerId::from("BP_PlayerController_C_2147482380"));
        assert_eq!(record.pawn, Some(PawnId::from("BP_FigureV2_C_2147482346")));
    }

    #[test]
    fn test_parse_controller_without_pawn() {
        let line = controller_line(3, "BP_PlayerController_C_7", None);
        let record = extractor().parse_controller(&line).unwrap();

        assert_eq!(record.controller, ControllerId::from("BP_PlayerController_C_7"));
        assert_eq!(record.pawn, None);
    }

    #[test]
    fn test_parse_dead_flag() {
        let extractor = extractor();

        let alive = extractor.parse_dead_flag(&dead_line(0, "BP_FigureV2_C_1", false)).unwrap();
        let dead = extractor.parse_dead_flag(&dead_line(1, "BP_FigureV2_C_2", true)).unwrap();

        assert!(!alive.dead);
        assert!(dead.dead);
        assert_eq!(dead.pawn, PawnId::from("BP_FigureV2_C_2"));
    }

    #[test]
    fn test_malformed_lines_dropped() {
        let extractor = extractor();

        assert!(extractor.parse_controller("garbage").is_none());
        assert!(extractor
            .parse_dead_flag(&format!("0) BP_FigureV2_C {LEVEL}.BP_FigureV2_C_1.bIsDead = Maybe"))
            .is_none());
        assert!(extractor
            .parse_controller(&dead_line(0, "BP_FigureV2_C_1", true))
            .is_none());
    }

    #[test]
    fn test_consistency_check() {
        let controllers = vec![ControllerRecord {
            pawn: Some(PawnId::from("P1")),
            controller: ControllerId::from("C1"),
        }];

        let matching = vec![DeadFlagRecord {
            pawn: PawnId::from("P1"),
            dead: false,
        }];
        assert!(Snapshot::checked(controllers.clone(), matching).is_some());

        let torn = vec![DeadFlagRecord {
            pawn: PawnId::from("P2"),
            dead: false,
        }];
        assert!(Snapshot::checked(controllers, torn).is_none());
    }

    #[test]
    fn test_unpossessed_controllers_not_cross_checked() {
        let controllers = vec![ControllerRecord {
            pawn: None,
            controller: ControllerId::from("C1"),
        }];
        assert!(Snapshot::checked(controllers, Vec::new()).is_some());
    }

    #[test]
    fn test_empty_controller_listing_passes() {
        let deads = vec![DeadFlagRecord {
            pawn: PawnId::from("P1"),
            dead: true,
        }];
        let snapshot = Snapshot::checked(Vec::new(), deads).unwrap();
        assert_eq!(snapshot.deads.len(), 1);
    }

    #[tokio::test]
    async fn test_capture_from_feed() {
        let mut responses = HashMap::new();
        responses.insert(
            CONTROLLER_QUERY,
            vec![
                controller_line(1, "BP_PlayerController_C_2", None),
                "LogTemp: unrelated".to_string(),
                controller_line(0, "BP_PlayerController_C_1", Some("BP_FigureV2_C_1")),
            ],
        );
        responses.insert(
            DEAD_FLAG_QUERY,
            vec![dead_line(0, "BP_FigureV2_C_1", false)],
        );

        let snapshot = extractor().capture(&CannedFeed { responses }).await.unwrap();

        assert_eq!(snapshot.controllers.len(), 2);
        assert_eq!(
            snapshot.controllers[0].pawn,
            Some(PawnId::from("BP_FigureV2_C_1"))
        );
        assert_eq!(
            snapshot.deads,
            vec![DeadFlagRecord {
                pawn: PawnId::from("BP_FigureV2_C_1"),
                dead: false
            }]
        );
    }

    #[tokio::test]
    async fn test_capture_rejects_torn_read() {
        let mut responses = HashMap::new();
        responses.insert(
            CONTROLLER_QUERY,
            vec![controller_line(0, "BP_PlayerController_C_1", Some("BP_FigureV2_C_1"))],
        );
        responses.insert(DEAD_FLAG_QUERY, Vec::new());

        assert!(extractor().capture(&CannedFeed { responses }).await.is_none());
    }
}
