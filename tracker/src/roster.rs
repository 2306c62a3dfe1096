//! Directory of connected players, keyed by the controller they own.

use crate::error::Result;
use crate::feed::{ChunkOptions, LogFeed};
use log::debug;
use regex_lite::Regex;
use shared::{ControllerId, PlayerRef};
use std::collections::HashMap;

pub const PLAYER_NAME_QUERY: &str = "GetAll BRPlayerState PlayerName";
pub const PLAYER_OWNER_QUERY: &str = "GetAll BRPlayerState Owner";

const PLAYER_NAME_PATTERN: &str = r#"(?P<index>\d+)\) BRPlayerState .+?PersistentLevel\.(?P<state>BRPlayerState_\d+)\.PlayerName = "?(?P<name>[^"]*)"?$"#;
const PLAYER_OWNER_PATTERN: &str = r"(?P<index>\d+)\) BRPlayerState .+?PersistentLevel\.(?P<state>BRPlayerState_\d+)\.Owner = BP_PlayerController_C'.+?:PersistentLevel\.(?P<controller>BP_PlayerController_C_\d+)'$";

/// Resolves controllers to the players that own them
pub trait PlayerDirectory {
    fn resolve_player(&self, controller: &ControllerId) -> Option<PlayerRef>;

    fn connected_players(&self) -> Vec<PlayerRef>;
}

impl PlayerDirectory for HashMap<ControllerId, PlayerRef> {
    fn resolve_player(&self, controller: &ControllerId) -> Option<PlayerRef> {
        self.get(controller).cloned()
    }

    fn connected_players(&self) -> Vec<PlayerRef> {
        self.values().cloned().collect()
    }
}

/// Player directory rebuilt from the server's player-state listings
pub struct PlayerRoster {
    players: HashMap<ControllerId, PlayerRef>,
    name_pattern: Regex,
    owner_pattern: Regex,
    options: ChunkOptions,
}

impl PlayerRoster {
    pub fn new(options: ChunkOptions) -> Result<Self> {
        Ok(Self {
            players: HashMap::new(),
            name_pattern: Regex::new(PLAYER_NAME_PATTERN)?,
            owner_pattern: Regex::new(PLAYER_OWNER_PATTERN)?,
            options,
        })
    }

    /// Replaces the roster with the players currently on the server
    pub async fn refresh<F: LogFeed>(&mut self, feed: &F) {
        let (name_lines, owner_lines) = tokio::join!(
            feed.watch_chunk(PLAYER_NAME_QUERY, &self.name_pattern, self.options),
            feed.watch_chunk(PLAYER_OWNER_QUERY, &self.owner_pattern, self.options),
        );

        self.players = self.join_listings(&name_lines, &owner_lines);
        debug!("Roster refreshed: {} players", self.players.len());
    }

    /// Pairs player names with controllers through their shared player-state object
    fn join_listings(
        &self,
        name_lines: &[String],
        owner_lines: &[String],
    ) -> HashMap<ControllerId, PlayerRef> {
        let names: HashMap<&str, &str> = name_lines
            .iter()
            .filter_map(|line| {
                let captures = self.name_pattern.captures(line)?;
                Some((captures.name("state")?.as_str(), captures.name("name")?.as_str()))
            })
            .collect();

        owner_lines
            .iter()
            .filter_map(|line| {
                let captures = self.owner_pattern.captures(line)?;
                let name = names.get(captures.name("state")?.as_str())?;
                let controller = captures.name("controller")?.as_str();
                Some((ControllerId::from(controller), PlayerRef::new(name, controller)))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

impl PlayerDirectory for PlayerRoster {
    fn resolve_player(&self, controller: &ControllerId) -> Option<PlayerRef> {
        self.players.resolve_player(controller)
    }

    fn connected_players(&self) -> Vec<PlayerRef> {
        self.players.connected_players()
    }
}
