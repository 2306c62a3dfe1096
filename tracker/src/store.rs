//! File-backed persistence for the pawn cache, the subscriber list and the
//! addresses subscribers were last seen at.

use crate::cache::PawnCacheEntry;
use crate::error::Result;
use bincode::{deserialize, serialize};
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::PawnId;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

const CACHE_FILE: &str = "pawn_cache.bin";
const SUBSCRIBERS_FILE: &str = "subscribers.bin";
const PEERS_FILE: &str = "peers.bin";

pub struct Store {
    dir: PathBuf,
}

impl Store {
    /// Opens the store in `dir`, creating the directory if needed
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn load_cache(&self) -> Result<HashMap<PawnId, PawnCacheEntry>> {
        self.read(CACHE_FILE)
    }

    pub fn save_cache(&self, entries: &HashMap<PawnId, PawnCacheEntry>) -> Result<()> {
        self.write(CACHE_FILE, entries)
    }

    pub fn load_subscribers(&self) -> Result<Vec<String>> {
        self.read(SUBSCRIBERS_FILE)
    }

    pub fn save_subscribers(&self, names: &[String]) -> Result<()> {
        self.write(SUBSCRIBERS_FILE, names)
    }

    pub fn load_peers(&self) -> Result<HashMap<String, SocketAddr>> {
        self.read(PEERS_FILE)
    }

    pub fn save_peers(&self, peers: &HashMap<String, SocketAddr>) -> Result<()> {
        self.write(PEERS_FILE, peers)
    }

    /// Reads a value, treating a missing file as the default
    fn read<T: DeserializeOwned + Default>(&self, file: &str) -> Result<T> {
        let path = self.dir.join(file);
        match fs::read(&path) {
            Ok(bytes) => Ok(deserialize(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No stored state at {}", path.display());
                Ok(T::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Writes through a temporary file so a crash never leaves a half-written value
    fn write<T: Serialize + ?Sized>(&self, file: &str, value: &T) -> Result<()> {
        let path = self.dir.join(file);
        let tmp = self.dir.join(format!("{}.tmp", file));

        fs::write(&tmp, serialize(value)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}
