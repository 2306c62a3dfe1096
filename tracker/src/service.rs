//! The tracker service loop.
//!
//! A single task owns the cache, roster and subscriber registry. Poll cycles,
//! cache sweeps and control messages are all handled from one `select!`, so
//! none of them ever observe another half-done.

use crate::cache::PawnCache;
use crate::config::TrackerConfig;
use crate::error::Result;
use crate::extractor::SnapshotExtractor;
use crate::feed::LogFeed;
use crate::reconciler::reconcile;
use crate::registry::{PluginDirectory, SubscriberRegistry};
use crate::roster::{PlayerDirectory, PlayerRoster};
use crate::store::Store;
use crate::utils::get_timestamp;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};

/// Messages sent to the tracker loop from the network and console tasks
#[derive(Debug)]
pub enum ControlMessage {
    Subscribe {
        name: String,
        ack: Option<oneshot::Sender<bool>>,
    },
    Unsubscribe {
        name: String,
        ack: Option<oneshot::Sender<bool>>,
    },
    /// The game server (re)started; every known pawn id is stale
    ServerStarted,
    /// The game server is gone; the tracker stops
    ServerExited,
    Shutdown,
}

/// What a single poll cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nobody to notify, the console was not queried
    NoSubscribers,
    /// No players on the server
    NoPlayers,
    /// The two listings disagreed; nothing was changed
    Inconsistent,
    Reconciled { spawns: usize, deaths: usize },
}

pub struct Tracker<F: LogFeed> {
    config: TrackerConfig,
    feed: F,
    extractor: SnapshotExtractor,
    roster: PlayerRoster,
    cache: PawnCache,
    registry: SubscriberRegistry,
    store: Store,
}

impl<F: LogFeed> Tracker<F> {
    /// Builds a tracker and restores the persisted cache and subscribers.
    ///
    /// Fails if persisted state cannot be read.
    pub fn new(
        config: TrackerConfig,
        feed: F,
        plugins: Arc<dyn PluginDirectory>,
        store: Store,
    ) -> Result<Self> {
        config.validate()?;

        let cache = PawnCache::from_entries(store.load_cache()?);
        let mut registry = SubscriberRegistry::new(plugins);
        registry.restore(&store.load_subscribers()?, &store)?;

        info!(
            "Restored {} cached pawns and {} subscribers",
            cache.len(),
            registry.len()
        );

        Ok(Self {
            extractor: SnapshotExtractor::new(config.query)?,
            roster: PlayerRoster::new(config.query)?,
            config,
            feed,
            cache,
            registry,
            store,
        })
    }

    /// Runs one capture, reconcile and dispatch pass
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        if self.registry.is_empty() {
            return CycleOutcome::NoSubscribers;
        }

        self.roster.refresh(&self.feed).await;
        if self.roster.connected_players().is_empty() {
            return CycleOutcome::NoPlayers;
        }

        let Some(snapshot) = self.extractor.capture(&self.feed).await else {
            debug!("Listings disagree, skipping cycle");
            return CycleOutcome::Inconsistent;
        };

        let transitions = reconcile(&snapshot, &mut self.cache, &self.roster, get_timestamp());
        let outcome = CycleOutcome::Reconciled {
            spawns: transitions.spawns.len(),
            deaths: transitions.deaths.len(),
        };

        for event in transitions.into_events() {
            info!("{} {} ({})", event.kind, event.pawn, event.player.name);
            self.registry.dispatch(&event);
        }

        outcome
    }

    /// Drops cache entries idle for a full sweep interval
    pub fn sweep(&mut self, now: u64) -> usize {
        let expired = self.cache.sweep(now, self.config.sweep_interval);
        if !expired.is_empty() {
            debug!("Sweep removed {} pawns", expired.len());
        }
        expired.len()
    }

    /// Applies a control message; returns false when the loop should stop
    pub fn handle_control(&mut self, message: ControlMessage) -> bool {
        match message {
            ControlMessage::Subscribe { name, ack } => {
                let subscribed = self
                    .registry
                    .subscribe(&name, &self.store)
                    .unwrap_or_else(|e| {
                        error!("Failed to persist subscribers: {}", e);
                        self.registry.contains(&name)
                    });
                if let Some(ack) = ack {
                    let _ = ack.send(subscribed);
                }
            }
            ControlMessage::Unsubscribe { name, ack } => {
                if let Err(e) = self.registry.unsubscribe(&name, &self.store) {
                    error!("Failed to persist subscribers: {}", e);
                }
                if let Some(ack) = ack {
                    let _ = ack.send(true);
                }
            }
            ControlMessage::ServerStarted => {
                info!("Server started, clearing {} cached pawns", self.cache.len());
                self.cache.clear();
            }
            ControlMessage::ServerExited => {
                warn!("Server exited, stopping tracker");
                return false;
            }
            ControlMessage::Shutdown => return false,
        }
        true
    }

    /// Main loop; returns after a stop message, having persisted the cache
    pub async fn run(mut self, mut control_rx: mpsc::Receiver<ControlMessage>) -> Result<()> {
        let mut poll_timer = interval(self.config.poll_interval);
        poll_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut sweep_timer = interval(self.config.sweep_interval);
        sweep_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Skip the first sweep tick since it fires immediately
        sweep_timer.tick().await;

        info!("Tracker started");

        loop {
            tokio::select! {
                _ = poll_timer.tick() => {
                    let outcome = self.run_cycle().await;
                    debug!("Cycle: {:?}", outcome);
                },

                _ = sweep_timer.tick() => {
                    self.sweep(get_timestamp());
                },

                message = control_rx.recv() => {
                    let keep_running = match message {
                        Some(message) => self.handle_control(message),
                        None => false,
                    };
                    if !keep_running {
                        break;
                    }
                },
            }
        }

        self.shutdown()
    }

    /// Persists the cache
    pub fn shutdown(&self) -> Result<()> {
        info!("Tracker shutting down, saving {} cached pawns", self.cache.len());
        self.store.save_cache(self.cache.entries())
    }

    pub fn cache(&self) -> &PawnCache {
        &self.cache
    }

    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }
}
