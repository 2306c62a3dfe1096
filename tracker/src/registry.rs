//! Subscriber registry and event fan-out.
//!
//! Subscribers are looked up by name through a [`PluginDirectory`]. The list of
//! names is persisted on every change so subscriptions survive a restart.

use crate::error::{DeliveryError, Result};
use crate::store::Store;
use log::{debug, info, warn};
use shared::PawnEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Something that can receive pawn events.
///
/// Delivery must not block: a sink that cannot take an event right now
/// returns an error and the event is dropped for that subscriber.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: &PawnEvent) -> std::result::Result<(), DeliveryError>;
}

impl EventSink for mpsc::Sender<PawnEvent> {
    fn deliver(&self, event: &PawnEvent) -> std::result::Result<(), DeliveryError> {
        self.try_send(event.clone()).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Resolves subscriber names to live sinks
pub trait PluginDirectory: Send + Sync {
    fn resolve_subscriber(&self, name: &str) -> Option<Arc<dyn EventSink>>;
}

#[derive(Clone)]
pub struct Subscriber {
    pub name: String,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber").field("name", &self.name).finish()
    }
}

pub struct SubscriberRegistry {
    subscribers: Vec<Subscriber>,
    directory: Arc<dyn PluginDirectory>,
}

impl SubscriberRegistry {
    pub fn new(directory: Arc<dyn PluginDirectory>) -> Self {
        Self {
            subscribers: Vec::new(),
            directory,
        }
    }

    /// Adds `name` if it is not already subscribed and resolves to a sink.
    ///
    /// The current name list is persisted either way. Returns whether `name`
    /// is subscribed afterwards.
    pub fn subscribe(&mut self, name: &str, store: &Store) -> Result<bool> {
        if self.contains(name) {
            info!("{} is already subscribed", name);
        } else if self.attach(name) {
            info!("{} subscribing", name);
        } else {
            info!("{} is not available, dropping subscription", name);
        }

        store.save_subscribers(&self.names())?;
        Ok(self.contains(name))
    }

    /// Removes `name` if present and persists the resulting name list
    pub fn unsubscribe(&mut self, name: &str, store: &Store) -> Result<bool> {
        let before = self.subscribers.len();
        self.subscribers.retain(|subscriber| subscriber.name != name);
        let removed = self.subscribers.len() != before;

        if removed {
            info!("{} unsubscribed", name);
        } else {
            debug!("{} was not subscribed", name);
        }

        store.save_subscribers(&self.names())?;
        Ok(removed)
    }

    /// Re-subscribes persisted names, quietly dropping any that no longer resolve
    pub fn restore(&mut self, names: &[String], store: &Store) -> Result<()> {
        for name in names {
            if self.contains(name) {
                continue;
            }
            if self.attach(name) {
                debug!("{} restored", name);
            } else {
                debug!("{} no longer resolves, dropping subscription", name);
            }
        }

        store.save_subscribers(&self.names())
    }

    /// Resolves `name` and adds it; false if the directory does not know it
    fn attach(&mut self, name: &str) -> bool {
        let Some(sink) = self.directory.resolve_subscriber(name) else {
            return false;
        };
        self.subscribers.push(Subscriber {
            name: name.to_string(),
            sink,
        });
        true
    }

    /// Hands `event` to every subscriber, returning how many accepted it
    pub fn dispatch(&self, event: &PawnEvent) -> usize {
        // Iterate a snapshot so the list can change while events are in flight
        let subscribers = self.subscribers.clone();
        let mut delivered = 0;

        for subscriber in &subscribers {
            match subscriber.sink.deliver(event) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    "Failed to deliver {} of {} to {}: {}",
                    event.kind, event.pawn, subscriber.name, e
                ),
            }
        }

        delivered
    }

    pub fn contains(&self, name: &str) -> bool {
        self.subscribers
            .iter()
            .any(|subscriber| subscriber.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.subscribers
            .iter()
            .map(|subscriber| subscriber.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
