//! Tracker network layer: UDP control packets in, pawn events out

use crate::error::{Result, TrackerError};
use crate::registry::{EventSink, PluginDirectory};
use crate::service::ControlMessage;
use crate::store::Store;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, PawnEvent, MAX_PACKET_SIZE};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};

/// Known subscriber addresses, shared between the receiver task and the tracker.
///
/// Resolving a name hands out a fresh sink with its own bounded queue, drained
/// by a task that forwards each event to whatever address the name currently
/// has. With a store attached, addresses are persisted on every change.
#[derive(Clone)]
pub struct PeerDirectory {
    peers: Arc<Mutex<HashMap<String, SocketAddr>>>,
    socket: Arc<UdpSocket>,
    capacity: usize,
    store: Option<Arc<Store>>,
}

impl PeerDirectory {
    pub fn new(socket: Arc<UdpSocket>, capacity: usize) -> Self {
        Self {
            peers: Arc::new(Mutex::new(HashMap::new())),
            socket,
            capacity,
            store: None,
        }
    }

    /// Records (or moves) the address of `name`
    pub fn register(&self, name: &str, addr: SocketAddr) {
        let mut peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        if peers.insert(name.to_string(), addr) == Some(addr) {
            return;
        }

        info!("Peer {} registered at {}", name, addr);
        if let Some(store) = &self.store {
            if let Err(e) = store.save_peers(&peers) {
                error!("Failed to persist peer addresses: {}", e);
            }
        }
    }

    pub fn address_of(&self, name: &str) -> Option<SocketAddr> {
        let peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        peers.get(name).copied()
    }
}

impl PluginDirectory for PeerDirectory {
    fn resolve_subscriber(&self, name: &str) -> Option<Arc<dyn EventSink>> {
        self.address_of(name)?;
        let (tx, mut rx) = mpsc::channel::<PawnEvent>(self.capacity);
        let directory = self.clone();
        let name = name.to_string();

        // Ends when the registry drops the sink
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(addr) = directory.address_of(&name) else {
                    debug!("No address for {}, dropping {}", name, event.kind);
                    continue;
                };
                let packet = Packet::Event(event);
                if let Err(e) = send_packet(&directory.socket, &packet, addr).await {
                    error!("Failed to send event to {} at {}: {}", name, addr, e);
                }
            }
            debug!("Sink for {} closed", name);
        });

        Some(Arc::new(tx))
    }
}

pub struct NetworkServer {
    socket: Arc<UdpSocket>,
    peers: PeerDirectory,
}

impl NetworkServer {
    pub async fn bind(addr: &str, sink_capacity: usize) -> Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Tracker listening on {}", socket.local_addr()?);

        let peers = PeerDirectory::new(Arc::clone(&socket), sink_capacity);
        Ok(Self { socket, peers })
    }

    /// Loads persisted peer addresses and keeps `store` updated from now on.
    ///
    /// Must be called before handing out [`NetworkServer::peers`].
    pub fn persist_peers(&mut self, store: Arc<Store>) -> Result<()> {
        let persisted = store.load_peers()?;
        debug!("Restored {} peer addresses", persisted.len());
        {
            let mut peers = self.peers.peers.lock().unwrap_or_else(|e| e.into_inner());
            peers.extend(persisted);
        }
        self.peers.store = Some(store);
        Ok(())
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn peers(&self) -> PeerDirectory {
        self.peers.clone()
    }

    /// Spawns task that turns incoming packets into control messages
    pub fn spawn_receiver(&self, control_tx: mpsc::Sender<ControlMessage>) {
        let socket = Arc::clone(&self.socket);
        let peers = self.peers.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_PACKET_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) else {
                            warn!("Failed to deserialize packet from {}", addr);
                            continue;
                        };

                        if let Err(e) =
                            Self::handle_packet(&socket, &peers, &control_tx, packet, addr).await
                        {
                            error!("Failed to handle packet from {}: {}", addr, e);
                            if control_tx.is_closed() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    async fn handle_packet(
        socket: &Arc<UdpSocket>,
        peers: &PeerDirectory,
        control_tx: &mpsc::Sender<ControlMessage>,
        packet: Packet,
        addr: SocketAddr,
    ) -> Result<()> {
        match packet {
            Packet::Subscribe { name } => {
                peers.register(&name, addr);

                let (ack, outcome) = oneshot::channel();
                control_tx
                    .send(ControlMessage::Subscribe {
                        name: name.clone(),
                        ack: Some(ack),
                    })
                    .await
                    .map_err(|e| TrackerError::Network(e.to_string()))?;

                Self::spawn_reply(Arc::clone(socket), outcome, Packet::Subscribed { name }, addr);
            }

            Packet::Unsubscribe { name } => {
                let (ack, outcome) = oneshot::channel();
                control_tx
                    .send(ControlMessage::Unsubscribe {
                        name: name.clone(),
                        ack: Some(ack),
                    })
                    .await
                    .map_err(|e| TrackerError::Network(e.to_string()))?;

                Self::spawn_reply(
                    Arc::clone(socket),
                    outcome,
                    Packet::Unsubscribed { name },
                    addr,
                );
            }

            _ => {
                warn!("Unexpected packet type from {}", addr);
            }
        }

        Ok(())
    }

    /// Sends `reply` once the tracker confirms the request
    fn spawn_reply(
        socket: Arc<UdpSocket>,
        outcome: oneshot::Receiver<bool>,
        reply: Packet,
        addr: SocketAddr,
    ) {
        tokio::spawn(async move {
            if let Ok(true) = outcome.await {
                if let Err(e) = send_packet(&socket, &reply, addr).await {
                    error!("Failed to reply to {}: {}", addr, e);
                }
            }
        });
    }
}

async fn send_packet(socket: &UdpSocket, packet: &Packet, addr: SocketAddr) -> Result<()> {
    let data = serialize(packet)?;
    socket.send_to(&data, addr).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SubscriberRegistry;
    use shared::{PawnId, PlayerRef};

    async fn recv_packet(socket: &UdpSocket) -> Packet {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        deserialize(&buf[..len]).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_peer_unresolvable() {
        let server = NetworkServer::bind("127.0.0.1:0", 4).await.unwrap();
        assert!(server.peers().resolve_subscriber("nobody").is_none());
    }

    #[tokio::test]
    async fn test_resolved_sink_forwards_events() {
        let server = NetworkServer::bind("127.0.0.1:0", 4).await.unwrap();
        let subscriber = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let peers = server.peers();
        peers.register("killfeed", subscriber.local_addr().unwrap());

        let sink = peers.resolve_subscriber("killfeed").unwrap();
        let event = PawnEvent::death(PawnId::from("P1"), PlayerRef::new("Alice", "C1"));
        sink.deliver(&event).unwrap();

        assert_eq!(recv_packet(&subscriber).await, Packet::Event(event));
    }

    #[tokio::test]
    async fn test_subscribe_packet_becomes_control_message() {
        let server = NetworkServer::bind("127.0.0.1:0", 4).await.unwrap();
        let (control_tx, mut control_rx) = mpsc::channel(8);
        server.spawn_receiver(control_tx);

        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let data = serialize(&Packet::Subscribe {
            name: "killfeed".to_string(),
        })
        .unwrap();
        listener
            .send_to(&data, server.local_addr().unwrap())
            .await
            .unwrap();

        let message = tokio::time::timeout(Duration::from_secs(2), control_rx.recv())
            .await
            .unwrap()
            .unwrap();

        match message {
            ControlMessage::Subscribe { name, ack } => {
                assert_eq!(name, "killfeed");
                ack.unwrap().send(true).unwrap();
            }
            other => panic!("Unexpected control message: {:?}", other),
        }

        assert_eq!(
            server.peers().address_of("killfeed"),
            Some(listener.local_addr().unwrap())
        );
        assert_eq!(
            recv_packet(&listener).await,
            Packet::Subscribed {
                name: "killfeed".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_resubscribe_from_new_address_moves_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let server = NetworkServer::bind("127.0.0.1:0", 4).await.unwrap();
        let old = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let new = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let peers = server.peers();
        let mut registry = SubscriberRegistry::new(Arc::new(peers.clone()));

        peers.register("killfeed", old.local_addr().unwrap());
        assert!(registry.subscribe("killfeed", &store).unwrap());

        // Listener came back on another port without unsubscribing
        peers.register("killfeed", new.local_addr().unwrap());
        assert!(registry.subscribe("killfeed", &store).unwrap());

        let event = PawnEvent::spawn(PawnId::from("P1"), PlayerRef::new("Alice", "C1"));
        assert_eq!(registry.dispatch(&event), 1);

        assert_eq!(recv_packet(&new).await, Packet::Event(event));

        let mut buf = [0u8; MAX_PACKET_SIZE];
        let stale = tokio::time::timeout(Duration::from_millis(200), old.recv_from(&mut buf));
        assert!(stale.await.is_err());
    }

    #[tokio::test]
    async fn test_udp_subscriber_survives_tracker_restart() {
        let dir = tempfile::tempdir().unwrap();
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        {
            let mut server = NetworkServer::bind("127.0.0.1:0", 4).await.unwrap();
            server
                .persist_peers(Arc::new(Store::open(dir.path()).unwrap()))
                .unwrap();
            let store = Store::open(dir.path()).unwrap();
            let mut registry = SubscriberRegistry::new(Arc::new(server.peers()));

            server
                .peers()
                .register("killfeed", listener.local_addr().unwrap());
            registry.subscribe("killfeed", &store).unwrap();
        }

        let mut server = NetworkServer::bind("127.0.0.1:0", 4).await.unwrap();
        server
            .persist_peers(Arc::new(Store::open(dir.path()).unwrap()))
            .unwrap();
        assert_eq!(
            server.peers().address_of("killfeed"),
            Some(listener.local_addr().unwrap())
        );

        let store = Store::open(dir.path()).unwrap();
        let mut registry = SubscriberRegistry::new(Arc::new(server.peers()));
        registry
            .restore(&store.load_subscribers().unwrap(), &store)
            .unwrap();

        assert_eq!(registry.names(), vec!["killfeed"]);
        assert_eq!(store.load_subscribers().unwrap(), vec!["killfeed"]);

        let event = PawnEvent::death(PawnId::from("P1"), PlayerRef::new("Alice", "C1"));
        assert_eq!(registry.dispatch(&event), 1);
        assert_eq!(recv_packet(&listener).await, Packet::Event(event));
    }
}
