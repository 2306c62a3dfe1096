use crate::format_event;
use bincode::{deserialize, serialize};
use log::{error, info, warn};
use shared::{Packet, PawnEvent, MAX_PACKET_SIZE};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::interval;

/// How often an unacknowledged subscription is re-sent
const SUBSCRIBE_RETRY: Duration = Duration::from_secs(2);

pub struct Listener {
    socket: UdpSocket,
    tracker_addr: SocketAddr,
    name: String,
    json: bool,
    subscribed: bool,
}

impl Listener {
    pub async fn new(
        tracker_addr: &str,
        bind_addr: &str,
        name: &str,
        json: bool,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind(bind_addr).await?;
        let tracker_addr = tracker_addr.parse()?;

        Ok(Listener {
            socket,
            tracker_addr,
            name: name.to_string(),
            json,
            subscribed: false,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        self.socket.send_to(&data, self.tracker_addr).await?;
        Ok(())
    }

    /// Handles one packet, forwarding events to `events` if given
    fn handle_packet(&mut self, packet: Packet, events: Option<&mpsc::UnboundedSender<PawnEvent>>) {
        match packet {
            Packet::Subscribed { name } if name == self.name => {
                if !self.subscribed {
                    info!("Subscribed to {} as {}", self.tracker_addr, name);
                }
                self.subscribed = true;
            }

            Packet::Unsubscribed { name } if name == self.name => {
                info!("Unsubscribed from {}", self.tracker_addr);
                self.subscribed = false;
            }

            Packet::Event(event) => {
                match format_event(&event, self.json) {
                    Ok(line) if self.json => println!("{}", line),
                    Ok(line) => info!("{}", line),
                    Err(e) => error!("Failed to format event: {}", e),
                }
                if let Some(events) = events {
                    let _ = events.send(event);
                }
            }

            _ => {
                warn!("Unexpected packet type");
            }
        }
    }

    /// Subscribes and prints events until Ctrl+C
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.run_until(None, tokio::signal::ctrl_c()).await
    }

    /// Subscribes and handles packets until `stop` resolves, then unsubscribes.
    ///
    /// Received events are also sent on `events` when given.
    pub async fn run_until<S, T>(
        &mut self,
        events: Option<mpsc::UnboundedSender<PawnEvent>>,
        stop: S,
    ) -> Result<(), Box<dyn std::error::Error>>
    where
        S: std::future::Future<Output = T>,
    {
        let mut retry_interval = interval(SUBSCRIBE_RETRY);
        let mut buffer = [0u8; MAX_PACKET_SIZE];
        tokio::pin!(stop);

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => {
                            if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                                self.handle_packet(packet, events.as_ref());
                            }
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = retry_interval.tick(), if !self.subscribed => {
                    let packet = Packet::Subscribe { name: self.name.clone() };
                    if let Err(e) = self.send_packet(&packet).await {
                        error!("Error sending subscription: {}", e);
                    }
                },

                _ = &mut stop => break,
            }
        }

        let _ = self
            .send_packet(&Packet::Unsubscribe {
                name: self.name.clone(),
            })
            .await;

        Ok(())
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }
}
