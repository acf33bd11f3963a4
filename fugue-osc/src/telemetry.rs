use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::Message;

pub const INDICATOR_CONF: &str = "/indicator/conf";
pub const INDICATOR_DEV: &str = "/indicator/dev";
pub const INDICATOR_BLE: &str = "/indicator/ble";
pub const INDICATOR_FUSION: &str = "/indicator/fusion";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TelemetryError {
    #[error("Telemetry queue is full")]
    Full,

    #[error("Telemetry uplink is closed")]
    Closed,
}

/// Non-blocking handle onto the telemetry uplink queue.
///
/// Safe to use from driver callbacks: sending never awaits.
#[derive(Debug, Clone)]
pub struct Telemetry {
    tx: mpsc::Sender<Message>,
}

impl Telemetry {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn send(&self, message: Message) -> Result<(), TelemetryError> {
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TelemetryError::Full,
            mpsc::error::TrySendError::Closed(_) => TelemetryError::Closed,
        })
    }

    /// Send an integer indicator.
    pub fn notify(&self, topic: &str, value: i32) -> Result<(), TelemetryError> {
        self.send(Message::int(topic, value))
    }
}

/// Outbound UDP sender towards the remote collector.
pub struct Uplink {
    socket: UdpSocket,
    destination: SocketAddr,
}

impl Uplink {
    /// Bind an ephemeral local socket of the destination's address family.
    pub async fn bind(destination: SocketAddr) -> io::Result<Self> {
        let local: IpAddr = match destination {
            SocketAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
            SocketAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
        };
        let socket = UdpSocket::bind(SocketAddr::new(local, 0)).await?;
        Ok(Self {
            socket,
            destination,
        })
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    /// Drain the queue until every [`Telemetry`] handle is dropped.
    /// Returns the number of datagrams sent.
    #[instrument(name = "telemetry_uplink", skip_all, fields(destination = %self.destination))]
    pub async fn run(self, mut rx: mpsc::Receiver<Message>) -> u64 {
        info!("Telemetry uplink started");
        let mut sent = 0u64;

        while let Some(message) = rx.recv().await {
            let bytes = match message.encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(topic = %message.topic, error = %e, "Dropping unencodable message");
                    continue;
                }
            };

            match self.socket.send_to(&bytes, self.destination).await {
                Ok(_) => sent += 1,
                Err(e) => debug!(topic = %message.topic, error = %e, "Telemetry send failed"),
            }
        }

        info!(sent, "Telemetry uplink closed");
        sent
    }
}
