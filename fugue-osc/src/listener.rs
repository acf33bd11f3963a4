use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{Command, Inbound, Message, route};

/// Local port the control plane listens on by convention.
pub const DEFAULT_CONTROL_PORT: u16 = 8001;

/// Largest UDP payload over IPv4.
const MAX_DATAGRAM: usize = 65_507;

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Failed to bind control listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Inbound command listener.
///
/// Every datagram is decoded, routed by topic and handed to the session
/// manager. Unknown topics are logged and discarded. `/stop_server`
/// cancels the shared token, which also ends this loop.
pub struct ControlListener {
    socket: UdpSocket,
}

impl ControlListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self, ListenerError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| ListenerError::Bind { addr, source })?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ListenerError> {
        Ok(self.socket.local_addr()?)
    }

    #[instrument(name = "control_listener", skip_all, fields(addr = ?self.socket.local_addr().ok()))]
    pub async fn serve(
        self,
        tx: mpsc::Sender<Inbound>,
        cancel: CancellationToken,
    ) -> Result<(), ListenerError> {
        info!("Control listener started");
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Closing control listener");
                    break;
                }
                received = self.socket.recv_from(&mut buf) => {
                    let (len, peer) = match received {
                        Ok(received) => received,
                        Err(e) if is_transient_error(&e) => {
                            warn!(error = %e, "Transient receive error");
                            sleep(Duration::from_millis(100)).await;
                            continue;
                        }
                        Err(e) => {
                            error!(error = %e, "Control listener receive failed");
                            return Err(e.into());
                        }
                    };

                    let messages = match Message::decode(&buf[..len]) {
                        Ok(messages) => messages,
                        Err(e) => {
                            warn!(%peer, error = %e, "Discarding datagram");
                            continue;
                        }
                    };

                    for message in messages {
                        let topic = message.topic.clone();
                        let inbound = match route(message) {
                            Ok(inbound) => inbound,
                            Err(e) => {
                                warn!(%peer, error = %e, "Discarding message");
                                continue;
                            }
                        };
                        debug!(%peer, %topic, "Command received");

                        if inbound.command == Command::StopServer {
                            info!(%peer, "Stop requested");
                            cancel.cancel();
                            return Ok(());
                        }

                        if tx.send(inbound).await.is_err() {
                            info!("Command consumer gone, closing control listener");
                            return Ok(());
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

fn is_transient_error(e: &io::Error) -> bool {
    use io::ErrorKind::*;
    // a previous send to an unreachable peer surfaces here on some platforms
    matches!(e.kind(), ConnectionRefused | ConnectionReset | Interrupted)
}
