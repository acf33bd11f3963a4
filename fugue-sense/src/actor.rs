//! One task per session, fed by a bounded command queue.
//!
//! Commands run to completion one at a time. Cancellation is only observed
//! between commands, after which the session stops its sensors and
//! disconnects before the task ends.

use fugue_core::DeviceAddress;
use fugue_osc::Command;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use ulid::Ulid;

use crate::report::SampleReport;
use crate::session::{DeviceSession, SessionError, SessionState, SessionStatus};

const QUEUE_DEPTH: usize = 16;

/// An operation queued on a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOp {
    Connect,
    StartSensors,
    StopSensors,
    Disconnect,
    /// Connect when needed, then start sensors.
    StartStream,
    Ready,
    /// A `/sensors` or `/network` request.
    Reconfigure(Command),
}

impl SessionOp {
    /// The session operation behind a remote command.
    pub fn from_command(command: Command) -> Option<Self> {
        let op = match command {
            Command::StopServer => return None,
            Command::StartStream => SessionOp::StartStream,
            Command::StopStream => SessionOp::StopSensors,
            Command::Ready => SessionOp::Ready,
            command @ (Command::Sensors(_) | Command::Network(_)) => SessionOp::Reconfigure(command),
        };
        Some(op)
    }
}

type Reply = oneshot::Sender<Result<(), SessionError>>;

struct Request {
    op: SessionOp,
    reply: Reply,
}

/// Cheap, cloneable handle onto a running session task.
#[derive(Clone)]
pub struct SessionHandle {
    address: DeviceAddress,
    tx: mpsc::Sender<Request>,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    /// Move `session` onto its own task.
    ///
    /// The task resolves to the session's sample report once `cancel` fires
    /// or every handle is dropped.
    pub fn spawn(
        session: DeviceSession,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<SampleReport>) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let (status_tx, status) = watch::channel(session.status());
        let address = session.address();

        let task = tokio::spawn(run(session, rx, status_tx, cancel));
        (
            Self {
                address,
                tx,
                status,
            },
            task,
        )
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// A receiver that observes every status change.
    pub fn watch(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Queue `op` and wait for its result.
    pub async fn execute(&self, op: SessionOp) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request { op, reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Queue `op` without waiting for room in the queue.
    pub fn submit(
        &self,
        op: SessionOp,
    ) -> Result<oneshot::Receiver<Result<(), SessionError>>, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx.try_send(Request { op, reply }).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SessionError::Busy,
            mpsc::error::TrySendError::Closed(_) => SessionError::Closed,
        })?;
        Ok(rx)
    }
}

#[instrument(name = "session", skip_all, fields(address = %session.address(), id = %Ulid::new()))]
async fn run(
    mut session: DeviceSession,
    mut rx: mpsc::Receiver<Request>,
    status: watch::Sender<SessionStatus>,
    cancel: CancellationToken,
) -> SampleReport {
    info!("Session started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Session shutting down");
                break;
            }
            request = rx.recv() => {
                let Some(Request { op, reply }) = request else {
                    info!("All handles dropped, session shutting down");
                    break;
                };
                let result = apply(&mut session, op).await;
                status.send_replace(session.status());
                let _ = reply.send(result);
            }
        }
    }

    if let Err(e) = session.disconnect().await {
        warn!(error = %e, "Errors while disconnecting on shutdown");
    }
    status.send_replace(session.status());

    let report = session.report();
    info!(%report, "Session closed");
    report
}

async fn apply(session: &mut DeviceSession, op: SessionOp) -> Result<(), SessionError> {
    match op {
        SessionOp::Connect => session.connect().await,
        SessionOp::StartSensors => session.start_sensors().await,
        SessionOp::StopSensors => session.stop_sensors().await,
        SessionOp::Disconnect => session.disconnect().await,
        SessionOp::StartStream => {
            if session.state() == SessionState::Streaming {
                info!("Already streaming");
                return Ok(());
            }
            if session.state() == SessionState::Disconnected {
                info!("Connecting before streaming");
                session.connect().await?;
            }
            session.start_sensors().await
        }
        SessionOp::Ready => {
            session.ready();
            Ok(())
        }
        SessionOp::Reconfigure(command) => {
            if session.state() == SessionState::Streaming {
                warn!(%command, "Reconfiguration rejected while streaming");
                return Err(SessionError::Rejected(command.name()));
            }
            info!(%command, request = ?command, "Reconfiguration request received; running configuration is kept");
            Ok(())
        }
    }
}
