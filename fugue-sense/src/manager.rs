use std::collections::BTreeMap;
use std::sync::Arc;

use fugue_core::DeviceAddress;
use fugue_osc::{Inbound, Target};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::actor::{SessionHandle, SessionOp};
use crate::report::SampleReport;
use crate::session::{DeviceSession, SessionError, SessionState, SessionStatus};

/// Owns every session task and fans remote commands out to them.
pub struct SessionManager {
    cancel: CancellationToken,
    sessions: BTreeMap<DeviceAddress, SessionHandle>,
    tasks: Vec<JoinHandle<SampleReport>>,
}

impl SessionManager {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            sessions: BTreeMap::new(),
            tasks: Vec::new(),
        }
    }

    pub fn spawn(&mut self, session: DeviceSession) -> SessionHandle {
        let (handle, task) = SessionHandle::spawn(session, self.cancel.child_token());
        self.sessions.insert(handle.address(), handle.clone());
        self.tasks.push(task);
        handle
    }

    pub fn get(&self, address: DeviceAddress) -> Option<&SessionHandle> {
        self.sessions.get(&address)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &SessionHandle> {
        self.sessions.values()
    }

    /// Queue the command on its target sessions without waiting for them.
    /// Results are logged as they arrive.
    pub fn dispatch(&self, inbound: Inbound) {
        let Some(op) = SessionOp::from_command(inbound.command) else {
            debug!("Server commands are handled by the listener");
            return;
        };

        let targets: Vec<&SessionHandle> = match inbound.target {
            Target::All => self.sessions.values().collect(),
            Target::Device(address) => match self.sessions.get(&address) {
                Some(handle) => vec![handle],
                None => {
                    warn!(%address, "No session for address");
                    return;
                }
            },
        };

        for handle in targets {
            let address = handle.address();
            match handle.submit(op.clone()) {
                Ok(reply) => {
                    tokio::spawn(async move {
                        match reply.await {
                            Ok(Ok(())) => debug!(%address, "Command completed"),
                            Ok(Err(e)) => warn!(%address, error = %e, "Command failed"),
                            Err(_) => debug!(%address, "Session closed before replying"),
                        }
                    });
                }
                Err(e) => warn!(%address, error = %e, "Command not queued"),
            }
        }
    }

    /// Queue `op` on every session and wait for all of them.
    pub async fn execute_all(&self, op: SessionOp) -> Vec<(DeviceAddress, Result<(), SessionError>)> {
        let pending: Vec<_> = self
            .sessions
            .values()
            .map(|handle| (handle.address(), handle.submit(op.clone())))
            .collect();

        let mut results = Vec::with_capacity(pending.len());
        for (address, submitted) in pending {
            let result = match submitted {
                Ok(reply) => reply.await.unwrap_or(Err(SessionError::Closed)),
                Err(e) => Err(e),
            };
            results.push((address, result));
        }
        results
    }

    /// Dispatch inbound commands until cancelled or the listener goes away.
    #[instrument(name = "session_manager", skip_all, fields(sessions = self.sessions.len()))]
    pub async fn run(&self, mut rx: mpsc::Receiver<Inbound>) {
        info!("Session manager started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Session manager shutting down");
                    break;
                }
                inbound = rx.recv() => match inbound {
                    Some(inbound) => self.dispatch(inbound),
                    None => {
                        info!("Command channel closed");
                        break;
                    }
                }
            }
        }
    }

    pub fn status_board(&self) -> StatusBoard {
        StatusBoard {
            sessions: self
                .sessions
                .values()
                .map(SessionHandle::watch)
                .collect::<Vec<_>>()
                .into(),
        }
    }

    pub fn health(&self) -> Health {
        self.status_board().health()
    }

    /// Stop every session and collect their sample reports.
    pub async fn shutdown(self) -> Vec<SampleReport> {
        self.cancel.cancel();

        let mut reports = Vec::with_capacity(self.tasks.len());
        for task in self.tasks {
            match task.await {
                Ok(report) => reports.push(report),
                Err(e) => error!(error = %e, "Session task failed"),
            }
        }
        reports
    }
}

/// Read-only view of every session's latest status.
#[derive(Clone)]
pub struct StatusBoard {
    sessions: Arc<[watch::Receiver<SessionStatus>]>,
}

/// Aggregate health of all sessions.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub sessions: usize,
    pub connected: usize,
    pub streaming: usize,
    pub statuses: Vec<SessionStatus>,
}

impl StatusBoard {
    pub fn health(&self) -> Health {
        let statuses: Vec<SessionStatus> = self
            .sessions
            .iter()
            .map(|status| status.borrow().clone())
            .collect();

        let connected = statuses
            .iter()
            .filter(|s| matches!(s.state, SessionState::Connected | SessionState::Streaming))
            .count();
        let streaming = statuses
            .iter()
            .filter(|s| s.state == SessionState::Streaming)
            .count();

        Health {
            sessions: statuses.len(),
            connected,
            streaming,
            statuses,
        }
    }
}
