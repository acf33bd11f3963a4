//! Per-device session state machine.
//!
//! ```text
//! Disconnected -> Connecting -> Connected <-> Streaming
//!       ^                           |
//!       +------- Disconnecting <----+
//! ```
//!
//! A session is driven by exactly one owner at a time (see
//! [`crate::actor`]), so operations take `&mut self` and never interleave.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use fugue_core::{DeviceAddress, DeviceConfig, Model, SensorKind, SensorParams, SensorSettings};
use fugue_osc::{INDICATOR_BLE, INDICATOR_CONF, INDICATOR_DEV, INDICATOR_FUSION, Telemetry};
use jiff::Timestamp;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

use crate::driver::{Board, DriverError, LinkParameters, Radio};
use crate::forward::{Forwarder, SampleCounters};
use crate::registry::{self, Armed, SensorDriver};
use crate::report::{KindReport, SampleReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    /// Connected and idle.
    Connected,
    Streaming,
    Disconnecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Bounded settle delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Wait after the link parameter handshake.
    pub link_settle: Duration,
    /// Wait after removing a timer before dropping its subscription.
    pub timer_teardown: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            link_settle: Duration::from_millis(1000),
            timer_teardown: Duration::from_millis(500),
        }
    }
}

impl Timing {
    pub fn immediate() -> Self {
        Self {
            link_settle: Duration::ZERO,
            timer_teardown: Duration::ZERO,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session is not connected")]
    NotConnected,

    #[error("Link to {address} failed: {source}")]
    LinkFailure {
        address: DeviceAddress,
        #[source]
        source: DriverError,
    },

    #[error("Failed to arm {kind}: {source}")]
    ArmFailure {
        kind: SensorKind,
        #[source]
        source: DriverError,
    },

    #[error("Failed to disarm {}", describe(.kinds))]
    DisarmFailure { kinds: Vec<(SensorKind, DriverError)> },

    #[error("{0} rejected while streaming")]
    Rejected(&'static str),

    #[error("Session command queue is full")]
    Busy,

    #[error("Session is closed")]
    Closed,
}

fn describe(kinds: &[(SensorKind, DriverError)]) -> String {
    kinds
        .iter()
        .map(|(kind, e)| format!("{kind} ({e})"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub address: DeviceAddress,
    pub model: Model,
    pub state: SessionState,
    pub armed: Vec<SensorKind>,
    pub samples: BTreeMap<SensorKind, u64>,
    pub connected_since: Option<Timestamp>,
    pub streaming_since: Option<Timestamp>,
}

struct PlannedKind {
    kind: SensorKind,
    driver: &'static dyn SensorDriver,
    params: SensorParams,
    rate_hz: f64,
}

struct ArmedKind {
    armed: Armed,
    driver: &'static dyn SensorDriver,
}

pub struct DeviceSession {
    config: DeviceConfig,
    radio: Arc<dyn Radio>,
    telemetry: Telemetry,
    forwarder: Forwarder,
    counters: Arc<SampleCounters>,
    timing: Timing,
    plan: Vec<PlannedKind>,
    state: SessionState,
    board: Option<Arc<dyn Board>>,
    armed: Vec<ArmedKind>,
    connected_since: Option<Timestamp>,
    streaming_since: Option<Timestamp>,
    streamed_secs: f64,
}

impl DeviceSession {
    pub fn new(
        config: DeviceConfig,
        radio: Arc<dyn Radio>,
        telemetry: Telemetry,
        timing: Timing,
    ) -> Self {
        let plan: Vec<PlannedKind> = config
            .sensors()
            .iter()
            .map(|(kind, params)| PlannedKind {
                kind: *kind,
                driver: registry::driver(*kind),
                params: params.clone(),
                rate_hz: SensorSettings::resolve(*kind, params).rate_hz(),
            })
            .collect();

        let counters = Arc::new(SampleCounters::new(plan.iter().map(|p| p.kind)));
        let forwarder = Forwarder::new(config.address(), telemetry.clone(), Arc::clone(&counters));

        Self {
            config,
            radio,
            telemetry,
            forwarder,
            counters,
            timing,
            plan,
            state: SessionState::Disconnected,
            board: None,
            armed: Vec::new(),
            connected_since: None,
            streaming_since: None,
            streamed_secs: 0.0,
        }
    }

    pub fn address(&self) -> DeviceAddress {
        self.config.address()
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Armed kinds in arm order.
    pub fn armed(&self) -> Vec<SensorKind> {
        self.armed.iter().map(|a| a.armed.kind).collect()
    }

    pub fn counters(&self) -> Arc<SampleCounters> {
        Arc::clone(&self.counters)
    }

    #[instrument(name = "connect", skip_all, fields(address = %self.config.address()))]
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Disconnected {
            warn!(state = %self.state, "Already connected");
            return Ok(());
        }

        let address = self.config.address();
        self.state = SessionState::Connecting;
        info!(adapter = self.config.adapter().unwrap_or("default"), "Connecting");

        let board = match self.radio.connect(address, self.config.adapter()).await {
            Ok(board) => board,
            Err(source) => {
                self.state = SessionState::Disconnected;
                error!(error = %source, "Connection failed");
                return Err(SessionError::LinkFailure { address, source });
            }
        };

        if let Err(source) = board
            .set_connection_parameters(LinkParameters::default())
            .await
        {
            if let Err(e) = board.disconnect().await {
                warn!(error = %e, "Failed to release board after handshake failure");
            }
            self.state = SessionState::Disconnected;
            error!(error = %source, "Link parameter handshake failed");
            return Err(SessionError::LinkFailure { address, source });
        }
        sleep(self.timing.link_settle).await;

        self.board = Some(board);
        self.state = SessionState::Connected;
        self.connected_since = Some(Timestamp::now());
        self.notify_connectivity(true);
        info!("Connected");
        Ok(())
    }

    /// Arm every configured kind. Never connects on its own.
    ///
    /// If any kind fails to arm, every kind armed so far is torn down again
    /// and the session stays `Connected`.
    #[instrument(name = "start_sensors", skip_all, fields(address = %self.config.address()))]
    pub async fn start_sensors(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Streaming => {
                info!("Already streaming");
                return Ok(());
            }
            SessionState::Connected => {}
            _ => return Err(SessionError::NotConnected),
        }
        let Some(board) = self.board.clone() else {
            return Err(SessionError::NotConnected);
        };

        for step in &self.plan {
            match step
                .driver
                .setup(board.as_ref(), step.kind, &step.params, &self.forwarder)
                .await
            {
                Ok(armed) => {
                    info!(kind = %step.kind, channel = %armed.channel, "Armed");
                    self.armed.push(ArmedKind {
                        armed,
                        driver: step.driver,
                    });
                }
                Err(source) => {
                    error!(kind = %step.kind, error = %source, "Arming failed, rolling back");
                    let failures = disarm(board.as_ref(), &mut self.armed, &self.timing).await;
                    if !failures.is_empty() {
                        warn!(failures = %describe(&failures), "Rollback left errors behind");
                    }
                    return Err(SessionError::ArmFailure {
                        kind: step.kind,
                        source,
                    });
                }
            }
        }

        self.state = SessionState::Streaming;
        self.streaming_since = Some(Timestamp::now());
        info!(kinds = self.armed.len(), "Streaming");
        Ok(())
    }

    /// Disarm every armed kind in reverse arm order.
    ///
    /// Every teardown is attempted; the armed set is cleared and the session
    /// returns to `Connected` even when some of them fail.
    #[instrument(name = "stop_sensors", skip_all, fields(address = %self.config.address()))]
    pub async fn stop_sensors(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Streaming {
            info!(state = %self.state, "Not streaming");
            return Ok(());
        }
        let Some(board) = self.board.clone() else {
            return Err(SessionError::NotConnected);
        };

        let failures = disarm(board.as_ref(), &mut self.armed, &self.timing).await;

        if let Some(since) = self.streaming_since.take() {
            self.streamed_secs += Timestamp::now().duration_since(since).as_secs_f64();
        }
        self.state = SessionState::Connected;
        info!("Stopped streaming");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SessionError::DisarmFailure { kinds: failures })
        }
    }

    /// Release the board, stopping sensors first when streaming.
    #[instrument(name = "disconnect", skip_all, fields(address = %self.config.address()))]
    pub async fn disconnect(&mut self) -> Result<(), SessionError> {
        let stopped = match self.state {
            SessionState::Disconnected => {
                info!("Already disconnected");
                return Ok(());
            }
            SessionState::Streaming => self.stop_sensors().await,
            _ => Ok(()),
        };

        self.state = SessionState::Disconnecting;
        if let Some(board) = self.board.take() {
            if let Err(e) = board.disconnect().await {
                warn!(error = %e, "Board reported an error while disconnecting");
            }
        }

        self.state = SessionState::Disconnected;
        self.connected_since = None;
        self.notify_connectivity(false);
        info!("Disconnected");
        stopped
    }

    /// Send the readiness indicators on the telemetry channel.
    pub fn ready(&self) {
        let connected = i32::from(self.board.is_some());
        let mut indicators = vec![
            (INDICATOR_CONF, 1),
            (INDICATOR_DEV, connected),
            (INDICATOR_BLE, connected),
        ];
        if let Some(output) = self.config.fusion_output() {
            indicators.push((INDICATOR_FUSION, output.indicator_code()));
        }

        for (topic, value) in indicators {
            if let Err(e) = self.telemetry.notify(topic, value) {
                warn!(topic, error = %e, "Failed to send readiness indicator");
            }
        }
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            address: self.config.address(),
            model: self.config.model(),
            state: self.state,
            armed: self.armed(),
            samples: self.counters.snapshot(),
            connected_since: self.connected_since,
            streaming_since: self.streaming_since,
        }
    }

    pub fn report(&self) -> SampleReport {
        let mut streamed_secs = self.streamed_secs;
        if let Some(since) = self.streaming_since {
            streamed_secs += Timestamp::now().duration_since(since).as_secs_f64();
        }

        SampleReport {
            address: self.config.address(),
            streamed_secs,
            kinds: self
                .plan
                .iter()
                .map(|p| KindReport::new(p.kind, p.rate_hz, self.counters.get(p.kind), streamed_secs))
                .collect(),
        }
    }

    /// `conf`, `dev` then `ble` going up; `ble` then `dev` going down.
    fn notify_connectivity(&self, connected: bool) {
        let indicators: &[(&str, i32)] = if connected {
            &[(INDICATOR_CONF, 1), (INDICATOR_DEV, 1), (INDICATOR_BLE, 1)]
        } else {
            &[(INDICATOR_BLE, 0), (INDICATOR_DEV, 0)]
        };
        for &(topic, value) in indicators {
            if let Err(e) = self.telemetry.notify(topic, value) {
                warn!(topic, error = %e, "Failed to send connectivity indicator");
            }
        }
    }
}

/// Tear down `armed` newest first, draining it completely.
async fn disarm(
    board: &dyn Board,
    armed: &mut Vec<ArmedKind>,
    timing: &Timing,
) -> Vec<(SensorKind, DriverError)> {
    let mut failures = Vec::new();

    while let Some(entry) = armed.pop() {
        let kind = entry.armed.kind;
        match entry.driver.teardown(board, &entry.armed, timing).await {
            Ok(()) => info!(%kind, "Disarmed"),
            Err(e) => {
                warn!(%kind, error = %e, "Disarming failed");
                failures.push((kind, e));
            }
        }
    }

    failures
}
