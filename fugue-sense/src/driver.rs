//! The external radio and board capability consumed by sessions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fugue_core::{Channel, DeviceAddress, RawSample, SensorKind, SensorSettings};

/// Link parameters requested right after connecting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkParameters {
    pub min_interval_ms: f32,
    pub max_interval_ms: f32,
    pub latency: u16,
    pub timeout_ms: u16,
}

impl Default for LinkParameters {
    fn default() -> Self {
        Self {
            min_interval_ms: 7.5,
            max_interval_ms: 7.5,
            latency: 0,
            timeout_ms: 6000,
        }
    }
}

/// Handle onto a data signal of a connected board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signal(pub u32);

/// Handle onto an on-board timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u32);

/// Callback invoked by the driver for every sample of a subscribed signal.
pub type SampleHandler = Arc<dyn Fn(RawSample) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DriverError {
    #[error("Connection to {address} failed: {reason}")]
    Connect {
        address: DeviceAddress,
        reason: String,
    },

    #[error("{operation} rejected by device: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },

    #[error("Board is disconnected")]
    Disconnected,

    #[error("No data signal for {0}")]
    NoSignal(Channel),

    #[error("Unknown signal {0:?}")]
    UnknownSignal(Signal),

    #[error("Unknown timer {0:?}")]
    UnknownTimer(TimerId),
}

/// Radio stack able to open connections to boards.
#[async_trait]
pub trait Radio: Send + Sync + 'static {
    async fn connect(
        &self,
        address: DeviceAddress,
        adapter: Option<&str>,
    ) -> Result<Arc<dyn Board>, DriverError>;
}

/// A connected board.
///
/// Each call maps onto one driver routine. Callers are responsible for
/// ordering; the board does not validate sequences.
#[async_trait]
pub trait Board: Send + Sync + 'static {
    fn address(&self) -> DeviceAddress;

    async fn set_connection_parameters(&self, params: LinkParameters) -> Result<(), DriverError>;

    /// Push resolved settings to the sensor.
    async fn configure(&self, settings: &SensorSettings) -> Result<(), DriverError>;

    fn data_signal(&self, channel: Channel) -> Result<Signal, DriverError>;

    fn subscribe(&self, signal: Signal, handler: SampleHandler) -> Result<(), DriverError>;

    fn unsubscribe(&self, signal: Signal) -> Result<(), DriverError>;

    fn enable(&self, channel: Channel) -> Result<(), DriverError>;

    fn disable(&self, channel: Channel) -> Result<(), DriverError>;

    fn start(&self, kind: SensorKind) -> Result<(), DriverError>;

    fn stop(&self, kind: SensorKind) -> Result<(), DriverError>;

    /// Allocate a timer that reads `signal` every `period`.
    async fn create_timer(&self, period: Duration, signal: Signal) -> Result<TimerId, DriverError>;

    fn start_timer(&self, timer: TimerId) -> Result<(), DriverError>;

    fn stop_timer(&self, timer: TimerId) -> Result<(), DriverError>;

    fn remove_timer(&self, timer: TimerId) -> Result<(), DriverError>;

    async fn disconnect(&self) -> Result<(), DriverError>;
}
