use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use fugue_core::{Channel, DecodeError, DeviceAddress, RawSample, SensorKind};
use fugue_osc::{Message, Telemetry, TelemetryError};
use tracing::{debug, warn};

use crate::driver::SampleHandler;

/// Why a sample was dropped on the callback path.
#[derive(Debug, thiserror::Error)]
pub enum ForwardFailure {
    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Telemetry queue is full")]
    QueueFull,

    #[error("Telemetry uplink is closed")]
    Closed,
}

impl From<TelemetryError> for ForwardFailure {
    fn from(e: TelemetryError) -> Self {
        match e {
            TelemetryError::Full => ForwardFailure::QueueFull,
            TelemetryError::Closed => ForwardFailure::Closed,
        }
    }
}

/// Per-kind counts of forwarded samples.
///
/// The set of kinds is fixed at construction; counts only ever grow.
#[derive(Debug)]
pub struct SampleCounters {
    counts: BTreeMap<SensorKind, AtomicU64>,
}

impl SampleCounters {
    pub fn new(kinds: impl IntoIterator<Item = SensorKind>) -> Self {
        Self {
            counts: kinds.into_iter().map(|k| (k, AtomicU64::new(0))).collect(),
        }
    }

    pub fn increment(&self, kind: SensorKind) {
        if let Some(count) = self.counts.get(&kind) {
            count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get(&self, kind: SensorKind) -> u64 {
        self.counts
            .get(&kind)
            .map_or(0, |count| count.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> BTreeMap<SensorKind, u64> {
        self.counts
            .iter()
            .map(|(kind, count)| (*kind, count.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Decodes driver samples and hands them to the telemetry uplink under
/// `/<radio-address>/<channel>`.
#[derive(Debug, Clone)]
pub struct Forwarder {
    address: DeviceAddress,
    telemetry: Telemetry,
    counters: Arc<SampleCounters>,
}

impl Forwarder {
    pub fn new(address: DeviceAddress, telemetry: Telemetry, counters: Arc<SampleCounters>) -> Self {
        Self {
            address,
            telemetry,
            counters,
        }
    }

    pub fn forward(
        &self,
        kind: SensorKind,
        channel: Channel,
        sample: &RawSample,
    ) -> Result<(), ForwardFailure> {
        let reading = channel.decode(sample)?;
        let topic = format!("/{}/{}", self.address, channel.topic());
        self.telemetry.send(Message::floats(topic, &reading.values()))?;
        self.counters.increment(kind);
        Ok(())
    }

    /// Callback for the data signal of `channel`. Failures are logged and
    /// the sample is dropped; the callback itself never fails.
    pub fn handler(&self, kind: SensorKind, channel: Channel) -> SampleHandler {
        let forwarder = self.clone();
        Arc::new(move |sample: RawSample| {
            match forwarder.forward(kind, channel, &sample) {
                Ok(()) => {}
                Err(e @ ForwardFailure::Decode(_)) => {
                    warn!(address = %forwarder.address, %kind, error = %e, "Dropping sample");
                }
                Err(e) => {
                    debug!(address = %forwarder.address, %kind, error = %e, "Dropping sample");
                }
            }
        })
    }
}
