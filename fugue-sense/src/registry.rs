//! Sensor driver registry: the arm/disarm routine pair of every sensor kind.
//!
//! Setup always runs configure, subscribe, enable/start in that order and
//! teardown is its exact mirror. A setup that fails midway undoes the steps
//! it already performed before returning, so a failed arm leaves nothing
//! behind on the board.

use async_trait::async_trait;
use fugue_core::{Channel, SensorKind, SensorParams, SensorSettings};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::driver::{Board, DriverError, Signal, TimerId};
use crate::forward::Forwarder;
use crate::session::Timing;

/// What a successful setup left armed on the board.
#[derive(Debug, Clone, PartialEq)]
pub struct Armed {
    pub kind: SensorKind,
    pub channel: Channel,
    pub signal: Signal,
    pub timer: Option<TimerId>,
}

#[async_trait]
pub trait SensorDriver: Send + Sync + 'static {
    async fn setup(
        &self,
        board: &dyn Board,
        kind: SensorKind,
        params: &SensorParams,
        forwarder: &Forwarder,
    ) -> Result<Armed, DriverError>;

    async fn teardown(
        &self,
        board: &dyn Board,
        armed: &Armed,
        timing: &Timing,
    ) -> Result<(), DriverError>;
}

/// Sensors that stream on their own once enabled and started.
pub struct StreamingDriver;

/// Sensors read by an on-board timer at a fixed period.
pub struct TimedDriver;

static STREAMING: StreamingDriver = StreamingDriver;
static TIMED: TimedDriver = TimedDriver;

/// The driver pair for `kind`.
pub fn driver(kind: SensorKind) -> &'static dyn SensorDriver {
    match kind {
        SensorKind::Accelerometer
        | SensorKind::Gyroscope
        | SensorKind::GyroscopeAlt
        | SensorKind::Magnetometer
        | SensorKind::AmbientLight
        | SensorKind::SensorFusion => &STREAMING,
        SensorKind::Temperature => &TIMED,
    }
}

#[async_trait]
impl SensorDriver for StreamingDriver {
    async fn setup(
        &self,
        board: &dyn Board,
        kind: SensorKind,
        params: &SensorParams,
        forwarder: &Forwarder,
    ) -> Result<Armed, DriverError> {
        let settings = SensorSettings::resolve(kind, params);
        // fusion resolves to its single configured output
        let channel = Channel::for_settings(&settings);
        debug!(%kind, ?settings, "Configuring");

        board.configure(&settings).await?;
        let signal = board.data_signal(channel)?;
        board.subscribe(signal, forwarder.handler(kind, channel))?;

        if let Err(e) = board.enable(channel) {
            undo(kind, "unsubscribe", board.unsubscribe(signal));
            return Err(e);
        }
        if let Err(e) = board.start(kind) {
            undo(kind, "disable", board.disable(channel));
            undo(kind, "unsubscribe", board.unsubscribe(signal));
            return Err(e);
        }

        Ok(Armed {
            kind,
            channel,
            signal,
            timer: None,
        })
    }

    async fn teardown(
        &self,
        board: &dyn Board,
        armed: &Armed,
        _timing: &Timing,
    ) -> Result<(), DriverError> {
        let results = [
            board.stop(armed.kind),
            board.disable(armed.channel),
            board.unsubscribe(armed.signal),
        ];
        results.into_iter().collect()
    }
}

#[async_trait]
impl SensorDriver for TimedDriver {
    async fn setup(
        &self,
        board: &dyn Board,
        kind: SensorKind,
        params: &SensorParams,
        forwarder: &Forwarder,
    ) -> Result<Armed, DriverError> {
        let settings = SensorSettings::resolve(kind, params);
        let SensorSettings::Temperature { period } = settings else {
            return Err(DriverError::Rejected {
                operation: "create_timer",
                reason: format!("{kind} is not timer driven"),
            });
        };
        let channel = Channel::for_settings(&settings);
        debug!(%kind, ?period, "Configuring");

        board.configure(&settings).await?;
        let signal = board.data_signal(channel)?;
        board.subscribe(signal, forwarder.handler(kind, channel))?;

        let timer = match board.create_timer(period, signal).await {
            Ok(timer) => timer,
            Err(e) => {
                undo(kind, "unsubscribe", board.unsubscribe(signal));
                return Err(e);
            }
        };
        if let Err(e) = board.start_timer(timer) {
            undo(kind, "remove_timer", board.remove_timer(timer));
            undo(kind, "unsubscribe", board.unsubscribe(signal));
            return Err(e);
        }

        Ok(Armed {
            kind,
            channel,
            signal,
            timer: Some(timer),
        })
    }

    async fn teardown(
        &self,
        board: &dyn Board,
        armed: &Armed,
        timing: &Timing,
    ) -> Result<(), DriverError> {
        let mut results = Vec::with_capacity(3);
        if let Some(timer) = armed.timer {
            results.push(board.stop_timer(timer));
            results.push(board.remove_timer(timer));
            // in-flight timer reads must land before the subscription goes
            sleep(timing.timer_teardown).await;
        }
        results.push(board.unsubscribe(armed.signal));
        results.into_iter().collect()
    }
}

fn undo(kind: SensorKind, step: &'static str, result: Result<(), DriverError>) {
    if let Err(e) = result {
        warn!(%kind, step, error = %e, "Failed to undo partial setup");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fugue_core::{DeviceAddress, Field, FusionOutput};
    use fugue_osc::Telemetry;

    use super::*;
    use crate::driver::Radio;
    use crate::forward::SampleCounters;
    use crate::radio::{BoardCall, MockRadio};

    fn address() -> DeviceAddress {
        "EC:47:49:CF:53:C4".parse().unwrap()
    }

    fn forwarder(kinds: &[SensorKind]) -> Forwarder {
        let (telemetry, _rx) = Telemetry::channel(16);
        Forwarder::new(
            address(),
            telemetry,
            Arc::new(SampleCounters::new(kinds.iter().copied())),
        )
    }

    #[tokio::test]
    async fn streaming_teardown_mirrors_setup() {
        let radio = MockRadio::new();
        let board = radio.connect(address(), None).await.unwrap();
        let kind = SensorKind::Accelerometer;

        let armed = driver(kind)
            .setup(board.as_ref(), kind, &SensorParams::default(), &forwarder(&[kind]))
            .await
            .unwrap();
        driver(kind)
            .teardown(board.as_ref(), &armed, &Timing::immediate())
            .await
            .unwrap();

        let channel = Channel::Acceleration;
        assert_eq!(
            radio.board(address()).journal(),
            [
                BoardCall::Configure(kind),
                BoardCall::DataSignal(channel),
                BoardCall::Subscribe(channel),
                BoardCall::Enable(channel),
                BoardCall::Start(kind),
                BoardCall::Stop(kind),
                BoardCall::Disable(channel),
                BoardCall::Unsubscribe(channel),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timer_removed_before_unsubscribe() {
        let radio = MockRadio::new();
        let board = radio.connect(address(), None).await.unwrap();
        let kind = SensorKind::Temperature;

        let armed = driver(kind)
            .setup(board.as_ref(), kind, &SensorParams::default(), &forwarder(&[kind]))
            .await
            .unwrap();
        assert!(armed.timer.is_some());

        driver(kind)
            .teardown(board.as_ref(), &armed, &Timing::default())
            .await
            .unwrap();

        let mock = radio.board(address());
        let journal = mock.journal();
        let channel = Channel::Temperature;
        assert_eq!(
            &journal[journal.len() - 3..],
            [
                BoardCall::StopTimer(channel),
                BoardCall::RemoveTimer(channel),
                BoardCall::Unsubscribe(channel),
            ]
        );
        assert_eq!(mock.timers(), 0);
        assert_eq!(mock.subscriptions(), 0);
    }

    #[tokio::test]
    async fn failed_start_undoes_subscription() {
        let radio = MockRadio::new();
        let board = radio.connect(address(), None).await.unwrap();
        let mock = radio.board(address());
        mock.fail_on(BoardCall::Start(SensorKind::Magnetometer));

        let err = driver(SensorKind::Magnetometer)
            .setup(
                board.as_ref(),
                SensorKind::Magnetometer,
                &SensorParams::default(),
                &forwarder(&[SensorKind::Magnetometer]),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DriverError::Rejected { operation: "start", .. }));
        assert_eq!(mock.subscriptions(), 0);
        assert!(mock.journal().ends_with(&[
            BoardCall::Disable(Channel::MagneticField),
            BoardCall::Unsubscribe(Channel::MagneticField),
        ]));
    }

    #[tokio::test]
    async fn fusion_subscribes_single_output() {
        let radio = MockRadio::new();
        let board = radio.connect(address(), None).await.unwrap();
        let kind = SensorKind::SensorFusion;
        let mut params = SensorParams::default();
        params.insert(Field::AccRange, 4.0);

        let armed = driver(kind)
            .setup(board.as_ref(), kind, &params, &forwarder(&[kind]))
            .await
            .unwrap();

        let mock = radio.board(address());
        assert_eq!(armed.channel, Channel::Fusion(FusionOutput::Quaternion));
        assert_eq!(mock.subscriptions(), 1);
        assert!(mock.is_subscribed(Channel::Fusion(FusionOutput::Quaternion)));
    }
}
