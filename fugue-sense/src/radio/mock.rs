use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use fugue_core::{Channel, DataType, DeviceAddress, FusionOutput, RawSample, SensorKind, SensorSettings};
use rand::Rng;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::driver::{Board, DriverError, LinkParameters, Radio, SampleHandler, Signal, TimerId};

/// One driver routine invoked on a [`MockBoard`].
#[derive(Debug, Clone, PartialEq)]
pub enum BoardCall {
    SetConnectionParameters,
    Configure(SensorKind),
    DataSignal(Channel),
    Subscribe(Channel),
    Unsubscribe(Channel),
    Enable(Channel),
    Disable(Channel),
    Start(SensorKind),
    Stop(SensorKind),
    CreateTimer(Channel),
    StartTimer(Channel),
    StopTimer(Channel),
    RemoveTimer(Channel),
    Disconnect,
}

impl BoardCall {
    fn operation(&self) -> &'static str {
        match self {
            BoardCall::SetConnectionParameters => "set_connection_parameters",
            BoardCall::Configure(_) => "configure",
            BoardCall::DataSignal(_) => "data_signal",
            BoardCall::Subscribe(_) => "subscribe",
            BoardCall::Unsubscribe(_) => "unsubscribe",
            BoardCall::Enable(_) => "enable",
            BoardCall::Disable(_) => "disable",
            BoardCall::Start(_) => "start",
            BoardCall::Stop(_) => "stop",
            BoardCall::CreateTimer(_) => "create_timer",
            BoardCall::StartTimer(_) => "start_timer",
            BoardCall::StopTimer(_) => "stop_timer",
            BoardCall::RemoveTimer(_) => "remove_timer",
            BoardCall::Disconnect => "disconnect",
        }
    }
}

/// In-process radio stack.
///
/// Boards are created on first use and kept per address, so tests can grab
/// the board a session talks to with [`MockRadio::board`]. A simulated radio
/// also generates synthetic samples at the configured rate for every started
/// sensor and timer.
#[derive(Clone, Default)]
pub struct MockRadio {
    inner: Arc<Mutex<RadioState>>,
    noise: Option<f32>,
}

#[derive(Default)]
struct RadioState {
    boards: HashMap<DeviceAddress, Arc<MockBoard>>,
    refused: HashSet<DeviceAddress>,
}

impl MockRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// A radio whose boards stream synthetic samples with the given noise
    /// amplitude. A non-finite amplitude generates noiseless samples.
    pub fn simulated(noise: f32) -> Self {
        let noise = if noise.is_finite() {
            noise.abs()
        } else {
            warn!(noise, "Noise amplitude is not finite, generating noiseless samples");
            0.0
        };
        Self {
            inner: Arc::default(),
            noise: Some(noise),
        }
    }

    pub fn board(&self, address: DeviceAddress) -> Arc<MockBoard> {
        let mut inner = lock(&self.inner);
        let noise = self.noise;
        Arc::clone(
            inner
                .boards
                .entry(address)
                .or_insert_with(|| Arc::new(MockBoard::new(address, noise))),
        )
    }

    /// Make every connection attempt to `address` fail.
    pub fn refuse(&self, address: DeviceAddress) {
        lock(&self.inner).refused.insert(address);
    }
}

#[async_trait]
impl Radio for MockRadio {
    async fn connect(
        &self,
        address: DeviceAddress,
        adapter: Option<&str>,
    ) -> Result<Arc<dyn Board>, DriverError> {
        if lock(&self.inner).refused.contains(&address) {
            return Err(DriverError::Connect {
                address,
                reason: "device not in range".to_owned(),
            });
        }

        let board = self.board(address);
        lock(&board.state).connected = true;
        info!(%address, adapter = adapter.unwrap_or("default"), "Mock board connected");

        Ok(board)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Source {
    Sensor(SensorKind),
    Timer(TimerId),
}

struct Timer {
    channel: Channel,
    period: Duration,
}

#[derive(Default)]
struct BoardState {
    connected: bool,
    journal: Vec<BoardCall>,
    failures: Vec<BoardCall>,
    settings: HashMap<SensorKind, SensorSettings>,
    signals: HashMap<Signal, Channel>,
    handlers: HashMap<Channel, SampleHandler>,
    enabled: HashSet<Channel>,
    timers: HashMap<TimerId, Timer>,
    generators: HashMap<Source, CancellationToken>,
    next_id: u32,
}

impl BoardState {
    /// Journal `call`, then fail it if the board is gone or a failure was
    /// injected for it.
    fn check(&mut self, call: BoardCall) -> Result<(), DriverError> {
        self.journal.push(call.clone());
        if !self.connected {
            return Err(DriverError::Disconnected);
        }
        if self.failures.contains(&call) {
            return Err(DriverError::Rejected {
                operation: call.operation(),
                reason: "injected failure".to_owned(),
            });
        }
        Ok(())
    }

    fn channel_of(&self, signal: Signal) -> Result<Channel, DriverError> {
        self.signals
            .get(&signal)
            .copied()
            .ok_or(DriverError::UnknownSignal(signal))
    }

    fn timer(&self, timer: TimerId) -> Result<&Timer, DriverError> {
        self.timers.get(&timer).ok_or(DriverError::UnknownTimer(timer))
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn halt(&mut self, source: Source) {
        if let Some(token) = self.generators.remove(&source) {
            token.cancel();
        }
    }
}

pub struct MockBoard {
    address: DeviceAddress,
    noise: Option<f32>,
    state: Arc<Mutex<BoardState>>,
}

impl MockBoard {
    fn new(address: DeviceAddress, noise: Option<f32>) -> Self {
        Self {
            address,
            noise,
            state: Arc::default(),
        }
    }

    /// Every call made so far, in order.
    pub fn journal(&self) -> Vec<BoardCall> {
        lock(&self.state).journal.clone()
    }

    pub fn clear_journal(&self) {
        lock(&self.state).journal.clear();
    }

    /// Make every future `call` fail.
    pub fn fail_on(&self, call: BoardCall) {
        lock(&self.state).failures.push(call);
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    pub fn is_subscribed(&self, channel: Channel) -> bool {
        lock(&self.state).handlers.contains_key(&channel)
    }

    pub fn subscriptions(&self) -> usize {
        lock(&self.state).handlers.len()
    }

    pub fn timers(&self) -> usize {
        lock(&self.state).timers.len()
    }

    /// Deliver `sample` to the handler subscribed to `channel`.
    ///
    /// Returns whether a handler was subscribed.
    pub fn emit(&self, channel: Channel, sample: RawSample) -> bool {
        let handler = lock(&self.state).handlers.get(&channel).cloned();
        match handler {
            Some(handler) => {
                handler(sample);
                true
            }
            None => false,
        }
    }

    fn spawn_generator(&self, state: &mut BoardState, source: Source, channel: Channel, rate_hz: f64) {
        let Some(noise) = self.noise else {
            return;
        };
        if !(rate_hz.is_finite() && rate_hz > 0.0) {
            return;
        }

        let token = CancellationToken::new();
        if let Some(previous) = state.generators.insert(source, token.clone()) {
            previous.cancel();
        }

        let shared = Arc::clone(&self.state);
        let period = Duration::from_secs_f64(1.0 / rate_hz);
        debug!(address = %self.address, %channel, rate_hz, "Starting sample generator");

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let handler = lock(&shared).handlers.get(&channel).cloned();
                        if let Some(handler) = handler {
                            handler(synthesize(channel, noise));
                        }
                    }
                }
            }
        });
    }
}

#[async_trait]
impl Board for MockBoard {
    fn address(&self) -> DeviceAddress {
        self.address
    }

    async fn set_connection_parameters(&self, _params: LinkParameters) -> Result<(), DriverError> {
        lock(&self.state).check(BoardCall::SetConnectionParameters)
    }

    async fn configure(&self, settings: &SensorSettings) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        state.check(BoardCall::Configure(settings.kind()))?;
        state.settings.insert(settings.kind(), settings.clone());
        Ok(())
    }

    fn data_signal(&self, channel: Channel) -> Result<Signal, DriverError> {
        let mut state = lock(&self.state);
        state.check(BoardCall::DataSignal(channel))?;
        let signal = Signal(state.next_id());
        state.signals.insert(signal, channel);
        Ok(signal)
    }

    fn subscribe(&self, signal: Signal, handler: SampleHandler) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        let channel = state.channel_of(signal)?;
        state.check(BoardCall::Subscribe(channel))?;
        state.handlers.insert(channel, handler);
        Ok(())
    }

    fn unsubscribe(&self, signal: Signal) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        let channel = state.channel_of(signal)?;
        state.check(BoardCall::Unsubscribe(channel))?;
        state.handlers.remove(&channel);
        Ok(())
    }

    fn enable(&self, channel: Channel) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        state.check(BoardCall::Enable(channel))?;
        state.enabled.insert(channel);
        Ok(())
    }

    fn disable(&self, channel: Channel) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        state.check(BoardCall::Disable(channel))?;
        state.enabled.remove(&channel);
        Ok(())
    }

    fn start(&self, kind: SensorKind) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        state.check(BoardCall::Start(kind))?;
        let stream = state
            .settings
            .get(&kind)
            .map(|settings| (Channel::for_settings(settings), settings.rate_hz()));
        if let Some((channel, rate_hz)) = stream {
            self.spawn_generator(&mut state, Source::Sensor(kind), channel, rate_hz);
        }
        Ok(())
    }

    fn stop(&self, kind: SensorKind) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        state.check(BoardCall::Stop(kind))?;
        state.halt(Source::Sensor(kind));
        Ok(())
    }

    async fn create_timer(&self, period: Duration, signal: Signal) -> Result<TimerId, DriverError> {
        let mut state = lock(&self.state);
        let channel = state.channel_of(signal)?;
        state.check(BoardCall::CreateTimer(channel))?;
        let timer = TimerId(state.next_id());
        state.timers.insert(timer, Timer { channel, period });
        Ok(timer)
    }

    fn start_timer(&self, timer: TimerId) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        let (channel, period) = {
            let t = state.timer(timer)?;
            (t.channel, t.period)
        };
        state.check(BoardCall::StartTimer(channel))?;
        self.spawn_generator(&mut state, Source::Timer(timer), channel, 1.0 / period.as_secs_f64());
        Ok(())
    }

    fn stop_timer(&self, timer: TimerId) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        let channel = state.timer(timer)?.channel;
        state.check(BoardCall::StopTimer(channel))?;
        state.halt(Source::Timer(timer));
        Ok(())
    }

    fn remove_timer(&self, timer: TimerId) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        let channel = state.timer(timer)?.channel;
        state.check(BoardCall::RemoveTimer(channel))?;
        state.timers.remove(&timer);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        state.check(BoardCall::Disconnect)?;

        for (_, token) in state.generators.drain() {
            token.cancel();
        }
        state.handlers.clear();
        state.enabled.clear();
        state.signals.clear();
        state.timers.clear();
        state.settings.clear();
        state.connected = false;

        info!(address = %self.address, "Mock board disconnected");
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn synthesize(channel: Channel, noise: f32) -> RawSample {
    let mut rng = rand::rng();
    let mut jitter = move || rng.random_range(-noise..=noise);

    let vector = |base: [f32; 3], jitter: &mut dyn FnMut() -> f32| {
        [base[0] + jitter(), base[1] + jitter(), base[2] + jitter()]
    };

    match channel {
        Channel::Temperature => RawSample::from_floats(DataType::Float, &[24.0 + jitter()]),
        Channel::Illuminance => RawSample::from_floats(DataType::Float, &[320.0 + 10.0 * jitter()]),
        Channel::Acceleration | Channel::Fusion(FusionOutput::Gravity) => {
            RawSample::from_floats(DataType::CartesianFloat, &vector([0.0, 0.0, 1.0], &mut jitter))
        }
        Channel::Rotation | Channel::Fusion(FusionOutput::LinearAcc) => {
            RawSample::from_floats(DataType::CartesianFloat, &vector([0.0; 3], &mut jitter))
        }
        Channel::MagneticField => RawSample::from_floats(
            DataType::CartesianFloat,
            &vector([20.0, -5.0, 40.0], &mut jitter),
        ),
        Channel::Fusion(FusionOutput::Quaternion) => {
            let [x, y, z] = vector([0.0; 3], &mut jitter);
            let w = 1.0f32;
            let norm = (w * w + x * x + y * y + z * z).sqrt();
            RawSample::from_floats(DataType::Quaternion, &[w / norm, x / norm, y / norm, z / norm])
        }
        Channel::Fusion(FusionOutput::EulerAngle) => {
            let [pitch, roll, yaw] = vector([0.0; 3], &mut jitter);
            let heading = (180.0 + 10.0 * jitter()).rem_euclid(360.0);
            RawSample::from_floats(DataType::EulerAngle, &[heading, pitch, roll, yaw])
        }
        Channel::Fusion(
            FusionOutput::CorrectedAcc | FusionOutput::CorrectedGyro | FusionOutput::CorrectedMag,
        ) => {
            let [x, y, z] = vector([0.0; 3], &mut jitter);
            RawSample::corrected(x, y, z, 3)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> DeviceAddress {
        "EC:47:49:CF:53:C4".parse().unwrap()
    }

    #[test]
    fn non_finite_noise_generates_clean_samples() {
        for noise in [f32::NAN, f32::INFINITY, -2.5] {
            let radio = MockRadio::simulated(noise);
            let amplitude = radio.noise.unwrap();
            assert!(amplitude.is_finite() && amplitude >= 0.0, "{noise} -> {amplitude}");

            let sample = synthesize(Channel::Acceleration, amplitude);
            assert_eq!(Channel::Acceleration.decode(&sample).unwrap().values().len(), 3);
        }
    }

    #[tokio::test]
    async fn refused_address_fails_to_connect() {
        let radio = MockRadio::new();
        radio.refuse(address());

        let err = radio.connect(address(), None).await.err().unwrap();
        assert!(matches!(err, DriverError::Connect { .. }));
    }

    #[tokio::test]
    async fn calls_after_disconnect_fail() {
        let radio = MockRadio::new();
        let board = radio.connect(address(), Some("hci0")).await.unwrap();

        board.disconnect().await.unwrap();

        assert_eq!(
            board.enable(Channel::Acceleration),
            Err(DriverError::Disconnected)
        );
        assert!(!radio.board(address()).is_connected());
    }

    #[tokio::test]
    async fn injected_failure_is_journaled() {
        let radio = MockRadio::new();
        let board = radio.connect(address(), None).await.unwrap();
        let mock = radio.board(address());
        mock.fail_on(BoardCall::Start(SensorKind::Magnetometer));

        assert!(board.start(SensorKind::Magnetometer).is_err());
        assert!(board.start(SensorKind::Accelerometer).is_ok());
        assert_eq!(
            mock.journal(),
            [
                BoardCall::Start(SensorKind::Magnetometer),
                BoardCall::Start(SensorKind::Accelerometer)
            ]
        );
    }

    #[test]
    fn synthetic_samples_decode_on_their_channel() {
        let channels = [
            Channel::Acceleration,
            Channel::Rotation,
            Channel::MagneticField,
            Channel::Temperature,
            Channel::Illuminance,
            Channel::Fusion(FusionOutput::Quaternion),
            Channel::Fusion(FusionOutput::EulerAngle),
            Channel::Fusion(FusionOutput::CorrectedGyro),
        ];
        for channel in channels {
            assert!(channel.decode(&synthesize(channel, 0.1)).is_ok(), "{channel}");
        }
    }
}
