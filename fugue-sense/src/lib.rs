pub mod actor;
pub mod config;
pub mod driver;
pub mod forward;
pub mod http;
pub mod manager;
pub mod radio;
pub mod registry;
pub mod report;
pub mod session;

pub use actor::{SessionHandle, SessionOp};
pub use config::{Config, ConfigError, ControlConfig, RadioConfig, ServerConfig, Setup, TimingConfig};
pub use driver::{Board, DriverError, LinkParameters, Radio, SampleHandler, Signal, TimerId};
pub use forward::{ForwardFailure, Forwarder, SampleCounters};
pub use manager::{Health, SessionManager, StatusBoard};
pub use radio::{BoardCall, MockBoard, MockRadio};
pub use registry::{Armed, SensorDriver};
pub use report::{KindReport, SampleReport};
pub use session::{DeviceSession, SessionError, SessionState, SessionStatus, Timing};
