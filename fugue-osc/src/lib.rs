mod message;
pub use message::*;
mod command;
pub use command::*;
mod listener;
pub use listener::*;
mod telemetry;
pub use telemetry::*;

pub use tokio_util::sync::CancellationToken;
