use std::fmt;

use fugue_core::DeviceAddress;

use crate::{Arg, Message};

/// A remote command understood by the control plane.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Stop the listener and shut every session down.
    StopServer,
    StartStream,
    StopStream,
    /// Reconfiguration request for the sensor set.
    Sensors(Vec<Arg>),
    /// Reconfiguration request for the telemetry destination.
    Network(Vec<Arg>),
    /// Reply with the readiness indicators.
    Ready,
}

impl Command {
    fn parse(name: &str, args: Vec<Arg>) -> Option<Self> {
        let command = match name {
            "stop_server" => Command::StopServer,
            "start_stream" => Command::StartStream,
            "stop_stream" => Command::StopStream,
            "sensors" => Command::Sensors(args),
            "network" => Command::Network(args),
            "ready" => Command::Ready,
            _ => return None,
        };
        Some(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::StopServer => "stop_server",
            Command::StartStream => "start_stream",
            Command::StopStream => "stop_stream",
            Command::Sensors(_) => "sensors",
            Command::Network(_) => "network",
            Command::Ready => "ready",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which sessions a command is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// `/<command>`: every session.
    All,
    /// `/<radio-address>/<command>`: one session.
    Device(DeviceAddress),
}

/// A routed inbound command.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub target: Target,
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("Unknown command topic '{0}'")]
    UnknownTopic(String),

    #[error("Topic '{topic}' does not name a radio address")]
    BadAddress { topic: String },
}

/// Map a message topic onto a command and its target.
pub fn route(message: Message) -> Result<Inbound, RouteError> {
    let Message { topic, args } = message;

    let segments: Vec<&str> = match topic.strip_prefix('/') {
        Some(rest) => rest.split('/').collect(),
        None => return Err(RouteError::UnknownTopic(topic.clone())),
    };

    let (target, name) = match segments.as_slice() {
        [name] => (Target::All, *name),
        [address, name] => match address.parse::<DeviceAddress>() {
            Ok(address) => (Target::Device(address), *name),
            Err(_) => {
                return Err(RouteError::BadAddress {
                    topic: topic.clone(),
                });
            }
        },
        _ => return Err(RouteError::UnknownTopic(topic.clone())),
    };

    match Command::parse(name, args) {
        // stopping the server is never scoped to one device
        Some(Command::StopServer) if target != Target::All => {
            Err(RouteError::UnknownTopic(topic.clone()))
        }
        Some(command) => Ok(Inbound { target, command }),
        None => Err(RouteError::UnknownTopic(topic.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_topics() {
        let inbound = route(Message::new("/start_stream")).unwrap();
        assert_eq!(inbound.target, Target::All);
        assert_eq!(inbound.command, Command::StartStream);

        let inbound = route(Message::new("/stop_server")).unwrap();
        assert_eq!(inbound.command, Command::StopServer);
    }

    #[test]
    fn namespaced_topics() {
        let inbound = route(Message::new("/ec:47:49:cf:53:c4/ready")).unwrap();

        assert_eq!(
            inbound.target,
            Target::Device("EC:47:49:CF:53:C4".parse().unwrap())
        );
        assert_eq!(inbound.command, Command::Ready);
    }

    #[test]
    fn reconfiguration_keeps_arguments() {
        let msg = Message::new("/sensors").with_arg(Arg::Text("Accelerometer".into()));

        let inbound = route(msg).unwrap();
        assert_eq!(
            inbound.command,
            Command::Sensors(vec![Arg::Text("Accelerometer".into())])
        );
    }

    #[test]
    fn rejects_unknown_and_malformed_topics() {
        assert_eq!(
            route(Message::new("/dance")),
            Err(RouteError::UnknownTopic("/dance".into()))
        );
        assert_eq!(
            route(Message::new("/not-a-mac/ready")),
            Err(RouteError::BadAddress {
                topic: "/not-a-mac/ready".into()
            })
        );
        assert!(route(Message::new("ready")).is_err());
        assert!(route(Message::new("/a/b/c")).is_err());
        assert!(route(Message::new("/EC:47:49:CF:53:C4/stop_server")).is_err());
    }
}
