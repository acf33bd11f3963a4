use rosc::{OscMessage, OscPacket, OscType};

/// A single argument of a control-plane message.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Int(i32),
    Float(f32),
    Text(String),
    Bool(bool),
}

impl From<Arg> for OscType {
    fn from(arg: Arg) -> Self {
        match arg {
            Arg::Int(v) => OscType::Int(v),
            Arg::Float(v) => OscType::Float(v),
            Arg::Text(v) => OscType::String(v),
            Arg::Bool(v) => OscType::Bool(v),
        }
    }
}

/// A topic plus its arguments; one OSC message on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub args: Vec<Arg>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("Malformed OSC datagram: {0}")]
    Malformed(String),

    #[error("Unsupported OSC argument {kind} in {topic}")]
    Unsupported { topic: String, kind: String },
}

impl Message {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: Arg) -> Self {
        self.args.push(arg);
        self
    }

    pub fn floats(topic: impl Into<String>, values: &[f32]) -> Self {
        Self {
            topic: topic.into(),
            args: values.iter().copied().map(Arg::Float).collect(),
        }
    }

    pub fn int(topic: impl Into<String>, value: i32) -> Self {
        Self::new(topic).with_arg(Arg::Int(value))
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let packet = OscPacket::Message(OscMessage {
            addr: self.topic.clone(),
            args: self.args.iter().cloned().map(OscType::from).collect(),
        });
        rosc::encoder::encode(&packet).map_err(|e| CodecError::Malformed(format!("{e:?}")))
    }

    /// Decode one datagram. Bundles are flattened in order.
    pub fn decode(datagram: &[u8]) -> Result<Vec<Message>, CodecError> {
        let (_, packet) = rosc::decoder::decode_udp(datagram)
            .map_err(|e| CodecError::Malformed(format!("{e:?}")))?;

        let mut messages = Vec::new();
        flatten(packet, &mut messages)?;
        Ok(messages)
    }
}

fn flatten(packet: OscPacket, out: &mut Vec<Message>) -> Result<(), CodecError> {
    match packet {
        OscPacket::Message(msg) => {
            let args = msg
                .args
                .into_iter()
                .map(|arg| match arg {
                    OscType::Int(v) => Ok(Arg::Int(v)),
                    OscType::Float(v) => Ok(Arg::Float(v)),
                    OscType::Double(v) => Ok(Arg::Float(v as f32)),
                    OscType::String(v) => Ok(Arg::Text(v)),
                    OscType::Bool(v) => Ok(Arg::Bool(v)),
                    other => Err(CodecError::Unsupported {
                        topic: msg.addr.clone(),
                        kind: format!("{other:?}"),
                    }),
                })
                .collect::<Result<_, _>>()?;
            out.push(Message {
                topic: msg.addr,
                args,
            });
        }
        OscPacket::Bundle(bundle) => {
            for packet in bundle.content {
                flatten(packet, out)?;
            }
        }
    }
    Ok(())
}
