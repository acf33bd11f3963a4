//! Raw operator configuration records and the validators that turn them
//! into immutable, normalized configuration.
//!
//! Validators never stop at the first problem: every violation found in a
//! record is collected and reported together.

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::quantize::{self, Field};
use crate::{AddressError, DeviceAddress, FusionMode, FusionOutput, Model, SensorKind};

/// A sensor parameter as written by the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Text(String),
}

impl ParamValue {
    fn as_number(&self) -> Option<f64> {
        match self {
            ParamValue::Number(n) => Some(*n),
            ParamValue::Text(s) => s.trim().parse().ok(),
        }
    }

    fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Number(_) => None,
            ParamValue::Text(s) => Some(s),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Number(n) => write!(f, "{n}"),
            ParamValue::Text(s) => f.write_str(s),
        }
    }
}

/// Sensor kind name -> parameter name -> value.
pub type RawSensors = BTreeMap<String, BTreeMap<String, ParamValue>>;

/// One entry of `metawear.devices`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDeviceConfig {
    /// Radio address.
    pub mac: Option<String>,
    /// Model name.
    pub name: Option<String>,
    /// Radio adapter to connect through.
    pub ble: Option<String>,
    #[serde(default)]
    pub sensors: RawSensors,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawPort {
    Number(i64),
    Text(String),
}

/// The `network` section: where telemetry is sent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawNetworkConfig {
    pub ip: Option<String>,
    pub port: Option<RawPort>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Violation {
    #[error("missing required field `{0}`")]
    Missing(&'static str),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error("unknown model '{0}', expected mmr or mms")]
    UnknownModel(String),

    #[error("unknown sensor kind '{0}'")]
    UnknownSensor(String),

    #[error("{kind} has no parameter '{field}'")]
    UnknownParameter { kind: SensorKind, field: String },

    #[error("{kind} parameter '{field}' {reason}")]
    InvalidParameter {
        kind: SensorKind,
        field: Field,
        reason: String,
    },

    #[error("no sensors configured")]
    NoSensors,

    #[error("no sensors supported by {0} remain after normalization")]
    NothingToStream(Model),

    #[error("'{0}' is not a valid IPv4 or IPv6 address")]
    InvalidIp(String),

    #[error("port '{0}' is not an integer")]
    PortNotInteger(String),

    #[error("port {0} is outside the range 0-65535")]
    PortOutOfRange(i64),

    #[error("radio address {0} is configured more than once")]
    DuplicateAddress(DeviceAddress),

    #[error("{0} is configured more than once")]
    DuplicateSensor(SensorKind),

    #[error("device {index}: {violation}")]
    Device {
        index: usize,
        violation: Box<Violation>,
    },
}

/// Every violation found while validating a configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigInvalid {
    pub violations: Vec<Violation>,
}

impl ConfigInvalid {
    /// Attribute every violation to the device at `index`.
    pub fn for_device(self, index: usize) -> Self {
        let violations = self
            .violations
            .into_iter()
            .map(|violation| Violation::Device {
                index,
                violation: Box::new(violation),
            })
            .collect();
        Self { violations }
    }
}

impl std::error::Error for ConfigInvalid {}

impl fmt::Display for ConfigInvalid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid configuration ({} problems)", self.violations.len())?;
        for violation in &self.violations {
            write!(f, "\n  - {violation}")?;
        }
        Ok(())
    }
}

impl From<Vec<Violation>> for ConfigInvalid {
    fn from(violations: Vec<Violation>) -> Self {
        Self { violations }
    }
}

/// A change the device validator made to the declared sensor set or to a
/// sensor's parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Adjustment {
    /// Removed because sensor fusion uses the same hardware.
    Superseded { kind: SensorKind },
    /// Removed because the model has no such sensor.
    Unsupported { kind: SensorKind, model: Model },
    /// Renamed so the matching driver generation is used.
    Renamed { from: SensorKind, to: SensorKind },
    /// A parameter the hardware settings do not use.
    Ignored { kind: SensorKind, parameter: String },
    /// An older parameter spelling translated to its current field.
    Converted {
        kind: SensorKind,
        parameter: String,
        field: Field,
        value: f64,
    },
}

impl fmt::Display for Adjustment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Adjustment::Superseded { kind } => write!(f, "{kind} superseded by Sensor Fusion"),
            Adjustment::Unsupported { kind, model } => write!(f, "{kind} not available on {model}"),
            Adjustment::Renamed { from, to } => write!(f, "{from} renamed to {to}"),
            Adjustment::Ignored { kind, parameter } => {
                write!(f, "{kind} parameter '{parameter}' is not used")
            }
            Adjustment::Converted {
                kind,
                parameter,
                field,
                value,
            } => write!(f, "{kind} parameter '{parameter}' converted to {field} = {value}"),
        }
    }
}

/// Validated parameters of one sensor kind.
///
/// Numeric values are already snapped to supported hardware values; omitted
/// fields are filled in when settings are resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SensorParams {
    numeric: BTreeMap<Field, f64>,
    mode: Option<FusionMode>,
    output: Option<FusionOutput>,
}

impl SensorParams {
    pub fn get(&self, field: Field) -> Option<f64> {
        self.numeric.get(&field).copied()
    }

    pub fn insert(&mut self, field: Field, value: f64) {
        self.numeric.insert(field, value);
    }

    pub fn fusion_mode(&self) -> Option<FusionMode> {
        self.mode
    }

    pub fn fusion_output(&self) -> Option<FusionOutput> {
        self.output
    }
}

/// A wrapped configuration together with the normalizations applied to it.
#[derive(Debug, Clone)]
pub struct Validated<T> {
    pub config: T,
    pub adjustments: Vec<Adjustment>,
}

/// Validated configuration of one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    address: DeviceAddress,
    model: Model,
    adapter: Option<String>,
    sensors: BTreeMap<SensorKind, SensorParams>,
    fusion_output: Option<FusionOutput>,
}

impl DeviceConfig {
    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    pub fn model(&self) -> Model {
        self.model
    }

    pub fn adapter(&self) -> Option<&str> {
        self.adapter.as_deref()
    }

    pub fn sensors(&self) -> &BTreeMap<SensorKind, SensorParams> {
        &self.sensors
    }

    pub fn kinds(&self) -> impl Iterator<Item = SensorKind> + '_ {
        self.sensors.keys().copied()
    }

    /// Output channel when sensor fusion is configured.
    pub fn fusion_output(&self) -> Option<FusionOutput> {
        self.fusion_output
    }
}

/// Validated telemetry destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NetworkConfig {
    address: IpAddr,
    port: u16,
}

impl NetworkConfig {
    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

/// Validate and normalize one device record.
///
/// Normalization, applied only to otherwise valid records:
/// 1. Sensor fusion removes the raw accelerometer, gyroscope and
///    magnetometer channels and records the fusion output.
/// 2. Models without an ambient light sensor drop it.
/// 3. Models with the alternate gyroscope rename `Gyroscope` to
///    `Gyroscope (alt)`.
pub fn validate_device(raw: &RawDeviceConfig) -> Result<Validated<DeviceConfig>, ConfigInvalid> {
    let mut violations = Vec::new();

    let address = match raw.mac.as_deref() {
        None => {
            violations.push(Violation::Missing("mac"));
            None
        }
        Some(mac) => match mac.parse::<DeviceAddress>() {
            Ok(address) => Some(address),
            Err(e) => {
                violations.push(e.into());
                None
            }
        },
    };

    let model = match raw.name.as_deref() {
        None => {
            violations.push(Violation::Missing("name"));
            None
        }
        Some(name) => match name.parse::<Model>() {
            Ok(model) => Some(model),
            Err(()) => {
                violations.push(Violation::UnknownModel(name.to_owned()));
                None
            }
        },
    };

    if raw.sensors.is_empty() {
        violations.push(Violation::NoSensors);
    }

    let mut adjustments = Vec::new();
    let mut sensors = BTreeMap::new();
    for (name, params) in &raw.sensors {
        let Some(kind) = SensorKind::from_config_name(name) else {
            violations.push(Violation::UnknownSensor(name.clone()));
            continue;
        };
        // keys differing only in surrounding whitespace name the same kind
        if sensors.contains_key(&kind) {
            violations.push(Violation::DuplicateSensor(kind));
            continue;
        }
        let params = validate_params(kind, params, &mut violations, &mut adjustments);
        sensors.insert(kind, params);
    }

    let (Some(address), Some(model)) = (address, model) else {
        return Err(violations.into());
    };
    if !violations.is_empty() {
        return Err(violations.into());
    }

    let fusion_output = sensors
        .get(&SensorKind::SensorFusion)
        .map(|params| params.fusion_output().unwrap_or(FusionOutput::Quaternion));
    if fusion_output.is_some() {
        sensors.retain(|kind, _| {
            let superseded = kind.is_raw_channel();
            if superseded {
                adjustments.push(Adjustment::Superseded { kind: *kind });
            }
            !superseded
        });
    }

    if !model.has_ambient_light() && sensors.remove(&SensorKind::AmbientLight).is_some() {
        adjustments.push(Adjustment::Unsupported {
            kind: SensorKind::AmbientLight,
            model,
        });
    }

    if model.uses_alt_gyroscope() {
        if let Some(params) = sensors.remove(&SensorKind::Gyroscope) {
            sensors.insert(SensorKind::GyroscopeAlt, params);
            adjustments.push(Adjustment::Renamed {
                from: SensorKind::Gyroscope,
                to: SensorKind::GyroscopeAlt,
            });
        }
    }

    if sensors.is_empty() {
        return Err(vec![Violation::NothingToStream(model)].into());
    }

    for adjustment in &adjustments {
        info!(%address, %adjustment, "Normalized sensor configuration");
    }

    Ok(Validated {
        config: DeviceConfig {
            address,
            model,
            adapter: raw.ble.clone(),
            sensors,
            fusion_output,
        },
        adjustments,
    })
}

fn validate_params(
    kind: SensorKind,
    raw: &BTreeMap<String, ParamValue>,
    violations: &mut Vec<Violation>,
    adjustments: &mut Vec<Adjustment>,
) -> SensorParams {
    let mut params = SensorParams::default();
    let declares = |field: Field| raw.keys().any(|name| name.trim() == field.name());

    for (name, value) in raw {
        let Some(field) = quantize::fields(kind)
            .iter()
            .copied()
            .find(|field| field.name() == name.trim())
        else {
            match (kind, name.trim()) {
                // light sensors were once configured by rate in Hz
                (SensorKind::AmbientLight, "odr") if !declares(Field::MeasurementRate) => {
                    let field = Field::MeasurementRate;
                    match value.as_number() {
                        Some(hz) if hz.is_finite() && hz > 0.0 => {
                            let value = quantize::nearest(kind, field, 1000.0 / hz)
                                .unwrap_or(1000.0 / hz);
                            params.insert(field, value);
                            adjustments.push(Adjustment::Converted {
                                kind,
                                parameter: name.clone(),
                                field,
                                value,
                            });
                        }
                        _ => violations.push(Violation::InvalidParameter {
                            kind,
                            field,
                            reason: format!("'odr' must be a positive number, got '{value}'"),
                        }),
                    }
                }
                (SensorKind::AmbientLight, "odr") | (SensorKind::Accelerometer, "threshold") => {
                    adjustments.push(Adjustment::Ignored {
                        kind,
                        parameter: name.clone(),
                    });
                }
                _ => violations.push(Violation::UnknownParameter {
                    kind,
                    field: name.clone(),
                }),
            }
            continue;
        };

        let invalid = |reason: String| Violation::InvalidParameter {
            kind,
            field,
            reason,
        };

        match field {
            Field::Mode => match value.as_text().and_then(|text| text.parse().ok()) {
                Some(mode) => params.mode = Some(mode),
                None => violations.push(invalid(format!(
                    "'{value}' is not one of ndof, imu_plus, compass, m4g"
                ))),
            },
            Field::Output => match value.as_text().and_then(|text| text.parse().ok()) {
                Some(output) => params.output = Some(output),
                None => violations.push(invalid(format!(
                    "'{value}' is not one of quaternion, euler_angle, linear_acc, gravity, \
                     corrected_acc, corrected_gyro, corrected_mag"
                ))),
            },
            _ => match value.as_number() {
                Some(requested) if requested.is_finite() && requested > 0.0 => {
                    let snapped = quantize::nearest(kind, field, requested).unwrap_or(requested);
                    if snapped != requested {
                        debug!(%kind, %field, requested, snapped, "Snapped parameter to supported value");
                    }
                    params.insert(field, snapped);
                }
                _ => violations.push(invalid(format!("must be a positive number, got '{value}'"))),
            },
        }
    }

    params
}

/// Validate the telemetry destination. A textual port is coerced to an
/// integer; the address is taken exactly as written.
pub fn validate_network(raw: &RawNetworkConfig) -> Result<NetworkConfig, ConfigInvalid> {
    let mut violations = Vec::new();

    let address = match raw.ip.as_deref() {
        None => {
            violations.push(Violation::Missing("ip"));
            None
        }
        Some(ip) => match ip.parse::<IpAddr>() {
            Ok(address) => Some(address),
            Err(_) => {
                violations.push(Violation::InvalidIp(ip.to_owned()));
                None
            }
        },
    };

    let requested = match &raw.port {
        None => {
            violations.push(Violation::Missing("port"));
            None
        }
        Some(RawPort::Number(n)) => Some(*n),
        Some(RawPort::Text(text)) => match text.trim().parse::<i64>() {
            Ok(n) => Some(n),
            Err(_) => {
                violations.push(Violation::PortNotInteger(text.clone()));
                None
            }
        },
    };

    let port = requested.and_then(|n| match u16::try_from(n) {
        Ok(port) => Some(port),
        Err(_) => {
            violations.push(Violation::PortOutOfRange(n));
            None
        }
    });

    match (address, port) {
        (Some(address), Some(port)) if violations.is_empty() => Ok(NetworkConfig { address, port }),
        _ => Err(violations.into()),
    }
}
