use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

pub mod config;
pub mod quantize;
pub mod sample;

pub use config::{
    Adjustment, ConfigInvalid, DeviceConfig, NetworkConfig, ParamValue, RawDeviceConfig,
    RawNetworkConfig, RawPort, RawSensors, SensorParams, Validated, Violation, validate_device,
    validate_network,
};
pub use quantize::{Domain, Field, SensorSettings};
pub use sample::{Channel, DataType, DecodeError, RawSample, Reading};

/// 48-bit radio address of a device.
///
/// Parsed from colon or dash separated hex pairs and always displayed in the
/// canonical upper-case colon form, e.g. `EC:47:49:CF:53:C4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress(pub [u8; 6]);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a 48-bit address of colon or dash separated hex pairs")]
pub struct AddressError(pub String);

impl FromStr for DeviceAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || AddressError(s.to_owned());
        let bytes = s.as_bytes();

        if bytes.len() != 17 {
            return Err(malformed());
        }

        // One separator style per address, never mixed.
        let separator = bytes[2];
        if separator != b':' && separator != b'-' {
            return Err(malformed());
        }

        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            let start = i * 3;
            let pair = &bytes[start..start + 2];
            if !pair.iter().all(u8::is_ascii_hexdigit) {
                return Err(malformed());
            }
            if i < 5 && bytes[start + 2] != separator {
                return Err(malformed());
            }
            let pair = std::str::from_utf8(pair).map_err(|_| malformed())?;
            *octet = u8::from_str_radix(pair, 16).map_err(|_| malformed())?;
        }

        Ok(Self(octets))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl Serialize for DeviceAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Supported hardware revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Model {
    /// Model A. Carries an ambient light sensor and the first generation
    /// gyroscope.
    MetaMotionR,
    /// Model B. No ambient light sensor, alternate gyroscope driver.
    MetaMotionS,
}

impl Model {
    pub fn has_ambient_light(self) -> bool {
        matches!(self, Model::MetaMotionR)
    }

    pub fn uses_alt_gyroscope(self) -> bool {
        matches!(self, Model::MetaMotionS)
    }
}

impl FromStr for Model {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mmr" | "metamotionr" | "modela" => Ok(Model::MetaMotionR),
            "mms" | "metamotions" | "modelb" => Ok(Model::MetaMotionS),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Model::MetaMotionR => f.write_str("MetaMotionR"),
            Model::MetaMotionS => f.write_str("MetaMotionS"),
        }
    }
}

/// One category of onboard sensor.
///
/// `GyroscopeAlt` never appears in operator configuration. The device
/// validator produces it for models using the alternate gyroscope driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum SensorKind {
    Accelerometer,
    Gyroscope,
    #[serde(rename = "Gyroscope (alt)")]
    GyroscopeAlt,
    Magnetometer,
    Temperature,
    #[serde(rename = "Ambient Light")]
    AmbientLight,
    #[serde(rename = "Sensor Fusion")]
    SensorFusion,
}

impl SensorKind {
    /// Kinds an operator may name in a configuration file.
    pub const CONFIGURABLE: [SensorKind; 6] = [
        SensorKind::Accelerometer,
        SensorKind::Gyroscope,
        SensorKind::Magnetometer,
        SensorKind::Temperature,
        SensorKind::AmbientLight,
        SensorKind::SensorFusion,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SensorKind::Accelerometer => "Accelerometer",
            SensorKind::Gyroscope => "Gyroscope",
            SensorKind::GyroscopeAlt => "Gyroscope (alt)",
            SensorKind::Magnetometer => "Magnetometer",
            SensorKind::Temperature => "Temperature",
            SensorKind::AmbientLight => "Ambient Light",
            SensorKind::SensorFusion => "Sensor Fusion",
        }
    }

    pub fn from_config_name(name: &str) -> Option<Self> {
        Self::CONFIGURABLE
            .into_iter()
            .find(|kind| kind.name() == name.trim())
    }

    /// Raw channels share physical hardware with sensor fusion.
    pub fn is_raw_channel(self) -> bool {
        matches!(
            self,
            SensorKind::Accelerometer
                | SensorKind::Gyroscope
                | SensorKind::GyroscopeAlt
                | SensorKind::Magnetometer
        )
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Sensor fusion algorithm run on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMode {
    Ndof,
    ImuPlus,
    Compass,
    M4g,
}

impl FromStr for FusionMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ndof" => Ok(FusionMode::Ndof),
            "imu_plus" | "imuplus" => Ok(FusionMode::ImuPlus),
            "compass" => Ok(FusionMode::Compass),
            "m4g" => Ok(FusionMode::M4g),
            _ => Err(()),
        }
    }
}

/// The one output channel a fusion session streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionOutput {
    Quaternion,
    EulerAngle,
    LinearAcc,
    Gravity,
    CorrectedAcc,
    CorrectedGyro,
    CorrectedMag,
}

impl FusionOutput {
    pub fn name(self) -> &'static str {
        match self {
            FusionOutput::Quaternion => "quaternion",
            FusionOutput::EulerAngle => "euler_angle",
            FusionOutput::LinearAcc => "linear_acc",
            FusionOutput::Gravity => "gravity",
            FusionOutput::CorrectedAcc => "corrected_acc",
            FusionOutput::CorrectedGyro => "corrected_gyro",
            FusionOutput::CorrectedMag => "corrected_mag",
        }
    }

    /// Code reported on `/indicator/fusion`.
    pub fn indicator_code(self) -> i32 {
        match self {
            FusionOutput::EulerAngle => 0,
            FusionOutput::Quaternion => 1,
            FusionOutput::Gravity => 2,
            FusionOutput::LinearAcc => 3,
            FusionOutput::CorrectedAcc => 4,
            FusionOutput::CorrectedGyro => 5,
            FusionOutput::CorrectedMag => 6,
        }
    }
}

impl FromStr for FusionOutput {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quaternion" | "quat" => Ok(FusionOutput::Quaternion),
            "euler_angle" | "euler" => Ok(FusionOutput::EulerAngle),
            "linear_acc" => Ok(FusionOutput::LinearAcc),
            "gravity" => Ok(FusionOutput::Gravity),
            "corrected_acc" => Ok(FusionOutput::CorrectedAcc),
            "corrected_gyro" => Ok(FusionOutput::CorrectedGyro),
            "corrected_mag" => Ok(FusionOutput::CorrectedMag),
            _ => Err(()),
        }
    }
}

impl fmt::Display for FusionOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
