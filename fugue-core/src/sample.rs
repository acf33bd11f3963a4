//! Sample payloads handed over by the driver and the telemetry channels
//! they decode into.

use std::fmt;

use serde::Serialize;

use crate::quantize::SensorSettings;
use crate::FusionOutput;

/// Layout tag carried by every driver payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// One `f32`.
    Float,
    /// x, y, z as `f32`.
    CartesianFloat,
    /// w, x, y, z as `f32`.
    Quaternion,
    /// heading, pitch, roll, yaw as `f32`.
    EulerAngle,
    /// x, y, z as `f32` followed by one calibration accuracy byte.
    CorrectedCartesianFloat,
}

impl DataType {
    /// Exact payload length in bytes.
    pub fn width(self) -> usize {
        match self {
            DataType::Float => 4,
            DataType::CartesianFloat => 12,
            DataType::Quaternion | DataType::EulerAngle => 16,
            DataType::CorrectedCartesianFloat => 13,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Opaque sample as delivered by a data signal.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    pub data_type: DataType,
    pub bytes: Vec<u8>,
}

impl RawSample {
    /// Build a payload of little-endian floats.
    pub fn from_floats(data_type: DataType, values: &[f32]) -> Self {
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self { data_type, bytes }
    }

    pub fn corrected(x: f32, y: f32, z: f32, accuracy: u8) -> Self {
        let mut sample = Self::from_floats(DataType::CorrectedCartesianFloat, &[x, y, z]);
        sample.bytes.push(accuracy);
        sample
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("expected {expected} payload, got {actual}")]
    TypeMismatch { expected: DataType, actual: DataType },
    #[error("{data_type} payload must be {expected} bytes, got {actual}")]
    Length {
        data_type: DataType,
        expected: usize,
        actual: usize,
    },
}

/// Decoded sample with named fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Reading {
    Scalar { value: f32 },
    Vector { x: f32, y: f32, z: f32 },
    Quaternion { w: f32, x: f32, y: f32, z: f32 },
    Euler { heading: f32, pitch: f32, roll: f32, yaw: f32 },
    Corrected { x: f32, y: f32, z: f32, accuracy: u8 },
}

impl Reading {
    /// Telemetry payload in wire order.
    pub fn values(&self) -> Vec<f32> {
        match *self {
            Reading::Scalar { value } => vec![value],
            Reading::Vector { x, y, z } | Reading::Corrected { x, y, z, .. } => vec![x, y, z],
            Reading::Quaternion { w, x, y, z } => vec![w, x, y, z],
            Reading::Euler {
                heading,
                pitch,
                roll,
                yaw,
            } => vec![heading, pitch, roll, yaw],
        }
    }
}

/// The telemetry channel an armed sensor kind streams on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Acceleration,
    Rotation,
    MagneticField,
    Temperature,
    Illuminance,
    Fusion(FusionOutput),
}

impl Channel {
    /// The single channel served by `settings`.
    pub fn for_settings(settings: &SensorSettings) -> Self {
        match settings {
            SensorSettings::Accelerometer { .. } => Channel::Acceleration,
            SensorSettings::Gyroscope { .. } | SensorSettings::GyroscopeAlt { .. } => {
                Channel::Rotation
            }
            SensorSettings::Magnetometer { .. } => Channel::MagneticField,
            SensorSettings::Temperature { .. } => Channel::Temperature,
            SensorSettings::AmbientLight { .. } => Channel::Illuminance,
            SensorSettings::SensorFusion { output, .. } => Channel::Fusion(*output),
        }
    }

    /// Topic suffix below `/<radio-address>/`.
    pub fn topic(self) -> &'static str {
        match self {
            Channel::Acceleration => "acc",
            Channel::Rotation => "gyro",
            Channel::MagneticField => "mag",
            Channel::Temperature => "temp",
            Channel::Illuminance => "light",
            Channel::Fusion(FusionOutput::Quaternion) => "quat",
            Channel::Fusion(FusionOutput::EulerAngle) => "euler",
            Channel::Fusion(FusionOutput::LinearAcc) => "linear_acc",
            Channel::Fusion(FusionOutput::Gravity) => "gravity",
            Channel::Fusion(FusionOutput::CorrectedAcc) => "corrected_acc",
            Channel::Fusion(FusionOutput::CorrectedGyro) => "corrected_gyro",
            Channel::Fusion(FusionOutput::CorrectedMag) => "corrected_mag",
        }
    }

    pub fn data_type(self) -> DataType {
        match self {
            Channel::Acceleration | Channel::Rotation | Channel::MagneticField => {
                DataType::CartesianFloat
            }
            Channel::Temperature | Channel::Illuminance => DataType::Float,
            Channel::Fusion(FusionOutput::Quaternion) => DataType::Quaternion,
            Channel::Fusion(FusionOutput::EulerAngle) => DataType::EulerAngle,
            Channel::Fusion(FusionOutput::LinearAcc | FusionOutput::Gravity) => {
                DataType::CartesianFloat
            }
            Channel::Fusion(
                FusionOutput::CorrectedAcc | FusionOutput::CorrectedGyro | FusionOutput::CorrectedMag,
            ) => DataType::CorrectedCartesianFloat,
        }
    }

    /// Number of floats in a telemetry message on this channel.
    pub fn arity(self) -> usize {
        match self.data_type() {
            DataType::Float => 1,
            DataType::CartesianFloat | DataType::CorrectedCartesianFloat => 3,
            DataType::Quaternion | DataType::EulerAngle => 4,
        }
    }

    pub fn decode(self, sample: &RawSample) -> Result<Reading, DecodeError> {
        let expected = self.data_type();
        if sample.data_type != expected {
            return Err(DecodeError::TypeMismatch {
                expected,
                actual: sample.data_type,
            });
        }
        if sample.bytes.len() != expected.width() {
            return Err(DecodeError::Length {
                data_type: expected,
                expected: expected.width(),
                actual: sample.bytes.len(),
            });
        }

        let f: Vec<f32> = sample
            .bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let reading = match expected {
            DataType::Float => Reading::Scalar { value: f[0] },
            DataType::CartesianFloat => Reading::Vector {
                x: f[0],
                y: f[1],
                z: f[2],
            },
            DataType::Quaternion => Reading::Quaternion {
                w: f[0],
                x: f[1],
                y: f[2],
                z: f[3],
            },
            DataType::EulerAngle => Reading::Euler {
                heading: f[0],
                pitch: f[1],
                roll: f[2],
                yaw: f[3],
            },
            DataType::CorrectedCartesianFloat => Reading::Corrected {
                x: f[0],
                y: f[1],
                z: f[2],
                accuracy: sample.bytes[12],
            },
        };

        Ok(reading)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SensorParams;
    use crate::SensorKind;

    #[test]
    fn decodes_acceleration() {
        let sample = RawSample::from_floats(DataType::CartesianFloat, &[0.1, 0.2, 9.8]);

        let reading = Channel::Acceleration.decode(&sample).unwrap();

        assert_eq!(reading, Reading::Vector { x: 0.1, y: 0.2, z: 9.8 });
        assert_eq!(reading.values(), [0.1, 0.2, 9.8]);
    }

    #[test]
    fn corrected_drops_accuracy_from_payload() {
        let channel = Channel::Fusion(FusionOutput::CorrectedMag);
        let reading = channel.decode(&RawSample::corrected(1.0, 2.0, 3.0, 3)).unwrap();

        assert_eq!(
            reading,
            Reading::Corrected { x: 1.0, y: 2.0, z: 3.0, accuracy: 3 }
        );
        assert_eq!(reading.values().len(), channel.arity());
    }

    #[test]
    fn rejects_wrong_type_and_length() {
        let quat = RawSample::from_floats(DataType::Quaternion, &[1.0, 0.0, 0.0, 0.0]);
        assert!(matches!(
            Channel::Temperature.decode(&quat),
            Err(DecodeError::TypeMismatch { .. })
        ));

        let short = RawSample {
            data_type: DataType::EulerAngle,
            bytes: vec![0; 12],
        };
        assert_eq!(
            Channel::Fusion(FusionOutput::EulerAngle).decode(&short),
            Err(DecodeError::Length {
                data_type: DataType::EulerAngle,
                expected: 16,
                actual: 12
            })
        );
    }

    #[test]
    fn fusion_maps_to_configured_output() {
        let mut params = SensorParams::default();
        params.insert(crate::Field::AccRange, 8.0);
        let settings = SensorSettings::resolve(SensorKind::SensorFusion, &params);

        let channel = Channel::for_settings(&settings);
        assert_eq!(channel, Channel::Fusion(FusionOutput::Quaternion));
        assert_eq!(channel.topic(), "quat");
        assert_eq!(channel.arity(), 4);
    }

    #[test]
    fn arity_matches_decoded_payload() {
        let channels = [
            Channel::Acceleration,
            Channel::Temperature,
            Channel::Fusion(FusionOutput::EulerAngle),
            Channel::Fusion(FusionOutput::Gravity),
        ];
        for channel in channels {
            let n = channel.arity();
            let sample = RawSample::from_floats(channel.data_type(), &vec![0.5; n]);
            assert_eq!(channel.decode(&sample).unwrap().values().len(), n);
        }
    }
}
