//! Hardware-supported parameter values and their defaults.
//!
//! Every numeric parameter an operator can set has a fixed domain per
//! sensor kind. Requested values are snapped to the nearest supported value;
//! when two supported values are equally distant the smaller one wins.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::config::SensorParams;
use crate::{FusionMode, FusionOutput, SensorKind};

/// A configurable parameter of a sensor kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    /// Output data rate in Hz.
    Odr,
    /// Full-scale range (g for accelerometers, degrees/s for gyroscopes).
    Range,
    /// Sampling period in seconds for timer-driven kinds.
    Period,
    Gain,
    /// Integration time in milliseconds.
    IntegrationTime,
    /// Measurement repeat rate in milliseconds.
    MeasurementRate,
    AccRange,
    GyroRange,
    /// Fusion algorithm (text).
    Mode,
    /// Fusion output channel (text).
    Output,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::Odr => "odr",
            Field::Range => "range",
            Field::Period => "period",
            Field::Gain => "gain",
            Field::IntegrationTime => "integration_time",
            Field::MeasurementRate => "measurement_rate",
            Field::AccRange => "acc_range",
            Field::GyroRange => "gyro_range",
            Field::Mode => "mode",
            Field::Output => "output",
        }
    }

    pub fn is_textual(self) -> bool {
        matches!(self, Field::Mode | Field::Output)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of values a parameter may take on the hardware.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Domain {
    /// Ascending list of discrete supported values.
    Discrete(&'static [f64]),
    /// Any value inside the inclusive bounds.
    Continuous { min: f64, max: f64 },
}

impl Domain {
    /// Snap `requested` into the domain. Infinities snap to the matching
    /// end; NaN has no nearest value and is left to the caller.
    pub fn snap(self, requested: f64) -> f64 {
        match self {
            Domain::Discrete(values) if requested.is_infinite() => {
                if requested > 0.0 {
                    values[values.len() - 1]
                } else {
                    values[0]
                }
            }
            Domain::Discrete(values) => {
                let mut best = values[0];
                let mut best_distance = (requested - best).abs();
                for &candidate in &values[1..] {
                    let distance = (requested - candidate).abs();
                    // Strictly closer only: ties keep the smaller, earlier value.
                    if distance < best_distance {
                        best = candidate;
                        best_distance = distance;
                    }
                }
                best
            }
            Domain::Continuous { min, max } => requested.clamp(min, max),
        }
    }

    pub fn contains(self, value: f64) -> bool {
        match self {
            Domain::Discrete(values) => values.contains(&value),
            Domain::Continuous { min, max } => (min..=max).contains(&value),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    domain: Domain,
    default: f64,
}

impl FieldSpec {
    fn resolve(self, requested: Option<f64>) -> f64 {
        let requested = requested.filter(|v| v.is_finite()).unwrap_or(self.default);
        self.domain.snap(requested)
    }
}

const ACC_ODR: FieldSpec = FieldSpec {
    domain: Domain::Discrete(&[
        0.78125, 1.5625, 3.125, 6.25, 12.5, 25.0, 50.0, 100.0, 200.0, 400.0, 800.0, 1600.0,
    ]),
    default: 25.0,
};

const ACC_RANGE: FieldSpec = FieldSpec {
    domain: Domain::Discrete(&[2.0, 4.0, 8.0, 16.0]),
    default: 16.0,
};

const GYRO_ODR: FieldSpec = FieldSpec {
    domain: Domain::Discrete(&[25.0, 50.0, 100.0, 200.0, 400.0, 800.0, 1600.0, 3200.0]),
    default: 25.0,
};

const GYRO_RANGE: FieldSpec = FieldSpec {
    domain: Domain::Discrete(&[125.0, 250.0, 500.0, 1000.0, 2000.0]),
    default: 2000.0,
};

const MAG_ODR: FieldSpec = FieldSpec {
    domain: Domain::Discrete(&[2.0, 6.0, 8.0, 10.0, 15.0, 20.0, 25.0, 30.0]),
    default: 25.0,
};

const TEMP_PERIOD: FieldSpec = FieldSpec {
    domain: Domain::Continuous {
        min: 0.1,
        max: 3600.0,
    },
    default: 1.0,
};

const LIGHT_GAIN: FieldSpec = FieldSpec {
    domain: Domain::Discrete(&[1.0, 2.0, 4.0, 8.0, 48.0, 96.0]),
    default: 1.0,
};

const LIGHT_INTEGRATION: FieldSpec = FieldSpec {
    domain: Domain::Discrete(&[50.0, 100.0, 150.0, 200.0, 250.0, 300.0, 350.0, 400.0]),
    default: 100.0,
};

const LIGHT_RATE: FieldSpec = FieldSpec {
    domain: Domain::Discrete(&[50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0]),
    default: 500.0,
};

fn spec(kind: SensorKind, field: Field) -> Option<FieldSpec> {
    use Field::*;
    use SensorKind::*;

    match (kind, field) {
        (Accelerometer, Odr) => Some(ACC_ODR),
        (Accelerometer, Range) => Some(ACC_RANGE),
        (Gyroscope | GyroscopeAlt, Odr) => Some(GYRO_ODR),
        (Gyroscope | GyroscopeAlt, Range) => Some(GYRO_RANGE),
        (Magnetometer, Odr) => Some(MAG_ODR),
        (Temperature, Period) => Some(TEMP_PERIOD),
        (AmbientLight, Gain) => Some(LIGHT_GAIN),
        (AmbientLight, IntegrationTime) => Some(LIGHT_INTEGRATION),
        (AmbientLight, MeasurementRate) => Some(LIGHT_RATE),
        (SensorFusion, AccRange) => Some(ACC_RANGE),
        (SensorFusion, GyroRange) => Some(GYRO_RANGE),
        _ => None,
    }
}

/// Parameters accepted for `kind`, numeric and textual.
pub fn fields(kind: SensorKind) -> &'static [Field] {
    match kind {
        SensorKind::Accelerometer
        | SensorKind::Gyroscope
        | SensorKind::GyroscopeAlt => &[Field::Odr, Field::Range],
        SensorKind::Magnetometer => &[Field::Odr],
        SensorKind::Temperature => &[Field::Period],
        SensorKind::AmbientLight => &[
            Field::Gain,
            Field::IntegrationTime,
            Field::MeasurementRate,
        ],
        SensorKind::SensorFusion => &[
            Field::Mode,
            Field::Output,
            Field::AccRange,
            Field::GyroRange,
        ],
    }
}

/// Supported domain of a numeric `(kind, field)` pair.
pub fn domain(kind: SensorKind, field: Field) -> Option<Domain> {
    spec(kind, field).map(|s| s.domain)
}

/// Supported value closest to `requested`.
///
/// Returns `None` for `(kind, field)` pairs that have no numeric domain and
/// for a NaN request.
pub fn nearest(kind: SensorKind, field: Field, requested: f64) -> Option<f64> {
    if requested.is_nan() {
        return None;
    }
    spec(kind, field).map(|s| s.domain.snap(requested))
}

/// Built-in value used when a configuration omits `field`.
pub fn default_value(kind: SensorKind, field: Field) -> Option<f64> {
    spec(kind, field).map(|s| s.default)
}

/// Fully resolved, hardware-ready settings for one sensor kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorSettings {
    Accelerometer {
        odr: f64,
        range: f64,
    },
    Gyroscope {
        odr: f64,
        range: f64,
    },
    GyroscopeAlt {
        odr: f64,
        range: f64,
    },
    Magnetometer {
        odr: f64,
    },
    Temperature {
        period: Duration,
    },
    AmbientLight {
        gain: f64,
        integration_time: f64,
        measurement_rate: f64,
    },
    SensorFusion {
        mode: FusionMode,
        output: FusionOutput,
        acc_range: f64,
        gyro_range: f64,
    },
}

impl SensorSettings {
    /// Resolve every parameter of `kind`, filling defaults for omitted
    /// fields and snapping all numeric values to supported ones.
    pub fn resolve(kind: SensorKind, params: &SensorParams) -> Self {
        let odr = |spec: FieldSpec| spec.resolve(params.get(Field::Odr));

        match kind {
            SensorKind::Accelerometer => SensorSettings::Accelerometer {
                odr: odr(ACC_ODR),
                range: ACC_RANGE.resolve(params.get(Field::Range)),
            },
            SensorKind::Gyroscope => SensorSettings::Gyroscope {
                odr: odr(GYRO_ODR),
                range: GYRO_RANGE.resolve(params.get(Field::Range)),
            },
            SensorKind::GyroscopeAlt => SensorSettings::GyroscopeAlt {
                odr: odr(GYRO_ODR),
                range: GYRO_RANGE.resolve(params.get(Field::Range)),
            },
            SensorKind::Magnetometer => SensorSettings::Magnetometer { odr: odr(MAG_ODR) },
            SensorKind::Temperature => SensorSettings::Temperature {
                period: Duration::from_secs_f64(TEMP_PERIOD.resolve(params.get(Field::Period))),
            },
            SensorKind::AmbientLight => {
                let integration_time =
                    LIGHT_INTEGRATION.resolve(params.get(Field::IntegrationTime));
                let mut measurement_rate =
                    LIGHT_RATE.resolve(params.get(Field::MeasurementRate));

                // The sensor cannot repeat faster than it integrates.
                if measurement_rate < integration_time {
                    if let Domain::Discrete(rates) = LIGHT_RATE.domain {
                        measurement_rate = rates
                            .iter()
                            .copied()
                            .find(|rate| *rate >= integration_time)
                            .unwrap_or(measurement_rate);
                    }
                }

                SensorSettings::AmbientLight {
                    gain: LIGHT_GAIN.resolve(params.get(Field::Gain)),
                    integration_time,
                    measurement_rate,
                }
            }
            SensorKind::SensorFusion => SensorSettings::SensorFusion {
                mode: params.fusion_mode().unwrap_or(FusionMode::Ndof),
                output: params.fusion_output().unwrap_or(FusionOutput::Quaternion),
                acc_range: ACC_RANGE.resolve(params.get(Field::AccRange)),
                gyro_range: GYRO_RANGE.resolve(params.get(Field::GyroRange)),
            },
        }
    }

    pub fn kind(&self) -> SensorKind {
        match self {
            SensorSettings::Accelerometer { .. } => SensorKind::Accelerometer,
            SensorSettings::Gyroscope { .. } => SensorKind::Gyroscope,
            SensorSettings::GyroscopeAlt { .. } => SensorKind::GyroscopeAlt,
            SensorSettings::Magnetometer { .. } => SensorKind::Magnetometer,
            SensorSettings::Temperature { .. } => SensorKind::Temperature,
            SensorSettings::AmbientLight { .. } => SensorKind::AmbientLight,
            SensorSettings::SensorFusion { .. } => SensorKind::SensorFusion,
        }
    }

    /// Nominal number of samples per second this configuration produces.
    pub fn rate_hz(&self) -> f64 {
        match self {
            SensorSettings::Accelerometer { odr, .. }
            | SensorSettings::Gyroscope { odr, .. }
            | SensorSettings::GyroscopeAlt { odr, .. }
            | SensorSettings::Magnetometer { odr } => *odr,
            SensorSettings::Temperature { period } => 1.0 / period.as_secs_f64(),
            SensorSettings::AmbientLight {
                measurement_rate, ..
            } => 1000.0 / measurement_rate,
            SensorSettings::SensorFusion { mode, .. } => match mode {
                FusionMode::Ndof | FusionMode::ImuPlus => 100.0,
                FusionMode::M4g => 50.0,
                FusionMode::Compass => 25.0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_resolve_to_the_smaller_value() {
        assert_eq!(nearest(SensorKind::Gyroscope, Field::Odr, 37.5), Some(25.0));
        assert_eq!(nearest(SensorKind::Accelerometer, Field::Range, 3.0), Some(2.0));
        assert_eq!(nearest(SensorKind::Accelerometer, Field::Range, 12.0), Some(8.0));
    }

    #[test]
    fn nearest_picks_closest_supported_value() {
        assert_eq!(nearest(SensorKind::Accelerometer, Field::Odr, 30.0), Some(25.0));
        assert_eq!(nearest(SensorKind::Accelerometer, Field::Odr, 90.0), Some(100.0));
        assert_eq!(nearest(SensorKind::Accelerometer, Field::Odr, 0.0), Some(0.78125));
        assert_eq!(nearest(SensorKind::Gyroscope, Field::Range, 1e9), Some(2000.0));
        assert_eq!(nearest(SensorKind::Temperature, Field::Period, 0.01), Some(0.1));
    }

    #[test]
    fn nearest_is_idempotent_and_stays_in_domain() {
        for kind in [
            SensorKind::Accelerometer,
            SensorKind::Gyroscope,
            SensorKind::GyroscopeAlt,
            SensorKind::Magnetometer,
            SensorKind::Temperature,
            SensorKind::AmbientLight,
            SensorKind::SensorFusion,
        ] {
            for &field in fields(kind).iter().filter(|f| !f.is_textual()) {
                let domain = domain(kind, field).unwrap();
                let mut requested = -10.0;
                while requested < 4000.0 {
                    let once = nearest(kind, field, requested).unwrap();
                    assert!(domain.contains(once), "{kind} {field} {requested} -> {once}");
                    assert_eq!(nearest(kind, field, once), Some(once));
                    requested += 0.37;
                }
            }
        }
    }

    #[test]
    fn non_finite_requests_never_leave_the_domain() {
        assert_eq!(nearest(SensorKind::Accelerometer, Field::Odr, f64::INFINITY), Some(1600.0));
        assert_eq!(
            nearest(SensorKind::Accelerometer, Field::Odr, f64::NEG_INFINITY),
            Some(0.78125)
        );
        assert_eq!(nearest(SensorKind::Temperature, Field::Period, f64::INFINITY), Some(3600.0));
        assert_eq!(nearest(SensorKind::Temperature, Field::Period, f64::NAN), None);
        assert_eq!(nearest(SensorKind::Gyroscope, Field::Odr, f64::NAN), None);

        for kind in SensorKind::CONFIGURABLE {
            for &field in fields(kind).iter().filter(|f| !f.is_textual()) {
                let domain = domain(kind, field).unwrap();
                for requested in [f64::INFINITY, f64::NEG_INFINITY] {
                    let once = nearest(kind, field, requested).unwrap();
                    assert!(domain.contains(once), "{kind} {field} {requested} -> {once}");
                    assert_eq!(nearest(kind, field, once), Some(once));
                }
            }
        }
    }

    #[test]
    fn defaults_exist_for_every_numeric_field() {
        for kind in SensorKind::CONFIGURABLE {
            for &field in fields(kind).iter().filter(|f| !f.is_textual()) {
                let default = default_value(kind, field).unwrap();
                assert_eq!(nearest(kind, field, default), Some(default));
            }
        }
        assert_eq!(default_value(SensorKind::Accelerometer, Field::Odr), Some(25.0));
        assert_eq!(default_value(SensorKind::Gyroscope, Field::Range), Some(2000.0));
    }

    #[test]
    fn undefined_pairs_have_no_domain() {
        assert_eq!(nearest(SensorKind::Magnetometer, Field::Range, 4.0), None);
        assert_eq!(default_value(SensorKind::Temperature, Field::Odr), None);
        assert_eq!(default_value(SensorKind::SensorFusion, Field::Output), None);
    }

    #[test]
    fn resolve_fills_defaults_and_keeps_light_rate_above_integration() {
        let settings = SensorSettings::resolve(SensorKind::Accelerometer, &SensorParams::default());
        assert_eq!(
            settings,
            SensorSettings::Accelerometer {
                odr: 25.0,
                range: 16.0
            }
        );

        let mut params = SensorParams::default();
        params.insert(Field::IntegrationTime, 400.0);
        params.insert(Field::MeasurementRate, 100.0);
        let settings = SensorSettings::resolve(SensorKind::AmbientLight, &params);
        assert_eq!(
            settings,
            SensorSettings::AmbientLight {
                gain: 1.0,
                integration_time: 400.0,
                measurement_rate: 500.0
            }
        );
    }
}
