use std::io::Write;
use std::time::Duration;

use fugue_core::{Adjustment, Field, Model, SensorKind, Violation};
use fugue_sense::{Config, ConfigError, RadioConfig, Timing};
use tempfile::NamedTempFile;

fn write(suffix: &str, content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn loads_json_configuration() {
    let file = write(
        ".json",
        r#"{
            "network": {"ip": "127.0.0.1", "port": "9000"},
            "metawear": {
                "devices": [{
                    "mac": "ec-47-49-cf-53-c4",
                    "name": "mms",
                    "ble": "hci0",
                    "sensors": {
                        "Accelerometer": {"odr": 30, "range": 4},
                        "Gyroscope": {"odr": 100}
                    }
                }]
            }
        }"#,
    );

    let config = Config::load(file.path()).unwrap();
    let setup = config.validate().unwrap();

    assert_eq!(setup.network.socket_addr(), "127.0.0.1:9000".parse().unwrap());
    assert_eq!(setup.devices.len(), 1);

    let device = &setup.devices[0].config;
    assert_eq!(device.address().to_string(), "EC:47:49:CF:53:C4");
    assert_eq!(device.model(), Model::MetaMotionS);
    assert_eq!(device.adapter(), Some("hci0"));
    assert_eq!(
        device.kinds().collect::<Vec<_>>(),
        [SensorKind::Accelerometer, SensorKind::GyroscopeAlt]
    );
}

#[test]
fn loads_toml_configuration_with_service_sections() {
    let file = write(
        ".toml",
        r#"
[network]
ip = "192.168.1.20"
port = 8000

[control]
listen_addr = "127.0.0.1:9001"
queue_depth = 32

[server]
http_addr = "127.0.0.1:8080"

[radio]
type = "mock"
noise = 0.5

[timing]
link_settle_ms = 10
timer_teardown_ms = 5

[[metawear.devices]]
mac = "EC:47:49:CF:53:C4"
name = "mmr"

[metawear.devices.sensors."Sensor Fusion"]
mode = "ndof"
output = "quaternion"
"#,
    );

    let config = Config::load(file.path()).unwrap();

    assert_eq!(config.control.listen_addr, "127.0.0.1:9001".parse().unwrap());
    assert_eq!(config.control.queue_depth, 32);
    assert_eq!(config.server.http_addr, Some("127.0.0.1:8080".parse().unwrap()));
    let RadioConfig::Mock { noise } = config.radio;
    assert_eq!(noise, 0.5);
    assert_eq!(
        Timing::from(&config.timing),
        Timing {
            link_settle: Duration::from_millis(10),
            timer_teardown: Duration::from_millis(5),
        }
    );

    let setup = config.validate().unwrap();
    assert_eq!(setup.devices[0].config.kinds().collect::<Vec<_>>(), [SensorKind::SensorFusion]);
}

#[test]
fn service_sections_default_when_absent() {
    let file = write(
        ".json",
        r#"{"network": {"ip": "127.0.0.1", "port": 9000}, "metawear": {"devices": []}}"#,
    );

    let config = Config::load(file.path()).unwrap();

    assert_eq!(config.control.listen_addr.port(), 8001);
    assert_eq!(config.control.queue_depth, 256);
    assert_eq!(config.server.http_addr, None);
    assert_eq!(Timing::from(&config.timing), Timing::default());
}

#[test]
fn folds_in_legacy_sensor_lists() {
    let file = write(
        ".json",
        r#"{
            "network": {"ip": "127.0.0.1", "port": 9000},
            "metawear": {
                "devices": [
                    {"mac": "EC:47:49:CF:53:C4", "name": "mmr"},
                    {"mac": "EC:47:49:CF:53:C5", "name": "mmr", "sensors": {"Magnetometer": {}}}
                ],
                "sensors": [
                    {"Temperature": {"period": 5}},
                    {"Accelerometer": {}}
                ]
            }
        }"#,
    );

    let setup = Config::load(file.path()).unwrap().validate().unwrap();

    assert_eq!(setup.devices[0].config.kinds().collect::<Vec<_>>(), [SensorKind::Temperature]);
    // inline sensors win over the legacy list
    assert_eq!(setup.devices[1].config.kinds().collect::<Vec<_>>(), [SensorKind::Magnetometer]);
}

#[test]
fn reports_every_problem_with_device_index() {
    let file = write(
        ".json",
        r#"{
            "network": {"ip": "localhost", "port": 70000},
            "metawear": {
                "devices": [
                    {"mac": "EC:47:49:CF:53:C4", "name": "mmr", "sensors": {"Accelerometer": {}}},
                    {"mac": "EC:47:49:CF:53:C4", "name": "mmr", "sensors": {"Accelerometer": {}}},
                    {"mac": "not-an-address", "name": "mmx", "sensors": {"Barometer": {}}}
                ]
            }
        }"#,
    );

    let err = Config::load(file.path()).unwrap().validate().unwrap_err();
    let violations = &err.violations;

    assert!(violations.contains(&Violation::InvalidIp("localhost".to_owned())));
    assert!(violations.contains(&Violation::PortOutOfRange(70000)));
    assert!(violations.iter().any(|v| matches!(
        v,
        Violation::Device { index: 1, violation } if matches!(**violation, Violation::DuplicateAddress(_))
    )));
    assert!(violations.iter().any(|v| matches!(
        v,
        Violation::Device { index: 2, violation } if matches!(**violation, Violation::UnknownModel(_))
    )));
    assert!(violations.iter().any(|v| matches!(
        v,
        Violation::Device { index: 2, violation } if matches!(**violation, Violation::Address(_))
    )));
    assert!(err.to_string().starts_with("invalid configuration"));
}

#[test]
fn accepts_files_written_for_older_releases() {
    let file = write(
        ".json",
        r#"{
            "network": {"ip": "127.0.0.1", "port": 9000},
            "metawear": {
                "devices": [{
                    "mac": "EC:47:49:CF:53:C4",
                    "name": "mmr",
                    "ble": "hci0",
                    "sensors": {
                        "Accelerometer": {"odr": 25, "range": 4.0, "threshold": 0.5},
                        "Ambient Light": {"odr": 10},
                        "Temperature": {"period": 1}
                    }
                }]
            }
        }"#,
    );

    let setup = Config::load(file.path()).unwrap().validate().unwrap();
    let device = &setup.devices[0];

    assert_eq!(
        device.config.kinds().collect::<Vec<_>>(),
        [
            SensorKind::Accelerometer,
            SensorKind::Temperature,
            SensorKind::AmbientLight
        ]
    );
    assert_eq!(
        device.config.sensors()[&SensorKind::AmbientLight].get(Field::MeasurementRate),
        Some(100.0)
    );
    assert!(device.adjustments.contains(&Adjustment::Ignored {
        kind: SensorKind::Accelerometer,
        parameter: "threshold".to_owned(),
    }));
}

#[test]
fn non_finite_radio_noise_is_rejected() {
    for noise in ["nan", "inf", "-0.5"] {
        let file = write(
            ".toml",
            &format!("[radio]\ntype = \"mock\"\nnoise = {noise}\n"),
        );
        assert!(
            matches!(Config::load(file.path()), Err(ConfigError::Toml(_))),
            "accepted noise = {noise}"
        );
    }
}

#[test]
fn missing_devices_is_a_violation() {
    let file = write(".json", r#"{"network": {"ip": "127.0.0.1", "port": 9000}}"#);

    let err = Config::load(file.path()).unwrap().validate().unwrap_err();

    assert_eq!(err.violations, [Violation::Missing("metawear.devices")]);
}

#[test]
fn unreadable_and_malformed_files_fail_to_load() {
    let missing = Config::load(std::path::Path::new("/nonexistent/fs_config.json"));
    assert!(matches!(missing, Err(ConfigError::Io { .. })));

    let json = write(".json", "{ not json");
    assert!(matches!(Config::load(json.path()), Err(ConfigError::Json(_))));

    let toml = write(".toml", "[network\nip =");
    assert!(matches!(Config::load(toml.path()), Err(ConfigError::Toml(_))));
}
