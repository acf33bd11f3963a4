use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fugue_core::{
    ConfigInvalid, DeviceConfig, NetworkConfig, RawDeviceConfig, RawNetworkConfig, RawSensors,
    Validated, Violation, validate_device, validate_network,
};
use fugue_osc::DEFAULT_CONTROL_PORT;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

use crate::session::Timing;

/// Operator configuration file.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Where telemetry is sent.
    #[serde(default)]
    pub network: RawNetworkConfig,
    #[serde(default)]
    pub metawear: MetawearConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub radio: RadioConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct MetawearConfig {
    #[serde(default)]
    pub devices: Vec<RawDeviceConfig>,
    /// Older layout: sensors of device `i` live at index `i` here.
    #[serde(default)]
    pub sensors: Vec<RawSensors>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Address the command listener binds to
    pub listen_addr: SocketAddr,
    /// Capacity of the outbound telemetry queue
    pub queue_depth: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_CONTROL_PORT)),
            queue_depth: 256,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    /// Address for the HTTP health server; disabled when absent
    pub http_addr: Option<SocketAddr>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RadioConfig {
    Mock {
        /// Amplitude of the noise added to synthetic samples
        #[serde(default = "default_noise", deserialize_with = "finite_noise")]
        noise: f32,
    },
}

fn default_noise() -> f32 {
    0.05
}

fn finite_noise<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
    let noise = f32::deserialize(deserializer)?;
    if noise.is_finite() && noise >= 0.0 {
        Ok(noise)
    } else {
        Err(D::Error::custom(format!(
            "radio noise must be a finite, non-negative number, got {noise}"
        )))
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        RadioConfig::Mock {
            noise: default_noise(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub link_settle_ms: u64,
    pub timer_teardown_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            link_settle_ms: 1000,
            timer_teardown_ms: 500,
        }
    }
}

impl From<&TimingConfig> for Timing {
    fn from(config: &TimingConfig) -> Self {
        Timing {
            link_settle: Duration::from_millis(config.link_settle_ms),
            timer_teardown: Duration::from_millis(config.timer_teardown_ms),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Validated configuration ready to build sessions from.
#[derive(Debug)]
pub struct Setup {
    pub network: NetworkConfig,
    pub devices: Vec<Validated<DeviceConfig>>,
}

impl Config {
    /// Load a `.toml` file, or JSON for any other extension.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;

        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let config = if is_toml {
            toml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        Ok(config)
    }

    /// Device records with legacy sensor lists folded in.
    pub fn device_records(&self) -> Vec<RawDeviceConfig> {
        self.metawear
            .devices
            .iter()
            .enumerate()
            .map(|(index, device)| {
                let mut device = device.clone();
                if device.sensors.is_empty() {
                    if let Some(sensors) = self.metawear.sensors.get(index) {
                        device.sensors = sensors.clone();
                    }
                }
                device
            })
            .collect()
    }

    /// Validate the network section and every device, collecting all
    /// violations before failing.
    pub fn validate(&self) -> Result<Setup, ConfigInvalid> {
        let mut violations = Vec::new();

        let network = match validate_network(&self.network) {
            Ok(network) => Some(network),
            Err(e) => {
                violations.extend(e.violations);
                None
            }
        };

        let records = self.device_records();
        if records.is_empty() {
            violations.push(Violation::Missing("metawear.devices"));
        }

        let mut seen = BTreeSet::new();
        let mut devices = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            match validate_device(record) {
                Ok(validated) => {
                    let address = validated.config.address();
                    if !seen.insert(address) {
                        violations.push(Violation::Device {
                            index,
                            violation: Box::new(Violation::DuplicateAddress(address)),
                        });
                    }
                    devices.push(validated);
                }
                Err(e) => violations.extend(e.for_device(index).violations),
            }
        }

        match network {
            Some(network) if violations.is_empty() => Ok(Setup { network, devices }),
            _ => Err(ConfigInvalid { violations }),
        }
    }
}
