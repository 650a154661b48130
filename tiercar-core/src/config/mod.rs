//! Vehicle configuration loading.
//!
//! The expected YAML structure is:
//! ```yaml
//! drive_loop:
//!   rate_hz: 20
//!   max_loop_count: 100
//!   verbose: false
//!   shutdown_timeout_ms: 500
//!   strict_store: false
//! actuators:
//!   throttle:
//!     channel: 0
//!     address: 64
//!     frequency: 60
//!     busnum: 1
//!     init_delay_ms: 100
//!   steering:
//!     channel: 1
//! ```
//!
//! Every field is optional; absent values fall back to the defaults below.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::runtime::{LoopOptions, DEFAULT_RATE_HZ, DEFAULT_SHUTDOWN_TIMEOUT};
use crate::store::ReadMode;

/// Default I2C address of a PCA9685 board.
pub const DEFAULT_PWM_ADDRESS: u16 = 0x40;

/// Default PWM frequency; also the reference frequency pulse values are
/// expressed in.
pub const DEFAULT_PWM_FREQUENCY: u32 = 60;

/// Settle delay after configuring a PWM board.
pub const DEFAULT_INIT_DELAY_MS: u64 = 100;

/// Channels on one PCA9685 board.
pub const PWM_CHANNELS: u8 = 16;

// ── Private YAML deserialization types ────────────────────────────────────────

/// Top-level wrapper that maps directly onto the YAML file layout.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct VehicleConfigFile {
    #[serde(default)]
    drive_loop: Option<DriveLoopEntry>,
    #[serde(default)]
    actuators: BTreeMap<String, ActuatorEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DriveLoopEntry {
    rate_hz: Option<f64>,
    max_loop_count: Option<u64>,
    verbose: Option<bool>,
    shutdown_timeout_ms: Option<u64>,
    strict_store: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ActuatorEntry {
    channel: u8,
    address: Option<u16>,
    frequency: Option<u32>,
    busnum: Option<u8>,
    init_delay_ms: Option<u64>,
}

// ── Public data structures ────────────────────────────────────────────────────

/// Loop and runtime settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DriveLoopConfig {
    pub rate_hz: f64,
    pub max_loop_count: Option<u64>,
    pub verbose: bool,
    pub shutdown_timeout: Duration,
    pub strict_store: bool,
}

impl Default for DriveLoopConfig {
    fn default() -> Self {
        Self {
            rate_hz: DEFAULT_RATE_HZ,
            max_loop_count: None,
            verbose: false,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            strict_store: false,
        }
    }
}

impl DriveLoopConfig {
    pub fn loop_options(&self) -> LoopOptions {
        LoopOptions {
            rate_hz: self.rate_hz,
            max_loop_count: self.max_loop_count,
            verbose: self.verbose,
        }
    }

    pub fn read_mode(&self) -> ReadMode {
        if self.strict_store {
            ReadMode::Strict
        } else {
            ReadMode::Lenient
        }
    }
}

/// Wiring of one PWM-driven actuator.
#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorConfig {
    pub channel: u8,
    pub address: u16,
    pub frequency: u32,
    /// Overrides the platform's default I2C bus when set.
    pub busnum: Option<u8>,
    pub init_delay: Duration,
}

impl ActuatorConfig {
    /// Defaults for `channel`: address 0x40, 60 Hz, default bus, 100 ms settle.
    pub fn on_channel(channel: u8) -> Self {
        Self {
            channel,
            address: DEFAULT_PWM_ADDRESS,
            frequency: DEFAULT_PWM_FREQUENCY,
            busnum: None,
            init_delay: Duration::from_millis(DEFAULT_INIT_DELAY_MS),
        }
    }
}

/// Whole-vehicle configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VehicleConfig {
    pub drive_loop: DriveLoopConfig,
    /// Actuator name → wiring, sorted by name.
    pub actuators: BTreeMap<String, ActuatorConfig>,
}

impl VehicleConfig {
    /// Parses and validates the YAML file at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened, the YAML is structurally
    /// invalid, or a value is out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading vehicle configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        Self::from_yaml_str(&content)
            .with_context(|| format!("Invalid configuration file: {}", path.display()))
    }

    /// Parses and validates a YAML document.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let file: VehicleConfigFile = if content.trim().is_empty() {
            VehicleConfigFile::default()
        } else {
            serde_yaml::from_str(content).context("Failed to parse YAML")?
        };

        let entry = file.drive_loop.unwrap_or_default();
        let defaults = DriveLoopConfig::default();
        let drive_loop = DriveLoopConfig {
            rate_hz: entry.rate_hz.unwrap_or(defaults.rate_hz),
            max_loop_count: entry.max_loop_count,
            verbose: entry.verbose.unwrap_or(defaults.verbose),
            shutdown_timeout: entry
                .shutdown_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.shutdown_timeout),
            strict_store: entry.strict_store.unwrap_or(defaults.strict_store),
        };

        if drive_loop.loop_options().period().is_none() {
            bail!(
                "drive_loop.rate_hz must be a positive number with a representable period, got {}",
                drive_loop.rate_hz
            );
        }

        let mut actuators = BTreeMap::new();
        for (name, entry) in file.actuators {
            if entry.channel >= PWM_CHANNELS {
                bail!(
                    "actuator '{}': channel {} out of range (0..{})",
                    name,
                    entry.channel,
                    PWM_CHANNELS
                );
            }
            let frequency = entry.frequency.unwrap_or(DEFAULT_PWM_FREQUENCY);
            if frequency == 0 {
                bail!("actuator '{}': frequency must be non-zero", name);
            }
            let actuator = ActuatorConfig {
                channel: entry.channel,
                address: entry.address.unwrap_or(DEFAULT_PWM_ADDRESS),
                frequency,
                busnum: entry.busnum,
                init_delay: Duration::from_millis(
                    entry.init_delay_ms.unwrap_or(DEFAULT_INIT_DELAY_MS),
                ),
            };
            debug!(
                "  Actuator: {} | channel {} | address {:#04x} | {}Hz | bus {:?}",
                name, actuator.channel, actuator.address, actuator.frequency, actuator.busnum,
            );
            actuators.insert(name, actuator);
        }

        info!(
            rate_hz = drive_loop.rate_hz,
            max_loop_count = ?drive_loop.max_loop_count,
            actuators = actuators.len(),
            "Vehicle configuration loaded"
        );

        Ok(Self {
            drive_loop,
            actuators,
        })
    }

    /// Returns the wiring for `name`, or `None` if it is not configured.
    pub fn actuator(&self, name: &str) -> Option<&ActuatorConfig> {
        self.actuators.get(name)
    }

    /// Returns the wiring for `name`, falling back to defaults on
    /// `default_channel`.
    pub fn actuator_or_default(&self, name: &str, default_channel: u8) -> ActuatorConfig {
        self.actuators
            .get(name)
            .cloned()
            .unwrap_or_else(|| ActuatorConfig::on_channel(default_channel))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Helper: write a YAML string to a temp file and return it.
    fn yaml_tempfile(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn load_full_yaml() {
        let yaml = r#"
drive_loop:
  rate_hz: 20
  max_loop_count: 100
  verbose: true
  shutdown_timeout_ms: 250
  strict_store: true
actuators:
  throttle:
    channel: 0
    address: 65
    frequency: 120
    busnum: 1
    init_delay_ms: 10
  steering:
    channel: 1
"#;
        let f = yaml_tempfile(yaml);
        let cfg = VehicleConfig::load_from_file(f.path()).unwrap();

        assert_eq!(cfg.drive_loop.rate_hz, 20.0);
        assert_eq!(cfg.drive_loop.max_loop_count, Some(100));
        assert!(cfg.drive_loop.verbose);
        assert_eq!(cfg.drive_loop.shutdown_timeout, Duration::from_millis(250));
        assert_eq!(cfg.drive_loop.read_mode(), ReadMode::Strict);

        let throttle = cfg.actuator("throttle").unwrap();
        assert_eq!(throttle.channel, 0);
        assert_eq!(throttle.address, 65);
        assert_eq!(throttle.frequency, 120);
        assert_eq!(throttle.busnum, Some(1));
        assert_eq!(throttle.init_delay, Duration::from_millis(10));

        assert_eq!(cfg.actuator("steering").unwrap(), &ActuatorConfig::on_channel(1));
    }

    #[test]
    fn empty_file_uses_defaults() {
        let f = yaml_tempfile("");
        let cfg = VehicleConfig::load_from_file(f.path()).unwrap();
        assert_eq!(cfg, VehicleConfig::default());
        assert_eq!(cfg.drive_loop.loop_options(), LoopOptions::default());
    }

    #[test]
    fn missing_actuator_falls_back_to_default_channel() {
        let cfg = VehicleConfig::default();
        let a = cfg.actuator_or_default("gripper", 2);
        assert_eq!(a.channel, 2);
        assert_eq!(a.address, DEFAULT_PWM_ADDRESS);
        assert_eq!(a.frequency, DEFAULT_PWM_FREQUENCY);
    }

    #[test]
    fn non_positive_rate_is_rejected() {
        let err = VehicleConfig::from_yaml_str("drive_loop:\n  rate_hz: 0\n").unwrap_err();
        assert!(format!("{err:#}").contains("rate_hz"));
        let err = VehicleConfig::from_yaml_str("drive_loop:\n  rate_hz: 1.0e-30\n").unwrap_err();
        assert!(format!("{err:#}").contains("rate_hz"));
    }

    #[test]
    fn out_of_range_channel_is_rejected() {
        let yaml = "actuators:\n  aux:\n    channel: 16\n";
        let err = VehicleConfig::from_yaml_str(yaml).unwrap_err();
        assert!(format!("{err:#}").contains("channel 16 out of range"));
    }

    #[test]
    fn zero_frequency_is_rejected() {
        let yaml = "actuators:\n  aux:\n    channel: 3\n    frequency: 0\n";
        assert!(VehicleConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let yaml = "drive_loop:\n  rate: 10\n";
        assert!(VehicleConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = VehicleConfig::load_from_file(Path::new("/nonexistent/vehicle.yaml"));
        assert!(result.is_err());
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        let f = yaml_tempfile("drive_loop: [unclosed");
        assert!(VehicleConfig::load_from_file(f.path()).is_err());
    }
}
