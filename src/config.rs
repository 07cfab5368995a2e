//! TOML configuration and built-in presets.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::devices::ResourceProperties;
use crate::io::schedule::{DEFAULT_TIME_FORMAT, ScheduleError, load_schedule};
use crate::sim::dispatch::AllocationPolicy;
use crate::sim::frequency::DetectorSettings;
use crate::sim::schedule::Schedule;
use crate::sim::service::{Service, ServiceSchedules};

/// Top-level configuration parsed from TOML.
///
/// Every section has defaults. Load from TOML with
/// [`VppConfig::from_toml_file`] or start from a preset with
/// [`VppConfig::from_preset`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VppConfig {
    /// Periods of the three control loops.
    #[serde(default)]
    pub threads: ThreadsConfig,
    /// Resource data logging.
    #[serde(default)]
    pub logger: LoggerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub operator: OperatorConfig,
    /// Schedule files for the schedule-driven services.
    #[serde(default)]
    pub schedules: SchedulesConfig,
    /// Frequency event detector thresholds.
    #[serde(default)]
    pub frequency: DetectorSettings,
    /// Static fleet announced at startup.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

/// Loop periods in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThreadsConfig {
    /// Physics and dispatch.
    pub resource_tick_ms: u64,
    /// Grid-service decisions.
    pub service_tick_ms: u64,
    /// Price/time broadcast.
    pub status_tick_ms: u64,
}

impl Default for ThreadsConfig {
    fn default() -> Self {
        Self {
            resource_tick_ms: 500,
            service_tick_ms: 500,
            status_tick_ms: 1000,
        }
    }
}

impl ThreadsConfig {
    pub fn resource_period(&self) -> Duration {
        Duration::from_millis(self.resource_tick_ms)
    }

    pub fn service_period(&self) -> Duration {
        Duration::from_millis(self.service_tick_ms)
    }

    pub fn status_period(&self) -> Duration {
        Duration::from_millis(self.status_tick_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggerConfig {
    /// Directory for the daily data file. Data rows are dropped when unset.
    pub path: Option<PathBuf>,
    /// Seconds between data row dumps.
    pub increment_secs: u64,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            path: None,
            increment_secs: 60,
        }
    }
}

impl LoggerConfig {
    pub fn increment(&self) -> Duration {
        Duration::from_secs(self.increment_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchConfig {
    /// `"whole_device"` or `"partial"`.
    pub allocation: AllocationPolicy,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OperatorConfig {
    /// Grid service active at startup.
    pub service: Service,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulesConfig {
    pub reg_a: Option<PathBuf>,
    pub reg_d: Option<PathBuf>,
    pub eim: Option<PathBuf>,
    pub pdm: Option<PathBuf>,
    pub fer: Option<PathBuf>,
    /// chrono format of the time column.
    pub time_format: String,
}

impl Default for SchedulesConfig {
    fn default() -> Self {
        Self {
            reg_a: None,
            reg_d: None,
            eim: None,
            pdm: None,
            fer: None,
            time_format: DEFAULT_TIME_FORMAT.to_string(),
        }
    }
}

impl SchedulesConfig {
    /// Loads every configured schedule. Unset paths give empty schedules.
    ///
    /// # Errors
    ///
    /// Returns the first `ScheduleError` encountered.
    pub fn load(&self) -> Result<ServiceSchedules, ScheduleError> {
        let load = |path: &Option<PathBuf>| -> Result<Schedule<f64>, ScheduleError> {
            match path {
                Some(path) => load_schedule(path, &self.time_format),
                None => Ok(Schedule::default()),
            }
        };
        Ok(ServiceSchedules {
            reg_a: load(&self.reg_a)?,
            reg_d: load(&self.reg_d)?,
            eim: load(&self.eim)?,
            pdm: load(&self.pdm)?,
            fer: load(&self.fer)?,
        })
    }
}

/// One statically configured resource.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceConfig {
    pub id: String,
    #[serde(default)]
    pub properties: ResourceProperties,
}

impl ResourceConfig {
    pub fn new(id: &str, properties: ResourceProperties) -> Self {
        Self {
            id: id.to_string(),
            properties,
        }
    }
}

/// Configuration error with field path and constraint description.
#[derive(Debug, Error)]
#[error("config error: {field}: {message}")]
pub struct ConfigError {
    /// Dotted field path (e.g., `"threads.resource_tick_ms"`).
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl VppConfig {
    /// Small mixed fleet: one battery and two water heaters tagged as buffers.
    pub fn default_preset() -> Self {
        Self {
            resources: vec![
                ResourceConfig::new("/vpp/ess/battery-1", ResourceProperties::symmetric(4000.0, 200.0, 13500.0)),
                ResourceConfig::new(
                    "/vpp/buffer/water-heater-1",
                    ResourceProperties {
                        idle_losses: 60.0,
                        ..ResourceProperties::symmetric(4500.0, 4500.0, 3000.0)
                    },
                ),
                ResourceConfig::new(
                    "/vpp/buffer/water-heater-2",
                    ResourceProperties {
                        idle_losses: 60.0,
                        ..ResourceProperties::symmetric(4500.0, 4500.0, 3000.0)
                    },
                ),
            ],
            ..Self::default()
        }
    }

    /// Larger fleet on fast loops, running time of use with data rows every
    /// ten seconds.
    pub fn demo_preset() -> Self {
        let mut resources = Vec::new();
        for n in 1..=3 {
            resources.push(ResourceConfig::new(
                &format!("/vpp/ess/battery-{n}"),
                ResourceProperties::symmetric(5000.0, 250.0 * n as f64, 13500.0),
            ));
        }
        for n in 1..=4 {
            resources.push(ResourceConfig::new(
                &format!("/vpp/buffer/water-heater-{n}"),
                ResourceProperties {
                    idle_losses: 75.0,
                    ..ResourceProperties::symmetric(4500.0, 4500.0, 2500.0 + 250.0 * n as f64)
                },
            ));
        }
        Self {
            threads: ThreadsConfig {
                resource_tick_ms: 200,
                service_tick_ms: 200,
                status_tick_ms: 500,
            },
            logger: LoggerConfig {
                increment_secs: 10,
                ..LoggerConfig::default()
            },
            operator: OperatorConfig {
                service: Service::TimeOfUse,
            },
            resources,
            ..Self::default()
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["default", "demo"];

    /// Loads configuration from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "default" => Ok(Self::default_preset()),
            "demo" => Ok(Self::demo_preset()),
            _ => Err(ConfigError::new(
                "preset",
                format!("unknown preset \"{name}\", available: {}", Self::PRESETS.join(", ")),
            )),
        }
    }

    /// Parses configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::new("config", format!("cannot read \"{}\": {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::new("toml", e.to_string()))
    }

    /// Validates all fields and returns every problem found.
    ///
    /// Returns an empty vector if the configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        let t = &self.threads;
        for (field, value) in [
            ("threads.resource_tick_ms", t.resource_tick_ms),
            ("threads.service_tick_ms", t.service_tick_ms),
            ("threads.status_tick_ms", t.status_tick_ms),
        ] {
            if value == 0 {
                errors.push(ConfigError::new(field, "must be > 0"));
            }
        }

        if self.logger.increment_secs == 0 {
            errors.push(ConfigError::new("logger.increment_secs", "must be > 0"));
        }

        if self.schedules.time_format.trim().is_empty() {
            errors.push(ConfigError::new("schedules.time_format", "must not be empty"));
        }

        let f = &self.frequency;
        if f.window_len == 0 {
            errors.push(ConfigError::new("frequency.window_len", "must be > 0"));
        }
        if f.floor_hz >= f.ceiling_hz {
            errors.push(ConfigError::new("frequency.floor_hz", "must be < frequency.ceiling_hz"));
        }
        for (field, value) in [
            ("frequency.recovery_hz", f.recovery_hz),
            ("frequency.min_slew_hz_per_sec", f.min_slew_hz_per_sec),
            ("frequency.min_delta_hz", f.min_delta_hz),
            ("frequency.min_duration_secs", f.min_duration_secs),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                errors.push(ConfigError::new(field, "must be finite and >= 0"));
            }
        }
        if !(f.response_secs.is_finite() && f.response_secs > 0.0) {
            errors.push(ConfigError::new("frequency.response_secs", "must be finite and > 0"));
        }

        let mut seen = HashSet::new();
        for (i, r) in self.resources.iter().enumerate() {
            if r.id.trim().is_empty() {
                errors.push(ConfigError::new(format!("resources[{i}].id"), "must not be empty"));
            } else if !seen.insert(r.id.as_str()) {
                errors.push(ConfigError::new(
                    format!("resources[{i}].id"),
                    format!("duplicate id \"{}\"", r.id),
                ));
            }
            let p = &r.properties;
            let values = [
                ("rated_export_power", p.rated_export_power),
                ("rated_export_energy", p.rated_export_energy),
                ("export_ramp", p.export_ramp),
                ("export_power", p.export_power),
                ("export_energy", p.export_energy),
                ("rated_import_power", p.rated_import_power),
                ("rated_import_energy", p.rated_import_energy),
                ("import_ramp", p.import_ramp),
                ("import_power", p.import_power),
                ("import_energy", p.import_energy),
                ("idle_losses", p.idle_losses),
            ];
            for (name, value) in values {
                if !(value.is_finite() && value >= 0.0) {
                    errors.push(ConfigError::new(
                        format!("resources[{i}].properties.{name}"),
                        "must be finite and >= 0",
                    ));
                }
            }
        }

        errors
    }
}
