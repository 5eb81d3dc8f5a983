//! Runtime configuration shared by both binaries.
//!
//! Layered the way the teacher's V4 configuration system does it: built-in
//! defaults, then an optional TOML file, then environment variables
//! (`GASDAQ_*`), with CLI flags applied last by the caller. See
//! `validation.rs` for the field-level checks run by [`Settings::validate`].

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::validation::{is_in_range, is_not_empty, is_valid_ip, is_valid_port};

/// Merged, validated runtime configuration for `daq_server` and `hmc_master`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Host/interface both TCP services bind to.
    pub host: String,
    /// Command Service TCP port (spec.md §6 default 57000).
    pub cmd_port: u16,
    /// Data Service TCP port (spec.md §6 default 58000).
    pub data_port: u16,
    /// Number of power-line cycles of ADC integration time.
    pub nplc: f64,
    /// Sample Ring window, in seconds.
    pub bufsize_secs: f64,
    /// Maximum concurrent Command Service connections (response-slot pool size).
    pub max_handlers: usize,
    /// DAQ serial device path, e.g. `/dev/ttyUSB0`.
    pub daq_port: String,
    /// DAQ serial baud rate.
    pub daq_baud: u32,
    /// Actuator serial device path.
    pub actuator_port: String,
    /// Actuator serial baud rate.
    pub actuator_baud: u32,
    /// H2 baseline drift limit, mV/min, used by the Process Controller.
    pub h2_base_drift_mv_per_min: f64,
    /// CH4 baseline drift limit, mV/min, used by the Process Controller.
    pub ch4_base_drift_mv_per_min: f64,
    /// `RUST_LOG`-style default log level when the env var is unset.
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            cmd_port: 57000,
            data_port: 58000,
            nplc: 1.0,
            bufsize_secs: 1800.0,
            max_handlers: 16,
            daq_port: "/dev/ttyUSB0".to_string(),
            daq_baud: 115_200,
            actuator_port: "/dev/ttyUSB1".to_string(),
            actuator_baud: 115_200,
            h2_base_drift_mv_per_min: 1.0,
            ch4_base_drift_mv_per_min: 1.0,
            log_level: "info".to_string(),
        }
    }
}

impl figment::Provider for Settings {
    fn metadata(&self) -> figment::Metadata {
        figment::Metadata::named("Settings Defaults")
    }

    fn data(
        &self,
    ) -> Result<figment::value::Map<figment::Profile, figment::value::Dict>, figment::Error> {
        Serialized::defaults(Settings::default()).data()
    }
}

impl Settings {
    /// Load settings from built-in defaults, an optional TOML file, and
    /// `GASDAQ_`-prefixed environment variables, in that precedence order.
    pub fn load(config_path: Option<&Path>) -> AppResult<Settings> {
        let mut figment = Figment::from(Settings::default());
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("GASDAQ_"));
        let settings: Settings = figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Run the field-level validators; collects the first failure.
    pub fn validate(&self) -> AppResult<()> {
        is_valid_ip(&self.host)
            .or_else(|_| is_not_empty(&self.host))
            .map_err(|e| AppError::ConfigValidation(e.to_string()))?;
        is_valid_port(self.cmd_port).map_err(|e| AppError::ConfigValidation(e.to_string()))?;
        is_valid_port(self.data_port).map_err(|e| AppError::ConfigValidation(e.to_string()))?;
        is_in_range(self.nplc, 0.01..=100.0)
            .map_err(|e| AppError::ConfigValidation(e.to_string()))?;
        is_in_range(self.bufsize_secs, 1.0..=f64::MAX)
            .map_err(|e| AppError::ConfigValidation(e.to_string()))?;
        is_in_range::<usize>(self.max_handlers, 1..=4096)
            .map_err(|e| AppError::ConfigValidation(e.to_string()))?;
        is_not_empty(&self.daq_port).map_err(|e| AppError::ConfigValidation(e.to_string()))?;
        is_not_empty(&self.actuator_port)
            .map_err(|e| AppError::ConfigValidation(e.to_string()))?;
        Ok(())
    }

    /// Socket address the Command Service binds to.
    pub fn cmd_addr(&self) -> String {
        format!("{}:{}", self.host, self.cmd_port)
    }

    /// Socket address the Data Service binds to.
    pub fn data_addr(&self) -> String {
        format!("{}:{}", self.host, self.data_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut settings = Settings::default();
        settings.cmd_port = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gasdaq.toml");
        std::fs::write(&path, "cmd_port = 6000\ndaq_port = \"/dev/ttyACM0\"\n").unwrap();
        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.cmd_port, 6000);
        assert_eq!(settings.daq_port, "/dev/ttyACM0");
        assert_eq!(settings.data_port, 58000);
    }
}
