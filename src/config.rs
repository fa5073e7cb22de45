//! Application settings, stored as JSON.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HrmError, Result};

pub const DEFAULT_INTERVAL_MS: u64 = 1000;
pub const MIN_INTERVAL_MS: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Simulated,
    Ble,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HrmConfig {
    /// Report every transition through the diagnostics log target.
    pub debug: bool,
    /// Start scanning as soon as the event loop runs.
    pub auto_scan: bool,
    /// Connect to this monitor as soon as a scan finds it.
    pub preferred_monitor: Option<String>,
    pub transport: TransportKind,
    pub simulated: SimulatedConfig,
}

impl Default for HrmConfig {
    fn default() -> Self {
        Self {
            debug: false,
            auto_scan: true,
            preferred_monitor: None,
            transport: TransportKind::default(),
            simulated: SimulatedConfig::default(),
        }
    }
}

/// What the in-process heart-rate strap looks like.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedConfig {
    pub monitors: Vec<String>,
    pub manufacturer: String,
    /// Raw Body Sensor Location code.
    pub body_location: u8,
    pub bpm_min: u8,
    pub bpm_max: u8,
    pub interval_ms: u64,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            monitors: vec!["Polar H7".to_string(), "Wahoo TICKR".to_string()],
            manufacturer: "Polar Electro Oy".to_string(),
            body_location: 0,
            bpm_min: 50,
            bpm_max: 70,
            interval_ms: DEFAULT_INTERVAL_MS,
        }
    }
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("HRM_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".hrm.json")
}

pub fn load_config() -> Result<HrmConfig> {
    load_config_from_path(&config_path())
}

/// A missing file yields the defaults.
pub fn load_config_from_path(path: &Path) -> Result<HrmConfig> {
    if !path.exists() {
        return Ok(HrmConfig::default());
    }
    let raw = fs::read_to_string(path).map_err(|source| HrmError::ConfigIo {
        path: path.to_path_buf(),
        source,
    })?;
    let config: HrmConfig = serde_json::from_str(&raw)?;
    Ok(validate_config(config))
}

pub fn validate_config(mut config: HrmConfig) -> HrmConfig {
    let sim = &mut config.simulated;
    if sim.bpm_min > sim.bpm_max {
        std::mem::swap(&mut sim.bpm_min, &mut sim.bpm_max);
    }
    if sim.interval_ms < MIN_INTERVAL_MS {
        sim.interval_ms = MIN_INTERVAL_MS;
    }
    sim.monitors.retain(|name| !name.trim().is_empty());
    if config
        .preferred_monitor
        .as_deref()
        .is_some_and(|name| name.trim().is_empty())
    {
        config.preferred_monitor = None;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, HrmConfig::default());
        assert_eq!(config.transport, TransportKind::Simulated);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"debug": true, "transport": "ble", "simulated": {{"bpm_min": 90}}}}"#
        )
        .unwrap();

        let config = load_config_from_path(file.path()).unwrap();
        assert!(config.debug);
        assert!(config.auto_scan);
        assert_eq!(config.transport, TransportKind::Ble);
        // swapped with the default maximum
        assert_eq!(config.simulated.bpm_min, 70);
        assert_eq!(config.simulated.bpm_max, 90);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = load_config_from_path(file.path()).unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_PARSE");
    }

    #[test]
    fn validation_clamps_values() {
        let mut config = HrmConfig {
            preferred_monitor: Some("  ".to_string()),
            ..HrmConfig::default()
        };
        config.simulated.interval_ms = 0;
        config.simulated.monitors.push(String::new());

        let config = validate_config(config);
        assert_eq!(config.simulated.interval_ms, MIN_INTERVAL_MS);
        assert_eq!(config.simulated.monitors.len(), 2);
        assert_eq!(config.preferred_monitor, None);
    }
}
