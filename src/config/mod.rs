//! Persisted integration configuration. A JSON document listing the boxes to
//! control, loaded at startup and rewritten when devices are added or
//! removed.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{LevelFilter, debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::device_control::{DeviceEndpoint, DeviceInfo, HttpStatusReader};
use crate::error::ConfigError;

const CONFIG_FILE_NAME: &str = "config.json";
const VALID_LOG_LEVELS: &[&str] = &["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"];
const FIRST_REMOTE_PORT: u16 = 49160;

fn default_rest_port() -> u16 {
    DeviceEndpoint::DEFAULT_REST_PORT
}

fn default_remote_port() -> u16 {
    DeviceEndpoint::DEFAULT_REMOTE_PORT
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    10
}

fn default_status_update_interval() -> u64 {
    10
}

fn default_integration_name() -> String {
    "SkyQ Integration".to_string()
}

fn default_log_level() -> String {
    "INFO".to_string()
}

/// Directory holding `config.json`: explicit argument, then
/// `UC_CONFIG_HOME`, then the working directory
pub fn get_config_dir(explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(dir) => dir.to_path_buf(),
        None => env::var("UC_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// One configured set-top box
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device_id: String,
    pub name: String,
    pub host: String,
    #[serde(default = "default_rest_port")]
    pub rest_port: u16,
    #[serde(default = "default_remote_port")]
    pub remote_port: u16,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// HTTP request timeout, seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Background poll interval, seconds
    #[serde(default = "default_status_update_interval")]
    pub status_update_interval: u64,
}

impl DeviceConfig {
    /// Build a device entry the way setup does: derived id and remote port
    pub fn new(host: &str, rest_port: u16, name: &str) -> Self {
        Self {
            device_id: device_id_for(host, rest_port),
            name: name.to_string(),
            host: host.to_string(),
            rest_port,
            remote_port: remote_port_for(rest_port),
            enabled: true,
            timeout: default_timeout(),
            status_update_interval: default_status_update_interval(),
        }
    }

    pub fn endpoint(&self) -> DeviceEndpoint {
        DeviceEndpoint::new(self.host.clone(), self.rest_port, self.remote_port)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.status_update_interval)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.device_id.is_empty() {
            errors.push("Device ID is required".to_string());
        }
        if self.name.is_empty() {
            errors.push("Device name is required".to_string());
        }
        if self.host.is_empty() {
            errors.push("Host/IP address is required".to_string());
        }
        if self.rest_port == 0 {
            errors.push(format!("Invalid REST port: {}", self.rest_port));
        }
        if self.remote_port == 0 {
            errors.push(format!("Invalid remote port: {}", self.remote_port));
        }
        if self.timeout < 1 {
            errors.push("Timeout must be at least 1 second".to_string());
        }
        if self.status_update_interval < 1 {
            errors.push("Status update interval must be at least 1 second".to_string());
        }

        errors
    }
}

/// `skyq_<host with separators replaced>_<rest port>`
pub fn device_id_for(host: &str, rest_port: u16) -> String {
    format!("skyq_{}_{}", host.replace(['.', ':'], "_"), rest_port)
}

/// Boxes behind a port-forwarding range 8080..8090 expose matching remote
/// ports from 49160 upwards
pub fn remote_port_for(rest_port: u16) -> u16 {
    if (8080..8090).contains(&rest_port) {
        FIRST_REMOTE_PORT + (rest_port - 8080)
    } else {
        FIRST_REMOTE_PORT
    }
}

/// Parsed `host` or `host:port` setup input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInput {
    pub host: String,
    pub rest_port: Option<u16>,
}

pub fn parse_host_input(input: &str) -> Result<HostInput, ConfigError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ConfigError::InvalidHostInput(input.to_string()));
    }

    let invalid = || ConfigError::InvalidHostInput(input.to_string());

    // [v6]:port or [v6]
    if let Some(rest) = input.strip_prefix('[') {
        let (host, after) = rest.split_once(']').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        let rest_port = match after {
            "" => None,
            _ => Some(
                after
                    .strip_prefix(':')
                    .and_then(|p| p.parse::<u16>().ok())
                    .filter(|p| *p != 0)
                    .ok_or_else(invalid)?,
            ),
        };
        return Ok(HostInput {
            host: host.to_string(),
            rest_port,
        });
    }

    // A bare IPv6 literal carries no port
    if input.matches(':').count() > 1 {
        return Ok(HostInput {
            host: input.to_string(),
            rest_port: None,
        });
    }

    match input.split_once(':') {
        Some((host, port)) => {
            let rest_port = port
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(invalid)?;
            if host.is_empty() {
                return Err(invalid());
            }
            Ok(HostInput {
                host: host.to_string(),
                rest_port: Some(rest_port),
            })
        }
        None => Ok(HostInput {
            host: input.to_string(),
            rest_port: None,
        }),
    }
}

/// REST ports tried, in order, when setup input names no port
pub const CANDIDATE_REST_PORTS: &[u16] = &[DeviceEndpoint::DEFAULT_REST_PORT, 8080];

/// First REST port on `host` that serves a device descriptor
pub async fn probe_rest_port(
    host: &str,
    candidates: &[u16],
    http: &HttpStatusReader,
) -> Option<(u16, DeviceInfo)> {
    for &port in candidates {
        let endpoint = DeviceEndpoint::new(host, port, remote_port_for(port));
        match http.get_device_info(&endpoint).await {
            Ok(info) => {
                info!("Found device at {}:{}", host, port);
                return Some((port, info));
            }
            Err(e) => debug!("No device at {}:{} ({})", host, port, e),
        }
    }
    None
}

/// Whole-integration configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationConfig {
    #[serde(default = "default_integration_name")]
    pub integration_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            integration_name: default_integration_name(),
            log_level: default_log_level(),
            devices: Vec::new(),
        }
    }
}

impl IntegrationConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let mut ids = HashSet::new();
        let mut names = HashSet::new();

        for (i, device) in self.devices.iter().enumerate() {
            for err in device.validate() {
                errors.push(format!("Device {}: {}", i + 1, err));
            }
            if !ids.insert(device.device_id.as_str()) {
                errors.push(format!("Duplicate device ID: {}", device.device_id));
            }
            if !names.insert(device.name.as_str()) {
                errors.push(format!("Duplicate device name: {}", device.name));
            }
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            errors.push(format!("Invalid log level: {}", self.log_level));
        }

        errors
    }

    /// Logger filter for the configured level
    pub fn log_filter(&self) -> LevelFilter {
        match self.log_level.as_str() {
            "DEBUG" => LevelFilter::Debug,
            "WARNING" => LevelFilter::Warn,
            "ERROR" | "CRITICAL" => LevelFilter::Error,
            _ => LevelFilter::Info,
        }
    }

    pub fn device(&self, device_id: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.device_id == device_id)
    }

    /// Enabled devices that pass validation; invalid entries are skipped
    pub fn enabled_devices(&self) -> Vec<DeviceConfig> {
        self.devices
            .iter()
            .filter(|d| d.enabled)
            .filter(|d| {
                let errors = d.validate();
                if !errors.is_empty() {
                    warn!("Skipping device {}: {}", d.device_id, errors.join("; "));
                }
                errors.is_empty()
            })
            .cloned()
            .collect()
    }
}

/// Loads and persists the configuration file
pub struct ConfigManager {
    config_file: PathBuf,
    config: IntegrationConfig,
}

impl ConfigManager {
    pub fn new(config_dir: Option<&Path>) -> Result<Self, ConfigError> {
        let dir = get_config_dir(config_dir);
        fs::create_dir_all(&dir)?;
        let config_file = dir.join(CONFIG_FILE_NAME);
        debug!("Using config file {}", config_file.display());

        let config = Self::load(&config_file)?;
        Ok(Self {
            config_file,
            config,
        })
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    pub fn config(&self) -> &IntegrationConfig {
        &self.config
    }

    /// Read the file. A missing file yields an empty config; a file that
    /// exists but cannot be read or parsed is an error, so it is never
    /// overwritten by a later save.
    pub fn load(path: &Path) -> Result<IntegrationConfig, ConfigError> {
        if !path.exists() {
            info!("No configuration at {}, starting empty", path.display());
            return Ok(IntegrationConfig::default());
        }

        match Self::read(path) {
            Ok(config) => {
                let errors = config.validate();
                if !errors.is_empty() {
                    warn!("Configuration validation errors: {:?}", errors);
                }
                info!(
                    "Loaded configuration for {} devices from {}",
                    config.devices.len(),
                    path.display()
                );
                Ok(config)
            }
            Err(e) => {
                error!("Failed to load configuration from {}: {}", path.display(), e);
                Err(e)
            }
        }
    }

    fn read(path: &Path) -> Result<IntegrationConfig, ConfigError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write the current configuration; invalid configurations are refused
    pub fn save(&self) -> Result<(), ConfigError> {
        let errors = self.config.validate();
        if !errors.is_empty() {
            return Err(ConfigError::Invalid(errors));
        }
        let text = serde_json::to_string_pretty(&self.config)?;
        fs::write(&self.config_file, text)?;
        info!(
            "Saved configuration for {} devices to {}",
            self.config.devices.len(),
            self.config_file.display()
        );
        Ok(())
    }

    pub fn add_device(&mut self, device: DeviceConfig) -> Result<(), ConfigError> {
        let duplicate = self
            .config
            .devices
            .iter()
            .any(|d| d.device_id == device.device_id || d.name == device.name);
        if duplicate {
            return Err(ConfigError::DuplicateDevice(device.device_id));
        }

        let errors = device.validate();
        if !errors.is_empty() {
            return Err(ConfigError::Invalid(errors));
        }

        self.config.devices.push(device);
        self.save()
    }

    pub fn remove_device(&mut self, device_id: &str) -> Result<DeviceConfig, ConfigError> {
        let index = self
            .config
            .devices
            .iter()
            .position(|d| d.device_id == device_id)
            .ok_or_else(|| ConfigError::UnknownDevice(device_id.to_string()))?;
        let removed = self.config.devices.remove(index);
        self.save()?;
        Ok(removed)
    }

    pub fn set_enabled(&mut self, device_id: &str, enabled: bool) -> Result<(), ConfigError> {
        let device = self
            .config
            .devices
            .iter_mut()
            .find(|d| d.device_id == device_id)
            .ok_or_else(|| ConfigError::UnknownDevice(device_id.to_string()))?;
        device.enabled = enabled;
        self.save()
    }

    pub fn enabled_devices(&self) -> Vec<DeviceConfig> {
        self.config.enabled_devices()
    }

    /// Replace the file with an empty configuration
    pub fn reset(&mut self) -> Result<(), ConfigError> {
        self.config = IntegrationConfig::default();
        self.save()
    }
}
