//! Head unit configuration management

use anyhow::{Context, Result, anyhow};
use aoap::{AccessoryIdentity, AccessoryIds};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeadUnitConfig {
    #[serde(default)]
    pub general: GeneralSettings,
    #[serde(default)]
    pub workers: WorkerSettings,
    #[serde(default)]
    pub usb: UsbSettings,
    /// Strings announced to a phone before it switches to accessory mode
    #[serde(default)]
    pub accessory: AccessoryIdentity,
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub entity: EntitySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    #[serde(default = "GeneralSettings::default_log_level")]
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

impl GeneralSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

/// Sizes of the two thread pools
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Threads pumping libusb events
    #[serde(default = "WorkerSettings::default_workers")]
    pub usb_event_workers: usize,
    /// Async I/O executor threads
    #[serde(default = "WorkerSettings::default_workers")]
    pub io_workers: usize,
    /// Upper bound of a single libusb event wait
    #[serde(default = "WorkerSettings::default_event_timeout")]
    pub usb_event_timeout_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            usb_event_workers: Self::default_workers(),
            io_workers: Self::default_workers(),
            usb_event_timeout_secs: Self::default_event_timeout(),
        }
    }
}

impl WorkerSettings {
    fn default_workers() -> usize {
        4
    }

    fn default_event_timeout() -> u64 {
        180
    }

    pub fn usb_event_timeout(&self) -> Duration {
        Duration::from_secs(self.usb_event_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    /// VID:PID patterns of devices worth a negotiation attempt (empty = all)
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default = "UsbSettings::default_accessory_vendor_id")]
    pub accessory_vendor_id: u16,
    #[serde(default = "UsbSettings::default_accessory_product_ids")]
    pub accessory_product_ids: Vec<u16>,
    #[serde(default = "UsbSettings::default_transfer_timeout")]
    pub control_timeout_ms: u64,
    #[serde(default = "UsbSettings::default_transfer_timeout")]
    pub bulk_timeout_ms: u64,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            accessory_vendor_id: Self::default_accessory_vendor_id(),
            accessory_product_ids: Self::default_accessory_product_ids(),
            control_timeout_ms: Self::default_transfer_timeout(),
            bulk_timeout_ms: Self::default_transfer_timeout(),
        }
    }
}

impl UsbSettings {
    fn default_accessory_vendor_id() -> u16 {
        AccessoryIds::default().vendor_id
    }

    fn default_accessory_product_ids() -> Vec<u16> {
        AccessoryIds::default().product_ids
    }

    fn default_transfer_timeout() -> u64 {
        1000
    }

    pub fn accessory_ids(&self) -> AccessoryIds {
        AccessoryIds {
            vendor_id: self.accessory_vendor_id,
            product_ids: self.accessory_product_ids.clone(),
        }
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    pub fn bulk_timeout(&self) -> Duration {
        Duration::from_millis(self.bulk_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Port used when `--connect` names only a host
    #[serde(default = "NetworkSettings::default_port")]
    pub default_port: u16,
    #[serde(default = "NetworkSettings::default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            default_port: Self::default_port(),
            connect_timeout_secs: Self::default_connect_timeout(),
        }
    }
}

impl NetworkSettings {
    fn default_port() -> u16 {
        5277
    }

    fn default_connect_timeout() -> u64 {
        10
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntitySettings {
    /// host:port of the protocol stack sessions are relayed to. Without it,
    /// inbound session bytes are drained.
    #[serde(default)]
    pub relay_addr: Option<String>,
}

impl HeadUnitConfig {
    /// Load configuration from the specified path, or the first standard
    /// location that exists
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => Self::locate(Self::candidates())
                .ok_or_else(|| anyhow!("No configuration file found"))?,
        };
        Self::read(&config_path)
    }

    /// Load configuration or fall back to defaults
    ///
    /// Nothing is logged here; callers report the returned source once
    /// logging is up.
    pub fn load_or_default() -> (Self, ConfigSource) {
        Self::load_first(Self::candidates())
    }

    fn load_first(candidates: Vec<PathBuf>) -> (Self, ConfigSource) {
        let Some(path) = Self::locate(candidates) else {
            return (
                Self::default(),
                ConfigSource::Defaults("no configuration file found".to_string()),
            );
        };

        match Self::read(&path) {
            Ok(config) => (config, ConfigSource::File(path)),
            Err(e) => (Self::default(), ConfigSource::Defaults(format!("{:#}", e))),
        }
    }

    /// Standard locations, in search order
    fn candidates() -> Vec<PathBuf> {
        vec![
            Self::default_path(),
            PathBuf::from("/etc/headunit/headunit.toml"),
        ]
    }

    fn locate(candidates: Vec<PathBuf>) -> Option<PathBuf> {
        candidates.into_iter().find(|p| p.exists())
    }

    fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: HeadUnitConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("headunit").join("headunit.toml")
        } else {
            PathBuf::from(".config/headunit/headunit.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.general.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.workers.usb_event_workers == 0 || self.workers.io_workers == 0 {
            return Err(anyhow!("Worker counts must be at least 1"));
        }

        let timeouts = [
            ("workers.usb_event_timeout_secs", self.workers.usb_event_timeout_secs),
            ("usb.control_timeout_ms", self.usb.control_timeout_ms),
            ("usb.bulk_timeout_ms", self.usb.bulk_timeout_ms),
            ("network.connect_timeout_secs", self.network.connect_timeout_secs),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, value)| *value == 0) {
            return Err(anyhow!("Timeout '{}' must be greater than 0", name));
        }

        if self.usb.accessory_product_ids.is_empty() {
            return Err(anyhow!("usb.accessory_product_ids must not be empty"));
        }

        for filter in &self.usb.filters {
            Self::validate_filter(filter)?;
        }

        if let Some(addr) = &self.entity.relay_addr
            && addr.rsplit_once(':').is_none_or(|(host, port)| {
                host.is_empty() || port.parse::<u16>().is_err()
            })
        {
            return Err(anyhow!(
                "Invalid relay address '{}', expected host:port",
                addr
            ));
        }

        Ok(())
    }

    /// Validate a USB device filter pattern (VID:PID)
    fn validate_filter(filter: &str) -> Result<()> {
        let parts: Vec<&str> = filter.split(':').collect();
        if parts.len() != 2 {
            return Err(anyhow!(
                "Invalid filter format '{}', expected VID:PID (e.g., '0x1234:0x5678' or '0x1234:*')",
                filter
            ));
        }

        let (vid, pid) = (parts[0], parts[1]);

        if vid != "*" {
            Self::validate_hex_id(vid, "VID")?;
        }

        if pid != "*" {
            Self::validate_hex_id(pid, "PID")?;
        }

        Ok(())
    }

    /// Validate a hex ID (VID or PID)
    fn validate_hex_id(id: &str, name: &str) -> Result<()> {
        let Some(hex_part) = id.strip_prefix("0x").or_else(|| id.strip_prefix("0X")) else {
            return Err(anyhow!(
                "Invalid {} '{}', must start with '0x' (e.g., '0x1234')",
                name,
                id
            ));
        };

        if hex_part.is_empty() || hex_part.len() > 4 {
            return Err(anyhow!(
                "Invalid {} '{}', hex part must be 1-4 digits",
                name,
                id
            ));
        }

        u16::from_str_radix(hex_part, 16)
            .map_err(|_| anyhow!("Invalid {} '{}', not a valid hex number", name, id))?;

        Ok(())
    }
}

/// Where the effective configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// Built-in defaults, with the reason no file was used
    Defaults(String),
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "configuration from {}", path.display()),
            ConfigSource::Defaults(reason) => write!(f, "default configuration ({})", reason),
        }
    }
}

/// Expand a leading `~` in a user-supplied path
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

/// Load a configuration file, expanding a leading `~`
pub fn load_config(path: &str) -> Result<HeadUnitConfig> {
    HeadUnitConfig::load(Some(expand_path(path)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HeadUnitConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.workers.usb_event_workers, 4);
        assert_eq!(config.workers.io_workers, 4);
        assert_eq!(config.workers.usb_event_timeout(), Duration::from_secs(180));
        assert_eq!(config.network.default_port, 5277);
        assert_eq!(config.usb.accessory_ids(), AccessoryIds::default());
        assert!(config.entity.relay_addr.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_first_without_files_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let (config, source) = HeadUnitConfig::load_first(vec![dir.path().join("missing.toml")]);

        assert_eq!(config.network.default_port, 5277);
        assert_eq!(
            source,
            ConfigSource::Defaults("no configuration file found".to_string())
        );
    }

    #[test]
    fn test_load_first_picks_first_existing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let second = dir.path().join("second.toml");
        fs::write(&second, "[network]\ndefault_port = 6001\n").unwrap();

        let (config, source) =
            HeadUnitConfig::load_first(vec![dir.path().join("first.toml"), second.clone()]);
        assert_eq!(config.network.default_port, 6001);
        assert_eq!(source, ConfigSource::File(second.clone()));
        assert_eq!(
            source.to_string(),
            format!("configuration from {}", second.display())
        );
    }

    #[test]
    fn test_load_first_invalid_file_reports_reason() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[workers]\nio_workers = 0\n").unwrap();

        let (config, source) = HeadUnitConfig::load_first(vec![path]);
        assert_eq!(config.workers.io_workers, 4);
        match source {
            ConfigSource::Defaults(reason) => assert!(reason.contains("Worker counts")),
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn test_validate_filter_valid() {
        assert!(HeadUnitConfig::validate_filter("0x18d1:0x4ee1").is_ok());
        assert!(HeadUnitConfig::validate_filter("0x04e8:*").is_ok());
        assert!(HeadUnitConfig::validate_filter("*:0x2d00").is_ok());
        assert!(HeadUnitConfig::validate_filter("*:*").is_ok());
    }

    #[test]
    fn test_validate_filter_invalid() {
        assert!(HeadUnitConfig::validate_filter("18d1:4ee1").is_err());
        assert!(HeadUnitConfig::validate_filter("0x18d1").is_err());
        assert!(HeadUnitConfig::validate_filter("0x1:0x2:0x3").is_err());
        assert!(HeadUnitConfig::validate_filter("0xGHIJ:0x5678").is_err());
        assert!(HeadUnitConfig::validate_filter("0x12345:0x5678").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = HeadUnitConfig::default();
        config.workers.io_workers = 0;
        assert!(config.validate().is_err());

        let mut config = HeadUnitConfig::default();
        config.usb.control_timeout_ms = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("usb.control_timeout_ms"));
    }

    #[test]
    fn test_validate_relay_addr() {
        let mut config = HeadUnitConfig::default();
        config.entity.relay_addr = Some("127.0.0.1:5000".to_string());
        assert!(config.validate().is_ok());

        config.entity.relay_addr = Some("127.0.0.1".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = HeadUnitConfig::default();
        config.general.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        config.general.log_level = "debug".to_string();
        assert!(config.validate().is_ok());
    }
}
