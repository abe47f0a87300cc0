//! Configuration file support for iapflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (IAPFLASH_*)
//! 3. Local config file (./iapflash.toml or ./iapflash_ports.toml)
//! 4. Global config file (~/.config/iapflash/config.toml)

use {
    directories::ProjectDirs,
    log::{debug, info, warn},
    serde::{Deserialize, Serialize},
    std::{
        fs,
        path::{Path, PathBuf},
    },
};

const LOCAL_CONFIG: &str = "iapflash.toml";
const LOCAL_PORTS_CONFIG: &str = "iapflash_ports.toml";

/// USB device identification for port matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbDevice {
    /// Check if this device matches the given USB info.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Port-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Known USB devices for auto-detection.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

/// Update session defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSection {
    /// Firmware version sent in START_UPDATE, `0x...` hex or decimal.
    pub version: Option<String>,
    /// Image bytes per DATA frame.
    pub chunk_size: Option<usize>,
    /// ACK wait in milliseconds.
    pub ack_timeout_ms: Option<u64>,
    /// Attempts per DATA/END frame.
    pub max_retries: Option<u32>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Update configuration.
    #[serde(default)]
    pub update: UpdateSection,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        if let Some(ports_config) = Self::load_ports_config() {
            config.merge_ports(ports_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content)
                .inspect_err(|e| {
                    warn!("Failed to parse config file {}: {e}", path.display());
                })
                .ok(),
            Err(e) => {
                warn!("Failed to read config file {}: {e}", path.display());
                None
            },
        }
    }

    /// Parse a TOML document.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load remembered ports from `iapflash_ports.toml` or the global `ports.toml`.
    fn load_ports_config() -> Option<PortConfig> {
        let local_path = PathBuf::from(LOCAL_PORTS_CONFIG);
        let global_path = Self::global_config_dir().map(|dir| dir.join("ports.toml"));

        for path in std::iter::once(local_path).chain(global_path) {
            if !path.exists() {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .ok()
                .and_then(|content| toml::from_str::<PortConfig>(&content).ok());
            if let Some(config) = parsed {
                debug!("Loaded ports config from {}", path.display());
                return Some(config);
            }
        }

        None
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "iapflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        self.merge_ports(other.port);

        let update = other.update;
        if update.version.is_some() {
            self.update.version = update.version;
        }
        if update.chunk_size.is_some() {
            self.update.chunk_size = update.chunk_size;
        }
        if update.ack_timeout_ms.is_some() {
            self.update.ack_timeout_ms = update.ack_timeout_ms;
        }
        if update.max_retries.is_some() {
            self.update.max_retries = update.max_retries;
        }
    }

    fn merge_ports(&mut self, other: PortConfig) {
        if other.connection.serial.is_some() {
            self.port.connection.serial = other.connection.serial;
        }
        if other.connection.baud.is_some() {
            self.port.connection.baud = other.connection.baud;
        }
        for device in other.usb_device {
            if !self.port.usb_device.contains(&device) {
                self.port.usb_device.push(device);
            }
        }
    }

    /// Check whether a VID/PID pair was remembered.
    pub fn is_remembered(&self, vid: u16, pid: u16) -> bool {
        self.port
            .usb_device
            .iter()
            .any(|device| device.matches(vid, pid))
    }

    /// Save USB device for future auto-detection.
    pub fn remember_usb_device(&mut self, vid: u16, pid: u16) -> anyhow::Result<()> {
        if self.is_remembered(vid, pid) {
            return Ok(());
        }

        // Local file when the project already has one, otherwise global
        let path = if Path::new(LOCAL_PORTS_CONFIG).exists() || Path::new(LOCAL_CONFIG).exists() {
            PathBuf::from(LOCAL_PORTS_CONFIG)
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join("ports.toml")
        } else {
            PathBuf::from(LOCAL_PORTS_CONFIG)
        };

        self.port.usb_device.push(UsbDevice { vid, pid });
        self.save_ports_to(&path)
    }

    fn save_ports_to(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(&self.port)?;
        fs::write(path, content)?;
        info!("Saved USB device to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, tempfile::TempDir};

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.port.connection.serial.is_none());
        assert!(config.port.connection.baud.is_none());
        assert!(config.port.usb_device.is_empty());
        assert!(config.update.version.is_none());
        assert!(config.update.chunk_size.is_none());
    }

    #[test]
    fn test_usb_device_matches() {
        let device = UsbDevice {
            vid: 0x1A86,
            pid: 0x7523,
        };
        assert!(device.matches(0x1A86, 0x7523));
        assert!(!device.matches(0x1A86, 0x7522));
        assert!(!device.matches(0x10C4, 0x7523));
    }

    #[test]
    fn test_parse_full_document() {
        let config = Config::parse(
            r#"
[port.connection]
serial = "/dev/ttyUSB1"
baud = 921600

[[port.usb_device]]
vid = 6790
pid = 29987

[update]
version = "0x00020003"
chunk_size = 256
ack_timeout_ms = 1500
max_retries = 3
"#,
        )
        .unwrap();

        assert_eq!(config.port.connection.serial.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(config.port.connection.baud, Some(921_600));
        assert!(config.is_remembered(0x1A86, 0x7523));
        assert_eq!(config.update.version.as_deref(), Some("0x00020003"));
        assert_eq!(config.update.chunk_size, Some(256));
        assert_eq!(config.update.ack_timeout_ms, Some(1500));
        assert_eq!(config.update.max_retries, Some(3));
    }

    #[test]
    fn test_parse_empty_document() {
        let config = Config::parse("").unwrap();
        assert!(config.port.connection.serial.is_none());
        assert!(config.update.max_retries.is_none());
    }

    #[test]
    fn test_parse_invalid_reports_toml_error() {
        let err = Config::parse("[update\nchunk_size = ").unwrap_err();
        assert!(err.to_string().contains("TOML"));
    }

    #[test]
    fn test_merge_overrides_set_fields_only() {
        let mut base = Config::default();
        base.port.connection.serial = Some("/dev/ttyUSB0".into());
        base.update.chunk_size = Some(128);
        base.update.max_retries = Some(7);

        let mut other = Config::default();
        other.port.connection.baud = Some(9600);
        other.update.chunk_size = Some(1024);

        base.merge(other);
        assert_eq!(base.port.connection.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.port.connection.baud, Some(9600));
        assert_eq!(base.update.chunk_size, Some(1024));
        assert_eq!(base.update.max_retries, Some(7));
    }

    #[test]
    fn test_merge_deduplicates_usb_devices() {
        let mut base = Config::default();
        base.port.usb_device.push(UsbDevice { vid: 1, pid: 2 });
        let mut other = Config::default();
        other.port.usb_device.push(UsbDevice { vid: 1, pid: 2 });
        other.port.usb_device.push(UsbDevice { vid: 3, pid: 4 });

        base.merge(other);
        assert_eq!(base.port.usb_device.len(), 2);
    }

    #[test]
    fn test_load_from_path_reads_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[update]\nmax_retries = 9\n").unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.update.max_retries, Some(9));
    }

    #[test]
    fn test_load_from_path_invalid_falls_back_to_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "this is = = not toml").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.update.max_retries.is_none());
    }

    #[test]
    fn test_load_from_path_missing_falls_back_to_default() {
        let config = Config::load_from_path(Path::new("/nonexistent/iapflash.toml"));
        assert!(config.port.connection.serial.is_none());
    }

    #[test]
    fn test_save_ports_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ports.toml");

        let mut config = Config::default();
        config.port.usb_device.push(UsbDevice {
            vid: 0x10C4,
            pid: 0xEA60,
        });
        config.save_ports_to(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let ports: PortConfig = toml::from_str(&content).unwrap();
        assert_eq!(ports.usb_device, config.port.usb_device);
    }

    #[test]
    fn test_global_config_path_ends_with_config_toml() {
        if let Some(path) = Config::global_config_path() {
            assert!(path.ends_with("config.toml"));
        }
    }
}
