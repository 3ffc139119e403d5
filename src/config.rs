use crate::error::ScopeError;
use crate::link::{ConnectionConfig, ResourceAddress};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Resource of the bench scope the tool was first written for.
pub const DEFAULT_RESOURCE: &str = "USB0::0xF4EC::0xEE38::SDSMMEBQ4R5668::0::INSTR";

/// Files tried, in order, when no path is given.
pub const CONFIG_SEARCH_PATHS: [&str; 2] = ["scope.toml", "config/scope.toml"];

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub instrument: InstrumentConfig,
    pub storage: StorageConfig,
    pub plot: PlotConfig,
    pub console: ConsoleConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct InstrumentConfig {
    pub resource: String,
    pub channel: u8,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    /// Open the instrument on demand when an action finds no session
    pub auto_connect: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub timestamp_filenames: bool,
    /// JSONL file recording every saved capture; empty to disable
    pub capture_log: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct PlotConfig {
    pub fft_max_frequency_hz: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ConsoleConfig {
    pub verbosity: String,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        let timeouts = ConnectionConfig::default();
        Self {
            resource: DEFAULT_RESOURCE.to_string(),
            channel: 1,
            connect_timeout_ms: timeouts.connect_timeout.as_millis() as u64,
            read_timeout_ms: timeouts.read_timeout.as_millis() as u64,
            write_timeout_ms: timeouts.write_timeout.as_millis() as u64,
            auto_connect: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            timestamp_filenames: true,
            capture_log: Some(PathBuf::from("./data/captures.jsonl")),
        }
    }
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            fft_max_frequency_hz: 2e6,
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            verbosity: "info".to_string(),
        }
    }
}

impl InstrumentConfig {
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
        }
    }

    pub fn address(&self) -> Result<ResourceAddress, ScopeError> {
        ResourceAddress::parse(&self.resource)
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ScopeError> {
        let inst = &self.instrument;
        if !(1..=4).contains(&inst.channel) {
            return Err(ScopeError::Config(format!(
                "instrument.channel must be 1 to 4, got {}",
                inst.channel
            )));
        }
        for (name, ms) in [
            ("connect_timeout_ms", inst.connect_timeout_ms),
            ("read_timeout_ms", inst.read_timeout_ms),
            ("write_timeout_ms", inst.write_timeout_ms),
        ] {
            if ms == 0 {
                return Err(ScopeError::Config(format!("instrument.{name} must be non-zero")));
            }
        }
        inst.address()
            .map_err(|e| ScopeError::Config(format!("instrument.resource: {e}")))?;
        if !(self.plot.fft_max_frequency_hz > 0.0) {
            return Err(ScopeError::Config(
                "plot.fft_max_frequency_hz must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Load configuration from file with layered fallbacks
///
/// Defaults, then the file (explicit path or the first of
/// [`CONFIG_SEARCH_PATHS`]), then `SDS_SCOPE__SECTION__KEY` variables.
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(File::from(path));
        } else {
            return Err(ConfigError::Message(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
    } else if let Some(path) = CONFIG_SEARCH_PATHS.iter().find(|p| Path::new(p).exists()) {
        builder = builder.add_source(File::with_name(path));
    }

    builder = builder.add_source(
        Environment::with_prefix("SDS_SCOPE")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize::<AppConfig>()
}

/// Load configuration, falling back to the defaults on any error
pub fn load_config_or_default(config_path: Option<&Path>) -> AppConfig {
    match load_config(config_path) {
        Ok(config) => {
            log::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            log::warn!("Failed to load config ({}), using defaults", e);
            AppConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.instrument.resource, DEFAULT_RESOURCE);
        assert_eq!(config.plot.fft_max_frequency_hz, 2e6);
    }

    #[test]
    fn test_partial_file_overrides_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scope.toml");
        fs::write(
            &path,
            "[instrument]\nresource = \"TCPIP0::10.0.0.5::INSTR\"\nchannel = 2\n",
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.instrument.resource, "TCPIP0::10.0.0.5::INSTR");
        assert_eq!(config.instrument.channel, 2);
        assert_eq!(config.storage.data_dir, PathBuf::from("./data"));
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        assert!(load_config(Some(Path::new("/nonexistent/scope.toml"))).is_err());
        let fallback = load_config_or_default(Some(Path::new("/nonexistent/scope.toml")));
        assert_eq!(fallback, AppConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.instrument.channel = 5;
        assert!(matches!(config.validate(), Err(ScopeError::Config(_))));

        let mut config = AppConfig::default();
        config.instrument.read_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.instrument.resource = "GPIB0::7::INSTR".into();
        assert!(config.validate().is_err());
    }
}
