use std::{
    fmt::Display,
    io::{self, ErrorKind},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use ptp_clock::ExternalTimestampFlags;
use serde::Deserialize;
use tracing::{info, warn};

use crate::tracing::LogLevel;

/// Read when no configuration file is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/ptp-tools/ptp.toml";

#[derive(Debug, Default, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Plain,
    Json,
}

impl Format {
    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "plain" => Ok(Format::Plain),
            "json" => Ok(Format::Json),
            _ => Err(format!("invalid format option provided: {value}")),
        }
    }
}

/// Which edges of the external signal are timestamped.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    Rising,
    Falling,
    Both,
}

impl Edge {
    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "rising" => Ok(Edge::Rising),
            "falling" => Ok(Edge::Falling),
            "both" => Ok(Edge::Both),
            _ => Err(format!("invalid edge provided: {value}")),
        }
    }
}

/// The request flags for timestamping `edge`, only enabling the channel when
/// no edge is given.
pub fn external_timestamp_flags(edge: Option<Edge>) -> ExternalTimestampFlags {
    ExternalTimestampFlags::ENABLE
        | match edge {
            None => ExternalTimestampFlags::empty(),
            Some(Edge::Rising) => ExternalTimestampFlags::RISING_EDGE,
            Some(Edge::Falling) => ExternalTimestampFlags::FALLING_EDGE,
            Some(Edge::Both) => ExternalTimestampFlags::BOTH_EDGES,
        }
}

#[derive(Debug, Default, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DeviceConfig {
    #[serde(default)]
    pub index: u32,
}

fn default_samples() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DumpConfig {
    #[serde(default = "default_samples")]
    pub samples: u32,
    #[serde(default)]
    pub format: Format,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            samples: default_samples(),
            format: Format::default(),
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ExternalTimestampConfig {
    #[serde(default)]
    pub channel: u32,
    #[serde(default)]
    pub edge: Option<Edge>,
}

#[derive(Debug, Default, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ToolConfig {
    #[serde(default)]
    pub log_level: Option<LogLevel>,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub dump: DumpConfig,
    #[serde(default)]
    pub external_timestamp: ExternalTimestampConfig,
}

impl ToolConfig {
    pub fn from_file(file: impl AsRef<Path>) -> Result<ToolConfig, ConfigError> {
        let meta = std::fs::metadata(&file)?;
        let perm = meta.permissions();

        if perm.mode() as libc::mode_t & libc::S_IWOTH != 0 {
            warn!("Unrestricted config file permissions: Others can write.");
        }

        let contents = std::fs::read_to_string(file)?;
        Ok(toml::de::from_str(&contents)?)
    }

    /// The explicitly given file, or the default file when it exists.
    pub fn from_args(file: Option<impl AsRef<Path>>) -> Result<ToolConfig, ConfigError> {
        if let Some(f) = file {
            let path: &Path = f.as_ref();
            info!(path = %path.display(), "using config file");
            return ToolConfig::from_file(path);
        }

        match ToolConfig::from_file(DEFAULT_CONFIG_PATH) {
            Ok(config) => {
                info!(path = DEFAULT_CONFIG_PATH, "using config file");
                Ok(config)
            }
            Err(ConfigError::Io(e)) if e.kind() == ErrorKind::NotFound => Ok(ToolConfig::default()),
            Err(ConfigError::Io(e)) if e.kind() == ErrorKind::PermissionDenied => {
                info!("permission denied on global config file! using default config ...");
                Ok(ToolConfig::default())
            }
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Toml(toml::de::Error),
}

impl std::error::Error for ConfigError {}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error while reading config: {e}"),
            Self::Toml(e) => write!(f, "config toml parsing error: {e}"),
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::Toml(value)
    }
}

/// Parse the configuration with a temporary subscriber so that its warnings
/// are visible, then install the global subscriber. A log level given on the
/// command line wins over the one from the file.
pub fn initialize_logging_parse_config(
    initial_log_level: Option<LogLevel>,
    config_path: Option<PathBuf>,
) -> Result<ToolConfig, ConfigError> {
    use std::io::IsTerminal;
    use tracing_subscriber::util::SubscriberInitExt;

    let ansi_colors = std::io::stderr().is_terminal();
    let mut log_level = initial_log_level.unwrap_or_default();

    let config_tracing = crate::tracing::tracing_init(log_level, ansi_colors);
    let config = ::tracing::subscriber::with_default(config_tracing, || {
        ToolConfig::from_args(config_path)
    })?;

    if let Some(config_log_level) = config.log_level {
        if initial_log_level.is_none() {
            log_level = config_log_level;
        }
    }

    crate::tracing::tracing_init(log_level, ansi_colors).init();

    if config.log_level.is_some() && initial_log_level.is_some() {
        info!("Log level override from command line arguments is active");
    }

    Ok(config)
}
