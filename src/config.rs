//! Configuration management for wgprov

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::tool::ToolCommand;
use crate::validation;

/// Main wgprov configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WgprovConfig {
    /// HTTP listener
    pub server: ServerConfig,
    /// Staging and install directories
    pub paths: ConfigPaths,
    /// External commands
    pub tools: ToolsConfig,
    /// Defaults for config generation requests
    pub defaults: DefaultSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigPaths {
    /// Where artifacts are written before the elevated copy
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    /// Final location read by wg-quick
    #[serde(default = "default_install_dir")]
    pub install_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Key and status tool, e.g. `["sudo", "wg"]`
    #[serde(default = "default_wg_command")]
    pub wg: ToolCommand,
    /// Elevated copy into the install directory
    #[serde(default = "default_copy_command")]
    pub copy: ToolCommand,
    /// Elevated removal, used to undo a partial install
    #[serde(default = "default_remove_command")]
    pub remove: ToolCommand,
    /// Upper bound for any single tool invocation (seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultSettings {
    /// Default `addr` for generated configs
    #[serde(default = "default_address")]
    pub address: String,
    /// Default `mask` for generated configs
    #[serde(default = "default_mask")]
    pub mask: String,
    /// Default WireGuard listen port
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8100
}

fn default_staging_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_install_dir() -> PathBuf {
    PathBuf::from("/etc/wireguard")
}

fn default_wg_command() -> ToolCommand {
    ToolCommand::new(["sudo", "wg"])
}

fn default_copy_command() -> ToolCommand {
    ToolCommand::new(["sudo", "cp"])
}

fn default_remove_command() -> ToolCommand {
    ToolCommand::new(["sudo", "rm", "-f"])
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_address() -> String {
    "10.255.255.1/24".to_string()
}

fn default_mask() -> String {
    "24".to_string()
}

fn default_listen_port() -> u16 {
    51820
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_server_port(),
        }
    }
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self {
            staging_dir: default_staging_dir(),
            install_dir: default_install_dir(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            wg: default_wg_command(),
            copy: default_copy_command(),
            remove: default_remove_command(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for DefaultSettings {
    fn default() -> Self {
        Self {
            address: default_address(),
            mask: default_mask(),
            listen_port: default_listen_port(),
        }
    }
}

impl ToolsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl WgprovConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: WgprovConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject configurations the daemon cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, command) in [
            ("wg", &self.tools.wg),
            ("copy", &self.tools.copy),
            ("remove", &self.tools.remove),
        ] {
            if command.program().is_none() {
                return Err(ConfigError::Invalid(format!("tools.{} cannot be empty", name)));
            }
        }

        if self.tools.timeout_secs == 0 {
            return Err(ConfigError::Invalid("tools.timeout_secs must be positive".to_string()));
        }

        validation::validate_config_value(&self.defaults.address)
            .map_err(|e| ConfigError::Invalid(format!("defaults.address: {}", e)))?;
        validation::validate_config_value(&self.defaults.mask)
            .map_err(|e| ConfigError::Invalid(format!("defaults.mask: {}", e)))?;

        Ok(())
    }
}
