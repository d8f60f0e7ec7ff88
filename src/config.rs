//! Server configuration and the frozen shell-type registry.
//!
//! Configuration is a TOML file with a `[server]` section and one
//! `[[shell]]` table per available shell type. The set of shell types is
//! read once at startup and never changes afterwards; the registry caches
//! both the `keyName -> argv` mapping used by shell creation and the JSON
//! body served to `get_shell_types`.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::error::ConfigError;
use crate::protocol::{self, ShellTypeInfo};

pub const DEFAULT_CONFIG_PATH: &str = "shellmux.toml";

/// Where to look for configuration when no path was given: the working
/// directory first, then the user's home.
pub fn default_config_path() -> std::path::PathBuf {
    let local = std::path::PathBuf::from(DEFAULT_CONFIG_PATH);
    if local.exists() {
        return local;
    }
    dirs::home_dir()
        .map(|home| home.join(".shellmux").join(DEFAULT_CONFIG_PATH))
        .filter(|candidate| candidate.exists())
        .unwrap_or(local)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default, rename = "shell")]
    pub shells: Vec<ShellTypeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7998
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// One configured shell type. `command` is a shell-words string split into
/// an argv at load time.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShellTypeConfig {
    pub nice_name: String,
    pub key_name: String,
    pub command: String,
    #[serde(default)]
    pub help: Option<String>,
}

impl Default for Config {
    /// Used when no config file exists: a single plain bash entry so the
    /// server can come up on a bare machine.
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            shells: vec![ShellTypeConfig {
                nice_name: "Bash".to_string(),
                key_name: "bash".to_string(),
                command: "/bin/bash".to_string(),
                help: None,
            }],
        }
    }
}

impl Config {
    /// Load from `path`, or fall back to built-in defaults when the file
    /// does not exist. Any other read or parse problem is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no config file found, using built-in defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// The frozen set of shell types the server offers.
#[derive(Debug)]
pub struct ShellTypeRegistry {
    commands: HashMap<String, Vec<String>>,
    types_response: Value,
}

impl ShellTypeRegistry {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mut commands = HashMap::new();
        let mut entries = Vec::with_capacity(config.shells.len());
        for shell in &config.shells {
            let argv =
                shell_words::split(&shell.command).map_err(|source| ConfigError::BadCommand {
                    key_name: shell.key_name.clone(),
                    command: shell.command.clone(),
                    source,
                })?;
            if argv.is_empty() {
                return Err(ConfigError::EmptyCommand {
                    key_name: shell.key_name.clone(),
                });
            }
            if commands.insert(shell.key_name.clone(), argv).is_some() {
                return Err(ConfigError::DuplicateKeyName {
                    key_name: shell.key_name.clone(),
                });
            }
            entries.push(ShellTypeInfo {
                nice_name: shell.nice_name.clone(),
                key_name: shell.key_name.clone(),
                help: shell.help.clone(),
            });
        }
        info!(shell_types = entries.len(), "shell type registry frozen");
        Ok(Self {
            commands,
            types_response: protocol::shell_types(&entries),
        })
    }

    /// The argv for a shell type, or None for an unknown key name.
    pub fn command_for(&self, key_name: &str) -> Option<&[String]> {
        self.commands.get(key_name).map(Vec::as_slice)
    }

    /// The cached `{success, shellTypes}` body.
    pub fn types_response(&self) -> Value {
        self.types_response.clone()
    }
}
