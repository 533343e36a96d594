//! Configuration module
//!
//! Loads the session roster and transport settings from TOML.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::network::{Endpoint, NetworkConfig as NetConfig};
use crate::protocol::{ACK, DEFAULT_MAX_FRAME_SIZE, DEFAULT_PORT};

/// Roster id of the coordinator
pub const COORDINATOR_ID: u32 = 0;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid roster: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Network settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Session roster; id 0 is the coordinator
    #[serde(default)]
    pub players: Vec<PlayerConfig>,
}

/// General configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Pending connection backlog for the coordinator
    #[serde(default = "default_listen_backlog")]
    pub listen_backlog: u32,
    /// Maximum frame payload size in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

fn default_listen_backlog() -> u32 {
    128
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_backlog: default_listen_backlog(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl NetworkConfig {
    /// Transport settings for the network layer
    pub fn to_transport(&self) -> NetConfig {
        NetConfig::default()
            .with_listen_backlog(self.listen_backlog)
            .with_max_frame_size(self.max_frame_size)
    }
}

/// One roster entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerConfig {
    pub id: u32,
    /// Role name, looked up in the role registry
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl PlayerConfig {
    pub fn new(id: u32, name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            name: name.into(),
            host: host.into(),
            port,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    pub fn is_coordinator(&self) -> bool {
        self.id == COORDINATOR_ID
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the first default location that exists
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("tunnelrpc/roster.toml")),
            Some(PathBuf::from("./tunnelrpc.toml")),
            Some(PathBuf::from("./roster.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                tracing::debug!("Loading roster from {}", path.display());
                return Self::load(path);
            }
        }

        Err(ConfigError::NotFound(PathBuf::from("roster.toml")))
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// A tally over two local voters
    pub fn sample() -> Self {
        Self {
            players: vec![
                PlayerConfig::new(COORDINATOR_ID, "Tally", "127.0.0.1", DEFAULT_PORT),
                PlayerConfig::new(1, "Voter", "127.0.0.1", DEFAULT_PORT + 1),
                PlayerConfig::new(2, "Voter", "127.0.0.1", DEFAULT_PORT + 2),
            ],
            ..Default::default()
        }
    }

    /// Check roster consistency
    pub fn validate(&self) -> ConfigResult<()> {
        // Frames must hold an acknowledgment and fit the 4-byte length
        let frame_limits = ACK.len()..=u32::MAX as usize;
        if !frame_limits.contains(&self.network.max_frame_size) {
            return Err(ConfigError::Invalid(format!(
                "max_frame_size {} is outside {}..={}",
                self.network.max_frame_size,
                frame_limits.start(),
                frame_limits.end()
            )));
        }

        let mut ids = HashSet::new();
        let mut endpoints = HashSet::new();

        for player in &self.players {
            if player.name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "player {} has an empty name",
                    player.id
                )));
            }
            if !ids.insert(player.id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate player id {}",
                    player.id
                )));
            }
            if !endpoints.insert((player.host.as_str(), player.port)) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate endpoint {}",
                    player.endpoint()
                )));
            }
        }

        if !ids.contains(&COORDINATOR_ID) {
            return Err(ConfigError::Invalid(
                "no coordinator (id 0) in roster".to_string(),
            ));
        }

        Ok(())
    }

    /// The coordinator entry
    pub fn coordinator(&self) -> Option<&PlayerConfig> {
        self.player(COORDINATOR_ID)
    }

    pub fn player(&self, id: u32) -> Option<&PlayerConfig> {
        self.players.iter().find(|p| p.id == id)
    }

    /// Players with the given role name, in roster order
    pub fn players_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a PlayerConfig> {
        self.players.iter().filter(move |p| p.name == name)
    }

    /// Non-coordinator players, in roster order
    pub fn peers(&self) -> impl Iterator<Item = &PlayerConfig> {
        self.players.iter().filter(|p| !p.is_coordinator())
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    Ok(toml::to_string_pretty(&Config::sample())?)
}
