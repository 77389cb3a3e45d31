use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::BridgeError;

pub const BIND_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8081;
pub const DEFAULT_DATA_DIR: &str = "./bridge-data";
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 50;
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub tick_interval_ms: u64,
    pub wait_timeout_ms: u64,
    pub max_body_bytes: usize,
    pub client_url: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            wait_timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            client_url: None,
        }
    }
}

impl BridgeConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn bind_addr(&self) -> String {
        format!("{BIND_HOST}:{}", self.port)
    }

    /// Defaults, overlaid by an optional JSON file, overlaid by the environment.
    pub fn load(file: Option<&Path>) -> Result<Self, BridgeError> {
        let mut config = match file {
            Some(path) => load_config_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<(), BridgeError> {
        if let Some(port) = env_parsed::<u16>("HOSTBRIDGE_PORT")? {
            self.port = port;
        }
        if let Some(dir) = env_optional("HOSTBRIDGE_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(ms) = env_parsed::<u64>("HOSTBRIDGE_WAIT_TIMEOUT_MS")? {
            self.wait_timeout_ms = ms;
        }
        Ok(())
    }
}

pub fn load_config_file(path: &Path) -> Result<BridgeConfig, BridgeError> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| BridgeError::Config(format!("read {}: {e}", path.display())))?;
    serde_json::from_str(&data)
        .map_err(|e| BridgeError::Config(format!("parse {}: {e}", path.display())))
}

pub fn env_optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Result<Option<T>, BridgeError> {
    match env_optional(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| BridgeError::Config(format!("Invalid {name}: {value}"))),
        None => Ok(None),
    }
}
