use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{BusBuddyError, channel::ReconnectPolicy, presence::PresenceConfig};

const CONFIG_FILE_NAME: &str = "config.json";
const DEFAULT_SERVER_ADDRESS: &str = "127.0.0.1:4000";
const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub server_address: String,
    pub driver_id: String,
    pub auth_token: Option<String>,
    pub bus_id: Option<String>,
    pub route: Option<String>,
    /// Fixed session id; a fresh one is generated for every start when unset
    pub session_id: Option<String>,
    pub require_notification_permission: bool,
    pub tick_interval_ms: u64,
    pub presence: PresenceConfig,
    pub reconnect: ReconnectPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_address: DEFAULT_SERVER_ADDRESS.to_string(),
            driver_id: "driver".to_string(),
            auth_token: None,
            bus_id: None,
            route: None,
            session_id: None,
            require_notification_permission: true,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            presence: PresenceConfig::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl AppConfig {
    pub fn default_path() -> Result<PathBuf, BusBuddyError> {
        Ok(dirs::config_dir()
            .ok_or(BusBuddyError::NoConfigDir)?
            .join("busbuddy")
            .join(CONFIG_FILE_NAME))
    }

    /// Load the config from the user's config directory. `Ok(None)` when there is none yet.
    pub fn from_local_file() -> Result<Option<Self>, BusBuddyError> {
        Self::from_path(&Self::default_path()?)
    }

    pub fn from_path(config_path: &Path) -> Result<Option<Self>, BusBuddyError> {
        if !config_path.exists() {
            debug!("No config file at {:?}", config_path);
            return Ok(None);
        }

        let file = std::fs::File::open(config_path)
            .map_err(|e| BusBuddyError::ConfigIOError { source: e })?;
        serde_json::from_reader(file)
            .map(Some)
            .map_err(|e| BusBuddyError::ConfigSerializeError { source: e })
    }

    pub fn save(&self) -> Result<PathBuf, BusBuddyError> {
        let config_path = Self::default_path()?;
        self.save_to(&config_path)?;
        Ok(config_path)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<(), BusBuddyError> {
        if let Some(parent) = config_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| BusBuddyError::ConfigIOError { source: e })?;
            }
        }

        let file = std::fs::File::create(config_path)
            .map_err(|e| BusBuddyError::ConfigIOError { source: e })?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| BusBuddyError::ConfigSerializeError { source: e })
    }
}
