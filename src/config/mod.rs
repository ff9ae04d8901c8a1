pub mod central_config;
pub mod log_config;

use std::path::Path;

use anyhow::{Context, Result};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::config::central_config::CentralConfig;
use crate::config::log_config::LogConfig;

const CONFIG_FILE_NAME: &str = "ble_central_config.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub central: CentralConfig,
    pub log: LogConfig,
}

impl AppConfig {
    /// Loads the config from `config_dir`, or the defaults when there is none.
    pub async fn load_config<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let file_path = config_dir.as_ref().join(CONFIG_FILE_NAME);
        let file_path_str = file_path.to_string_lossy().into_owned();

        if !file_path.exists() {
            warn!(
                "Config file not found at {:?}, using default.",
                file_path_str
            );
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(&file_path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Config loaded from {:?}", file_path_str);
        Ok(config)
    }

    /// Saves the config to `config_dir`, creating the directory if needed.
    pub async fn save_config<P: AsRef<Path>>(&self, config_dir: P) -> Result<()> {
        let config_dir = config_dir.as_ref();
        fs::create_dir_all(config_dir)
            .await
            .with_context(|| format!("creating config directory {}", config_dir.display()))?;

        let file_path = config_dir.join(CONFIG_FILE_NAME);
        let file_path_str = file_path.to_string_lossy().into_owned();

        let config_json = match serde_json::to_string_pretty(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(&file_path, config_json).await?;

        info!("Config saved to {:?}.", file_path_str);
        Ok(())
    }
}
