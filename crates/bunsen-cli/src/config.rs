//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Configuration for bunsen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model identifier sent to the provider
    pub model: String,
    /// Provider base URL
    pub base_url: String,
    /// OpenAI API key (environment variable is preferred)
    pub api_key: Option<String>,
    /// Directory holding uploaded dataset files
    pub data_dir: PathBuf,
    /// Directory where generated plots land
    pub plots_dir: PathBuf,
    /// Directory for the sandbox virtual environment
    pub venv_dir: PathBuf,
    /// Web path prefix plots are served under
    pub web_plots_prefix: String,
    /// Ceiling on model/tool round trips per query
    pub max_rounds: u32,
    /// Path of the usage accounting log
    pub usage_log: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            data_dir: PathBuf::from("uploads"),
            plots_dir: PathBuf::from("plots"),
            venv_dir: PathBuf::from("venvs"),
            web_plots_prefix: "/static/plots".to_string(),
            max_rounds: 50,
            usage_log: None,
        }
    }
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bunsen")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("BUNSEN_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }
        Config::default().save()?;
        Ok(path)
    }

    /// API key from config or environment
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key {
            return Some(key.clone());
        }
        std::env::var("OPENAI_API_KEY").ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_round_trips_through_toml() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&toml).unwrap();
        assert_eq!(back.model, "gpt-4o");
        assert_eq!(back.max_rounds, 50);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str("model = \"gpt-4o-mini\"").unwrap();
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.base_url, "https://api.openai.com/v1");
    }
}
