use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use ini::Ini;
use thiserror::Error;

use crate::launcher::{LauncherConfig, STARTUP_DELAY};

pub const CONFIG_FILE_NAME: &str = "jobqueue.ini";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub health_port: u16,
    pub launch_frequency: u64,
    /// Minutes a job may run before the watchdog alerts.
    pub max_runtime: u64,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 28082,
            health_port: 8888,
            launch_frequency: 5,
            max_runtime: 60,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load(config_dir: &Path) -> Result<Config, ConfigError> {
        let path = config_file_path(config_dir);
        if !path.exists() {
            return Ok(Config::default());
        }

        let ini = Ini::load_from_file(&path)?;
        Config::from_ini(&ini)
    }

    pub fn from_ini(ini: &Ini) -> Result<Config, ConfigError> {
        let mut config = Config::default();

        if let Some(section) = ini.section(Some("jobqueue")) {
            if let Some(v) = section.get("enabled") {
                config.enabled = parse_bool(v).ok_or_else(|| invalid(
                    "jobqueue",
                    "enabled",
                    v,
                    "expected true/false, yes/no, on/off or 1/0",
                ))?;
            }
            if let Some(v) = section.get("host") {
                let v = v.trim();
                if !v.is_empty() {
                    config.host = v.to_string();
                }
            }
            if let Some(v) = section.get("port") {
                config.port = parse_number("jobqueue", "port", v)?;
            }
            if let Some(v) = section.get("healthport") {
                config.health_port = parse_number("jobqueue", "healthport", v)?;
            }
            // Historic spelling first, corrected spelling wins when both are set.
            for key in ["lauchfrequency", "launchfrequency"] {
                if let Some(v) = section.get(key) {
                    config.launch_frequency = parse_number("jobqueue", key, v)?;
                }
            }
            if let Some(v) = section.get("loglevel") {
                let v = v.trim();
                if !v.is_empty() {
                    config.log_level = v.to_string();
                }
            }
        }

        if let Some(section) = ini.section(Some("settings")) {
            if let Some(v) = section.get("maxruntime") {
                config.max_runtime = parse_number("settings", "maxruntime", v)?;
            }
        }

        Ok(config)
    }

    pub fn queue_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn launcher_config(&self) -> LauncherConfig {
        LauncherConfig {
            startup_delay: STARTUP_DELAY,
            poll_interval: Duration::from_secs(self.launch_frequency),
            max_runtime: Duration::from_secs(self.max_runtime.saturating_mul(60)),
        }
    }
}

pub fn config_file_path(config_dir: &Path) -> PathBuf {
    config_dir.join(CONFIG_FILE_NAME)
}

fn parse_number<T: FromStr>(section: &str, key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, "expected a non-negative integer"))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
