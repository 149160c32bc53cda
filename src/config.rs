use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "config.ini";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(alias = "Network")]
    pub network: Network,
    #[serde(alias = "Credentials")]
    pub credentials: Credentials,
    #[serde(alias = "Email")]
    pub email: Email,
    #[serde(default, alias = "Schedule")]
    pub schedule: Schedule,
    #[serde(default, alias = "Dev")]
    pub dev: Dev,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    /// Portal authentication endpoint.
    pub login_url: String,
    /// Known-good URL that answers 200 when the internet is reachable.
    pub check_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
    pub sender_email: String,
    /// For QQ mail this is the SMTP authorization code, not the account password.
    pub sender_password: String,
    pub receiver_email: String,
    pub smtp_server: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    /// Normal check interval.
    /// In minutes.
    #[serde(default = "default_interval")]
    pub interval: u64,

    /// Retry interval while a high-frequency burst is active.
    /// In seconds.
    #[serde(default = "default_high_frequency_interval")]
    pub high_frequency_interval: u64,

    /// How long a burst lasts before falling back to the normal interval.
    /// In minutes.
    #[serde(default = "default_high_frequency_duration")]
    pub high_frequency_duration: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dev {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_interval() -> u64 {
    10
}

fn default_high_frequency_interval() -> u64 {
    30
}

fn default_high_frequency_duration() -> u64 {
    10
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            high_frequency_interval: default_high_frequency_interval(),
            high_frequency_duration: default_high_frequency_duration(),
        }
    }
}

impl Default for Dev {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Schedule {
    pub fn normal_period(&self) -> Duration {
        Duration::from_secs(self.interval.saturating_mul(60))
    }

    pub fn high_frequency_period(&self) -> Duration {
        Duration::from_secs(self.high_frequency_interval)
    }

    /// Every interval and the burst length must be non-zero.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        for (key, value) in [
            ("interval", self.interval),
            ("high_frequency_interval", self.high_frequency_interval),
            ("high_frequency_duration", self.high_frequency_duration),
        ] {
            if value == 0 {
                return Err(config::ConfigError::Message(format!(
                    "schedule.{key} must be greater than zero"
                )));
            }
        }
        Ok(())
    }

    pub fn burst_duration(&self) -> Duration {
        Duration::from_secs(self.high_frequency_duration.saturating_mul(60))
    }
}

impl Dev {
    /// Maps the INI log level names onto tracing's levels.
    /// Unknown names fall back to INFO.
    pub fn level_filter(&self) -> tracing::level_filters::LevelFilter {
        use tracing::level_filters::LevelFilter;

        match self.log_level.trim().to_ascii_uppercase().as_str() {
            "TRACE" => LevelFilter::TRACE,
            "DEBUG" => LevelFilter::DEBUG,
            "INFO" => LevelFilter::INFO,
            "WARN" | "WARNING" => LevelFilter::WARN,
            "ERROR" | "CRITICAL" => LevelFilter::ERROR,
            _ => LevelFilter::INFO,
        }
    }
}

impl Config {
    /// Reads and validates the INI file at `path`.
    /// A missing file is an error.
    pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
        let config: Self = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Ini))
            .build()?
            .try_deserialize()?;
        config.schedule.validate()?;
        Ok(config)
    }
}

/// Directory holding `config.ini` and `logs/`.
///
/// This is the executable's directory when it contains a config file,
/// otherwise the current working directory.
pub fn base_dir() -> PathBuf {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));

    match exe_dir {
        Some(dir) if dir.join(CONFIG_FILE_NAME).is_file() => dir,
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}
