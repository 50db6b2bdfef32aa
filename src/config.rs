//! Configuration types.
//!
//! Built once at startup from environment variables and handed to the
//! transport and the mail dispatcher by reference.

use std::path::PathBuf;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default location for stored screenshots.
pub const DEFAULT_ATTACHMENTS_DIR: &str = "./data/attachments";

/// Telegram Bot API settings.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    /// Base URL of the Bot API (overridable for tests and self-hosted servers).
    pub api_base: String,
    /// Long-poll timeout for `getUpdates`.
    pub poll_timeout_secs: u64,
}

/// SMTP submission settings.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    /// Account used to log in; also the `From` address.
    pub address: String,
    /// Support mailbox that receives incident reports.
    pub destination: String,
    pub password: SecretString,
}

/// Complete application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub telegram: TelegramConfig,
    pub mail: MailConfig,
    pub attachments_dir: PathBuf,
    /// When set, logs are also written to a daily-rolling file here.
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String, ConfigError> {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };

        let telegram = TelegramConfig {
            bot_token: SecretString::from(required("TELEGRAM_BOT_TOKEN")?),
            api_base: lookup("TELEGRAM_API_BASE")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "https://api.telegram.org".to_string()),
            poll_timeout_secs: parse_or(&lookup, "TELEGRAM_POLL_TIMEOUT_SECS", 30)?,
        };

        let mail = MailConfig {
            smtp_host: required("MAIL_SMTP_HOST")?,
            smtp_port: parse_or(&lookup, "MAIL_SMTP_PORT", 587)?,
            address: required("MAIL_ADDRESS")?,
            destination: required("MAIL_DESTINATION")?,
            password: SecretString::from(required("MAIL_PASSWORD")?),
        };

        let attachments_dir = lookup("INCIDENT_ATTACHMENTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ATTACHMENTS_DIR));

        let log_dir = lookup("INCIDENT_LOG_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            telegram,
            mail,
            attachments_dir,
            log_dir,
        })
    }

    /// Create the attachment and log directories if they do not exist yet.
    pub fn prepare_dirs(&self) -> Result<(), ConfigError> {
        let dirs = std::iter::once(&self.attachments_dir).chain(self.log_dir.as_ref());
        for dir in dirs {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.display().to_string(),
                source,
            })?;
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}
