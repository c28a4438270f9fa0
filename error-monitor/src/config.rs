//! Static configuration.
//!
//! The configuration is read once at startup from a TOML file. Every section
//! is optional and falls back to its defaults, so an absent file yields a
//! monitor with batching enabled and no mail delivery configured.
//!
//! Secrets and deployment knobs may be overridden from the environment:
//! - `ERROR_MONITOR_SMTP_PASSWORD`
//! - `ERROR_MONITOR_ADMIN_TOKEN`
//! - `ERROR_MONITOR_BIND_ADDRESS`
//! - `ERROR_MONITOR_PORT`

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Default configuration file name, resolved relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "error-monitor.toml";

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub general: GeneralSettings,
    pub smtp_settings: SmtpSettings,
    pub notification_filtering: NotificationFiltering,
    pub rate_limit_batching: RateLimitBatching,
    pub server: ServerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Master switch; when off the monitor never builds its services.
    pub enable_monitoring: bool,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            enable_monitoring: true,
        }
    }
}

/// SMTP relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpSettings {
    /// SMTP server host.
    pub smtp_server: String,
    /// SMTP server port.
    pub smtp_port: u16,
    /// SMTP login.
    pub smtp_username: String,
    /// SMTP password or API key.
    pub smtp_password: String,
    /// Envelope sender. Falls back to `smtp_username` when unset.
    pub sender_address: Option<String>,
    /// Require an encrypted session: implicit TLS on 465, mandatory STARTTLS
    /// otherwise. A relay without STARTTLS then fails the send.
    pub enable_ssl: bool,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            smtp_server: String::new(),
            smtp_port: 587,
            smtp_username: String::new(),
            smtp_password: String::new(),
            sender_address: None,
            enable_ssl: true,
        }
    }
}

impl SmtpSettings {
    /// Address placed in the `From` header.
    pub fn sender(&self) -> &str {
        self.sender_address
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.smtp_username)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationFiltering {
    /// Every report is delivered to all of these addresses in one message.
    pub recipient_emails: Vec<String>,
}

/// Rate limiting and batching knobs for the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitBatching {
    pub max_emails_per_hour: u32,
    pub enable_batching: bool,
    pub batch_window_seconds: u64,
}

impl Default for RateLimitBatching {
    fn default() -> Self {
        Self {
            max_emails_per_hour: 10,
            enable_batching: true,
            batch_window_seconds: 60,
        }
    }
}

/// HTTP host settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_address: String,
    pub port: u16,
    /// Bearer token required by the admin routes. Admin routes are open when unset.
    pub admin_token: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 12600,
            admin_token: None,
        }
    }
}

impl MonitorConfig {
    /// Load the configuration file, apply environment overrides and validate.
    ///
    /// A missing file is not an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            let config = Self::from_toml_str(&raw)?;
            info!(path = %path.display(), "Loaded configuration file");
            config
        } else {
            warn!(path = %path.display(), "Configuration file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply environment overrides using `lookup` to resolve variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(password) = lookup("ERROR_MONITOR_SMTP_PASSWORD")
            && !password.is_empty()
        {
            debug!("SMTP password taken from environment");
            self.smtp_settings.smtp_password = password;
        }

        if let Some(token) = lookup("ERROR_MONITOR_ADMIN_TOKEN")
            && !token.trim().is_empty()
        {
            self.server.admin_token = Some(token.trim().to_string());
        }

        if let Some(bind_address) = lookup("ERROR_MONITOR_BIND_ADDRESS")
            && !bind_address.trim().is_empty()
        {
            self.server.bind_address = bind_address.trim().to_string();
        }

        if let Some(port) = lookup("ERROR_MONITOR_PORT") {
            match port.trim().parse::<u16>() {
                Ok(parsed) => self.server.port = parsed,
                Err(e) => warn!(value = %port, error = %e, "Ignoring invalid ERROR_MONITOR_PORT"),
            }
        }
    }

    /// Reject values the aggregator cannot run with.
    pub fn validate(&self) -> Result<()> {
        let batching = &self.rate_limit_batching;
        if batching.enable_batching && batching.batch_window_seconds == 0 {
            return Err(Error::config(
                "rate_limit_batching.batch_window_seconds must be greater than 0 when batching is enabled",
            ));
        }
        if self.server.bind_address.trim().is_empty() {
            return Err(Error::config("server.bind_address must not be empty"));
        }
        Ok(())
    }
}
