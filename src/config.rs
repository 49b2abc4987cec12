//! Link configuration.
//!
//! A fixed record loaded from TOML. Unknown keys are rejected at load so a
//! typo fails fast instead of silently configuring nothing.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::state::is_valid_server_name;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("io error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("sid must be exactly 3 characters, got {0:?}")]
    InvalidSid(String),

    #[error("hostname {0:?} is not a valid server name")]
    InvalidHostname(String),
}

/// Per-link configuration record.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Our server name as announced to the uplink.
    pub hostname: String,
    /// Password we send in our `SERVER` introduction.
    pub sendpass: String,
    /// Password the uplink must present in its `SERVER` introduction.
    pub recvpass: String,
    /// Our 3-character SID.
    pub sid: String,
    /// Channels the default pseudoclient joins.
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub bot: BotConfig,
}

/// Bot settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BotConfig {
    /// Command prefix. Loaded for forward compatibility; PRIVMSG sent
    /// directly to the pseudoclient dispatches regardless of prefix.
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        BotConfig {
            prefix: default_prefix(),
        }
    }
}

fn default_prefix() -> String {
    "!".to_string()
}

impl Config {
    /// Load and validate a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate a TOML configuration string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sid.len() != 3 {
            return Err(ConfigError::InvalidSid(self.sid.clone()));
        }
        if !is_valid_server_name(&self.hostname) {
            return Err(ConfigError::InvalidHostname(self.hostname.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = r##"
        hostname = "services.example"
        sendpass = "sendpass"
        recvpass = "recvpass"
        sid = "0AL"
        channels = ["#services", "#opers"]

        [bot]
        prefix = "!"
    "##;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(GOOD).unwrap();
        assert_eq!(config.sid, "0AL");
        assert_eq!(config.channels, vec!["#services", "#opers"]);
        assert_eq!(config.bot.prefix, "!");
    }

    #[test]
    fn test_defaults() {
        let config = Config::parse(
            r#"
            hostname = "services.example"
            sendpass = "a"
            recvpass = "b"
            sid = "0AL"
        "#,
        )
        .unwrap();
        assert!(config.channels.is_empty());
        assert_eq!(config.bot.prefix, "!");
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result = Config::parse(
            r#"
            hostname = "services.example"
            sendpass = "a"
            recvpass = "b"
            sid = "0AL"
            hostnme = "typo.example"
        "#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_bad_sid_rejected() {
        let result = Config::parse(
            r#"
            hostname = "services.example"
            sendpass = "a"
            recvpass = "b"
            sid = "0ALX"
        "#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidSid(_))));
    }
}
