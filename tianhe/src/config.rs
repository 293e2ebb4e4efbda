// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

#![allow(clippy::module_name_repetitions)]

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, ErrorKind};

/// Broker section in config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Seconds to wait for the CONNECT packet after the underlying transport
    /// is established. An endpoint that stays silent longer is dropped.
    ///
    /// Set to 0 to disable. Default is 60s.
    #[serde(default = "BrokerConfig::default_connect_timeout")]
    connect_timeout: u64,

    /// Milliseconds to wait between receiving DISCONNECT and actually
    /// closing the connection in the broker. Used by tests to keep the
    /// endpoint observable after the disconnect.
    ///
    /// Default is 0, close immediately.
    #[serde(default = "BrokerConfig::default_disconnect_delay")]
    disconnect_delay: u64,

    /// Whether PINGREQ packets are answered with PINGRESP.
    ///
    /// Disabled only by keep-alive tests. Default is true.
    #[serde(default = "BrokerConfig::default_pingresp")]
    pingresp: bool,
}

impl BrokerConfig {
    #[must_use]
    pub const fn default_connect_timeout() -> u64 {
        60
    }

    #[must_use]
    pub const fn default_disconnect_delay() -> u64 {
        0
    }

    #[must_use]
    pub const fn default_pingresp() -> bool {
        true
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Option<Duration> {
        if self.connect_timeout == 0 {
            None
        } else {
            Some(Duration::from_secs(self.connect_timeout))
        }
    }

    pub fn set_connect_timeout(&mut self, seconds: u64) -> &mut Self {
        self.connect_timeout = seconds;
        self
    }

    #[must_use]
    pub const fn disconnect_delay(&self) -> Option<Duration> {
        if self.disconnect_delay == 0 {
            None
        } else {
            Some(Duration::from_millis(self.disconnect_delay))
        }
    }

    pub fn set_disconnect_delay(&mut self, millis: u64) -> &mut Self {
        self.disconnect_delay = millis;
        self
    }

    #[must_use]
    pub const fn pingresp(&self) -> bool {
        self.pingresp
    }

    pub fn set_pingresp(&mut self, pingresp: bool) -> &mut Self {
        self.pingresp = pingresp;
        self
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Self::default_connect_timeout(),
            disconnect_delay: Self::default_disconnect_delay(),
            pingresp: Self::default_pingresp(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Off,

    Error,

    Warn,

    Info,

    Debug,

    Trace,
}

/// Log section in config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Also print log to console.
    ///
    /// Default is true.
    #[serde(default = "LogConfig::default_console_log")]
    console_log: bool,

    #[serde(default = "LogConfig::default_log_file")]
    log_file: PathBuf,

    /// Default is info.
    #[serde(default = "LogConfig::default_log_level")]
    log_level: LogLevel,
}

impl LogConfig {
    #[must_use]
    pub const fn default_console_log() -> bool {
        true
    }

    #[must_use]
    pub fn default_log_file() -> PathBuf {
        PathBuf::from("tianhe.log")
    }

    #[must_use]
    pub const fn default_log_level() -> LogLevel {
        LogLevel::Info
    }

    #[must_use]
    pub const fn console_log(&self) -> bool {
        self.console_log
    }

    #[must_use]
    pub fn log_file(&self) -> &Path {
        self.log_file.as_path()
    }

    #[must_use]
    pub const fn log_level(&self) -> LogLevel {
        self.log_level
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_log: Self::default_console_log(),
            log_file: Self::default_log_file(),
            log_level: Self::default_log_level(),
        }
    }
}

/// Top level config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    broker: BrokerConfig,

    #[serde(default)]
    log: LogConfig,
}

impl Config {
    /// Load config from a toml file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            Error::from_string(
                ErrorKind::ConfigError,
                format!("Failed to read config file {path:?}, err: {err}"),
            )
        })?;
        toml::from_str(&content).map_err(|err| {
            Error::from_string(
                ErrorKind::ConfigError,
                format!("Invalid toml config file {path:?}, err: {err}"),
            )
        })
    }

    #[must_use]
    pub const fn broker(&self) -> &BrokerConfig {
        &self.broker
    }

    pub fn broker_mut(&mut self) -> &mut BrokerConfig {
        &mut self.broker
    }

    #[must_use]
    pub const fn log(&self) -> &LogConfig {
        &self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.broker().connect_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.broker().disconnect_delay(), None);
        assert!(config.broker().pingresp());
    }

    #[test]
    fn test_parse_config() {
        let config: Config = toml::from_str(
            r#"
[broker]
connect_timeout = 0
disconnect_delay = 150
pingresp = false

[log]
log_level = "debug"
"#,
        )
        .unwrap();
        assert_eq!(config.broker().connect_timeout(), None);
        assert_eq!(
            config.broker().disconnect_delay(),
            Some(Duration::from_millis(150))
        );
        assert!(!config.broker().pingresp());
        assert_eq!(config.log().log_level(), LogLevel::Debug);
    }
}
