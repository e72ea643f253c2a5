// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving application settings.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bluetooth::{framer::DEFAULT_MAX_LINE_LENGTH, DEFAULT_FALLBACK_CHANNEL};

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scanner selection.
    pub scanner: ScannerConfig,

    /// Connection manager tuning.
    pub link: LinkConfig,

    /// Automatic reconnect policy.
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Address of the paired scanner, e.g. "00:11:22:AA:BB:CC".
    pub device_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Upper bound on one connection handshake.
    pub connect_timeout_ms: u64,

    /// Minimum spacing between the start of two connection attempts.
    pub retry_cooldown_ms: u64,

    /// Pause after cancelling discovery before opening the stream.
    pub discovery_settle_ms: u64,

    /// Size of each read from the stream.
    pub read_buffer_size: usize,

    /// Longest partial line kept while waiting for a terminator.
    pub max_line_length: usize,

    /// RFCOMM channel tried after the service record lookup fails.
    /// `None` disables the fallback.
    pub fallback_channel: Option<u8>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 30_000,
            retry_cooldown_ms: 3_000,
            discovery_settle_ms: 300,
            read_buffer_size: 1024,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            fallback_channel: Some(DEFAULT_FALLBACK_CHANNEL),
        }
    }
}

impl LinkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_cooldown(&self) -> Duration {
        Duration::from_millis(self.retry_cooldown_ms)
    }

    pub fn discovery_settle(&self) -> Duration {
        Duration::from_millis(self.discovery_settle_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Automatic retries before giving up.
    pub max_attempts: u32,

    /// Wait before each retry.
    pub delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_ms: 3_000,
        }
    }
}

impl ReconnectConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Config {
    /// Default location of the configuration file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("spp-scanner")
            .join("config.toml")
    }

    /// Load configuration from the default file or create it.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from `path`, writing defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
