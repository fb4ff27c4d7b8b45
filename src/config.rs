// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Ledger configuration.
//!
//! Every field has a default, so an empty YAML document is a valid config.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading a [`LedgerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Runtime settings for the ledger.
///
/// Every field has a default, so an empty or partial YAML document is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// How often a blocked row-lock waiter re-checks its context.
    pub lock_poll_interval_ms: u64,
    /// Page size used when a filter asks for limit 0.
    pub default_page_limit: u32,
    /// Upper bound on any requested page size.
    pub max_page_limit: u32,
    /// Default `tracing` filter for the command-line driver.
    pub log_level: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_poll_interval_ms: 10,
            default_page_limit: 10,
            max_page_limit: 100,
            log_level: "info".to_string(),
        }
    }
}

impl LedgerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_yields_defaults() {
        assert_eq!(LedgerConfig::from_yaml("").unwrap(), LedgerConfig::default());
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let config = LedgerConfig::from_yaml("max_page_limit: 25\nlog_level: debug\n").unwrap();
        assert_eq!(config.max_page_limit, 25);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.default_page_limit, 10);
        assert_eq!(config.lock_poll_interval(), Duration::from_millis(10));
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        assert!(matches!(
            LedgerConfig::from_yaml("max_page_limit: [1, 2"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = LedgerConfig::load("/nonexistent/stock-ledger.yaml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn zero_poll_interval_is_clamped() {
        let config = LedgerConfig {
            lock_poll_interval_ms: 0,
            ..LedgerConfig::default()
        };
        assert_eq!(config.lock_poll_interval(), Duration::from_millis(1));
    }
}
