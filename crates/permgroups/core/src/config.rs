// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Configuration for the resolution engine

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on any single storage call
    pub storage_timeout: Duration,

    /// Root directory for the JSON file backend
    pub data_dir: PathBuf,

    /// Number of audit events kept in memory
    pub audit_max_events: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_timeout: Duration::from_secs(10),
            data_dir: PathBuf::from("data/permgroups"),
            audit_max_events: 10_000,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            storage_timeout: env::var("PERMGROUPS_STORAGE_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.storage_timeout),

            data_dir: env::var("PERMGROUPS_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),

            audit_max_events: env::var("PERMGROUPS_AUDIT_MAX_EVENTS").ok().and_then(|v| v.parse().ok()).unwrap_or(defaults.audit_max_events),
        }
    }

    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_override_defaults() {
        let config = EngineConfig::default().with_storage_timeout(Duration::from_millis(250)).with_data_dir("/tmp/perms");

        assert_eq!(config.storage_timeout, Duration::from_millis(250));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/perms"));
        assert_eq!(config.audit_max_events, 10_000);
    }

    #[test]
    fn test_from_env_falls_back_on_invalid_values() {
        unsafe {
            env::set_var("PERMGROUPS_STORAGE_TIMEOUT_MS", "soon");
            env::set_var("PERMGROUPS_AUDIT_MAX_EVENTS", "many");
        }

        let config = EngineConfig::from_env();
        let defaults = EngineConfig::default();
        assert_eq!(config.storage_timeout, defaults.storage_timeout);
        assert_eq!(config.audit_max_events, defaults.audit_max_events);

        unsafe {
            env::set_var("PERMGROUPS_AUDIT_MAX_EVENTS", "25");
        }
        assert_eq!(EngineConfig::from_env().audit_max_events, 25);

        unsafe {
            env::remove_var("PERMGROUPS_STORAGE_TIMEOUT_MS");
            env::remove_var("PERMGROUPS_AUDIT_MAX_EVENTS");
        }
    }
}
