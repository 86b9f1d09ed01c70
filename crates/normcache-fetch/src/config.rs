// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fetch layer settings.

use std::time::Duration;

use normcache_config::{ConfigError, ConfigService, ConfigStore};
use serde::{Deserialize, Serialize};

/// Key the settings are stored under.
pub const CONFIG_KEY: &str = "fetch";

/// Tunables for [`FetchManager`](crate::FetchManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// How long a committed result counts as fresh, in milliseconds. While
    /// fresh, fetching the same key resolves without a network call. `0`
    /// disables the window.
    pub result_ttl_ms: u64,
}

impl FetchConfig {
    /// Freshness window as a duration.
    pub fn result_ttl(&self) -> Duration {
        Duration::from_millis(self.result_ttl_ms)
    }

    /// Load from `service`, falling back to defaults.
    pub fn load_or_default<S: ConfigStore>(service: &ConfigService<S>) -> Self {
        service.load_or_default(CONFIG_KEY)
    }

    /// Persist through `service`.
    ///
    /// # Errors
    ///
    /// Whatever the store reports.
    pub fn save<S: ConfigStore>(&self, service: &ConfigService<S>) -> Result<(), ConfigError> {
        service.save(CONFIG_KEY, self)
    }
}
