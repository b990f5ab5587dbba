//! Engine-wide configuration
//!
//! Every tunable in the crate aggregates here, with serde defaults so
//! a partial (or absent) config file yields a fully-populated config.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::conversations::GuardConfig;
use crate::fetch::FetchConfig;
use crate::retry::RetryConfig;
use crate::sync::SyncConfig;

const CONFIG_FILE: &str = "mailsync.json";

/// Top-level configuration for the sync engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retry: RetryConfig,
    pub fetch: FetchConfig,
    pub sync: SyncConfig,
    pub guard: GuardConfig,
}

impl EngineConfig {
    /// Load from `mailsync.json` in the Vela config directory, falling
    /// back to defaults when the file does not exist.
    pub fn load() -> Result<Self> {
        if !config::config_exists(CONFIG_FILE) {
            return Ok(Self::default());
        }
        config::load_json(CONFIG_FILE)
    }

    /// Persist to the Vela config directory
    pub fn save(&self) -> Result<()> {
        config::save_json(CONFIG_FILE, self)
    }
}
